use conductor_pty::DriverError;
use thiserror::Error;

/// Errors surfaced to callers of the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session limit reached: {max} sessions are already live")]
    CapacityExceeded { max: usize },

    #[error("failed to spawn session for tab '{tab_id}': {source}")]
    Spawn {
        tab_id: String,
        #[source]
        source: DriverError,
    },

    #[error("no such session: {0}")]
    NoSuchSession(String),

    #[error("tab '{0}' is already being spawned")]
    SpawnInProgress(String),

    #[error("sending to tab '{tab_id}' failed: {source}")]
    SendFailure {
        tab_id: String,
        #[source]
        source: DriverError,
    },

    #[error("capturing session '{session_id}' failed: {source}")]
    CaptureFailure {
        session_id: String,
        #[source]
        source: DriverError,
    },

    #[error("invalid approval pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
