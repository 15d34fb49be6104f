use std::path::{Path, PathBuf};
use std::time::Duration;

use conductor_pty::{Backend, Key, SpawnSpec};
use serde::{Deserialize, Serialize};

/// What to do when `create_session` is called for a tab that is already live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingTabPolicy {
    /// Hand back the live session untouched.
    #[default]
    Reuse,
    /// Tear the live session down and spawn a fresh one.
    Respawn,
}

/// Orchestrator configuration, usually loaded from `~/.conductor/config.toml`.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_sessions: usize,
    /// Messages kept in memory per session. Storage keeps everything.
    pub history_limit: usize,
    /// Persisted messages replayed into a recreated tab.
    pub context_messages: usize,
    /// Consecutive failures tolerated before a session is respawned.
    pub error_threshold: u32,
    pub existing_tab: ExistingTabPolicy,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Rows idle for longer than this are pruned from storage.
    pub retention_hours: u64,
    pub capture_lines: usize,
    pub response_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub ready_timeout_ms: u64,
    pub approval: ApprovalConfig,
    pub driver: DriverConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            history_limit: 20,
            context_messages: 10,
            error_threshold: 3,
            existing_tab: ExistingTabPolicy::default(),
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
            retention_hours: 24,
            capture_lines: 100,
            response_timeout_secs: 10,
            poll_interval_ms: 500,
            ready_timeout_ms: 10_000,
            approval: ApprovalConfig::default(),
            driver: DriverConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub cooldown_ms: u64,
    pub scan_lines: usize,
    /// Additional case-insensitive regexes treated as permission prompts.
    pub extra_patterns: Vec<String>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 500,
            cooldown_ms: 2_000,
            scan_lines: 50,
            extra_patterns: Vec::new(),
        }
    }
}

/// How each session's process is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub backend: Backend,
    pub command: String,
    pub args: Vec<String>,
    /// Defaults to the current directory.
    pub working_dir: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
    /// Keys sent once the screen has settled, e.g. to accept a trust dialog.
    pub startup_keys: Vec<Key>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            command: "claude".to_string(),
            args: Vec::new(),
            working_dir: None,
            cols: 120,
            rows: 40,
            startup_keys: vec![Key::Down, Key::Enter],
        }
    }
}

impl DriverConfig {
    pub fn spawn_spec(&self) -> SpawnSpec {
        let dir = self
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        SpawnSpec::new(self.command.clone(), dir)
            .args(self.args.iter().cloned())
            .size(self.cols, self.rows)
    }
}

impl OrchestratorConfig {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Self::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Validation(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 || self.approval.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll and approval intervals must be non-zero".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sweep_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.capture_lines == 0 {
            return Err(ConfigError::Validation(
                "capture_lines must be at least 1".to_string(),
            ));
        }
        if self.driver.command.trim().is_empty() {
            return Err(ConfigError::Validation("driver.command is empty".to_string()));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn approval_interval(&self) -> Duration {
        Duration::from_millis(self.approval.interval_ms)
    }

    pub fn approval_cooldown(&self) -> Duration {
        Duration::from_millis(self.approval.cooldown_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}
