use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Requested,
    Idle,
    Replaced,
    Shutdown,
}

/// Lifecycle notifications. Lagging subscribers miss events; the
/// orchestrator never waits for them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    SessionCreated {
        session_id: String,
        tab_id: String,
        label: Option<String>,
    },
    MessageRouted {
        session_id: String,
        tab_id: String,
        text: String,
    },
    ResponseCaptured {
        session_id: String,
        tab_id: String,
        text: String,
    },
    ApprovalSent {
        session_id: String,
        tab_id: String,
        matched: String,
    },
    SessionRecovered {
        session_id: String,
        tab_id: String,
    },
    SessionClosed {
        session_id: String,
        tab_id: String,
        reason: CloseReason,
    },
}

pub(crate) struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: OrchestratorEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }
}
