//! Console state shared between the input loop and blocking command workers.

use std::sync::{Arc, Mutex};

use conductor_orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Tab that plain (unprefixed) lines are routed to.
    current_tab: Arc<Mutex<Option<String>>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            current_tab: Arc::new(Mutex::new(None)),
        }
    }

    pub fn current_tab(&self) -> Option<String> {
        self.current_tab
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_current_tab(&self, tab: Option<String>) {
        *self.current_tab.lock().unwrap_or_else(|e| e.into_inner()) = tab;
    }
}
