//! conductor-orchestrator: runs up to a handful of interactive assistant
//! sessions side by side, one per caller-chosen tab.
//!
//! # Architecture
//!
//! ```text
//!  caller ──route_message(tab)──▶ Orchestrator ──send_line──▶ Driver (tmux / pty)
//!         ◀──capture_response──       │        ◀──capture───
//!                                     │
//!                 ┌───────────────────┼────────────────────┐
//!                 ▼                   ▼                    ▼
//!          ResponseExtractor   ApprovalDetector      SessionStore (SQLite)
//! ```
//!
//! The registry maps tab ids to `Arc<Mutex<Session>>`. Each session owns its
//! driver, so a slow capture on one tab never blocks another. A background
//! maintenance task (see [`maintenance`]) evicts idle sessions and answers
//! permission prompts.

pub mod approval;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod maintenance;
pub mod memory;
pub mod orchestrator;
pub mod readiness;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use approval::{ApprovalDetector, ApprovalPrompt};
pub use config::{ConfigError, DriverConfig, ExistingTabPolicy, OrchestratorConfig};
pub use error::OrchestratorError;
pub use events::{CloseReason, OrchestratorEvent};
pub use extract::{ResponseExtractor, ScreenScrapeExtractor, ScreenText, UsageStats};
pub use maintenance::{start_maintenance, MaintenanceHandle};
pub use orchestrator::Orchestrator;
pub use session::{Message, Role, SessionInfo, SessionState};
pub use store::SessionStore;
