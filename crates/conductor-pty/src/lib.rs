//! conductor-pty: drivers that run an interactive CLI and let conductor type
//! into it and read its screen back.
//!
//! # Architecture
//!
//! - [`Driver`]: send text/keys, capture the last N screen lines, terminate.
//! - [`PtyDriver`]: a `portable-pty` child whose output is rendered through
//!   a `VtTerminal`, so captures are plain text.
//! - [`TmuxDriver`]: a detached tmux session addressed by name; captures are
//!   whatever `capture-pane` prints.
//! - [`DriverFactory`]: spawns drivers for one backend; the orchestrator only
//!   sees this trait.

pub mod driver;
pub mod pty;
pub mod pty_driver;
pub mod tmux;

pub use driver::{factory_for, Backend, Driver, DriverError, DriverFactory, Key, SpawnSpec};
pub use pty::PtyHandle;
pub use pty_driver::{PtyDriver, PtyDriverFactory};
pub use tmux::{TmuxDriver, TmuxDriverFactory};
