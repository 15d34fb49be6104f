use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pty_driver::PtyDriverFactory;
use crate::tmux::TmuxDriverFactory;

/// Errors from driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{0} is not installed or not on PATH")]
    NotInstalled(String),

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("driver I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Named keystrokes a driver knows how to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Enter,
    /// Control-U: discard whatever is typed on the current input line.
    ClearLine,
    Down,
}

impl Key {
    /// Bytes a terminal sends for this key.
    pub fn bytes(self) -> &'static [u8] {
        match self {
            Key::Enter => b"\r",
            Key::ClearLine => b"\x15",
            Key::Down => b"\x1b[B",
        }
    }

    /// Key name as understood by `tmux send-keys`.
    pub fn tmux_name(self) -> &'static str {
        match self {
            Key::Enter => "Enter",
            Key::ClearLine => "C-u",
            Key::Down => "Down",
        }
    }
}

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub env: Vec<(String, String)>,
}

impl SpawnSpec {
    pub fn new(command: impl Into<String>, working_dir: impl AsRef<Path>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: working_dir.as_ref().to_path_buf(),
            cols: 120,
            rows: 40,
            env: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Fail early with [`DriverError::NotInstalled`] when the command cannot
    /// be found, instead of letting the backend report something vaguer.
    pub(crate) fn check_command(&self) -> Result<(), DriverError> {
        if self.command.contains('/') {
            if Path::new(&self.command).exists() {
                return Ok(());
            }
        } else if which::which(&self.command).is_ok() {
            return Ok(());
        }
        Err(DriverError::NotInstalled(self.command.clone()))
    }
}

/// One running interactive process, exclusively owned by one session.
///
/// Implementations terminate their process when dropped.
pub trait Driver: Send {
    /// Clear the input line, type `text` literally, then press Enter.
    fn send_line(&mut self, text: &str) -> Result<(), DriverError> {
        self.send_key(Key::ClearLine)?;
        self.send_literal(text)?;
        self.send_key(Key::Enter)
    }

    /// Type `text` without any key translation.
    fn send_literal(&mut self, text: &str) -> Result<(), DriverError>;

    fn send_key(&mut self, key: Key) -> Result<(), DriverError>;

    /// The last `lines` lines of the screen, or `None` once the process has
    /// exited.
    fn capture(&mut self, lines: usize) -> Result<Option<String>, DriverError>;

    fn is_alive(&mut self) -> bool;

    /// Best-effort kill. Never fails; calling it twice is harmless.
    fn terminate(&mut self);
}

/// Spawns drivers of one backend.
pub trait DriverFactory: Send + Sync {
    fn backend(&self) -> Backend;

    /// `name` is a short unique hint the backend may use to label the
    /// process (the tmux session name, the reader thread name).
    fn spawn(&self, spec: &SpawnSpec, name: &str) -> Result<Box<dyn Driver>, DriverError>;
}

/// Which driver implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Tmux,
    Pty,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Tmux => f.write_str("tmux"),
            Backend::Pty => f.write_str("pty"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tmux" => Ok(Backend::Tmux),
            "pty" | "pexpect" => Ok(Backend::Pty),
            other => Err(format!("unknown backend '{other}' (expected tmux or pty)")),
        }
    }
}

pub fn factory_for(backend: Backend) -> Arc<dyn DriverFactory> {
    match backend {
        Backend::Tmux => Arc::new(TmuxDriverFactory),
        Backend::Pty => Arc::new(PtyDriverFactory),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse_and_display() {
        assert_eq!("tmux".parse::<Backend>(), Ok(Backend::Tmux));
        assert_eq!("PTY".parse::<Backend>(), Ok(Backend::Pty));
        assert!("screen".parse::<Backend>().is_err());
        assert_eq!(Backend::Pty.to_string(), "pty");
    }

    #[test]
    fn test_factory_for_matches_backend() {
        assert_eq!(factory_for(Backend::Tmux).backend(), Backend::Tmux);
        assert_eq!(factory_for(Backend::Pty).backend(), Backend::Pty);
    }

    #[test]
    fn test_check_command() {
        assert!(SpawnSpec::new("/bin/sh", "/").check_command().is_ok());
        assert!(SpawnSpec::new("sh", "/").check_command().is_ok());

        let missing = SpawnSpec::new("definitely-not-a-real-cli-xyz", "/").check_command();
        assert!(matches!(missing, Err(DriverError::NotInstalled(cmd)) if cmd == "definitely-not-a-real-cli-xyz"));
    }

    #[test]
    fn test_key_bytes() {
        assert_eq!(Key::ClearLine.bytes(), &[0x15]);
        assert_eq!(Key::Enter.tmux_name(), "Enter");
    }
}
