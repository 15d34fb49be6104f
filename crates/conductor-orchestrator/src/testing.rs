//! Scripted in-memory driver for orchestrator tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use conductor_pty::{Backend, Driver, DriverError, DriverFactory, Key, SpawnSpec};

pub type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Literal(String),
    Key(Key),
}

pub struct FakeState {
    pub screen: Vec<String>,
    pub input: String,
    pub sent: Vec<Sent>,
    pub alive: bool,
    /// Upcoming sends that fail.
    pub fail_sends: usize,
    /// Upcoming captures that fail.
    pub fail_captures: usize,
    responder: Responder,
}

impl FakeState {
    /// Lines submitted with Enter, in order.
    pub fn submitted(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = String::new();
        for sent in &self.sent {
            match sent {
                Sent::Literal(text) => current.push_str(text),
                Sent::Key(Key::ClearLine) => current.clear(),
                Sent::Key(Key::Enter) => lines.push(std::mem::take(&mut current)),
                Sent::Key(Key::Down) => {}
            }
        }
        lines
    }
}

pub fn default_responder() -> Responder {
    Arc::new(|line: &str| match line {
        "2+2?" => Some("4".to_string()),
        l if l.starts_with("Previous conversation context:") => Some("Understood.".to_string()),
        other => Some(format!("ack {other}")),
    })
}

/// A driver whose "screen" is a list of lines. Submitting a line with Enter
/// echoes it as `> line` and appends the responder's reply as `● reply`.
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    pub fn new() -> (Self, Arc<Mutex<FakeState>>) {
        Self::with_responder(default_responder())
    }

    pub fn with_responder(responder: Responder) -> (Self, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState {
            screen: vec!["Welcome to the fake assistant".to_string()],
            input: String::new(),
            sent: Vec::new(),
            alive: true,
            fail_sends: 0,
            fail_captures: 0,
            responder,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

fn check_send(state: &mut FakeState) -> Result<(), DriverError> {
    if !state.alive {
        return Err(DriverError::Send("process exited".to_string()));
    }
    if state.fail_sends > 0 {
        state.fail_sends -= 1;
        return Err(DriverError::Send("scripted send failure".to_string()));
    }
    Ok(())
}

impl Driver for FakeDriver {
    fn send_literal(&mut self, text: &str) -> Result<(), DriverError> {
        self.with_state(|s| {
            check_send(s)?;
            s.input.push_str(text);
            s.sent.push(Sent::Literal(text.to_string()));
            Ok(())
        })
    }

    fn send_key(&mut self, key: Key) -> Result<(), DriverError> {
        self.with_state(|s| {
            check_send(s)?;
            s.sent.push(Sent::Key(key));
            match key {
                Key::ClearLine => s.input.clear(),
                Key::Enter => {
                    let line = std::mem::take(&mut s.input);
                    if !line.is_empty() {
                        s.screen.push(format!("> {line}"));
                        if let Some(reply) = (s.responder)(&line) {
                            s.screen.push(format!("● {reply}"));
                        }
                    }
                }
                Key::Down => {}
            }
            Ok(())
        })
    }

    fn capture(&mut self, lines: usize) -> Result<Option<String>, DriverError> {
        self.with_state(|s| {
            if s.fail_captures > 0 {
                s.fail_captures -= 1;
                return Err(DriverError::Capture("scripted capture failure".to_string()));
            }
            if !s.alive {
                return Ok(None);
            }
            let skip = s.screen.len().saturating_sub(lines);
            Ok(Some(s.screen[skip..].join("\n")))
        })
    }

    fn is_alive(&mut self) -> bool {
        self.with_state(|s| s.alive)
    }

    fn terminate(&mut self) {
        self.with_state(|s| s.alive = false);
    }
}

/// Hands out `FakeDriver`s and keeps every spawned driver's state so tests
/// can script and inspect them.
pub struct FakeFactory {
    pub spawned: Mutex<Vec<Arc<Mutex<FakeState>>>>,
    pub fail_spawn: AtomicBool,
    responder: Responder,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Self::with_responder(default_responder())
    }

    pub fn with_responder(responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            spawned: Mutex::new(Vec::new()),
            fail_spawn: AtomicBool::new(false),
            responder,
        })
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    /// State of the `index`th driver spawned.
    pub fn driver(&self, index: usize) -> Arc<Mutex<FakeState>> {
        Arc::clone(&self.spawned.lock().unwrap()[index])
    }
}

impl DriverFactory for FakeFactory {
    fn backend(&self) -> Backend {
        Backend::Pty
    }

    fn spawn(&self, spec: &SpawnSpec, _name: &str) -> Result<Box<dyn Driver>, DriverError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(DriverError::NotInstalled(spec.command.clone()));
        }
        let (driver, state) = FakeDriver::with_responder(Arc::clone(&self.responder));
        self.spawned.lock().unwrap().push(state);
        Ok(Box::new(driver))
    }
}
