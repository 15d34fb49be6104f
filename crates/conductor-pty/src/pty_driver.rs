//! PTY-backed driver: the child's output is parsed by a `VtTerminal` on a
//! dedicated reader thread, and captures read the rendered text.
//!
//! PTY reads block, so the reader is pulled out of the handle before the
//! shared state is put behind its mutex. The reader thread only takes the
//! lock for the moment it takes to feed a chunk into the emulator.

use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};

use conductor_vt::VtTerminal;

use crate::driver::{Backend, Driver, DriverError, DriverFactory, Key, SpawnSpec};
use crate::pty::PtyHandle;

struct PtyState {
    vt: VtTerminal,
    pty: PtyHandle,
}

pub struct PtyDriver {
    state: Arc<Mutex<PtyState>>,
    terminated: bool,
}

impl PtyDriver {
    pub fn spawn(spec: &SpawnSpec, name: &str) -> Result<Self, DriverError> {
        let mut pty = PtyHandle::spawn(spec)?;
        let reader = pty
            .take_reader()
            .ok_or_else(|| DriverError::Spawn("PTY reader unavailable".to_string()))?;

        let state = Arc::new(Mutex::new(PtyState {
            vt: VtTerminal::new(spec.cols, spec.rows),
            pty,
        }));

        let thread_state = Arc::clone(&state);
        std::thread::Builder::new()
            .name(format!("pty-io-{name}"))
            .spawn(move || io_loop(thread_state, reader))?;

        log::debug!("pty: spawned {} for {name}", spec.command);
        Ok(Self {
            state,
            terminated: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PtyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), DriverError> {
        if self.terminated {
            return Err(DriverError::Send("driver terminated".to_string()));
        }
        self.lock()
            .pty
            .write(data)
            .map_err(|e| DriverError::Send(e.to_string()))
    }
}

fn io_loop(state: Arc<Mutex<PtyState>>, mut reader: Box<dyn Read + Send>) {
    let mut buf = [0u8; 65536];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => n,
            // EIO once the child exits.
            Err(_) => return,
        };

        let mut state = match state.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        state.vt.write(&buf[..n]);
        for reply in state.vt.take_pty_writes() {
            if state.pty.write(reply.as_bytes()).is_err() {
                return;
            }
        }
    }
}

impl Driver for PtyDriver {
    fn send_literal(&mut self, text: &str) -> Result<(), DriverError> {
        self.write(text.as_bytes())
    }

    fn send_key(&mut self, key: Key) -> Result<(), DriverError> {
        self.write(key.bytes())
    }

    fn capture(&mut self, lines: usize) -> Result<Option<String>, DriverError> {
        let mut state = self.lock();
        if self.terminated || !state.pty.is_alive() {
            return Ok(None);
        }
        Ok(Some(state.vt.screen().last_lines(lines).join("\n")))
    }

    fn is_alive(&mut self) -> bool {
        !self.terminated && self.lock().pty.is_alive()
    }

    fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.lock().pty.kill();
        }
    }
}

impl Drop for PtyDriver {
    fn drop(&mut self) {
        self.terminate();
    }
}

pub struct PtyDriverFactory;

impl DriverFactory for PtyDriverFactory {
    fn backend(&self) -> Backend {
        Backend::Pty
    }

    fn spawn(&self, spec: &SpawnSpec, name: &str) -> Result<Box<dyn Driver>, DriverError> {
        Ok(Box::new(PtyDriver::spawn(spec, name)?))
    }
}
