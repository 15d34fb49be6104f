use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use crate::driver::{DriverError, SpawnSpec};

/// Owns a portable-pty child process, master pair, reader, and writer.
pub struct PtyHandle {
    /// Closing the master hangs up the child, so it lives as long as we do.
    _master: Box<dyn MasterPty + Send>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn `spec.command` inside a new PTY of the requested size.
    pub fn spawn(spec: &SpawnSpec) -> Result<Self, DriverError> {
        spec.check_command()?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| DriverError::Spawn(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        cmd.cwd(&spec.working_dir);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| DriverError::Spawn(format!("failed to spawn {}: {e}", spec.command)))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| DriverError::Spawn(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| DriverError::Spawn(format!("failed to take writer: {e}")))?;

        Ok(Self {
            _master: pair.master,
            reader: Some(reader),
            writer,
            child,
        })
    }

    /// Write bytes to the PTY master (input -> child).
    pub fn write(&mut self, data: &[u8]) -> Result<(), DriverError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Extract the blocking reader so it can live on a dedicated thread.
    ///
    /// Returns `None` if it was already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    pub fn is_alive(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Kill the child. Errors are ignored; it may already be gone.
    pub fn kill(&mut self) {
        if self.is_alive() {
            if let Err(e) = self.child.kill() {
                log::debug!("pty: kill failed (child probably exited): {e}");
            }
            let _ = self.child.try_wait();
        }
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn sh() -> SpawnSpec {
        SpawnSpec::new("/bin/sh", "/tmp").size(80, 24)
    }

    #[test]
    fn test_spawn_pty() {
        let handle = PtyHandle::spawn(&sh());
        assert!(handle.is_ok(), "Failed to spawn PTY: {:?}", handle.err());
        let mut handle = handle.unwrap();
        assert!(handle.is_alive());
    }

    #[test]
    fn test_spawn_missing_binary() {
        let spec = SpawnSpec::new("no-such-conductor-binary", "/tmp");
        assert!(matches!(PtyHandle::spawn(&spec), Err(DriverError::NotInstalled(_))));
    }

    #[test]
    fn test_write_read_echo_in_working_dir() {
        let mut handle = PtyHandle::spawn(&sh()).unwrap();
        let mut reader = handle.take_reader().unwrap();
        assert!(handle.take_reader().is_none());

        handle.write(b"echo CONDUCTOR_$(pwd)\n").unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 || tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        });

        let mut output = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Ok(chunk) = rx.recv_timeout(Duration::from_millis(100)) {
                output.extend_from_slice(&chunk);
                if String::from_utf8_lossy(&output).contains("CONDUCTOR_/tmp") {
                    break;
                }
            }
        }

        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("CONDUCTOR_/tmp"), "unexpected output: {text}");
    }

    #[test]
    fn test_kill() {
        let mut handle = PtyHandle::spawn(&sh()).unwrap();
        handle.kill();

        let deadline = Instant::now() + Duration::from_secs(3);
        while handle.is_alive() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!handle.is_alive());
        // Second kill is a no-op.
        handle.kill();
    }
}
