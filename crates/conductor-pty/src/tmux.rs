//! tmux-backed driver: each driver is a detached tmux session, so a human can
//! `tmux attach -t <name>` and watch the same screen conductor is reading.

use std::process::{Command, Output};

use crate::driver::{Backend, Driver, DriverError, DriverFactory, Key, SpawnSpec};

const TMUX: &str = "tmux";

/// Session names must be valid tmux targets: no dots or colons.
pub fn session_name(hint: &str) -> String {
    let cleaned: String = hint
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("conductor_{cleaned}")
}

fn run(args: &[&str]) -> Result<Output, DriverError> {
    Command::new(TMUX).args(args).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DriverError::NotInstalled(TMUX.to_string())
        } else {
            DriverError::Io(e)
        }
    })
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

pub struct TmuxDriver {
    name: String,
    terminated: bool,
}

impl TmuxDriver {
    pub fn spawn(spec: &SpawnSpec, hint: &str) -> Result<Self, DriverError> {
        which::which(TMUX).map_err(|_| DriverError::NotInstalled(TMUX.to_string()))?;
        spec.check_command()?;

        let name = session_name(hint);
        // A leftover session with the same name would swallow our keys.
        let _ = run(&["kill-session", "-t", name.as_str()]);

        let cols = spec.cols.to_string();
        let rows = spec.rows.to_string();
        let dir = spec.working_dir.to_string_lossy().into_owned();
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let mut args: Vec<&str> = vec![
            "new-session",
            "-d",
            "-s",
            name.as_str(),
            "-x",
            cols.as_str(),
            "-y",
            rows.as_str(),
            "-c",
            dir.as_str(),
        ];
        for pair in &env {
            args.push("-e");
            args.push(pair.as_str());
        }
        args.push(spec.command.as_str());
        args.extend(spec.args.iter().map(String::as_str));

        let output = run(&args)?;
        if !output.status.success() {
            return Err(DriverError::Spawn(format!(
                "tmux new-session exited with {}: {}",
                output.status,
                stderr_of(&output)
            )));
        }

        log::debug!("tmux: started session {name} running {}", spec.command);
        Ok(Self {
            name,
            terminated: false,
        })
    }

    fn send_keys(&self, keys: &[&str]) -> Result<(), DriverError> {
        if self.terminated {
            return Err(DriverError::Send("driver terminated".to_string()));
        }
        let mut args = vec!["send-keys", "-t", self.name.as_str()];
        args.extend_from_slice(keys);

        let output = run(&args).map_err(|e| DriverError::Send(e.to_string()))?;
        if !output.status.success() {
            return Err(DriverError::Send(stderr_of(&output)));
        }
        Ok(())
    }
}

impl Driver for TmuxDriver {
    fn send_literal(&mut self, text: &str) -> Result<(), DriverError> {
        self.send_keys(&["-l", "--", text])
    }

    fn send_key(&mut self, key: Key) -> Result<(), DriverError> {
        self.send_keys(&[key.tmux_name()])
    }

    fn capture(&mut self, lines: usize) -> Result<Option<String>, DriverError> {
        if !self.is_alive() {
            return Ok(None);
        }

        let start = format!("-{lines}");
        let output = run(&["capture-pane", "-p", "-t", self.name.as_str(), "-S", start.as_str()])
            .map_err(|e| DriverError::Capture(e.to_string()))?;
        if !output.status.success() {
            return Err(DriverError::Capture(stderr_of(&output)));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut rows: Vec<&str> = text.lines().map(str::trim_end).collect();
        while rows.last().is_some_and(|r| r.is_empty()) {
            rows.pop();
        }
        let skip = rows.len().saturating_sub(lines);
        Ok(Some(rows[skip..].join("\n")))
    }

    fn is_alive(&mut self) -> bool {
        if self.terminated {
            return false;
        }
        matches!(run(&["has-session", "-t", self.name.as_str()]), Ok(out) if out.status.success())
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        match run(&["kill-session", "-t", self.name.as_str()]) {
            Ok(out) if !out.status.success() => {
                log::debug!("tmux: kill-session {}: {}", self.name, stderr_of(&out));
            }
            Err(e) => log::debug!("tmux: kill-session {}: {e}", self.name),
            Ok(_) => {}
        }
    }
}

impl Drop for TmuxDriver {
    fn drop(&mut self) {
        self.terminate();
    }
}

pub struct TmuxDriverFactory;

impl DriverFactory for TmuxDriverFactory {
    fn backend(&self) -> Backend {
        Backend::Tmux
    }

    fn spawn(&self, spec: &SpawnSpec, name: &str) -> Result<Box<dyn Driver>, DriverError> {
        Ok(Box::new(TmuxDriver::spawn(spec, name)?))
    }
}
