//! Stdin reader on a dedicated OS thread.
//!
//! Reading stdin blocks, so lines are forwarded into a tokio channel and the
//! async main loop never waits on the terminal directly.

use std::io::BufRead;

use tokio::sync::mpsc;

/// Start reading lines from stdin. The channel closes on EOF or read error.
pub fn start_input_thread() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel::<String>(32);
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::warn!("stdin: read failed: {e}");
                        return;
                    }
                };
                if tx.blocking_send(line).is_err() {
                    return;
                }
            }
        })?;
    Ok(rx)
}
