use std::thread;
use std::time::{Duration, Instant};

use conductor_pty::Driver;

/// Poll `driver` until its screen is non-empty and unchanged across two
/// consecutive captures, or until `timeout` passes. Returns whether the
/// screen settled.
pub fn wait_until_settled(
    driver: &mut dyn Driver,
    poll: Duration,
    timeout: Duration,
    lines: usize,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut previous: Option<String> = None;

    loop {
        match driver.capture(lines) {
            Ok(Some(screen)) if !screen.trim().is_empty() => {
                if previous.as_deref() == Some(screen.as_str()) {
                    return true;
                }
                previous = Some(screen);
            }
            Ok(Some(_)) => previous = None,
            Ok(None) => return false,
            Err(e) => log::debug!("readiness: capture failed: {e}"),
        }

        if Instant::now() + poll > deadline {
            return false;
        }
        thread::sleep(poll);
    }
}
