use anyhow::{bail, Result};

use crate::state::AppState;

/// Route `text` and wait for the reply.
///
/// A `tab:` prefix only selects a tab that is live; otherwise the whole
/// `line` goes to the current tab.
pub fn send(state: &AppState, tab: Option<&str>, text: &str, line: &str) -> Result<String> {
    let orchestrator = &state.orchestrator;
    let (tab, text) = match tab {
        Some(tab) if orchestrator.session_info(tab).is_some() => (tab.to_string(), text.to_string()),
        Some(prefix) => match state.current_tab() {
            Some(current) => (current, line.to_string()),
            None => bail!("no session on tab {prefix}; start one with /new {prefix}"),
        },
        None => match state.current_tab() {
            Some(current) => (current, text.to_string()),
            None => bail!("no current tab; start one with /new <tab>"),
        },
    };

    let session_id = orchestrator.route_message(&tab, &text)?;
    let timeout = orchestrator.config().response_timeout();
    match orchestrator.await_response(&session_id, timeout)? {
        Some(reply) => Ok(format!("[{tab}] {reply}")),
        None => Ok(format!("[{tab}] (no response within {}s)", timeout.as_secs())),
    }
}
