use anyhow::{bail, Result};

use crate::state::AppState;

pub fn new_session(state: &AppState, tab: &str, label: Option<&str>) -> Result<String> {
    let session_id = state.orchestrator.create_session(tab, label)?;
    state.set_current_tab(Some(tab.to_string()));
    Ok(format!("session {session_id} ready on tab {tab}"))
}

pub fn close_session(state: &AppState, tab: &str) -> Result<String> {
    state.orchestrator.cleanup_session(tab)?;
    if state.current_tab().as_deref() == Some(tab) {
        state.set_current_tab(None);
    }
    Ok(format!("closed tab {tab}"))
}

pub fn use_tab(state: &AppState, tab: &str) -> Result<String> {
    if state.orchestrator.session_info(tab).is_none() {
        bail!("no session on tab {tab}");
    }
    state.set_current_tab(Some(tab.to_string()));
    Ok(format!("now talking to {tab}"))
}

pub fn list_sessions(state: &AppState) -> String {
    let orchestrator = &state.orchestrator;
    let infos = orchestrator.list_sessions();
    if infos.is_empty() {
        return "no live sessions".to_string();
    }
    let current = state.current_tab();
    let mut lines: Vec<String> = infos
        .iter()
        .map(|info| {
            let marker = if current.as_deref() == Some(info.tab_id.as_str()) { '*' } else { ' ' };
            let mut line = format!(
                "{marker} {:<12} {:<10} {:>3} msgs {:>2} errs  up {}s",
                info.tab_id,
                format!("{:?}", info.state).to_lowercase(),
                info.message_count,
                info.error_count,
                info.uptime_secs,
            );
            if let Some(usage) = info.usage {
                line.push_str(&format!("  {} tokens", usage.tokens));
            }
            if let Some(label) = &info.label {
                line.push_str(&format!("  ({label})"));
            }
            line
        })
        .collect();
    lines.push(format!(
        "{}/{} sessions",
        orchestrator.session_count(),
        orchestrator.config().max_sessions
    ));
    lines.join("\n")
}

pub fn history(state: &AppState, tab: Option<&str>) -> Result<String> {
    let Some(tab) = tab.map(str::to_string).or_else(|| state.current_tab()) else {
        bail!("no current tab; use /history <tab>");
    };
    let messages = state.orchestrator.history(&tab)?;
    if messages.is_empty() {
        return Ok(format!("no messages on {tab} yet"));
    }
    Ok(messages
        .iter()
        .map(|m| {
            format!(
                "[{}] {}: {}",
                m.timestamp.format("%H:%M:%S"),
                m.role.as_str(),
                m.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}
