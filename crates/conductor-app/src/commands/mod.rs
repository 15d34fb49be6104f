//! Console commands. Each one runs on a blocking worker because orchestrator
//! calls wait on driver I/O.

pub mod chat;
pub mod session;

use anyhow::Result;

use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New { tab: String, label: Option<String> },
    Close { tab: String },
    List,
    History { tab: Option<String> },
    Use { tab: String },
    /// `tab` is only a candidate: `note: hi` is plain text unless `note` is
    /// live, in which case the untouched `line` is sent instead.
    Send {
        tab: Option<String>,
        text: String,
        line: String,
    },
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  /new <tab> [label]   start a session on <tab>
  /close <tab>         end the session on <tab>
  /use <tab>           route plain lines to <tab>
  /list                show live sessions
  /history [tab]       show recent messages
  /quit                close everything and exit
  <tab>: text          send text to <tab>
  text                 send text to the current tab";

/// Parse one input line. `Ok(None)` for blank lines.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(parse_text(line)));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let arg = words.next().map(str::to_string);
    let tail = words.collect::<Vec<_>>().join(" ");

    let require = |arg: Option<String>| arg.ok_or_else(|| format!("usage: /{name} <tab>"));
    let command = match name {
        "new" => Command::New {
            tab: require(arg)?,
            label: (!tail.is_empty()).then_some(tail),
        },
        "close" => Command::Close { tab: require(arg)? },
        "use" => Command::Use { tab: require(arg)? },
        "list" | "ls" => Command::List,
        "history" => Command::History { tab: arg },
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command /{other} (try /help)")),
    };
    Ok(Some(command))
}

fn parse_text(line: &str) -> Command {
    if let Some((prefix, text)) = line.split_once(':') {
        let prefix = prefix.trim();
        let text = text.trim();
        if !prefix.is_empty() && !prefix.contains(char::is_whitespace) && !text.is_empty() {
            return Command::Send {
                tab: Some(prefix.to_string()),
                text: text.to_string(),
                line: line.to_string(),
            };
        }
    }
    Command::Send {
        tab: None,
        text: line.to_string(),
        line: line.to_string(),
    }
}

/// Run a command and return what to print.
pub fn execute(state: &AppState, command: Command) -> Result<String> {
    match command {
        Command::New { tab, label } => session::new_session(state, &tab, label.as_deref()),
        Command::Close { tab } => session::close_session(state, &tab),
        Command::Use { tab } => session::use_tab(state, &tab),
        Command::List => Ok(session::list_sessions(state)),
        Command::History { tab } => session::history(state, tab.as_deref()),
        Command::Send { tab, text, line } => chat::send(state, tab.as_deref(), &text, &line),
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(tab: Option<&str>, text: &str, line: &str) -> Command {
        Command::Send {
            tab: tab.map(str::to_string),
            text: text.to_string(),
            line: line.to_string(),
        }
    }

    #[test]
    fn test_parse_slash_commands() {
        assert_eq!(
            parse("/new tabA my demo tab").unwrap(),
            Some(Command::New {
                tab: "tabA".to_string(),
                label: Some("my demo tab".to_string())
            })
        );
        assert_eq!(
            parse("/new b").unwrap(),
            Some(Command::New {
                tab: "b".to_string(),
                label: None
            })
        );
        assert_eq!(parse("  /list ").unwrap(), Some(Command::List));
        assert_eq!(parse("/history").unwrap(), Some(Command::History { tab: None }));
        assert_eq!(parse("/quit").unwrap(), Some(Command::Quit));
        assert_eq!(parse("").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("/close").unwrap_err().contains("usage"));
        assert!(parse("/frobnicate").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn test_parse_text_lines() {
        assert_eq!(
            parse("tabA: 2+2?").unwrap(),
            Some(send(Some("tabA"), "2+2?", "tabA: 2+2?"))
        );
        assert_eq!(
            parse("what is 2+2?").unwrap(),
            Some(send(None, "what is 2+2?", "what is 2+2?"))
        );
        assert_eq!(
            parse("note that: colons happen").unwrap(),
            Some(send(None, "note that: colons happen", "note that: colons happen"))
        );
        assert_eq!(
            parse("see http://x").unwrap(),
            Some(send(None, "see http://x", "see http://x"))
        );
        assert_eq!(parse("tabA:").unwrap(), Some(send(None, "tabA:", "tabA:")));
    }
}
