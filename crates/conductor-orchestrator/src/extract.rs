//! Pulling the assistant's reply back out of rendered screen text.
//!
//! The screen is not a protocol, so everything here is heuristic. It sits
//! behind [`ResponseExtractor`] so a structured source can replace it without
//! touching the orchestrator.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A captured screen plus the input that was last typed into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenText {
    pub text: String,
    pub last_input: Option<String>,
}

pub trait ResponseExtractor: Send + Sync {
    fn extract(&self, screen: &ScreenText) -> Option<String>;
}

/// UI chrome fragments. A line containing any of them is never part of a reply.
const CHROME: &[&str] = &[
    "│", "╭", "╰", "╮", "╯", "─", "┃", "━", "⏵", "tokens", "esc to interrupt", "auto-accept",
    "? for shortcuts",
];

const BULLETS: &[char] = &['●', '⏺'];

const PROMPT_MARKERS: &[char] = &['>', '❯', '$', '│'];

/// Echo lookups only use the start of the input; long inputs wrap.
const ECHO_MATCH_CHARS: usize = 40;

fn strip_markers(line: &str) -> &str {
    line.trim_start_matches(|c: char| PROMPT_MARKERS.contains(&c) || c.is_whitespace())
}

/// Index of the line where `input` was echoed back after being typed.
///
/// Lines that start with a prompt marker win over bare lines, so a reply
/// line that happens to begin with the input is not taken for the echo.
/// Bare lines only count when no marked echo is on screen (a tty echoing
/// into `cat`).
pub(crate) fn find_echo(lines: &[&str], input: &str) -> Option<usize> {
    let input = input.trim();
    let first_line = input.lines().next()?;
    let needle: String = first_line.chars().take(ECHO_MATCH_CHARS).collect();
    if needle.is_empty() {
        return None;
    }

    let marked = lines.iter().rposition(|line| {
        let line = line.trim_start();
        line.starts_with(PROMPT_MARKERS) && strip_markers(line).starts_with(needle.as_str())
    });
    marked.or_else(|| {
        lines
            .iter()
            .rposition(|line| line.trim_start().starts_with(needle.as_str()))
    })
}

/// The lines that follow the last echo of `input`, or the whole screen when
/// the echo is not visible.
pub(crate) fn after_echo<'a>(lines: &'a [&'a str], input: &str) -> &'a [&'a str] {
    match find_echo(lines, input) {
        Some(echo) => &lines[echo + 1..],
        None => lines,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScreenScrapeExtractor;

impl ScreenScrapeExtractor {
    fn is_turn_marker(line: &str) -> bool {
        line.starts_with('>') || line.starts_with("Human:") || line == "$" || line.starts_with("$ ")
    }

    fn is_chrome(line: &str) -> bool {
        CHROME.iter().any(|c| line.contains(c))
    }
}

impl ResponseExtractor for ScreenScrapeExtractor {
    fn extract(&self, screen: &ScreenText) -> Option<String> {
        let input = screen.last_input.as_deref()?.trim();
        let lines: Vec<&str> = screen.text.lines().collect();
        let echo = find_echo(&lines, input)?;

        let mut parts: Vec<&str> = Vec::new();
        for line in &lines[echo + 1..] {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if Self::is_turn_marker(line) {
                break;
            }
            if Self::is_chrome(line) || line == input {
                continue;
            }
            let line = line.trim_start_matches(BULLETS).trim_start();
            if !line.is_empty() {
                parts.push(line);
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Elapsed time and token count shown in the assistant's status footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub elapsed_secs: Option<u64>,
    pub tokens: u64,
}

fn usage_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:(\d+)s\s*·\s*[⚒↑↓]\s*)?(\d[\d,]*)\s*tokens").ok())
        .as_ref()
}

/// The last usage footer on the screen, if any.
pub fn parse_usage(screen: &str) -> Option<UsageStats> {
    let caps = usage_regex()?.captures_iter(screen).last()?;
    let tokens = caps.get(2)?.as_str().replace(',', "").parse().ok()?;
    let elapsed_secs = caps.get(1).and_then(|m| m.as_str().parse().ok());
    Some(UsageStats {
        elapsed_secs,
        tokens,
    })
}
