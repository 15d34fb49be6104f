//! Detection of interactive permission prompts that can be answered with
//! "1" + Enter.

use regex::{Regex, RegexBuilder};

use crate::extract::after_echo;

/// Case-insensitive prompt patterns, matched against the joined screen tail.
const PROMPT_PATTERNS: &[&str] = &[
    r"❯\s*1\.\s*yes",
    r"do you want to proceed\?",
    r"bash command.*\n.*yes.*\n.*no",
    r"\b(approve|permission|confirm|continue)\b.*\?",
    r"\b(yes|no|y/n)\b.*\?",
    r"press\s+(1|enter|y)",
    r"\[1\].*yes",
    r"1\).*yes",
    r"1\..*yes",
    r"(execute|run|perform).*\?",
    r"would you like to.*\?",
    r"are you sure.*\?",
];

/// Words that make a `❯` selection cursor count as a prompt when they appear
/// within two lines of it.
const CURSOR_CONTEXT: &[&str] = &["yes", "1.", "proceed", "approve"];
const CURSOR: char = '❯';
const CURSOR_WINDOW: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPrompt {
    /// The pattern that fired.
    pub pattern: String,
    pub matched: String,
}

pub struct ApprovalDetector {
    patterns: Vec<Regex>,
}

impl ApprovalDetector {
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_extra(&[])
    }

    pub fn with_extra(extra: &[String]) -> Result<Self, regex::Error> {
        let patterns = PROMPT_PATTERNS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Look for a prompt in the last `scan_lines` lines of `screen`.
    pub fn detect(&self, screen: &str, scan_lines: usize) -> Option<ApprovalPrompt> {
        self.detect_after_input(screen, scan_lines, None)
    }

    /// Like [`detect`](Self::detect), but only lines after the echo of
    /// `typed` are considered. A question the user typed is not a prompt.
    pub fn detect_after_input(
        &self,
        screen: &str,
        scan_lines: usize,
        typed: Option<&str>,
    ) -> Option<ApprovalPrompt> {
        let lines: Vec<&str> = screen.lines().collect();
        let tail = &lines[lines.len().saturating_sub(scan_lines)..];
        let tail = match typed {
            Some(typed) => after_echo(tail, typed),
            None => tail,
        };

        if let Some(prompt) = cursor_prompt(tail) {
            return Some(prompt);
        }

        let text = tail.join("\n");
        self.patterns.iter().find_map(|re| {
            re.find(&text).map(|m| ApprovalPrompt {
                pattern: re.as_str().to_string(),
                matched: m.as_str().to_string(),
            })
        })
    }
}

fn cursor_prompt(lines: &[&str]) -> Option<ApprovalPrompt> {
    lines.iter().enumerate().find_map(|(i, line)| {
        if !line.contains(CURSOR) {
            return None;
        }
        let lo = i.saturating_sub(CURSOR_WINDOW);
        let hi = (i + CURSOR_WINDOW + 1).min(lines.len());
        let window = lines[lo..hi].join("\n").to_lowercase();
        CURSOR_CONTEXT
            .iter()
            .any(|word| window.contains(word))
            .then(|| ApprovalPrompt {
                pattern: CURSOR.to_string(),
                matched: line.trim().to_string(),
            })
    })
}
