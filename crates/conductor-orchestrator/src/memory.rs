//! Rebuilding conversation context for a freshly spawned session.

/// Characters kept from each remembered message.
pub const ENTRY_CHARS: usize = 100;

const CONTEXT_PREFIX: &str = "Previous conversation context:";
const CONTEXT_SUFFIX: &str = "Please continue based on this context.";

/// Condense `(role, text)` pairs, oldest first, into a single-line summary.
pub fn build_context<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    entries
        .into_iter()
        .map(|(role, text)| {
            let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
            let mut entry: String = flat.chars().take(ENTRY_CHARS).collect();
            if flat.chars().count() > ENTRY_CHARS {
                entry.push_str("...");
            }
            format!("{role}: {entry}")
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// The line sent to a new session to restore `context`, or `None` when
/// there is nothing to restore.
pub fn priming_message(context: &str) -> Option<String> {
    if context.trim().is_empty() {
        return None;
    }
    Some(format!("{CONTEXT_PREFIX} {context} {CONTEXT_SUFFIX}"))
}
