//! Per-tab session record. A `Session` exclusively owns its driver.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::Instant;

use chrono::{DateTime, Utc};
use conductor_db::SessionRecord;
use conductor_pty::Driver;
use serde::{Deserialize, Serialize};

use crate::extract::UsageStats;

/// `Spawning → Ready → Busy ⇄ Idle → Evicted`, with `Recovering` while a
/// failed driver is being replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Spawning,
    Ready,
    Busy,
    Idle,
    Recovering,
    Evicted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Serializable snapshot of a session for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub tab_id: String,
    pub label: Option<String>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub uptime_secs: i64,
    pub usage: Option<UsageStats>,
}

pub struct Session {
    pub session_id: String,
    pub tab_id: String,
    pub label: Option<String>,
    pub(crate) driver: Box<dyn Driver>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub state: SessionState,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub usage: Option<UsageStats>,
    pub(crate) memory_context: String,
    pub(crate) last_input: Option<String>,
    pub(crate) last_approval: Option<Instant>,
    pub(crate) last_approved_screen: Option<u64>,
    /// Store row of the current turn's reply, rewritten while it grows.
    pub(crate) reply_row: Option<i64>,
    last_seen: Instant,
    messages: VecDeque<Message>,
    history_limit: usize,
    /// Replies already returned since the last routed message.
    emitted: HashSet<u64>,
    reply_open: bool,
}

pub(crate) fn content_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

impl Session {
    pub fn new(
        session_id: String,
        tab_id: &str,
        label: Option<&str>,
        driver: Box<dyn Driver>,
        history_limit: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            tab_id: tab_id.to_string(),
            label: label.map(str::to_string),
            driver,
            created_at: now,
            last_activity: now,
            state: SessionState::Spawning,
            error_count: 0,
            last_error: None,
            usage: None,
            memory_context: String::new(),
            last_input: None,
            last_approval: None,
            last_approved_screen: None,
            reply_row: None,
            last_seen: Instant::now(),
            messages: VecDeque::new(),
            history_limit: history_limit.max(1),
            emitted: HashSet::new(),
            reply_open: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.last_seen = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_seen.elapsed()
    }

    /// Append to the in-memory window, dropping the oldest entries past the limit.
    pub fn push_message(&mut self, role: Role, text: &str) -> &Message {
        if self.messages.len() == self.history_limit {
            self.messages.pop_front();
        }
        self.messages.push_back(Message {
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        self.touch();
        &self.messages[self.messages.len() - 1]
    }

    pub fn history(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Returns the new error count.
    pub fn record_error(&mut self, error: impl Into<String>) -> u32 {
        self.error_count += 1;
        self.last_error = Some(error.into());
        self.error_count
    }

    pub fn clear_errors(&mut self) {
        self.error_count = 0;
        self.last_error = None;
    }

    /// Start a new turn: record the user's input and forget the replies
    /// returned for the previous one.
    pub(crate) fn begin_turn(&mut self, input: &str) {
        self.last_input = Some(input.to_string());
        self.push_message(Role::User, input);
        self.emitted.clear();
        self.reply_open = false;
        self.reply_row = None;
    }

    /// `true` the first time `text` is seen this turn, `false` for repeats.
    pub fn remember_response(&mut self, text: &str) -> bool {
        self.emitted.insert(content_hash(text))
    }

    /// Record the assistant's reply for the current turn. A later, longer
    /// capture of the same reply replaces the earlier one. Returns `true`
    /// when an existing entry was replaced.
    pub(crate) fn record_reply(&mut self, text: &str) -> bool {
        if self.reply_open {
            if let Some(last) = self.messages.back_mut() {
                if last.role == Role::Assistant {
                    last.text = text.to_string();
                    last.timestamp = Utc::now();
                    self.touch();
                    return true;
                }
            }
        }
        self.reply_open = true;
        self.push_message(Role::Assistant, text);
        false
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            tab_id: self.tab_id.clone(),
            label: self.label.clone(),
            state: self.state,
            created_at: self.created_at,
            last_activity: self.last_activity,
            message_count: self.messages.len(),
            error_count: self.error_count,
            last_error: self.last_error.clone(),
            uptime_secs: (Utc::now() - self.created_at).num_seconds(),
            usage: self.usage,
        }
    }

    pub fn to_record(&self, backend: &str) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id.clone(),
            tab_id: self.tab_id.clone(),
            label: self.label.clone(),
            backend: backend.to_string(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            is_active: self.state != SessionState::Evicted,
            memory_context: self.memory_context.clone(),
            error_count: i64::from(self.error_count),
            last_error: self.last_error.clone(),
        }
    }
}
