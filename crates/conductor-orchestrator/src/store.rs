//! Fire-and-forget persistence on top of `conductor-db`.
//!
//! Storage failures are logged and swallowed: losing a history row must
//! never fail a live conversation.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use conductor_db::{messages, sessions, MessageRecord, SessionRecord};
use rusqlite::Connection;

use crate::session::Role;

#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        Ok(Self::new(conductor_db::open(path)?))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn save_session(&self, record: &SessionRecord) {
        if let Err(e) = sessions::upsert_session(&self.conn(), record) {
            log::warn!("store: saving session {} failed: {e}", record.session_id);
        }
    }

    /// Returns the new row id, or `None` if the write failed.
    pub fn append_message(&self, session_id: &str, role: Role, text: &str) -> Option<i64> {
        messages::append_message(&self.conn(), session_id, role.as_str(), text, Utc::now())
            .map_err(|e| log::warn!("store: appending message to {session_id} failed: {e}"))
            .ok()
    }

    /// Rewrite a stored message, e.g. a reply that kept growing on screen.
    pub fn replace_message(&self, id: i64, text: &str) {
        if let Err(e) = messages::update_message_content(&self.conn(), id, text) {
            log::warn!("store: updating message {id} failed: {e}");
        }
    }

    pub fn mark_inactive(&self, session_id: &str) {
        if let Err(e) = sessions::mark_inactive(&self.conn(), session_id) {
            log::warn!("store: marking {session_id} inactive failed: {e}");
        }
    }

    pub fn mark_all_inactive(&self) {
        match sessions::mark_all_inactive(&self.conn()) {
            Ok(0) => {}
            Ok(n) => log::info!("store: marked {n} stale sessions inactive"),
            Err(e) => log::warn!("store: marking sessions inactive failed: {e}"),
        }
    }

    /// Drop sessions (and their messages) idle for longer than `retention`.
    pub fn prune(&self, retention: chrono::Duration) -> usize {
        match sessions::prune_older_than(&self.conn(), Utc::now() - retention) {
            Ok(n) => {
                if n > 0 {
                    log::info!("store: pruned {n} old sessions");
                }
                n
            }
            Err(e) => {
                log::warn!("store: pruning failed: {e}");
                0
            }
        }
    }

    pub fn recent_for_tab(&self, tab_id: &str, limit: usize) -> Vec<MessageRecord> {
        messages::recent_messages_for_tab(&self.conn(), tab_id, limit).unwrap_or_else(|e| {
            log::warn!("store: loading history for {tab_id} failed: {e}");
            Vec::new()
        })
    }

    pub fn session(&self, session_id: &str) -> Option<SessionRecord> {
        sessions::get_session(&self.conn(), session_id)
            .unwrap_or_else(|e| {
                log::warn!("store: loading session {session_id} failed: {e}");
                None
            })
    }

    pub fn message_count(&self, session_id: &str) -> i64 {
        messages::count_messages(&self.conn(), session_id).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, tab: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: id.to_string(),
            tab_id: tab.to_string(),
            label: None,
            backend: "pty".to_string(),
            created_at: now,
            last_activity: now,
            is_active: true,
            memory_context: String::new(),
            error_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_messages_round_trip_through_store() {
        let store = SessionStore::new(conductor_db::open_in_memory().unwrap());
        store.save_session(&record("s1", "tab"));
        store.append_message("s1", Role::User, "hello");
        let reply = store.append_message("s1", Role::Assistant, "hi").unwrap();
        store.replace_message(reply, "hi there");

        let recent = store.recent_for_tab("tab", 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].role, "assistant");
        assert_eq!(recent[1].content, "hi there");
        assert_eq!(store.message_count("s1"), 2);
    }

    #[test]
    fn test_failures_are_swallowed() {
        let store = SessionStore::new(conductor_db::open_in_memory().unwrap());
        // No session row: the foreign key rejects the insert.
        assert_eq!(store.append_message("ghost", Role::User, "lost"), None);
        assert_eq!(store.message_count("ghost"), 0);
    }

    #[test]
    fn test_mark_inactive_and_prune() {
        let store = SessionStore::new(conductor_db::open_in_memory().unwrap());
        store.save_session(&record("s1", "tab"));
        store.mark_inactive("s1");
        assert!(!store.session("s1").unwrap().is_active);

        assert_eq!(store.prune(chrono::Duration::hours(24)), 0);
        assert_eq!(store.prune(chrono::Duration::seconds(-60)), 1);
        assert!(store.session("s1").is_none());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.db");
        {
            let store = SessionStore::open(&path).unwrap();
            store.save_session(&record("s1", "tab"));
        }
        let store = SessionStore::open(&path).unwrap();
        assert!(store.session("s1").is_some());
    }
}
