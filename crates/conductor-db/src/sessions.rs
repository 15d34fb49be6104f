use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub tab_id: String,
    pub label: Option<String>,
    pub backend: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub memory_context: String,
    pub error_count: i64,
    pub last_error: Option<String>,
}

const SELECT_COLUMNS: &str = "\
    session_id, tab_id, label, backend, created_at, last_activity, \
    is_active, memory_context, error_count, last_error";

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        session_id: row.get(0)?,
        tab_id: row.get(1)?,
        label: row.get(2)?,
        backend: row.get(3)?,
        created_at: row.get(4)?,
        last_activity: row.get(5)?,
        is_active: row.get(6)?,
        memory_context: row.get(7)?,
        error_count: row.get(8)?,
        last_error: row.get(9)?,
    })
}

/// Insert or update a session row. Uses an upsert rather than
/// `INSERT OR REPLACE` so the cascade never wipes the session's messages.
pub fn upsert_session(conn: &Connection, record: &SessionRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sessions (session_id, tab_id, label, backend, created_at, last_activity, \
         is_active, memory_context, error_count, last_error) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT(session_id) DO UPDATE SET \
         tab_id = excluded.tab_id, label = excluded.label, backend = excluded.backend, \
         last_activity = excluded.last_activity, is_active = excluded.is_active, \
         memory_context = excluded.memory_context, error_count = excluded.error_count, \
         last_error = excluded.last_error",
        params![
            record.session_id,
            record.tab_id,
            record.label,
            record.backend,
            record.created_at,
            record.last_activity,
            record.is_active,
            record.memory_context,
            record.error_count,
            record.last_error,
        ],
    )?;
    Ok(())
}

pub fn get_session(conn: &Connection, session_id: &str) -> rusqlite::Result<Option<SessionRecord>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM sessions WHERE session_id = ?1"),
        params![session_id],
        row_to_session,
    )
    .optional()
}

pub fn mark_inactive(conn: &Connection, session_id: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE sessions SET is_active = 0 WHERE session_id = ?1",
        params![session_id],
    )?;
    Ok(changed > 0)
}

/// Flag every session inactive. Run at startup: no process survives a
/// restart, whatever the previous run left behind.
pub fn mark_all_inactive(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute("UPDATE sessions SET is_active = 0 WHERE is_active = 1", [])
}

/// Delete sessions whose last activity is older than `cutoff`, plus any
/// messages left without a session. Returns the number of sessions removed.
pub fn prune_older_than(conn: &Connection, cutoff: DateTime<Utc>) -> rusqlite::Result<usize> {
    let removed = conn.execute(
        "DELETE FROM sessions WHERE last_activity < ?1",
        params![cutoff],
    )?;
    conn.execute(
        "DELETE FROM messages WHERE session_id NOT IN (SELECT session_id FROM sessions)",
        [],
    )?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{append_message, count_messages};
    use chrono::Duration;

    fn record(id: &str, tab: &str, last_activity: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            session_id: id.to_string(),
            tab_id: tab.to_string(),
            label: Some(format!("label {tab}")),
            backend: "tmux".to_string(),
            created_at: last_activity,
            last_activity,
            is_active: true,
            memory_context: String::new(),
            error_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = crate::open_in_memory().unwrap();
        let now = Utc::now();
        let mut rec = record("s1", "tab-a", now);
        upsert_session(&conn, &rec).unwrap();

        let loaded = get_session(&conn, "s1").unwrap().unwrap();
        assert_eq!(loaded, rec);

        rec.error_count = 2;
        rec.last_error = Some("capture failed".to_string());
        rec.memory_context = "user: hi...".to_string();
        upsert_session(&conn, &rec).unwrap();

        let loaded = get_session(&conn, "s1").unwrap().unwrap();
        assert_eq!(loaded.error_count, 2);
        assert_eq!(loaded.last_error.as_deref(), Some("capture failed"));
        assert_eq!(loaded.memory_context, "user: hi...");
        assert!(get_session(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_keeps_messages() {
        let conn = crate::open_in_memory().unwrap();
        let rec = record("s1", "tab-a", Utc::now());
        upsert_session(&conn, &rec).unwrap();
        append_message(&conn, "s1", "user", "hello", Utc::now()).unwrap();

        upsert_session(&conn, &rec).unwrap();
        assert_eq!(count_messages(&conn, "s1").unwrap(), 1);
    }

    #[test]
    fn test_mark_inactive() {
        let conn = crate::open_in_memory().unwrap();
        let now = Utc::now();
        upsert_session(&conn, &record("s1", "a", now)).unwrap();
        upsert_session(&conn, &record("s2", "b", now)).unwrap();

        assert!(mark_inactive(&conn, "s1").unwrap());
        assert!(!mark_inactive(&conn, "nope").unwrap());
        assert!(!get_session(&conn, "s1").unwrap().unwrap().is_active);
        assert!(get_session(&conn, "s2").unwrap().unwrap().is_active);

        assert_eq!(mark_all_inactive(&conn).unwrap(), 1);
        assert!(!get_session(&conn, "s2").unwrap().unwrap().is_active);
    }

    #[test]
    fn test_prune_older_than_cascades() {
        let conn = crate::open_in_memory().unwrap();
        let now = Utc::now();
        upsert_session(&conn, &record("old", "a", now - Duration::hours(30))).unwrap();
        upsert_session(&conn, &record("new", "b", now)).unwrap();
        append_message(&conn, "old", "user", "stale", now).unwrap();
        append_message(&conn, "new", "user", "fresh", now).unwrap();

        let removed = prune_older_than(&conn, now - Duration::hours(24)).unwrap();
        assert_eq!(removed, 1);
        assert!(get_session(&conn, "old").unwrap().is_none());
        assert_eq!(count_messages(&conn, "old").unwrap(), 0);
        assert_eq!(count_messages(&conn, "new").unwrap(), 1);
    }
}
