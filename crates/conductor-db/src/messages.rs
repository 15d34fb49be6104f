use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Append one message. `role` must be `user` or `assistant`.
pub fn append_message(
    conn: &Connection,
    session_id: &str,
    role: &str,
    content: &str,
    created_at: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![session_id, role, content, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite the text of message `id`. Returns `false` if no such row.
pub fn update_message_content(conn: &Connection, id: i64, content: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE messages SET content = ?2 WHERE id = ?1",
        params![id, content],
    )?;
    Ok(changed > 0)
}

/// The newest `limit` messages recorded for `tab_id` across every session
/// that tab has had, oldest first.
pub fn recent_messages_for_tab(
    conn: &Connection,
    tab_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<MessageRecord>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.session_id, m.role, m.content, m.created_at \
         FROM messages m JOIN sessions s ON s.session_id = m.session_id \
         WHERE s.tab_id = ?1 \
         ORDER BY m.id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![tab_id, limit as i64], row_to_message)?;
    let mut messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    messages.reverse();
    Ok(messages)
}

pub fn count_messages(conn: &Connection, session_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{upsert_session, SessionRecord};

    fn session(conn: &Connection, id: &str, tab: &str) {
        let now = Utc::now();
        upsert_session(
            conn,
            &SessionRecord {
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
            },
        )
        .unwrap();
    }

    #[test]
    fn test_recent_messages_span_sessions_of_a_tab() {
        let conn = crate::open_in_memory().unwrap();
        session(&conn, "first", "tab-1");
        session(&conn, "second", "tab-1");
        session(&conn, "other", "tab-2");

        let now = Utc::now();
        append_message(&conn, "first", "user", "m1", now).unwrap();
        append_message(&conn, "first", "assistant", "m2", now).unwrap();
        append_message(&conn, "other", "user", "elsewhere", now).unwrap();
        append_message(&conn, "second", "user", "m3", now).unwrap();

        let recent = recent_messages_for_tab(&conn, "tab-1", 2).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3"]);

        let all = recent_messages_for_tab(&conn, "tab-1", 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].role, "user");
        assert!(recent_messages_for_tab(&conn, "tab-9", 10).unwrap().is_empty());
    }

    #[test]
    fn test_role_is_checked() {
        let conn = crate::open_in_memory().unwrap();
        session(&conn, "s", "t");
        assert!(append_message(&conn, "s", "system", "nope", Utc::now()).is_err());
    }

    #[test]
    fn test_message_requires_session() {
        let conn = crate::open_in_memory().unwrap();
        assert!(append_message(&conn, "ghost", "user", "hi", Utc::now()).is_err());
    }

    #[test]
    fn test_update_message_content() {
        let conn = crate::open_in_memory().unwrap();
        session(&conn, "s", "t");
        let id = append_message(&conn, "s", "assistant", "Work", Utc::now()).unwrap();

        assert!(update_message_content(&conn, id, "Working on it").unwrap());
        assert!(!update_message_content(&conn, id + 100, "nope").unwrap());

        let recent = recent_messages_for_tab(&conn, "t", 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "Working on it");
    }

    #[test]
    fn test_count_messages() {
        let conn = crate::open_in_memory().unwrap();
        session(&conn, "s", "t");
        for i in 0..3 {
            append_message(&conn, "s", "user", &format!("m{i}"), Utc::now()).unwrap();
        }
        assert_eq!(count_messages(&conn, "s").unwrap(), 3);
    }
}
