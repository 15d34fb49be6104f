use rusqlite::Connection;

/// Current schema version. Bump this when adding migrations.
const CURRENT_VERSION: i64 = 2;

pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            tab_id TEXT NOT NULL,
            label TEXT,
            backend TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_activity TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            memory_context TEXT NOT NULL DEFAULT '',
            error_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
            role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_tab
            ON sessions(tab_id, last_activity);

        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, id);
        ",
    )?;

    migrate(conn)?;
    Ok(())
}

fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version = current_version(conn)?;

    if version < 1 {
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            [1_i64],
        )?;
    }

    if version < 2 {
        // v2: error bookkeeping for recovery. Fresh databases already have
        // the columns from CREATE TABLE.
        let has_error_count = conn
            .prepare("SELECT error_count FROM sessions LIMIT 0")
            .is_ok();

        if !has_error_count {
            conn.execute_batch(
                "
                ALTER TABLE sessions ADD COLUMN error_count INTEGER NOT NULL DEFAULT 0;
                ALTER TABLE sessions ADD COLUMN last_error TEXT;
                ",
            )?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            [CURRENT_VERSION],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_migrates_v1_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE schema_version (version INTEGER PRIMARY KEY);
            INSERT INTO schema_version (version) VALUES (1);
            CREATE TABLE sessions (
                session_id TEXT PRIMARY KEY,
                tab_id TEXT NOT NULL,
                label TEXT,
                backend TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                memory_context TEXT NOT NULL DEFAULT ''
            );
            ",
        )
        .unwrap();

        initialize(&conn).unwrap();

        assert_eq!(current_version(&conn).unwrap(), CURRENT_VERSION);
        assert!(conn
            .prepare("SELECT error_count, last_error FROM sessions LIMIT 0")
            .is_ok());
    }
}
