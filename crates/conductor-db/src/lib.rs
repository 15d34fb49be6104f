//! conductor-db: SQLite persistence for sessions and their message log.

pub mod messages;
pub mod schema;
pub mod sessions;

use rusqlite::Connection;
use std::path::Path;

pub use messages::MessageRecord;
pub use sessions::SessionRecord;

pub fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    schema::initialize(&conn)?;
    Ok(conn)
}

/// Fresh database that lives only as long as the connection. Used by tests
/// and by `--no-db` style runs that still want the same code paths.
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    schema::initialize(&conn)?;
    Ok(conn)
}
