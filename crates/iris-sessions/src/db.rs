use rusqlite::Connection;

use crate::error::Result;

/// Initialise the session map table and its index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_key      TEXT PRIMARY KEY,
            agent_session_id TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            last_activity     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_last_activity
            ON sessions(last_activity DESC);",
    )?;
    Ok(())
}
