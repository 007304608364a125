use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn` (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cron_jobs (
            name               TEXT    NOT NULL PRIMARY KEY,
            schedule           TEXT    NOT NULL,
            prompt             TEXT    NOT NULL,
            channel            TEXT    NOT NULL,
            chat_id            TEXT    NOT NULL,
            enabled            INTEGER NOT NULL DEFAULT 1,
            next_run           TEXT,
            last_run           TEXT,
            agent_session_id   TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_cron_jobs_next_run ON cron_jobs (next_run);

        CREATE TABLE IF NOT EXISTS cron_runs (
            id            INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            job_name      TEXT    NOT NULL,
            started_at    TEXT    NOT NULL,
            completed_at  TEXT,
            success       INTEGER,
            error         TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_cron_runs_job_name ON cron_runs (job_name, started_at DESC);
        ",
    )?;
    Ok(())
}
