use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{debug, info, instrument};

use crate::error::{Result, SessionError};
use crate::types::{AgentSessionId, SessionEntry, SessionKey};

/// Creates a new Agent-side conversation. Implemented by the Agent Client;
/// kept as a trait here so the Session Map never depends on the Agent
/// crate's transport details.
#[async_trait]
pub trait SessionCreator: Send + Sync {
    async fn create_session(&self, title: &str) -> std::result::Result<AgentSessionId, String>;
}

/// Thread-safe manager for the persistent `sessionKey -> agentSessionId` map
/// (§3 SessionEntry, §4.8 Session Map).
///
/// Wraps a single SQLite connection in a `Mutex`. For high-concurrency
/// deployments consider a connection pool (e.g. r2d2), but a Mutex is
/// sufficient for the single-node target.
pub struct SessionManager {
    db: Mutex<Connection>,
}

impl SessionManager {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    /// Return the existing entry for `key`, or create one by calling
    /// `creator.create_session` and persisting the result.
    ///
    /// Mirrors the data-model contract exactly: `resolve(channel, sender,
    /// chatId, chatType, agentClient)` returns an `agentSessionId`.
    #[instrument(skip(self, creator), fields(key = %key))]
    pub async fn resolve(
        &self,
        key: &SessionKey,
        title: &str,
        creator: &dyn SessionCreator,
    ) -> Result<AgentSessionId> {
        if let Some(entry) = self.get(key)? {
            debug!("session map hit");
            self.touch(key)?;
            return Ok(entry.agent_session_id);
        }

        let agent_session_id = creator
            .create_session(title)
            .await
            .map_err(SessionError::AgentFailure)?;
        let now = chrono::Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO sessions (session_key, agent_session_id, created_at, last_activity)
             VALUES (?1, ?2, ?3, ?3)",
            rusqlite::params![key.as_str(), agent_session_id.as_str(), now],
        )?;
        drop(db);

        info!(key = %key, agent_session_id = %agent_session_id, "created new session map entry");
        Ok(agent_session_id)
    }

    /// Retrieve a session entry by key, returning `None` if it does not exist.
    pub fn get(&self, key: &SessionKey) -> Result<Option<SessionEntry>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT session_key, agent_session_id, created_at, last_activity
             FROM sessions WHERE session_key = ?1",
            rusqlite::params![key.as_str()],
            row_to_entry,
        ) {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SessionError::Database(e)),
        }
    }

    /// Bump `last_activity` to now. A no-op (not an error) if the key is
    /// absent — callers only touch keys they just resolved or looked up.
    pub fn touch(&self, key: &SessionKey) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE sessions SET last_activity = ?1 WHERE session_key = ?2",
            rusqlite::params![now, key.as_str()],
        )?;
        Ok(())
    }

    /// Remove the entry for `key` (the `/new` or `/start` command). The
    /// next routed message for this key creates a fresh Agent session.
    #[instrument(skip(self), fields(key = %key))]
    pub fn reset(&self, key: &SessionKey) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "DELETE FROM sessions WHERE session_key = ?1",
            rusqlite::params![key.as_str()],
        )?;
        Ok(rows_changed > 0)
    }

    /// List every persisted session entry, most recently active first.
    pub fn list(&self) -> Result<Vec<SessionEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT session_key, agent_session_id, created_at, last_activity
             FROM sessions ORDER BY last_activity DESC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionEntry> {
    let key_str: String = row.get(0)?;
    Ok(SessionEntry {
        key: SessionKey(key_str),
        agent_session_id: AgentSessionId(row.get(1)?),
        created_at: row.get(2)?,
        last_activity: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_core::types::Chat;

    struct FakeCreator;

    #[async_trait]
    impl SessionCreator for FakeCreator {
        async fn create_session(&self, _title: &str) -> std::result::Result<AgentSessionId, String> {
            Ok(AgentSessionId("agent-session-1".to_string()))
        }
    }

    fn test_manager() -> SessionManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SessionManager::new(conn)
    }

    #[tokio::test]
    async fn resolve_creates_then_reuses_entry() {
        let mgr = test_manager();
        let key = SessionKey::new("telegram", Chat::Dm, "chat1", "sender9");
        let id1 = mgr.resolve(&key, "New chat", &FakeCreator).await.unwrap();
        let id2 = mgr.resolve(&key, "New chat", &FakeCreator).await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn reset_forces_new_session_on_next_resolve() {
        let mgr = test_manager();
        let key = SessionKey::new("telegram", Chat::Group, "chat1", "sender9");
        mgr.resolve(&key, "t", &FakeCreator).await.unwrap();
        assert!(mgr.reset(&key).unwrap());
        assert!(mgr.get(&key).unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_on_unknown_key_returns_false() {
        let mgr = test_manager();
        let key = SessionKey::new("telegram", Chat::Dm, "chat1", "nobody");
        assert!(!mgr.reset(&key).unwrap());
    }

    #[tokio::test]
    async fn dm_and_group_keys_resolve_independently() {
        let mgr = test_manager();
        let dm = SessionKey::new("telegram", Chat::Dm, "chat1", "sender9");
        let group = SessionKey::new("telegram", Chat::Group, "chat1", "sender9");
        mgr.resolve(&dm, "t", &FakeCreator).await.unwrap();
        assert!(mgr.get(&group).unwrap().is_none());
    }
}
