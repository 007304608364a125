//! `agentSessionId -> (channelId, chatId, replyToId, createdAt)` tracking
//! (§4.9 step 7), swept every 60s for entries older than `PENDING_TTL_MS`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const PENDING_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct PendingResponse {
    pub channel_id: String,
    pub chat_id: String,
    pub reply_to_id: Option<String>,
    pub created_at: Instant,
}

#[derive(Default)]
pub struct PendingResponseTable {
    inner: Mutex<HashMap<String, PendingResponse>>,
}

impl PendingResponseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, agent_session_id: String, channel_id: String, chat_id: String, reply_to_id: Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.insert(
            agent_session_id,
            PendingResponse { channel_id, chat_id, reply_to_id, created_at: Instant::now() },
        );
    }

    pub fn take(&self, agent_session_id: &str) -> Option<PendingResponse> {
        self.inner.lock().unwrap().remove(agent_session_id)
    }

    pub fn get(&self, agent_session_id: &str) -> Option<PendingResponse> {
        self.inner.lock().unwrap().get(agent_session_id).cloned()
    }

    pub fn remove(&self, agent_session_id: &str) {
        self.inner.lock().unwrap().remove(agent_session_id);
    }

    /// Prune every entry older than `PENDING_TTL`, returning the count removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.len();
        inner.retain(|_, p| p.created_at.elapsed() <= PENDING_TTL);
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_take_round_trips_and_removes() {
        let table = PendingResponseTable::new();
        table.insert("agent1".into(), "telegram".into(), "chat1".into(), Some("msg1".into()));
        let entry = table.take("agent1").unwrap();
        assert_eq!(entry.channel_id, "telegram");
        assert!(table.get("agent1").is_none());
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let table = PendingResponseTable::new();
        table.insert("agent1".into(), "telegram".into(), "chat1".into(), None);
        assert_eq!(table.sweep(), 0);
        assert_eq!(table.len(), 1);
    }
}
