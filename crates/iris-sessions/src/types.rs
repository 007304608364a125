use serde::{Deserialize, Serialize};

pub use iris_core::types::{AgentSessionId, Chat, SessionKey};

/// A persisted `(session key) -> agentSessionId` mapping (§3 SessionEntry).
///
/// Created on first routed message for a given key, mutated only by
/// `touch` and `reset`, and destroyed only on explicit reset or store
/// rebuild. DM keys isolate per-person conversations; group keys are
/// shared by every participant in the chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub key: SessionKey,
    pub agent_session_id: AgentSessionId,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// RFC3339 timestamp of the last routed message through this session.
    pub last_activity: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dm_and_group_keys_stay_distinct() {
        let dm = SessionKey::new("telegram", Chat::Dm, "chat1", "sender9");
        let group = SessionKey::new("telegram", Chat::Group, "chat1", "sender9");
        assert_ne!(dm, group);
    }
}
