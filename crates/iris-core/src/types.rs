use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a configured channel instance (e.g. "telegram", "discord-main").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Whether a chat is a private 1:1 conversation or a multi-party group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chat {
    Dm,
    Group,
}

impl fmt::Display for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chat::Dm => write!(f, "dm"),
            Chat::Group => write!(f, "group"),
        }
    }
}

/// Identifies an Agent-side conversation. Opaque string issued by the Agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentSessionId(pub String);

impl fmt::Display for AgentSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentSessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AgentSessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Session key, per the data model: `(channelId, chatId | senderId-for-dm, chatType)`.
///
/// DM keys include senderId so each person gets an isolated conversation;
/// group keys omit senderId so every participant shares one session.
/// String form: `{channelId}:{chatType}:{chatOrSenderId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn new(channel_id: &str, chat_type: Chat, chat_id: &str, sender_id: &str) -> Self {
        let disambiguator = match chat_type {
            Chat::Dm => sender_id,
            Chat::Group => chat_id,
        };
        Self(format!("{}:{}:{}", channel_id, chat_type, disambiguator))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse back into `(channelId, chatType, disambiguator)`. Used by tests
    /// and the `session list` CLI output.
    pub fn parse(raw: &str) -> Option<(String, Chat, String)> {
        let mut parts = raw.splitn(3, ':');
        let channel_id = parts.next()?.to_string();
        let chat_type = match parts.next()? {
            "dm" => Chat::Dm,
            "group" => Chat::Group,
            _ => return None,
        };
        let disambiguator = parts.next()?.to_string();
        Some((channel_id, chat_type, disambiguator))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dm_key_uses_sender_id() {
        let key = SessionKey::new("telegram", Chat::Dm, "chat1", "sender9");
        assert_eq!(key.as_str(), "telegram:dm:sender9");
    }

    #[test]
    fn group_key_uses_chat_id() {
        let key = SessionKey::new("telegram", Chat::Group, "chat1", "sender9");
        assert_eq!(key.as_str(), "telegram:group:chat1");
    }

    #[test]
    fn round_trips_through_parse() {
        let key = SessionKey::new("discord", Chat::Group, "chat42", "sender1");
        let (channel, chat_type, disambiguator) = SessionKey::parse(key.as_str()).unwrap();
        assert_eq!(channel, "discord");
        assert_eq!(chat_type, Chat::Group);
        assert_eq!(disambiguator, "chat42");
    }
}
