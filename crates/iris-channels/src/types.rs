use serde::{Deserialize, Serialize};

/// Whether a chat is a private 1:1 conversation or a multi-party group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Dm,
    Group,
}

impl From<ChatType> for iris_core::types::Chat {
    fn from(value: ChatType) -> Self {
        match value {
            ChatType::Dm => iris_core::types::Chat::Dm,
            ChatType::Group => iris_core::types::Chat::Group,
        }
    }
}

/// A single media attachment on an inbound or outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    /// Either a remote URL or a base64-encoded blob, adapter-dependent.
    pub url_or_data: String,
    pub caption: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

/// A message received from an external channel, normalized by its adapter.
/// Immutable once constructed. Identity is `(channel_id, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform-native message id (string-cast for platforms using integers).
    pub id: String,
    /// Logical channel id this message arrived on (e.g. "telegram").
    pub channel_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub chat_id: String,
    pub chat_type: ChatType,
    pub text: Option<String>,
    #[serde(default)]
    pub media: Vec<Media>,
    pub reply_to_id: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Full raw platform payload, for adapters/tools that need extra fields.
    pub raw: serde_json::Value,
}

/// A message queued for delivery to an external channel via the Outbound Queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub chat_id: String,
    pub text: String,
    pub reply_to_id: Option<String>,
}

/// Static, per-adapter capability flags. The router must not request an
/// operation whose capability is `false`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelCapabilities {
    pub text: bool,
    pub image: bool,
    pub video: bool,
    pub audio: bool,
    pub document: bool,
    pub reaction: bool,
    pub typing: bool,
    pub edit: bool,
    pub delete: bool,
    pub reply: bool,
    pub thread: bool,
    pub max_text_length: usize,
}

impl ChannelCapabilities {
    /// A minimal adapter that can only send plain text.
    pub const fn text_only(max_text_length: usize) -> Self {
        Self {
            text: true,
            image: false,
            video: false,
            audio: false,
            document: false,
            reaction: false,
            typing: false,
            edit: false,
            delete: false,
            reply: false,
            thread: false,
            max_text_length,
        }
    }
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

/// Typed event stream emitted by a running adapter.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(InboundMessage),
    Error(String),
    /// `bot_id` is the adapter's own platform identity, when the platform
    /// exposes one at connect time (Telegram username, Slack bot user id).
    /// Used by group-mention gating's default `@botId\b` pattern.
    Connected { channel_id: String, bot_id: Option<String> },
    Disconnected { channel_id: String, reason: Option<String> },
}
