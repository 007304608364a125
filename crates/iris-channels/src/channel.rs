use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::ChannelError,
    types::{ChannelCapabilities, ChannelEvent, ChannelStatus},
};

/// Common interface implemented by every channel adapter (Telegram, Discord,
/// WhatsApp, Slack, WebChat, …).
///
/// A polymorphic value holding a capability set plus a start/stop/send
/// function table, per the adapter design note: concrete platforms plug in
/// by implementing this trait rather than the router reflecting on them.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel instance, unique across
    /// all registered adapters (the key inside [`ChannelManager`](crate::manager::ChannelManager)).
    fn id(&self) -> &str;

    fn capabilities(&self) -> ChannelCapabilities;

    /// Establish the connection and begin emitting [`ChannelEvent`]s on `events`.
    ///
    /// Blocks only until the underlying transport is ready; thereafter,
    /// inbound events are produced asynchronously (on a spawned task) until
    /// `cancellation` fires. Implementations must filter out bot-originated
    /// and own-account messages before emitting `Message` events.
    async fn start(
        &self,
        events: mpsc::Sender<ChannelEvent>,
        cancellation: CancellationToken,
    ) -> Result<(), ChannelError>;

    /// Release all transport resources and emit `Disconnected`. Called both
    /// on explicit shutdown and after `cancellation` fires inside `start`.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Send plain text. Returns the platform message id so the caller can
    /// record a [`crate::cache::MessageCache`] entry for later edit/delete/react.
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        reply_to_id: Option<&str>,
    ) -> Result<String, ChannelError>;

    async fn send_media(
        &self,
        chat_id: &str,
        media: &crate::types::Media,
        reply_to_id: Option<&str>,
    ) -> Result<String, ChannelError> {
        let _ = (chat_id, media, reply_to_id);
        Err(ChannelError::Unsupported {
            channel: self.id().to_string(),
            op: "sendMedia".to_string(),
        })
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        let _ = chat_id;
        Err(ChannelError::Unsupported {
            channel: self.id().to_string(),
            op: "sendTyping".to_string(),
        })
    }

    async fn send_reaction(&self, chat_id: &str, message_id: &str, emoji: &str) -> Result<(), ChannelError> {
        let _ = (chat_id, message_id, emoji);
        Err(ChannelError::Unsupported {
            channel: self.id().to_string(),
            op: "sendReaction".to_string(),
        })
    }

    async fn edit_message(&self, chat_id: &str, message_id: &str, text: &str) -> Result<(), ChannelError> {
        let _ = (chat_id, message_id, text);
        Err(ChannelError::Unsupported {
            channel: self.id().to_string(),
            op: "editMessage".to_string(),
        })
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), ChannelError> {
        let _ = (chat_id, message_id);
        Err(ChannelError::Unsupported {
            channel: self.id().to_string(),
            op: "deleteMessage".to_string(),
        })
    }

    /// Return the current runtime status without blocking.
    fn status(&self) -> ChannelStatus;

    /// Deliver a raw inbound payload received out-of-band by the gateway's
    /// HTTP server (webhook-driven adapters such as WhatsApp and Slack).
    /// Adapters that own their own transport loop (Telegram, Discord) never
    /// call this and can leave it at the default no-op.
    async fn handle_webhook(&self, payload: serde_json::Value) -> Result<(), ChannelError> {
        let _ = payload;
        Err(ChannelError::Unsupported {
            channel: self.id().to_string(),
            op: "webhook".to_string(),
        })
    }
}
