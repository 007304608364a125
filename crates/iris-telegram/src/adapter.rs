//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + long-polling `Dispatcher`, normalizing every
//! inbound `Message` into an [`InboundMessage`] and forwarding it on the
//! shared event channel. All admission/session/routing logic lives in the
//! router and security gate — this adapter only speaks Telegram.

use std::sync::Mutex;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use iris_channels::chunk::MAX_LEN_TELEGRAM;
use iris_channels::{Channel, ChannelCapabilities, ChannelError, ChannelEvent, ChannelStatus, ChatType, InboundMessage};
use iris_core::config::ChannelConfig;

use crate::error::TelegramError;
use crate::send::send_response;

pub struct TelegramAdapter {
    id: String,
    bot: Bot,
    max_text_length: usize,
    status: Mutex<ChannelStatus>,
}

impl TelegramAdapter {
    pub fn new(id: impl Into<String>, config: &ChannelConfig) -> Result<Self, TelegramError> {
        let token = config.bot_token.clone().or_else(|| config.token.clone()).ok_or(TelegramError::NoToken)?;
        Ok(Self {
            id: id.into(),
            bot: Bot::new(token),
            max_text_length: config.max_text_length.unwrap_or(MAX_LEN_TELEGRAM),
            status: Mutex::new(ChannelStatus::Disconnected),
        })
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().expect("telegram status lock poisoned") = status;
    }
}

#[async_trait]
impl Channel for TelegramAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            text: true,
            image: true,
            video: true,
            audio: true,
            document: true,
            reaction: false,
            typing: true,
            edit: false,
            delete: true,
            reply: true,
            thread: true,
            max_text_length: self.max_text_length,
        }
    }

    async fn start(&self, events: mpsc::Sender<ChannelEvent>, cancellation: CancellationToken) -> Result<(), ChannelError> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;
        let bot_id = me.username.clone();

        self.set_status(ChannelStatus::Connected);
        let _ = events
            .send(ChannelEvent::Connected { channel_id: self.id.clone(), bot_id })
            .await;
        info!(channel = %self.id, "telegram adapter connected");

        let bot = self.bot.clone();
        let channel_id = self.id.clone();
        let dispatch_events = events.clone();

        let handler = Update::filter_message().endpoint(move |msg: Message| {
            let channel_id = channel_id.clone();
            let events = dispatch_events.clone();
            async move {
                if let Some(inbound) = normalize_message(&channel_id, &msg) {
                    let _ = events.send(ChannelEvent::Message(inbound)).await;
                }
                respond(())
            }
        });

        let mut dispatcher = Dispatcher::builder(bot, handler).build();
        let shutdown_token = dispatcher.shutdown_token();
        let cancel_for_watch = cancellation.clone();

        tokio::spawn(async move {
            cancel_for_watch.cancelled().await;
            if let Ok(fut) = shutdown_token.shutdown() {
                fut.await;
            }
        });

        let adapter_events = events.clone();
        let adapter_id = self.id.clone();
        tokio::spawn(async move {
            dispatcher.dispatch().await;
            let _ = adapter_events
                .send(ChannelEvent::Disconnected { channel_id: adapter_id.clone(), reason: None })
                .await;
            warn!(channel = %adapter_id, "telegram dispatcher exited");
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str, reply_to_id: Option<&str>) -> Result<String, ChannelError> {
        let chat_id: i64 = chat_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid telegram chat id: {chat_id}")))?;
        let reply_to: Option<i32> = reply_to_id.and_then(|id| id.parse().ok());

        send_response(&self.bot, ChatId(chat_id), text, reply_to)
            .await
            .map_err(|e| TelegramError::from(e).into())
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        let chat_id: i64 = chat_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid telegram chat id: {chat_id}")))?;
        // Fire a single typing action; the router re-invokes this on its own
        // cadence rather than us holding a background loop open per message.
        self.bot
            .send_chat_action(ChatId(chat_id), teloxide::types::ChatAction::Typing)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), ChannelError> {
        let chat_id: i64 = chat_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid telegram chat id: {chat_id}")))?;
        let message_id: i32 = message_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid telegram message id: {message_id}")))?;
        self.bot
            .delete_message(ChatId(chat_id), teloxide::types::MessageId(message_id))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().expect("telegram status lock poisoned").clone()
    }
}

/// Normalize a teloxide `Message` per §4.1: `chatType=dm` iff
/// `chat.type=="private"`; `id`/`replyToId` are string-cast integers;
/// timestamp is seconds → ms. Returns `None` for bot-originated messages
/// and messages with neither text nor media.
fn normalize_message(channel_id: &str, msg: &Message) -> Option<InboundMessage> {
    let from = msg.from.as_ref()?;
    if from.is_bot {
        return None;
    }

    let text = msg.text().or_else(|| msg.caption()).map(str::to_string);
    let has_media = msg.photo().is_some()
        || msg.document().is_some()
        || msg.video().is_some()
        || msg.audio().is_some()
        || msg.voice().is_some();

    if text.is_none() && !has_media {
        return None;
    }

    let chat_type = if msg.chat.is_private() { ChatType::Dm } else { ChatType::Group };

    Some(InboundMessage {
        id: msg.id.0.to_string(),
        channel_id: channel_id.to_string(),
        sender_id: from.id.0.to_string(),
        sender_name: from.username.clone().or_else(|| Some(from.first_name.clone())),
        chat_id: msg.chat.id.0.to_string(),
        chat_type,
        text,
        media: Vec::new(),
        reply_to_id: msg.reply_to_message().map(|r| r.id.0.to_string()),
        timestamp: msg.date.timestamp() * 1000,
        raw: serde_json::to_value(msg).unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_converts_seconds_to_millis() {
        let seconds: i64 = 1_700_000_000;
        assert_eq!(seconds * 1000, 1_700_000_000_000);
    }
}
