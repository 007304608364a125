//! Discord channel adapter.
//!
//! Wraps a serenity `Client` + gateway event handler, normalizing every
//! inbound guild/DM `Message` into an [`InboundMessage`]. Admission,
//! sessions, and routing all live upstream of this adapter.

use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use serenity::all::ShardManager;
use serenity::builder::EditMessage;
use serenity::model::channel::Message;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::id::{ChannelId, MessageId};
use serenity::prelude::{Context, EventHandler};
use serenity::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use iris_channels::chunk::MAX_LEN_DISCORD;
use iris_channels::{Channel, ChannelCapabilities, ChannelError, ChannelEvent, ChannelStatus, ChatType, InboundMessage};
use iris_core::config::ChannelConfig;

use crate::error::DiscordError;
use crate::send::send_response;

pub struct DiscordAdapter {
    id: String,
    bot_token: String,
    max_text_length: usize,
    status: Mutex<ChannelStatus>,
    http: OnceLock<Arc<serenity::http::Http>>,
    shard_manager: OnceLock<Arc<ShardManager>>,
}

impl DiscordAdapter {
    pub fn new(id: impl Into<String>, config: &ChannelConfig) -> Result<Self, DiscordError> {
        let bot_token = config.bot_token.clone().or_else(|| config.token.clone()).ok_or(DiscordError::NoToken)?;
        Ok(Self {
            id: id.into(),
            bot_token,
            max_text_length: config.max_text_length.unwrap_or(MAX_LEN_DISCORD),
            status: Mutex::new(ChannelStatus::Disconnected),
            http: OnceLock::new(),
            shard_manager: OnceLock::new(),
        })
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().expect("discord status lock poisoned") = status;
    }

    fn http(&self) -> Result<&Arc<serenity::http::Http>, ChannelError> {
        self.http.get().ok_or_else(|| ChannelError::ConnectionFailed("discord client not started".to_string()))
    }
}

struct Handler {
    channel_id: String,
    events: mpsc::Sender<ChannelEvent>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(name = %ready.user.name, "discord adapter connected");
        let _ = self
            .events
            .send(ChannelEvent::Connected {
                channel_id: self.channel_id.clone(),
                bot_id: Some(ready.user.id.to_string()),
            })
            .await;
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if let Some(inbound) = normalize_message(&self.channel_id, &msg) {
            let _ = self.events.send(ChannelEvent::Message(inbound)).await;
        }
    }
}

#[async_trait]
impl Channel for DiscordAdapter {
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
            reaction: true,
            typing: true,
            edit: true,
            delete: true,
            reply: true,
            thread: true,
            max_text_length: self.max_text_length,
        }
    }

    async fn start(&self, events: mpsc::Sender<ChannelEvent>, cancellation: CancellationToken) -> Result<(), ChannelError> {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let handler = Handler { channel_id: self.id.clone(), events: events.clone() };

        let mut client = Client::builder(&self.bot_token, intents)
            .event_handler(handler)
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;

        self.http.set(Arc::clone(&client.http)).ok();
        self.shard_manager.set(client.shard_manager.clone()).ok();
        self.set_status(ChannelStatus::Connected);

        let shard_manager = client.shard_manager.clone();
        let cancel = cancellation.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            shard_manager.shutdown_all().await;
        });

        let adapter_events = events.clone();
        let adapter_id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                warn!(channel = %adapter_id, error = %e, "discord client stopped with error");
            }
            let _ = adapter_events
                .send(ChannelEvent::Disconnected { channel_id: adapter_id.clone(), reason: None })
                .await;
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        if let Some(shard_manager) = self.shard_manager.get() {
            shard_manager.shutdown_all().await;
        }
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str, reply_to_id: Option<&str>) -> Result<String, ChannelError> {
        let channel_id = parse_channel_id(chat_id)?;
        let reply_to = reply_to_id.and_then(|id| id.parse::<u64>().ok()).map(MessageId::new);

        send_response(self.http()?, channel_id, text, reply_to)
            .await
            .map_err(|e| DiscordError::from(e).into())
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        let channel_id = parse_channel_id(chat_id)?;
        channel_id
            .broadcast_typing(self.http()?)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn edit_message(&self, chat_id: &str, message_id: &str, text: &str) -> Result<(), ChannelError> {
        let channel_id = parse_channel_id(chat_id)?;
        let message_id: u64 = message_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid discord message id: {message_id}")))?;
        channel_id
            .edit_message(self.http()?, MessageId::new(message_id), EditMessage::new().content(text))
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), ChannelError> {
        let channel_id = parse_channel_id(chat_id)?;
        let message_id: u64 = message_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid discord message id: {message_id}")))?;
        channel_id
            .delete_message(self.http()?, MessageId::new(message_id))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn send_reaction(&self, chat_id: &str, message_id: &str, emoji: &str) -> Result<(), ChannelError> {
        let channel_id = parse_channel_id(chat_id)?;
        let message_id: u64 = message_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("invalid discord message id: {message_id}")))?;
        channel_id
            .create_reaction(self.http()?, MessageId::new(message_id), serenity::model::channel::ReactionType::Unicode(emoji.to_string()))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().expect("discord status lock poisoned").clone()
    }
}

fn parse_channel_id(chat_id: &str) -> Result<ChannelId, ChannelError> {
    chat_id
        .parse::<u64>()
        .map(ChannelId::new)
        .map_err(|_| ChannelError::SendFailed(format!("invalid discord channel id: {chat_id}")))
}

/// Normalize a serenity `Message` per §4.1: reject `author.bot`; `senderName`
/// prefers guild nickname → global display name → username.
fn normalize_message(channel_id: &str, msg: &Message) -> Option<InboundMessage> {
    if msg.author.bot {
        return None;
    }

    let text = if msg.content.is_empty() { None } else { Some(msg.content.clone()) };
    if text.is_none() && msg.attachments.is_empty() {
        return None;
    }

    let sender_name = msg
        .member
        .as_ref()
        .and_then(|m| m.nick.clone())
        .or_else(|| msg.author.global_name.clone())
        .or_else(|| Some(msg.author.name.clone()));

    let chat_type = if msg.guild_id.is_some() { ChatType::Group } else { ChatType::Dm };

    Some(InboundMessage {
        id: msg.id.to_string(),
        channel_id: channel_id.to_string(),
        sender_id: msg.author.id.to_string(),
        sender_name,
        chat_id: msg.channel_id.to_string(),
        chat_type,
        text,
        media: Vec::new(),
        reply_to_id: msg.referenced_message.as_ref().map(|m| m.id.to_string()),
        timestamp: msg.timestamp.timestamp() * 1000,
        raw: serde_json::to_value(msg).unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_channel_id_rejects_non_numeric() {
        assert!(parse_channel_id("not-a-number").is_err());
    }

    #[test]
    fn parse_channel_id_accepts_numeric() {
        assert!(parse_channel_id("123456789").is_ok());
    }
}
