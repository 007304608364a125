//! In-process web chat channel adapter.
//!
//! Unlike the platform adapters this one owns no outbound transport of its
//! own — the gateway's HTTP server terminates the browser's WebSocket and
//! drives this adapter through [`WebchatAdapter::register`] /
//! [`WebchatAdapter::receive_message`] / [`WebchatAdapter::unregister`].
//! Each open socket is one `chat_id`; there is no group concept.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{mpsc, mpsc::UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use iris_channels::chunk::chunk_text;
use iris_channels::{Channel, ChannelCapabilities, ChannelError, ChannelEvent, ChannelStatus, ChatType, InboundMessage};
use iris_core::config::ChannelConfig;

use crate::error::WebchatError;

const MAX_LEN_WEBCHAT: usize = 16_384;

pub struct WebchatAdapter {
    id: String,
    max_text_length: usize,
    status: Mutex<ChannelStatus>,
    events: OnceLock<mpsc::Sender<ChannelEvent>>,
    connections: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
}

impl WebchatAdapter {
    pub fn new(id: impl Into<String>, config: &ChannelConfig) -> Self {
        Self {
            id: id.into(),
            max_text_length: config.max_text_length.unwrap_or(MAX_LEN_WEBCHAT),
            status: Mutex::new(ChannelStatus::Disconnected),
            events: OnceLock::new(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().expect("webchat status lock poisoned") = status;
    }

    /// Called by the gateway's WS upgrade handler when a browser connects.
    /// Returns the receiver half the handler forwards onto the socket —
    /// each item is a pre-serialized JSON outbound frame.
    pub fn register(&self, conn_id: impl Into<String>) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().expect("webchat connections lock poisoned").insert(conn_id.into(), tx);
        rx
    }

    /// Called by the gateway's WS handler when the socket closes.
    pub fn unregister(&self, conn_id: &str) {
        self.connections.lock().expect("webchat connections lock poisoned").remove(conn_id);
    }

    /// Called by the gateway's WS handler for each inbound text frame:
    /// `{"text": "...", "senderName": "..."}`.
    pub async fn receive_message(&self, conn_id: &str, payload: serde_json::Value) {
        let Some(events) = self.events.get() else {
            warn!(channel = %self.id, "webchat message dropped, adapter not started");
            return;
        };

        let Some(text) = payload["text"].as_str().filter(|t| !t.trim().is_empty()) else {
            return;
        };

        let inbound = InboundMessage {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: self.id.clone(),
            sender_id: conn_id.to_string(),
            sender_name: payload["senderName"].as_str().map(|s| s.to_string()),
            chat_id: conn_id.to_string(),
            chat_type: ChatType::Dm,
            text: Some(text.to_string()),
            media: Vec::new(),
            reply_to_id: None,
            timestamp: now_millis(),
            raw: payload,
        };

        let _ = events.send(ChannelEvent::Message(inbound)).await;
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[async_trait]
impl Channel for WebchatAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            text: true,
            image: false,
            video: false,
            audio: false,
            document: false,
            reaction: false,
            typing: true,
            edit: false,
            delete: false,
            reply: false,
            thread: false,
            max_text_length: self.max_text_length,
        }
    }

    async fn start(&self, events: mpsc::Sender<ChannelEvent>, cancellation: CancellationToken) -> Result<(), ChannelError> {
        self.events.set(events.clone()).ok();
        self.set_status(ChannelStatus::Connected);
        let _ = events
            .send(ChannelEvent::Connected { channel_id: self.id.clone(), bot_id: None })
            .await;

        let cancel = cancellation.clone();
        let adapter_events = events.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = adapter_events
                .send(ChannelEvent::Disconnected { channel_id: id.clone(), reason: None })
                .await;
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.connections.lock().expect("webchat connections lock poisoned").clear();
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str, _reply_to_id: Option<&str>) -> Result<String, ChannelError> {
        let sender = {
            let connections = self.connections.lock().expect("webchat connections lock poisoned");
            connections.get(chat_id).cloned()
        }
        .ok_or_else(|| WebchatError::ConnectionClosed(chat_id.to_string()))?;

        let message_id = uuid::Uuid::new_v4().to_string();
        for chunk in chunk_text(text, self.max_text_length) {
            let frame = serde_json::json!({ "type": "message", "id": &message_id, "text": chunk });
            sender
                .send(frame.to_string())
                .map_err(|_| WebchatError::ConnectionClosed(chat_id.to_string()))?;
        }

        Ok(message_id)
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        let sender = {
            let connections = self.connections.lock().expect("webchat connections lock poisoned");
            connections.get(chat_id).cloned()
        }
        .ok_or_else(|| WebchatError::ConnectionClosed(chat_id.to_string()))?;

        let frame = serde_json::json!({ "type": "typing" });
        sender.send(frame.to_string()).map_err(|_| WebchatError::ConnectionClosed(chat_id.to_string()))?;
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().expect("webchat status lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_core::config::{ChannelConfig, ChannelType};

    fn config() -> ChannelConfig {
        ChannelConfig {
            kind: ChannelType::Webchat,
            enabled: true,
            token: None,
            app_token: None,
            bot_token: None,
            dm_policy: None,
            group_policy: Default::default(),
            mention_pattern: None,
            max_text_length: None,
            streaming: Default::default(),
        }
    }

    #[tokio::test]
    async fn receive_message_requires_started_adapter() {
        let adapter = WebchatAdapter::new("webchat", &config());
        adapter.receive_message("conn1", serde_json::json!({"text": "hi"})).await;
    }

    #[tokio::test]
    async fn send_text_fails_without_registered_connection() {
        let adapter = WebchatAdapter::new("webchat", &config());
        let (tx, _rx) = mpsc::channel(8);
        adapter.start(tx, CancellationToken::new()).await.unwrap();
        assert!(adapter.send_text("missing-conn", "hi", None).await.is_err());
    }

    #[tokio::test]
    async fn send_text_delivers_to_registered_connection() {
        let adapter = WebchatAdapter::new("webchat", &config());
        let (tx, _rx) = mpsc::channel(8);
        adapter.start(tx, CancellationToken::new()).await.unwrap();
        let mut rx = adapter.register("conn1");
        adapter.send_text("conn1", "hello", None).await.unwrap();
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("hello"));
    }
}
