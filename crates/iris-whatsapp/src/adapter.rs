//! WhatsApp channel adapter.
//!
//! Talks to a self-hosted WhatsApp Web multi-device bridge (Evolution-API
//! shaped: `/instance/*` for session state, `/message/sendText/{instance}`
//! for outbound delivery) rather than owning a persistent gateway
//! connection itself. Inbound messages arrive as webhook payloads the
//! gateway's HTTP server hands to [`Channel::handle_webhook`]; `start`
//! only verifies the bridge is reachable and records the event sender for
//! later webhook deliveries.

use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use iris_channels::chunk::{chunk_text, MAX_LEN_WHATSAPP};
use iris_channels::{Channel, ChannelCapabilities, ChannelError, ChannelEvent, ChannelStatus, ChatType, InboundMessage};
use iris_core::config::ChannelConfig;

use crate::error::WhatsAppError;

pub struct WhatsAppAdapter {
    id: String,
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    instance_name: String,
    max_text_length: usize,
    status: Mutex<ChannelStatus>,
    events: OnceLock<mpsc::Sender<ChannelEvent>>,
}

impl WhatsAppAdapter {
    /// Builds from the generic [`ChannelConfig`] shape: `token` carries the
    /// bridge's global API key, `app_token` its base URL, `bot_token` the
    /// instance name (defaults to this adapter's `id` when absent).
    pub fn new(id: impl Into<String>, config: &ChannelConfig) -> Result<Self, WhatsAppError> {
        let api_key = config
            .token
            .clone()
            .ok_or_else(|| WhatsAppError::Config("missing token (bridge api key)".to_string()))?;
        let api_url = config
            .app_token
            .clone()
            .ok_or_else(|| WhatsAppError::Config("missing app_token (bridge base url)".to_string()))?;
        let id = id.into();
        let instance_name = config.bot_token.clone().unwrap_or_else(|| id.clone());

        Ok(Self {
            id,
            http: reqwest::Client::new(),
            api_url,
            api_key,
            instance_name,
            max_text_length: config.max_text_length.unwrap_or(MAX_LEN_WHATSAPP),
            status: Mutex::new(ChannelStatus::Disconnected),
            events: OnceLock::new(),
        })
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().expect("whatsapp status lock poisoned") = status;
    }
}

#[async_trait]
impl Channel for WhatsAppAdapter {
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
            typing: false,
            edit: false,
            delete: false,
            reply: true,
            thread: false,
            max_text_length: self.max_text_length,
        }
    }

    async fn start(&self, events: mpsc::Sender<ChannelEvent>, cancellation: CancellationToken) -> Result<(), ChannelError> {
        self.events.set(events.clone()).ok();

        let url = format!("{}/instance/connectionState/{}", self.api_url, self.instance_name);
        let resp = self
            .http
            .get(&url)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(WhatsAppError::Bridge { status, body }.into());
        }

        self.set_status(ChannelStatus::Connected);
        let _ = events
            .send(ChannelEvent::Connected { channel_id: self.id.clone(), bot_id: None })
            .await;
        info!(channel = %self.id, "whatsapp bridge reachable");

        let cancel = cancellation.clone();
        let adapter_events = events.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = adapter_events
                .send(ChannelEvent::Disconnected { channel_id: id.clone(), reason: None })
                .await;
            info!(channel = %id, "whatsapp adapter cancelled");
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str, _reply_to_id: Option<&str>) -> Result<String, ChannelError> {
        let url = format!("{}/message/sendText/{}", self.api_url, self.instance_name);
        let chunks = chunk_text(text, self.max_text_length);
        let mut last_id = String::new();

        for chunk in &chunks {
            let body = serde_json::json!({ "number": chat_id, "text": chunk });
            let resp = self
                .http
                .post(&url)
                .header("apikey", &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(WhatsAppError::from)?;

            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(WhatsAppError::Bridge { status: status.as_u16(), body: body_text }.into());
            }

            let parsed: serde_json::Value = serde_json::from_str(&body_text).unwrap_or_default();
            if let Some(msg_id) = parsed["key"]["id"].as_str() {
                last_id = msg_id.to_string();
            }
        }

        Ok(last_id)
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().expect("whatsapp status lock poisoned").clone()
    }

    async fn handle_webhook(&self, payload: serde_json::Value) -> Result<(), ChannelError> {
        let events = self
            .events
            .get()
            .ok_or_else(|| ChannelError::ConnectionFailed("whatsapp adapter not started".to_string()))?;

        let data = &payload["data"];
        let messages: Vec<serde_json::Value> = match data.as_array() {
            Some(arr) => arr.clone(),
            None => vec![data.clone()],
        };

        for msg in messages {
            match normalize_message(&self.id, &msg) {
                Some(inbound) => {
                    let _ = events.send(ChannelEvent::Message(inbound)).await;
                }
                None => warn!(channel = %self.id, "dropped unrecognized whatsapp webhook payload"),
            }
        }

        Ok(())
    }
}

/// Normalize a Baileys-shaped webhook payload per §4.1: reject `key.fromMe`;
/// group iff `remoteJid` ends with `@g.us`; sender in groups is
/// `participant`, else `remoteJid`; text priority
/// `conversation | extendedTextMessage.text | imageMessage.caption | videoMessage.caption`.
fn normalize_message(channel_id: &str, msg: &serde_json::Value) -> Option<InboundMessage> {
    let key = &msg["key"];
    if key["fromMe"].as_bool().unwrap_or(false) {
        return None;
    }

    let remote_jid = key["remoteJid"].as_str()?;
    let is_group = remote_jid.ends_with("@g.us");
    let sender_id = if is_group {
        key["participant"].as_str().unwrap_or(remote_jid)
    } else {
        remote_jid
    }
    .to_string();

    let message = &msg["message"];
    let text = message["conversation"]
        .as_str()
        .or_else(|| message["extendedTextMessage"]["text"].as_str())
        .or_else(|| message["imageMessage"]["caption"].as_str())
        .or_else(|| message["videoMessage"]["caption"].as_str())
        .map(|s| s.to_string());

    if text.is_none() {
        return None;
    }

    let reply_to_id = message["extendedTextMessage"]["contextInfo"]["stanzaId"]
        .as_str()
        .map(|s| s.to_string());

    Some(InboundMessage {
        id: key["id"].as_str().unwrap_or_default().to_string(),
        channel_id: channel_id.to_string(),
        sender_id,
        sender_name: msg["pushName"].as_str().map(|s| s.to_string()),
        chat_id: remote_jid.to_string(),
        chat_type: if is_group { ChatType::Group } else { ChatType::Dm },
        text,
        media: Vec::new(),
        reply_to_id,
        timestamp: msg["messageTimestamp"].as_i64().unwrap_or(0) * 1000,
        raw: msg.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(remote_jid: &str, participant: Option<&str>, from_me: bool, text: &str) -> serde_json::Value {
        let mut key = serde_json::json!({ "remoteJid": remote_jid, "fromMe": from_me, "id": "ABC123" });
        if let Some(p) = participant {
            key["participant"] = serde_json::Value::String(p.to_string());
        }
        serde_json::json!({
            "key": key,
            "pushName": "Ada",
            "messageTimestamp": 1_700_000_000i64,
            "message": { "conversation": text },
        })
    }

    #[test]
    fn rejects_own_messages() {
        assert!(normalize_message("whatsapp", &msg("1@s.whatsapp.net", None, true, "hi")).is_none());
    }

    #[test]
    fn dm_sender_is_remote_jid() {
        let inbound = normalize_message("whatsapp", &msg("1@s.whatsapp.net", None, false, "hi")).unwrap();
        assert_eq!(inbound.chat_type, ChatType::Dm);
        assert_eq!(inbound.sender_id, "1@s.whatsapp.net");
    }

    #[test]
    fn group_sender_is_participant() {
        let inbound = normalize_message("whatsapp", &msg("123@g.us", Some("9@s.whatsapp.net"), false, "hi")).unwrap();
        assert_eq!(inbound.chat_type, ChatType::Group);
        assert_eq!(inbound.sender_id, "9@s.whatsapp.net");
    }

    #[test]
    fn timestamp_converts_seconds_to_millis() {
        let inbound = normalize_message("whatsapp", &msg("1@s.whatsapp.net", None, false, "hi")).unwrap();
        assert_eq!(inbound.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn extracts_caption_when_conversation_absent() {
        let mut m = msg("1@s.whatsapp.net", None, false, "");
        m["message"] = serde_json::json!({ "imageMessage": { "caption": "look at this" } });
        let inbound = normalize_message("whatsapp", &m).unwrap();
        assert_eq!(inbound.text.as_deref(), Some("look at this"));
    }
}
