//! Slack channel adapter.
//!
//! Connects over Socket Mode — an outbound WebSocket opened by the bot, so
//! no public URL is required. Events arrive push-style as envelopes that
//! must be acknowledged within a few seconds; replies go out over the
//! `chat.postMessage` Web API. Grounded on the corpus's Socket Mode bridge
//! (`apps.connections.open` → `wss://…` → ack every envelope immediately).

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use iris_channels::chunk::{chunk_text, MAX_LEN_SLACK};
use iris_channels::{Channel, ChannelCapabilities, ChannelError, ChannelEvent, ChannelStatus, ChatType, InboundMessage};
use iris_core::config::ChannelConfig;

use crate::error::SlackError;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct SlackAdapter {
    id: String,
    http: reqwest::Client,
    bot_token: String,
    app_token: String,
    max_text_length: usize,
    status: Mutex<ChannelStatus>,
    bot_user_id: OnceLock<String>,
}

impl SlackAdapter {
    pub fn new(id: impl Into<String>, config: &ChannelConfig) -> Result<Self, SlackError> {
        let bot_token = config.bot_token.clone().or_else(|| config.token.clone()).ok_or(SlackError::NoToken)?;
        let app_token = config.app_token.clone().ok_or(SlackError::NoToken)?;

        Ok(Self {
            id: id.into(),
            http: reqwest::Client::new(),
            bot_token,
            app_token,
            max_text_length: config.max_text_length.unwrap_or(MAX_LEN_SLACK),
            status: Mutex::new(ChannelStatus::Disconnected),
            bot_user_id: OnceLock::new(),
        })
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().expect("slack status lock poisoned") = status;
    }

    async fn authenticate(&self) -> Result<String, SlackError> {
        let resp = self
            .http
            .post("https://slack.com/api/auth.test")
            .header("Authorization", format!("Bearer {}", self.bot_token))
            .send()
            .await?;
        let body: serde_json::Value = resp.json().await?;
        if !body["ok"].as_bool().unwrap_or(false) {
            return Err(SlackError::Api(body["error"].as_str().unwrap_or("unknown").to_string()));
        }
        Ok(body["user_id"].as_str().unwrap_or_default().to_string())
    }

}

#[async_trait]
impl Channel for SlackAdapter {
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
            typing: false,
            edit: false,
            delete: false,
            reply: true,
            thread: true,
            max_text_length: self.max_text_length,
        }
    }

    async fn start(&self, events: mpsc::Sender<ChannelEvent>, cancellation: CancellationToken) -> Result<(), ChannelError> {
        let bot_user_id = self.authenticate().await.map_err(|e| ChannelError::AuthFailed(e.to_string()))?;
        self.bot_user_id.set(bot_user_id.clone()).ok();

        self.set_status(ChannelStatus::Connected);
        let _ = events
            .send(ChannelEvent::Connected {
                channel_id: self.id.clone(),
                bot_id: Some(bot_user_id.clone()),
            })
            .await;
        info!(channel = %self.id, bot_user_id = %bot_user_id, "slack adapter authenticated");

        let adapter_id = self.id.clone();
        let app_token = self.app_token.clone();
        let http = self.http.clone();
        let adapter_events = events.clone();

        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                let ws_url = match open_socket_mode_url_for(&http, &app_token).await {
                    Ok(url) => url,
                    Err(e) => {
                        warn!(channel = %adapter_id, error = %e, "slack connections.open failed");
                        if wait_or_cancel(&cancellation, backoff).await {
                            break;
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                };

                backoff = INITIAL_BACKOFF;
                if run_socket_mode(&adapter_id, &ws_url, &bot_user_id, &adapter_events, &cancellation).await {
                    break;
                }
                if wait_or_cancel(&cancellation, INITIAL_BACKOFF).await {
                    break;
                }
            }
            let _ = adapter_events
                .send(ChannelEvent::Disconnected { channel_id: adapter_id.clone(), reason: None })
                .await;
            info!(channel = %adapter_id, "slack adapter stopped");
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str, _reply_to_id: Option<&str>) -> Result<String, ChannelError> {
        let chunks = chunk_text(text, self.max_text_length);
        let mut last_ts = String::new();

        for chunk in &chunks {
            let resp = self
                .http
                .post("https://slack.com/api/chat.postMessage")
                .header("Authorization", format!("Bearer {}", self.bot_token))
                .json(&serde_json::json!({ "channel": chat_id, "text": chunk }))
                .send()
                .await
                .map_err(SlackError::from)?;

            let body: serde_json::Value = resp.json().await.map_err(SlackError::from)?;
            if !body["ok"].as_bool().unwrap_or(false) {
                return Err(SlackError::Api(body["error"].as_str().unwrap_or("unknown").to_string()).into());
            }
            if let Some(ts) = body["ts"].as_str() {
                last_ts = ts.to_string();
            }
        }

        Ok(last_ts)
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().expect("slack status lock poisoned").clone()
    }
}

async fn open_socket_mode_url_for(http: &reqwest::Client, app_token: &str) -> Result<String, SlackError> {
    let resp = http
        .post("https://slack.com/api/apps.connections.open")
        .header("Authorization", format!("Bearer {}", app_token))
        .send()
        .await?;
    let body: serde_json::Value = resp.json().await?;
    if !body["ok"].as_bool().unwrap_or(false) {
        return Err(SlackError::Api(body["error"].as_str().unwrap_or("unknown").to_string()));
    }
    body["url"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| SlackError::Api("connections.open returned no url".to_string()))
}

/// Waits out `backoff` unless cancelled first. Returns `true` if cancelled.
async fn wait_or_cancel(cancellation: &CancellationToken, backoff: Duration) -> bool {
    tokio::select! {
        _ = cancellation.cancelled() => true,
        _ = tokio::time::sleep(backoff) => false,
    }
}

/// Runs one Socket Mode WebSocket session until it closes, errors, or
/// `cancellation` fires. Returns `true` if the caller should stop retrying
/// (cancellation fired).
async fn run_socket_mode(
    channel_id: &str,
    ws_url: &str,
    bot_user_id: &str,
    events: &mpsc::Sender<ChannelEvent>,
    cancellation: &CancellationToken,
) -> bool {
    let (ws_stream, _) = match connect_async(ws_url).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(channel = %channel_id, error = %e, "slack socket mode connect failed");
            return false;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    loop {
        let msg = tokio::select! {
            _ = cancellation.cancelled() => return true,
            next = read.next() => next,
        };

        let msg = match msg {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!(channel = %channel_id, error = %e, "slack socket mode read error");
                return false;
            }
            None => return false,
        };

        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => return false,
            WsMessage::Ping(data) => {
                let _ = write.send(WsMessage::Pong(data)).await;
                continue;
            }
            _ => continue,
        };

        let envelope: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => continue,
        };

        if let Some(envelope_id) = envelope["envelope_id"].as_str() {
            let ack = serde_json::json!({ "envelope_id": envelope_id });
            let _ = write.send(WsMessage::Text(ack.to_string())).await;
        }

        match envelope["type"].as_str() {
            Some("events_api") => {
                let event = &envelope["payload"]["event"];
                if matches!(event["type"].as_str(), Some("message") | Some("app_mention")) {
                    if let Some(inbound) = normalize_event(channel_id, event, bot_user_id) {
                        let _ = events.send(ChannelEvent::Message(inbound)).await;
                    }
                }
            }
            Some("disconnect") => return false,
            _ => {}
        }
    }
}

/// Normalize a Slack `message`/`app_mention` event per §4.1: reject any
/// `subtype` or `bot_id`; require `user`; DM iff `channel_type == "im"`;
/// `timestamp = ts * 1000`.
fn normalize_event(channel_id: &str, event: &serde_json::Value, bot_user_id: &str) -> Option<InboundMessage> {
    if event["subtype"].is_string() || event["bot_id"].is_string() {
        return None;
    }

    let user = event["user"].as_str()?;
    if user == bot_user_id {
        return None;
    }

    let text = event["text"].as_str().filter(|t| !t.is_empty())?.to_string();
    let chat_id = event["channel"].as_str()?.to_string();
    let ts = event["ts"].as_str()?;
    let chat_type = if event["channel_type"].as_str() == Some("im") { ChatType::Dm } else { ChatType::Group };

    Some(InboundMessage {
        id: ts.to_string(),
        channel_id: channel_id.to_string(),
        sender_id: user.to_string(),
        sender_name: Some(user.to_string()),
        chat_id,
        chat_type,
        text: Some(text),
        media: Vec::new(),
        reply_to_id: event["thread_ts"].as_str().filter(|t| *t != ts).map(|s| s.to_string()),
        timestamp: (ts.parse::<f64>().unwrap_or(0.0) * 1000.0) as i64,
        raw: event.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user: &str, text: &str, channel_type: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "message",
            "user": user,
            "text": text,
            "channel": "C123",
            "channel_type": channel_type,
            "ts": "1700000000.000100",
        })
    }

    #[test]
    fn rejects_subtype_messages() {
        let mut e = event("U1", "hi", "im");
        e["subtype"] = serde_json::Value::String("message_changed".to_string());
        assert!(normalize_event("slack", &e, "BOT").is_none());
    }

    #[test]
    fn rejects_bot_messages() {
        let mut e = event("U1", "hi", "im");
        e["bot_id"] = serde_json::Value::String("B1".to_string());
        assert!(normalize_event("slack", &e, "BOT").is_none());
    }

    #[test]
    fn rejects_own_bot_user() {
        assert!(normalize_event("slack", &event("BOT", "hi", "im"), "BOT").is_none());
    }

    #[test]
    fn dm_channel_type_is_im() {
        let inbound = normalize_event("slack", &event("U1", "hi", "im"), "BOT").unwrap();
        assert_eq!(inbound.chat_type, ChatType::Dm);
    }

    #[test]
    fn channel_message_is_group() {
        let inbound = normalize_event("slack", &event("U1", "hi", "channel"), "BOT").unwrap();
        assert_eq!(inbound.chat_type, ChatType::Group);
    }

    #[test]
    fn timestamp_scales_to_millis() {
        let inbound = normalize_event("slack", &event("U1", "hi", "im"), "BOT").unwrap();
        assert_eq!(inbound.timestamp, 1_700_000_000_100);
    }
}
