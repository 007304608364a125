//! Tool Server — the reverse of the health surface: the Agent calls these
//! routes back to act on a channel (§4.13, §6).

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub channel: String,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    pub text: String,
    #[serde(rename = "replyToId")]
    pub reply_to_id: Option<String>,
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let channel = state.channels.get(&req.channel).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown channel '{}'", req.channel)})),
        )
    })?;

    let message_id = channel
        .send_text(&req.chat_id, &req.text, req.reply_to_id.as_deref())
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        })?;

    state
        .cache
        .insert(message_id.clone(), req.channel.clone(), req.chat_id.clone());

    Ok(Json(json!({ "messageId": message_id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelActionRequest {
    pub channel: Option<String>,
    pub chat_id: Option<String>,
    pub message_id: Option<String>,
    pub action: ChannelAction,
    pub text: Option<String>,
    pub emoji: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelAction {
    Typing,
    React,
    Edit,
    Delete,
}

pub async fn channel_action(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChannelActionRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (channel_id, chat_id) = resolve_target(&state, &req)?;

    let channel = state.channels.get(&channel_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown channel '{}'", channel_id)})),
        )
    })?;

    let result = match req.action {
        ChannelAction::Typing => channel.send_typing(&chat_id).await,
        ChannelAction::React => {
            let message_id = req.message_id.as_deref().ok_or_else(bad_request_missing_message_id)?;
            let emoji = req.emoji.as_deref().unwrap_or("\u{1F44D}");
            channel.send_reaction(&chat_id, message_id, emoji).await
        }
        ChannelAction::Edit => {
            let message_id = req.message_id.as_deref().ok_or_else(bad_request_missing_message_id)?;
            let text = req.text.as_deref().unwrap_or("");
            channel.edit_message(&chat_id, message_id, text).await
        }
        ChannelAction::Delete => {
            let message_id = req.message_id.as_deref().ok_or_else(bad_request_missing_message_id)?;
            channel.delete_message(&chat_id, message_id).await
        }
    };

    result
        .map(|()| Json(json!({ "ok": true })))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))))
}

fn bad_request_missing_message_id() -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "messageId is required for this action"})),
    )
}

/// Resolve `(channelId, chatId)` from the request: if `channel`/`chatId` were
/// given directly, use them; otherwise fall back to the Message Cache lookup
/// by `messageId` alone.
fn resolve_target(
    state: &AppState,
    req: &ChannelActionRequest,
) -> Result<(String, String), (StatusCode, Json<Value>)> {
    if let (Some(channel), Some(chat_id)) = (&req.channel, &req.chat_id) {
        return Ok((channel.clone(), chat_id.clone()));
    }

    let message_id = req.message_id.as_deref().ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "either (channel, chatId) or messageId is required"})),
        )
    })?;

    state.cache.get(message_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "messageId unknown or expired"})),
        )
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfoRequest {
    pub channel: String,
    pub user_id: String,
}

pub async fn user_info(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserInfoRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if state.channels.get(&req.channel).is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown channel '{}'", req.channel)})),
        ));
    }

    Ok(Json(json!({
        "channelId": req.channel,
        "userId": req.user_id,
    })))
}

pub async fn list_channels(State(state): State<Arc<AppState>>) -> Json<Value> {
    crate::http::channels::channels_handler(State(state)).await
}

pub async fn not_implemented() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({"error": "not implemented"})),
    )
}
