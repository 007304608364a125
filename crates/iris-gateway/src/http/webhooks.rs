//! `POST /webhooks/{channel_id}` — inbound delivery for push-style adapters
//! (currently only WhatsApp's self-hosted bridge; Telegram/Discord/Slack
//! own their inbound transport and never hit this route).

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use tracing::warn;

use crate::app::AppState;

pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Json(payload): Json<Value>,
) -> StatusCode {
    let Some(channel) = state.channels.get(&channel_id) else {
        warn!(channel = %channel_id, "webhook received for unknown channel");
        return StatusCode::NOT_FOUND;
    };

    match channel.handle_webhook(payload).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(channel = %channel_id, error = %e, "webhook handling failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
