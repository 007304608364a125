//! `GET /channels` — channel roster (§6).

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

pub async fn channels_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let channels: Vec<Value> = state
        .channels
        .statuses()
        .into_iter()
        .map(|(id, status)| {
            let capabilities = state.channels.get(&id).map(|c| c.capabilities());
            json!({
                "id": id,
                "status": status,
                "type": state.channel_configs.get(&id).map(|c| c.kind),
                "capabilities": capabilities.map(|c| json!({
                    "text": c.text,
                    "image": c.image,
                    "video": c.video,
                    "audio": c.audio,
                    "document": c.document,
                    "reaction": c.reaction,
                    "typing": c.typing,
                    "edit": c.edit,
                    "delete": c.delete,
                    "reply": c.reply,
                    "thread": c.thread,
                    "maxTextLength": c.max_text_length,
                })),
            })
        })
        .collect();

    Json(json!({ "channels": channels }))
}
