//! `GET /ready` — readiness probe (§6).

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::app::AppState;

pub async fn ready_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let connected = state
        .channels
        .statuses()
        .iter()
        .any(|(_, status)| *status == iris_channels::ChannelStatus::Connected);

    if !connected {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "no channel connected" })),
        );
    }

    if !state.agent.check_health().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "agent unreachable" })),
        );
    }

    (StatusCode::OK, Json(json!({ "ready": true })))
}
