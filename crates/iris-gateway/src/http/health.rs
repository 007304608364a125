//! `GET /health` — liveness probe (§6).

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::sysmem::memory_usage_mb;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let channels: Vec<Value> = state
        .channels
        .statuses()
        .into_iter()
        .map(|(id, status)| json!({ "id": id, "status": status }))
        .collect();

    let agent_healthy = state.agent.check_health().await;
    let status = if agent_healthy && !channels.is_empty() { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "version": crate::version::VERSION,
        "gitSha": crate::version::GIT_SHA,
        "uptime": state.uptime_secs(),
        "channels": channels,
        "opencode": { "healthy": agent_healthy },
        "system": { "memoryMB": memory_usage_mb() },
    }))
}
