//! `GET /metrics` — Prometheus text exposition (§6).

use std::sync::Arc;

use axum::extract::State;

use crate::app::AppState;
use crate::sysmem::memory_usage_bytes;

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    let connected = state
        .channels
        .statuses()
        .iter()
        .filter(|(_, status)| *status == iris_channels::ChannelStatus::Connected)
        .count();

    let mut out = String::new();
    out.push_str("# HELP iris_uptime_seconds Seconds since process start.\n");
    out.push_str("# TYPE iris_uptime_seconds gauge\n");
    out.push_str(&format!("iris_uptime_seconds {}\n", state.uptime_secs()));

    out.push_str("# HELP iris_channels_connected Number of channel adapters currently connected.\n");
    out.push_str("# TYPE iris_channels_connected gauge\n");
    out.push_str(&format!("iris_channels_connected {}\n", connected));

    out.push_str("# HELP iris_memory_rss_bytes Resident set size of this process.\n");
    out.push_str("# TYPE iris_memory_rss_bytes gauge\n");
    out.push_str(&format!("iris_memory_rss_bytes {}\n", memory_usage_bytes()));

    out.push_str("# HELP iris_memory_heap_used_bytes Heap bytes in use (approximated by RSS on this allocator).\n");
    out.push_str("# TYPE iris_memory_heap_used_bytes gauge\n");
    out.push_str(&format!("iris_memory_heap_used_bytes {}\n", memory_usage_bytes()));

    out
}
