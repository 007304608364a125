use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{channel::Channel, error::ChannelError, types::ChannelEvent, types::ChannelStatus};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300; // 5 minutes
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Registry of live channel adapters, keyed by [`Channel::id`].
///
/// All adapters share one event stream — the Message Router consumes it and
/// dispatches by `InboundMessage::channel_id`.
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
    cancellation: CancellationToken,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Register a channel adapter. Replaces any existing adapter with the same id.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let id = channel.id().to_string();
        info!(channel = %id, "registering channel adapter");
        self.channels.insert(id, channel);
    }

    /// Start every registered adapter, forwarding all emitted events onto a
    /// single shared channel. Each adapter connects with exponential backoff
    /// and jitter; a failing adapter does not block the others (they are
    /// started concurrently).
    pub async fn connect_all(&self, events: mpsc::Sender<ChannelEvent>) {
        let mut tasks = Vec::new();
        for (id, channel) in self.channels.iter() {
            let id = id.clone();
            let channel = Arc::clone(channel);
            let events = events.clone();
            let cancellation = self.cancellation.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = connect_with_backoff(&id, channel.as_ref(), events, cancellation).await {
                    error!(channel = %id, error = %e, "failed to connect channel after retries");
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Cancel and stop every registered adapter.
    pub async fn disconnect_all(&self) {
        self.cancellation.cancel();
        for (id, channel) in self.channels.iter() {
            info!(channel = %id, "disconnecting channel");
            if let Err(e) = channel.stop().await {
                warn!(channel = %id, error = %e, "error while disconnecting channel");
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(id).cloned()
    }

    /// All registered channel ids, sorted, for the `/channels` endpoint and CLI.
    pub fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> = self
            .channels
            .iter()
            .map(|(id, ch)| (id.clone(), ch.status()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    pub fn root_cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn connect_with_backoff(
    id: &str,
    channel: &dyn Channel,
    events: mpsc::Sender<ChannelEvent>,
    cancellation: CancellationToken,
) -> Result<(), ChannelError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match channel.start(events.clone(), cancellation.clone()).await {
            Ok(()) => {
                info!(channel = %id, attempt, "channel connected successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                return Err(e);
            }
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    channel = %id,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "channel connect failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    unreachable!("backoff loop exited without returning")
}

/// Return a jitter offset (0 … `JITTER_FRACTION * base_secs`) as integer seconds.
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_never_exceeds_fraction() {
        for base in [5, 10, 20, 40, 80, 160, 300] {
            let j = jitter_secs(base);
            assert!(j <= (base as f64 * JITTER_FRACTION) as u64);
        }
    }
}
