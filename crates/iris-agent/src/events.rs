use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::AgentClient;
use crate::types::AgentEvent;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug)]
enum SseParsed {
    Event(String),
    Data(String),
}

fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(rest) = line.strip_prefix("event:") {
        Some(SseParsed::Event(rest.trim().to_string()))
    } else if let Some(rest) = line.strip_prefix("data:") {
        Some(SseParsed::Data(rest.trim().to_string()))
    } else {
        None
    }
}

/// Subscribes to the Agent's event stream, auto-reconnecting with capped
/// exponential backoff on any connection error. Runs until `cancel` fires;
/// events are pushed onto `tx` as they arrive.
pub async fn subscribe_events(client: AgentClient, tx: mpsc::Sender<AgentEvent>, cancel: CancellationToken) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match run_once(&client, &tx, &cancel).await {
            Ok(()) => return, // cancelled cleanly mid-stream
            Err(err) => {
                warn!(error = %err, backoff_ms = backoff.as_millis(), "agent event stream dropped, reconnecting");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancel.cancelled() => return,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[derive(Debug, thiserror::Error)]
enum StreamError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("agent event stream ended")]
    Ended,
}

async fn run_once(
    client: &AgentClient,
    tx: &mpsc::Sender<AgentEvent>,
    cancel: &CancellationToken,
) -> Result<(), StreamError> {
    let url = format!("{}/events", client.base_url());
    let resp = client.http_client().get(&url).send().await?.error_for_status()?;

    let mut current_event = String::new();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    loop {
        let chunk = tokio::select! {
            chunk = byte_stream.next() => chunk,
            _ = cancel.cancelled() => return Ok(()),
        };

        let Some(chunk) = chunk else {
            return Err(StreamError::Ended);
        };
        let chunk = chunk?;

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_sse_line(line) {
                Some(SseParsed::Event(ev)) => current_event = ev,
                Some(SseParsed::Data(data)) => {
                    if let Some(event) = decode_event(&current_event, &data) {
                        if tx.send(event).await.is_err() {
                            return Ok(()); // receiver dropped, nothing more to do
                        }
                    }
                }
                None => {}
            }
        }

        line_buf = remainder;
    }
}

fn decode_event(event_type: &str, data: &str) -> Option<AgentEvent> {
    match event_type {
        "partial" | "response" | "error" => match serde_json::from_str::<AgentEvent>(data) {
            Ok(event) => Some(event),
            Err(err) => {
                debug!(event_type, error = %err, "failed to decode agent event payload");
                None
            }
        },
        other => {
            debug!(event_type = other, "unhandled agent event type");
            None
        }
    }
}
