use serde::{Deserialize, Serialize};

/// `createSession`/`listSessions` result shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateSessionRequest<'a> {
    pub title: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub text: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageResponse {
    pub text: String,
}

/// Event delivered over the long-lived subscription, keyed by
/// `agentSessionId` so the router can dispatch to the right coalescer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Partial { session_id: String, delta: String },
    Response { session_id: String, text: String },
    Error { session_id: String, message: String },
}
