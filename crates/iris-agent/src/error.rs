use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("agent response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("agent api error ({status}): {message}")]
    Api { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, AgentError>;
