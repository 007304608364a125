use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid auto-reply regex trigger: {0}")]
    InvalidTrigger(String),
}

pub type Result<T> = std::result::Result<T, SecurityError>;
