use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("security gate error: {0}")]
    Security(#[from] iris_security::SecurityError),

    #[error("session map error: {0}")]
    Session(#[from] iris_sessions::SessionError),

    #[error("channel send error: {0}")]
    Channel(#[from] iris_channels::ChannelError),

    #[error("agent dispatch failed: {0}")]
    Agent(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;
