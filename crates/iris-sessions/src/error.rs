use thiserror::Error;

/// Errors that can occur during session map operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// `agentClient.createSession` failed while resolving a new entry.
    #[error("agent session creation failed: {0}")]
    AgentFailure(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
