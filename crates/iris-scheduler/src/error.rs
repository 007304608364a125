use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("job not found: {name}")]
    JobNotFound { name: String },

    #[error("agent dispatch failed: {0}")]
    Agent(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
