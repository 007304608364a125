use serde::{Deserialize, Serialize};

pub use iris_core::config::CronJobConfig;

/// A persisted cron job: its static config plus scheduling/session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub config: CronJobConfig,
    /// ISO-8601 timestamp of the next planned fire, if the expression is
    /// still live and the job is enabled.
    pub next_run: Option<String>,
    pub last_run: Option<String>,
    /// Agent session reused across fires, created lazily on first fire.
    pub agent_session_id: Option<String>,
}

/// One row of a job's execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub job_name: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}
