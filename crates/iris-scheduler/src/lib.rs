//! `iris-scheduler` — cron-driven prompt firing with SQLite persistence.
//!
//! Jobs are persisted to a SQLite `cron_jobs` table. [`engine::SchedulerEngine`]
//! polls every second and fires any job whose `next_run` has arrived: it
//! sends the job's prompt to a cached (or newly created) Agent session and
//! routes the reply through the Outbound Queue to the configured
//! `(channel, chatId)`. Each fire is recorded in `cron_runs`.

pub mod db;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

pub use engine::{CronAgentClient, SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use schedule::CronSchedule;
pub use types::{CronJob, CronJobConfig, RunLogEntry};
