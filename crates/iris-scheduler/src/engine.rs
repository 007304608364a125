use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use iris_router::{OutboundItem, OutboundQueue};
use iris_sessions::SessionCreator;
use rusqlite::Connection;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{error, info, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::CronSchedule,
    types::{CronJob, CronJobConfig, RunLogEntry},
};

/// Sends a job's prompt synchronously and waits for the Agent's reply.
/// Distinct from [`iris_router::AgentDispatcher`]: a cron fire is a
/// synchronous round trip, not an async-dispatched chat turn.
#[async_trait]
pub trait CronAgentClient: Send + Sync {
    async fn send_message(&self, agent_session_id: &str, prompt: &str) -> std::result::Result<String, String>;
}

/// Handle for job CRUD, usable independently of a running engine (e.g. from
/// the CLI's `cron list|add|remove`).
pub struct SchedulerHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SchedulerHandle {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Insert or replace the job with this name. Replacing resets scheduling
    /// state (the session is not carried over to the new definition).
    pub fn add_job(&self, config: CronJobConfig) -> Result<CronJob> {
        let sched = CronSchedule::parse(&config.schedule)?;
        let next = if config.enabled { sched.next_after(Utc::now()).map(|dt| dt.to_rfc3339()) } else { None };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cron_jobs (name, schedule, prompt, channel, chat_id, enabled, next_run, last_run, agent_session_id)
             VALUES (?1,?2,?3,?4,?5,?6,?7,NULL,NULL)
             ON CONFLICT(name) DO UPDATE SET
               schedule=excluded.schedule, prompt=excluded.prompt, channel=excluded.channel,
               chat_id=excluded.chat_id, enabled=excluded.enabled, next_run=excluded.next_run,
               last_run=NULL, agent_session_id=NULL",
            rusqlite::params![config.name, config.schedule, config.prompt, config.channel, config.chat_id, config.enabled, next],
        )?;
        info!(job = %config.name, "cron job added");
        Ok(CronJob { config, next_run: next, last_run: None, agent_session_id: None })
    }

    pub fn remove_job(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM cron_jobs WHERE name = ?1", [name])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { name: name.to_string() });
        }
        info!(job = name, "cron job removed");
        Ok(())
    }

    pub fn list_jobs(&self) -> Result<Vec<CronJob>> {
        let conn = self.conn.lock().unwrap();
        list_jobs_impl(&conn)
    }

    pub fn run_log(&self, job_name: &str, limit: u32) -> Result<Vec<RunLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT job_name, started_at, completed_at, success, error FROM cron_runs
             WHERE job_name = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![job_name, limit], |row| {
                Ok(RunLogEntry {
                    job_name: row.get(0)?,
                    started_at: row.get(1)?,
                    completed_at: row.get(2)?,
                    success: row.get::<_, Option<bool>>(3)?.unwrap_or(false),
                    error: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

fn list_jobs_impl(conn: &Connection) -> Result<Vec<CronJob>> {
    let mut stmt = conn.prepare(
        "SELECT name, schedule, prompt, channel, chat_id, enabled, next_run, last_run, agent_session_id
         FROM cron_jobs ORDER BY name",
    )?;
    let jobs = stmt
        .query_map([], |row| {
            Ok(CronJob {
                config: CronJobConfig {
                    name: row.get(0)?,
                    schedule: row.get(1)?,
                    prompt: row.get(2)?,
                    channel: row.get(3)?,
                    chat_id: row.get(4)?,
                    enabled: row.get(5)?,
                },
                next_run: row.get(6)?,
                last_run: row.get(7)?,
                agent_session_id: row.get(8)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(jobs)
}

/// Polls persisted jobs and fires each whose `next_run` has arrived. At most
/// one execution per job name is ever in flight; a still-running job is
/// skipped on the next poll rather than overlapped.
pub struct SchedulerEngine {
    conn: Arc<Mutex<Connection>>,
    session_creator: Arc<dyn SessionCreator>,
    agent: Arc<dyn CronAgentClient>,
    outbound: Arc<OutboundQueue>,
    running: Arc<AsyncMutex<HashSet<String>>>,
}

impl SchedulerEngine {
    pub fn new(
        conn: Connection,
        session_creator: Arc<dyn SessionCreator>,
        agent: Arc<dyn CronAgentClient>,
        outbound: Arc<OutboundQueue>,
    ) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            session_creator,
            agent,
            outbound,
            running: Arc::new(AsyncMutex::new(HashSet::new())),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { conn: Arc::clone(&self.conn) }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("cron scheduler started");
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let due = {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            match list_due(&conn, &now) {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!("cron poll failed: {e}");
                    return;
                }
            }
        };

        for job in due {
            let name = job.config.name.clone();
            let mut running = self.running.lock().await;
            if running.contains(&name) {
                continue;
            }
            running.insert(name.clone());
            drop(running);

            let this = self.clone_refs();
            tokio::spawn(async move {
                this.fire(job).await;
                this.running.lock().await.remove(&name);
            });
        }
    }

    fn clone_refs(&self) -> SchedulerEngineRefs {
        SchedulerEngineRefs {
            conn: Arc::clone(&self.conn),
            session_creator: Arc::clone(&self.session_creator),
            agent: Arc::clone(&self.agent),
            outbound: Arc::clone(&self.outbound),
            running: Arc::clone(&self.running),
        }
    }
}

/// Owned clone of the handles a single fire needs, so the spawned task
/// doesn't borrow `self`.
struct SchedulerEngineRefs {
    conn: Arc<Mutex<Connection>>,
    session_creator: Arc<dyn SessionCreator>,
    agent: Arc<dyn CronAgentClient>,
    outbound: Arc<OutboundQueue>,
    running: Arc<AsyncMutex<HashSet<String>>>,
}

impl SchedulerEngineRefs {
    async fn fire(&self, job: CronJob) {
        let started_at = Utc::now().to_rfc3339();
        let run_id = {
            let conn = self.conn.lock().unwrap();
            match conn.execute(
                "INSERT INTO cron_runs (job_name, started_at) VALUES (?1,?2)",
                rusqlite::params![job.config.name, started_at],
            ) {
                Ok(_) => conn.last_insert_rowid(),
                Err(e) => {
                    error!(job = %job.config.name, "failed to write run-log start: {e}");
                    return;
                }
            }
        };

        let result = self.run_job(&job).await;

        let (success, error_text) = match &result {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.clone())),
        };
        let completed_at = Utc::now().to_rfc3339();
        if let Err(e) = self.conn.lock().unwrap().execute(
            "UPDATE cron_runs SET completed_at=?1, success=?2, error=?3 WHERE id=?4",
            rusqlite::params![completed_at, success, error_text, run_id],
        ) {
            error!(job = %job.config.name, "failed to write run-log completion: {e}");
        }

        if let Err(e) = &result {
            warn!(job = %job.config.name, error = %e, "cron job failed");
        } else {
            info!(job = %job.config.name, "cron job fired");
        }
    }

    async fn run_job(&self, job: &CronJob) -> std::result::Result<(), String> {
        let agent_session_id = match &job.agent_session_id {
            Some(id) => id.clone(),
            None => {
                let title = format!("cron: {}", job.config.name);
                let id = self.session_creator.create_session(&title).await?;
                id.as_str().to_string()
            }
        };

        let reply = self.agent.send_message(&agent_session_id, &job.config.prompt).await?;

        self.outbound.enqueue(OutboundItem {
            channel_id: job.config.channel.clone(),
            chat_id: job.config.chat_id.clone(),
            text: reply,
            reply_to_id: None,
        });

        self.reschedule(job, &agent_session_id)
    }

    fn reschedule(&self, job: &CronJob, agent_session_id: &str) -> std::result::Result<(), String> {
        let sched = CronSchedule::parse(&job.config.schedule).map_err(|e| e.to_string())?;
        let now = Utc::now();
        let next = if job.config.enabled { sched.next_after(now).map(|dt| dt.to_rfc3339()) } else { None };

        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE cron_jobs SET last_run=?1, next_run=?2, agent_session_id=?3 WHERE name=?4",
                rusqlite::params![now.to_rfc3339(), next, agent_session_id, job.config.name],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn list_due(conn: &Connection, now: &str) -> Result<Vec<CronJob>> {
    let all = list_jobs_impl(conn)?;
    Ok(all
        .into_iter()
        .filter(|j| j.config.enabled && j.next_run.as_deref().is_some_and(|nr| nr <= now))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> SchedulerHandle {
        SchedulerHandle::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn job_config(name: &str) -> CronJobConfig {
        CronJobConfig {
            name: name.to_string(),
            schedule: "0 9 * * *".to_string(),
            prompt: "good morning".to_string(),
            channel: "telegram".to_string(),
            chat_id: "chat1".to_string(),
            enabled: true,
        }
    }

    #[test]
    fn add_then_list_round_trips() {
        let h = handle();
        h.add_job(job_config("morning-report")).unwrap();
        let jobs = h.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].config.prompt, "good morning");
        assert!(jobs[0].next_run.is_some());
    }

    #[test]
    fn adding_same_name_twice_replaces_not_duplicates() {
        let h = handle();
        h.add_job(job_config("morning-report")).unwrap();
        let mut second = job_config("morning-report");
        second.prompt = "updated prompt".to_string();
        h.add_job(second).unwrap();

        let jobs = h.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].config.prompt, "updated prompt");
    }

    #[test]
    fn remove_missing_job_errors() {
        let h = handle();
        assert!(matches!(h.remove_job("nope"), Err(SchedulerError::JobNotFound { .. })));
    }

    #[test]
    fn remove_existing_job_drops_it_from_list() {
        let h = handle();
        h.add_job(job_config("morning-report")).unwrap();
        h.remove_job("morning-report").unwrap();
        assert!(h.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn disabled_job_gets_no_next_run() {
        let h = handle();
        let mut cfg = job_config("paused-job");
        cfg.enabled = false;
        h.add_job(cfg).unwrap();
        assert!(h.list_jobs().unwrap()[0].next_run.is_none());
    }
}
