use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::{AgentHeartbeat, ComponentSnapshot, TickOutcome};

/// Owns every agent's heartbeat state and drives their ticks on a common
/// timer. Agents are independently due; a shared `tokio::time::interval`
/// just needs to be finer-grained than the smallest configured interval.
pub struct HeartbeatEngine {
    agents: DashMap<String, Arc<AsyncMutex<AgentHeartbeat>>>,
}

impl HeartbeatEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { agents: DashMap::new() })
    }

    pub fn register(&self, agent: AgentHeartbeat) {
        self.agents.insert(agent.name().to_string(), Arc::new(AsyncMutex::new(agent)));
    }

    pub fn deregister(&self, agent_name: &str) {
        self.agents.remove(agent_name);
    }

    /// Tick every due agent once, using wall-clock now.
    pub async fn tick_all(&self) -> Vec<(String, TickOutcome)> {
        self.tick_all_at(chrono::Utc::now().timestamp_millis()).await
    }

    pub async fn tick_all_at(&self, now_ms: i64) -> Vec<(String, TickOutcome)> {
        let handles: Vec<(String, Arc<AsyncMutex<AgentHeartbeat>>)> =
            self.agents.iter().map(|e| (e.key().clone(), Arc::clone(e.value()))).collect();

        let mut out = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let mut agent = handle.lock().await;
            let outcome = agent.tick(now_ms, || 0).await;
            if let TickOutcome::Ran { interval, ref heals_invoked } = outcome {
                if !heals_invoked.is_empty() {
                    debug!(agent = %name, ?heals_invoked, ?interval, "heartbeat ran self-heal");
                }
            }
            out.push((name, outcome));
        }
        out
    }

    pub async fn snapshot(&self, agent_name: &str) -> Option<Vec<ComponentSnapshot>> {
        let handle = Arc::clone(self.agents.get(agent_name)?.value());
        Some(handle.lock().await.snapshot())
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    /// Run the tick loop until `cancel` fires. `poll_every` should be the
    /// gcd-ish granularity at which due agents are checked; it need not
    /// match any single agent's configured interval.
    pub async fn run(self: Arc<Self>, poll_every: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(poll_every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("heartbeat engine shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    for (name, outcome) in self.tick_all().await {
                        if let TickOutcome::Ran { interval, .. } = outcome {
                            if matches!(interval, crate::status::TickInterval::Critical) {
                                warn!(agent = %name, "heartbeat: agent in critical state");
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use iris_core::config::HeartbeatConfig;

    use super::*;
    use crate::checker::Checker;
    use crate::status::{CheckResult, CheckStatus};

    struct AlwaysHealthy;

    #[async_trait]
    impl Checker for AlwaysHealthy {
        fn name(&self) -> &str {
            "ok"
        }
        async fn check(&self) -> CheckResult {
            CheckResult::healthy(5)
        }
    }

    #[tokio::test]
    async fn register_then_tick_produces_a_snapshot() {
        let engine = HeartbeatEngine::new();
        engine.register(AgentHeartbeat::new(
            "agent1",
            vec![Arc::new(AlwaysHealthy)],
            HeartbeatConfig { enabled: true, interval_ms: 5_000, ..Default::default() },
        ));

        let outcomes = engine.tick_all_at(0).await;
        assert_eq!(outcomes.len(), 1);
        let snap = engine.snapshot("agent1").await.unwrap();
        assert_eq!(snap[0].status as u8, crate::status::ComponentStatus::Healthy as u8);
    }

    #[tokio::test]
    async fn unknown_agent_snapshot_is_none() {
        let engine = HeartbeatEngine::new();
        assert!(engine.snapshot("nope").await.is_none());
    }
}
