use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Timelike, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use iris_core::config::HeartbeatConfig;

use crate::checker::Checker;
use crate::status::{CheckResult, CheckStatus, ComponentStatus, TickInterval};

/// How long a backpressure-deferred tick waits before retrying. Not part of
/// `HeartbeatConfig`; the source leaves this as an implementation constant.
const BACKPRESSURE_RETRY_MS: i64 = 500;

#[derive(Debug, Clone)]
struct ComponentState {
    status: ComponentStatus,
    consecutive_healthy_ticks: u32,
    heal_attempts: u32,
    last_latency_ms: u64,
    last_details: Option<String>,
}

impl ComponentState {
    fn new() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            consecutive_healthy_ticks: 0,
            heal_attempts: 0,
            last_latency_ms: 0,
            last_details: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentSnapshot {
    pub name: String,
    pub status: ComponentStatus,
    pub heal_attempts: u32,
    pub latency_ms: u64,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Not yet due, or outside active hours.
    Skipped,
    /// Coalesced into a later run, or deferred by backpressure.
    Deferred,
    Ran { interval: TickInterval, heals_invoked: Vec<String> },
}

/// One agent's heartbeat state: its checkers and their derived component
/// statuses, plus scheduling state (due time, coalescing, empty-check).
pub struct AgentHeartbeat {
    name: String,
    checkers: Vec<Arc<dyn Checker>>,
    config: HeartbeatConfig,
    components: HashMap<String, ComponentState>,
    next_due_ms: i64,
    consecutive_empty: u32,
    prev_hash: Option<u64>,
    pending_run_at_ms: Option<i64>,
}

impl AgentHeartbeat {
    pub fn new(name: impl Into<String>, checkers: Vec<Arc<dyn Checker>>, config: HeartbeatConfig) -> Self {
        Self {
            name: name.into(),
            checkers,
            config,
            components: HashMap::new(),
            next_due_ms: 0,
            consecutive_empty: 0,
            prev_hash: None,
            pending_run_at_ms: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn next_due_ms(&self) -> i64 {
        self.next_due_ms
    }

    fn within_active_hours(&self, now_ms: i64) -> bool {
        let Some(hours) = &self.config.active_hours else { return true };
        let hour = Utc.timestamp_millis_opt(now_ms).single().map(|t| t.hour() as u8).unwrap_or(0);
        let (start, end) = (hours.start_hour, hours.end_hour);
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// Advance this agent by one tick if it's due. `queue_size` models an
    /// external backpressure predicate; pass `|| 0` when none applies.
    pub async fn tick(&mut self, now_ms: i64, queue_size: impl Fn() -> usize) -> TickOutcome {
        if now_ms < self.next_due_ms {
            return TickOutcome::Skipped;
        }
        if !self.within_active_hours(now_ms) {
            self.next_due_ms = now_ms + self.config.interval_ms as i64;
            return TickOutcome::Skipped;
        }
        if let Some(coalesce_ms) = self.config.coalesce_ms {
            match self.pending_run_at_ms {
                None => {
                    self.pending_run_at_ms = Some(now_ms + coalesce_ms as i64);
                    return TickOutcome::Deferred;
                }
                Some(run_at) if now_ms < run_at => return TickOutcome::Deferred,
                Some(_) => self.pending_run_at_ms = None,
            }
        }
        if queue_size() > 0 {
            self.next_due_ms = now_ms + BACKPRESSURE_RETRY_MS;
            return TickOutcome::Deferred;
        }

        let mut results: Vec<(Arc<dyn Checker>, CheckResult)> = Vec::with_capacity(self.checkers.len());
        for checker in &self.checkers {
            let result = checker.check().await;
            results.push((Arc::clone(checker), result));
        }

        let mut heals_invoked = Vec::new();
        let mut all_healthy = true;
        for (checker, result) in &results {
            if result.status != CheckStatus::Healthy {
                all_healthy = false;
            }
            let name = checker.name().to_string();
            let state = self.components.entry(name.clone()).or_insert_with(ComponentState::new);
            state.last_latency_ms = result.latency_ms;
            state.last_details.clone_from(&result.details);
            apply_transition(state, result.status, &self.config);

            if matches!(state.status, ComponentStatus::Down | ComponentStatus::Degraded)
                && self.config.self_heal.enabled
                && state.heal_attempts < self.config.self_heal.max_attempts
                && checker.can_heal()
            {
                state.heal_attempts += 1;
                heals_invoked.push(name);
                if checker.heal().await {
                    state.status = ComponentStatus::Recovering;
                    state.consecutive_healthy_ticks = 0;
                }
            }
        }

        let hash = hash_results(&results);
        if all_healthy && self.prev_hash == Some(hash) {
            self.consecutive_empty += 1;
        } else {
            self.consecutive_empty = 0;
        }
        self.prev_hash = Some(hash);

        let interval = self.interval();
        let base_interval_ms = interval.as_millis(self.config.interval_ms);
        let effective_interval_ms = if self.config.empty_check.enabled && all_healthy && self.consecutive_empty > 0 {
            let backoff = self.config.empty_check.base_ms.saturating_mul(1u64 << self.consecutive_empty.min(20));
            backoff.min(self.config.empty_check.max_backoff_ms).max(base_interval_ms)
        } else {
            base_interval_ms
        };
        self.next_due_ms = now_ms + effective_interval_ms as i64;

        TickOutcome::Ran { interval, heals_invoked }
    }

    /// `critical` iff some component is `down`; else `degraded` iff some is
    /// `degraded|recovering`; else `healthy`.
    pub fn interval(&self) -> TickInterval {
        let mut any_down = false;
        let mut any_degraded_or_recovering = false;
        for state in self.components.values() {
            match state.status {
                ComponentStatus::Down => any_down = true,
                ComponentStatus::Degraded | ComponentStatus::Recovering => any_degraded_or_recovering = true,
                ComponentStatus::Healthy => {}
            }
        }
        if any_down {
            TickInterval::Critical
        } else if any_degraded_or_recovering {
            TickInterval::Degraded
        } else {
            TickInterval::Healthy
        }
    }

    pub fn snapshot(&self) -> Vec<ComponentSnapshot> {
        let mut out: Vec<ComponentSnapshot> = self
            .components
            .iter()
            .map(|(name, state)| ComponentSnapshot {
                name: name.clone(),
                status: state.status,
                heal_attempts: state.heal_attempts,
                latency_ms: state.last_latency_ms,
                details: state.last_details.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

fn apply_transition(state: &mut ComponentState, result: CheckStatus, config: &HeartbeatConfig) {
    use ComponentStatus::*;
    match (state.status, result) {
        (Healthy, CheckStatus::Healthy) => {
            state.heal_attempts = 0;
        }
        (Healthy, CheckStatus::Degraded) => state.status = Degraded,
        (Healthy, CheckStatus::Down) => state.status = Down,
        (Degraded, CheckStatus::Healthy) | (Down, CheckStatus::Healthy) => {
            state.consecutive_healthy_ticks += 1;
            state.status = Healthy;
        }
        (Recovering, CheckStatus::Healthy) => {
            state.consecutive_healthy_ticks += 1;
            if state.consecutive_healthy_ticks >= config.self_heal.backoff_ticks {
                state.status = Healthy;
                state.heal_attempts = 0;
            }
        }
        (Recovering, CheckStatus::Degraded) => {
            state.status = Degraded;
            state.consecutive_healthy_ticks = 0;
        }
        (Recovering, CheckStatus::Down) => {
            state.status = Down;
            state.consecutive_healthy_ticks = 0;
        }
        (Degraded, CheckStatus::Down) => state.status = Down,
        (Down, CheckStatus::Degraded) => state.status = Degraded,
        (Degraded, CheckStatus::Degraded) | (Down, CheckStatus::Down) => {}
    }
}

fn hash_results(results: &[(Arc<dyn Checker>, CheckResult)]) -> u64 {
    let mut pairs: Vec<(String, CheckStatus)> = results.iter().map(|(c, r)| (c.name().to_string(), r.status)).collect();
    pairs.sort();
    let mut hasher = Sha256::new();
    for (name, status) in &pairs {
        hasher.update(name.as_bytes());
        hasher.update([*status as u8]);
    }
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct ScriptedChecker {
        name: &'static str,
        results: Vec<CheckStatus>,
        call: AtomicU32,
        heals: bool,
    }

    impl ScriptedChecker {
        fn new(name: &'static str, results: Vec<CheckStatus>) -> Arc<Self> {
            Arc::new(Self { name, results, call: AtomicU32::new(0), heals: false })
        }

        fn healing(name: &'static str, results: Vec<CheckStatus>) -> Arc<Self> {
            Arc::new(Self { name, results, call: AtomicU32::new(0), heals: true })
        }
    }

    #[async_trait]
    impl Checker for ScriptedChecker {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self) -> CheckResult {
            let i = self.call.fetch_add(1, Ordering::SeqCst) as usize;
            let status = *self.results.get(i).unwrap_or(self.results.last().unwrap());
            CheckResult { status, latency_ms: 10, details: None }
        }

        async fn heal(&self) -> bool {
            true
        }

        fn can_heal(&self) -> bool {
            self.heals
        }
    }

    fn config() -> HeartbeatConfig {
        HeartbeatConfig { enabled: true, interval_ms: 10_000, ..Default::default() }
    }

    #[tokio::test]
    async fn healthy_check_keeps_status_healthy() {
        let checker = ScriptedChecker::new("db", vec![CheckStatus::Healthy]);
        let mut agent = AgentHeartbeat::new("a1", vec![checker], config());
        let outcome = agent.tick(0, || 0).await;
        assert!(matches!(outcome, TickOutcome::Ran { interval: TickInterval::Healthy, .. }));
        assert_eq!(agent.snapshot()[0].status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn down_result_drives_critical_interval() {
        let checker = ScriptedChecker::new("db", vec![CheckStatus::Down]);
        let mut agent = AgentHeartbeat::new("a1", vec![checker], config());
        let outcome = agent.tick(0, || 0).await;
        assert!(matches!(outcome, TickOutcome::Ran { interval: TickInterval::Critical, .. }));
    }

    #[tokio::test]
    async fn down_to_healthy_without_self_heal_skips_recovering() {
        let mut cfg = config();
        cfg.self_heal.backoff_ticks = 2;
        let checker = ScriptedChecker::new(
            "db",
            vec![CheckStatus::Down, CheckStatus::Healthy, CheckStatus::Healthy, CheckStatus::Healthy],
        );
        let mut agent = AgentHeartbeat::new("a1", vec![checker], cfg);

        agent.tick(0, || 0).await; // down
        agent.tick(1_000, || 0).await; // healthy; no heal was invoked so it goes straight to healthy
        assert_eq!(agent.snapshot()[0].status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn self_heal_invoked_and_enters_recovering() {
        let mut cfg = config();
        cfg.self_heal.enabled = true;
        cfg.self_heal.max_attempts = 3;
        cfg.self_heal.backoff_ticks = 2;
        let checker = ScriptedChecker::healing(
            "db",
            vec![CheckStatus::Down, CheckStatus::Healthy, CheckStatus::Healthy, CheckStatus::Healthy],
        );
        let mut agent = AgentHeartbeat::new("a1", vec![checker], cfg);

        let outcome = agent.tick(0, || 0).await;
        match outcome {
            TickOutcome::Ran { heals_invoked, .. } => assert_eq!(heals_invoked, vec!["db".to_string()]),
            _ => panic!("expected Ran"),
        }
        assert_eq!(agent.snapshot()[0].status, ComponentStatus::Recovering);

        agent.tick(1_000, || 0).await;
        assert_eq!(agent.snapshot()[0].status, ComponentStatus::Recovering);
        agent.tick(2_000, || 0).await;
        assert_eq!(agent.snapshot()[0].status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn empty_check_backoff_extends_interval_when_nothing_changes() {
        let mut cfg = config();
        cfg.empty_check.enabled = true;
        cfg.empty_check.base_ms = 1_000;
        cfg.empty_check.max_backoff_ms = 60_000;
        let checker = ScriptedChecker::new("db", vec![CheckStatus::Healthy]);
        let mut agent = AgentHeartbeat::new("a1", vec![checker], cfg);

        agent.tick(0, || 0).await;
        let due_after_first = agent.next_due_ms();
        agent.tick(due_after_first, || 0).await;
        let due_after_second = agent.next_due_ms();
        assert!(due_after_second - due_after_first > 10_000);
    }

    #[tokio::test]
    async fn coalescing_defers_a_tick_until_coalesce_window_elapses() {
        let mut cfg = config();
        cfg.coalesce_ms = Some(500);
        let checker = ScriptedChecker::new("db", vec![CheckStatus::Healthy]);
        let mut agent = AgentHeartbeat::new("a1", vec![checker], cfg);

        assert_eq!(agent.tick(0, || 0).await, TickOutcome::Deferred);
        assert_eq!(agent.tick(100, || 0).await, TickOutcome::Deferred);
        assert!(matches!(agent.tick(500, || 0).await, TickOutcome::Ran { .. }));
    }

    #[tokio::test]
    async fn backpressure_defers_until_queue_drains() {
        let checker = ScriptedChecker::new("db", vec![CheckStatus::Healthy]);
        let mut agent = AgentHeartbeat::new("a1", vec![checker], config());
        assert_eq!(agent.tick(0, || 5).await, TickOutcome::Deferred);
    }
}
