use serde::Serialize;

/// What a [`crate::checker::Checker`] reports for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub latency_ms: u64,
    pub details: Option<String>,
}

impl CheckResult {
    pub fn healthy(latency_ms: u64) -> Self {
        Self { status: CheckStatus::Healthy, latency_ms, details: None }
    }

    pub fn down(details: impl Into<String>) -> Self {
        Self { status: CheckStatus::Down, latency_ms: 0, details: Some(details.into()) }
    }
}

/// Derived per-component state, distinct from [`CheckStatus`]: a component can
/// be `recovering` after a heal attempt even though checks report `healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Down,
    Recovering,
}

/// Tick cadence for an agent, derived from the worst component status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickInterval {
    Healthy,
    Degraded,
    Critical,
}

impl TickInterval {
    /// Scale the agent's configured base interval by cadence.
    pub fn as_millis(self, base_ms: u64) -> u64 {
        let scaled = match self {
            TickInterval::Healthy => base_ms,
            TickInterval::Degraded => base_ms / 2,
            TickInterval::Critical => base_ms / 4,
        };
        scaled.max(1_000)
    }
}
