pub mod agent;
pub mod checker;
pub mod engine;
pub mod status;

pub use agent::{AgentHeartbeat, ComponentSnapshot, TickOutcome};
pub use checker::Checker;
pub use engine::HeartbeatEngine;
pub use status::{CheckResult, CheckStatus, ComponentStatus, TickInterval};
