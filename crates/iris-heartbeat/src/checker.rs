use async_trait::async_trait;

use crate::status::CheckResult;

/// One monitored component of an agent. `heal` is optional: implementations
/// that can't self-heal leave it at the default and `can_heal` false.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> CheckResult;

    async fn heal(&self) -> bool {
        false
    }

    fn can_heal(&self) -> bool {
        false
    }
}
