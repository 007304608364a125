//! DM policy state machine (§4.6): rate limiting, allowlist/pairing/open/disabled.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use iris_core::config::SecurityPolicy;
use tracing::{debug, info};

use crate::allowlist::AllowlistStore;
use crate::error::Result;
use crate::pairing::PairingStore;

const RATE_WINDOW_MINUTE: Duration = Duration::from_secs(60);
const RATE_WINDOW_HOUR: Duration = Duration::from_secs(3600);

/// Why an inbound message was rejected by the gate. Non-retryable except
/// `RateLimited`; surfaced to the user as at most one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionReject {
    Disabled,
    NotAllowed,
    PairingRequired { code: String, message: String },
    RateLimited { retry_after_ms: i64 },
}

impl AdmissionReject {
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionReject::Disabled => "disabled",
            AdmissionReject::NotAllowed => "not_allowed",
            AdmissionReject::PairingRequired { .. } => "pairing_required",
            AdmissionReject::RateLimited { .. } => "rate_limited",
        }
    }
}

pub type GateDecision = std::result::Result<(), AdmissionReject>;

/// Sliding-window request counter, keyed by `"{channel}:{sender}"`.
pub struct RateLimiter {
    per_minute: u32,
    per_hour: u32,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self { per_minute, per_hour, hits: Mutex::new(HashMap::new()) }
    }

    /// Record a hit for `key`, unconditionally.
    pub fn hit(&self, key: &str) {
        let mut hits = self.hits.lock().unwrap();
        let entry = hits.entry(key.to_string()).or_default();
        entry.push_back(Instant::now());
        prune(entry);
    }

    /// Test whether `key` is currently blocked, without recording a hit.
    pub fn check(&self, key: &str) -> GateDecision {
        let mut hits = self.hits.lock().unwrap();
        let Some(entry) = hits.get_mut(key) else { return Ok(()) };
        prune(entry);

        let now = Instant::now();
        let minute_count = entry.iter().filter(|t| now.duration_since(**t) < RATE_WINDOW_MINUTE).count() as u32;
        let hour_count = entry.len() as u32;

        if minute_count >= self.per_minute || hour_count >= self.per_hour {
            let oldest = entry.front().copied().unwrap_or(now);
            let window = if minute_count >= self.per_minute { RATE_WINDOW_MINUTE } else { RATE_WINDOW_HOUR };
            let retry_after = (oldest + window).saturating_duration_since(now);
            return Err(AdmissionReject::RateLimited { retry_after_ms: retry_after.as_millis() as i64 });
        }
        Ok(())
    }
}

fn prune(entry: &mut VecDeque<Instant>) {
    let now = Instant::now();
    while let Some(front) = entry.front() {
        if now.duration_since(*front) > RATE_WINDOW_HOUR {
            entry.pop_front();
        } else {
            break;
        }
    }
}

pub struct SecurityGate {
    default_policy: SecurityPolicy,
    channel_policies: HashMap<String, SecurityPolicy>,
    rate_limiter: RateLimiter,
    pairing: PairingStore,
    allowlist: AllowlistStore,
}

impl SecurityGate {
    pub fn new(
        state_dir: &Path,
        default_policy: SecurityPolicy,
        pairing_code_length: usize,
        pairing_ttl_ms: u64,
        rate_limit_per_minute: u32,
        rate_limit_per_hour: u32,
    ) -> Self {
        Self {
            default_policy,
            channel_policies: HashMap::new(),
            rate_limiter: RateLimiter::new(rate_limit_per_minute, rate_limit_per_hour),
            pairing: PairingStore::new(state_dir, pairing_code_length, pairing_ttl_ms),
            allowlist: AllowlistStore::new(state_dir),
        }
    }

    pub fn set_channel_policy(&mut self, channel_id: &str, policy: SecurityPolicy) {
        self.channel_policies.insert(channel_id.to_string(), policy);
    }

    pub fn allowlist(&self) -> &AllowlistStore {
        &self.allowlist
    }

    pub fn pairing(&self) -> &PairingStore {
        &self.pairing
    }

    pub fn check(&self, channel_id: &str, sender_id: &str, sender_name: &str) -> Result<GateDecision> {
        let policy = self.channel_policies.get(channel_id).copied().unwrap_or(self.default_policy);
        let rate_key = format!("{channel_id}:{sender_id}");

        if policy != SecurityPolicy::Disabled {
            if let Err(reject) = self.rate_limiter.check(&rate_key) {
                debug!(channel = channel_id, sender = sender_id, "rate limited");
                return Ok(Err(reject));
            }
            self.rate_limiter.hit(&rate_key);
        }

        match policy {
            SecurityPolicy::Disabled => Ok(Err(AdmissionReject::Disabled)),
            SecurityPolicy::Open => Ok(Ok(())),
            SecurityPolicy::Allowlist => {
                if self.allowlist.has(channel_id, sender_id)? {
                    Ok(Ok(()))
                } else {
                    Ok(Err(AdmissionReject::NotAllowed))
                }
            }
            SecurityPolicy::Pairing => {
                if self.allowlist.has(channel_id, sender_id)? {
                    return Ok(Ok(()));
                }
                let request = self.pairing.issue(channel_id, sender_id)?;
                info!(channel = channel_id, sender = sender_id, code = %request.code, "issued pairing code");
                Ok(Err(AdmissionReject::PairingRequired {
                    code: request.code.clone(),
                    message: human_message(sender_name, &request.code),
                }))
            }
        }
    }
}

fn human_message(sender_name: &str, code: &str) -> String {
    format!("Hi {sender_name}! To start chatting, ask the owner to approve your pairing code: {code}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(dir: &Path, policy: SecurityPolicy) -> SecurityGate {
        SecurityGate::new(dir, policy, 8, 3_600_000, 30, 300)
    }

    #[test]
    fn open_policy_always_allows() {
        let dir = tempfile::tempdir().unwrap();
        let g = gate(dir.path(), SecurityPolicy::Open);
        assert_eq!(g.check("telegram", "u1", "Alice").unwrap(), Ok(()));
    }

    #[test]
    fn disabled_policy_always_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let g = gate(dir.path(), SecurityPolicy::Disabled);
        assert_eq!(g.check("telegram", "u1", "Alice").unwrap(), Err(AdmissionReject::Disabled));
    }

    #[test]
    fn pairing_policy_issues_code_then_allows_after_approval() {
        let dir = tempfile::tempdir().unwrap();
        let g = gate(dir.path(), SecurityPolicy::Pairing);
        let decision = g.check("telegram", "u1", "Alice").unwrap();
        let code = match decision {
            Err(AdmissionReject::PairingRequired { code, .. }) => code,
            other => panic!("expected pairing_required, got {other:?}"),
        };
        g.pairing().approve(&code, g.allowlist(), None).unwrap();
        assert_eq!(g.check("telegram", "u1", "Alice").unwrap(), Ok(()));
    }

    #[test]
    fn allowlist_policy_rejects_unknown_sender() {
        let dir = tempfile::tempdir().unwrap();
        let g = gate(dir.path(), SecurityPolicy::Allowlist);
        assert_eq!(g.check("telegram", "u1", "Alice").unwrap(), Err(AdmissionReject::NotAllowed));
    }

    #[test]
    fn rate_limiter_blocks_third_hit_within_a_minute() {
        let limiter = RateLimiter::new(2, 100);
        limiter.hit("u1");
        limiter.hit("u1");
        limiter.hit("u1");
        let decision = limiter.check("u1");
        assert!(matches!(decision, Err(AdmissionReject::RateLimited { .. })));
        assert_eq!(limiter.check("u2"), Ok(()));
    }
}
