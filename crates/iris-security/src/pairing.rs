//! Persistent short-code issuance and approval (§3 PairingRequest, §4.6).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::allowlist::AllowlistStore;
use crate::error::Result;
use crate::store;

/// Unambiguous alphabet: no `0/O`, `1/I`, and similar easily-confused glyphs.
pub const ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairingRequest {
    pub code: String,
    pub channel_id: String,
    pub sender_id: String,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

pub struct PairingStore {
    path: PathBuf,
    code_length: usize,
    ttl_ms: i64,
}

impl PairingStore {
    pub fn new(state_dir: &Path, code_length: usize, ttl_ms: u64) -> Self {
        Self { path: state_dir.join("pairing.json"), code_length, ttl_ms: ttl_ms as i64 }
    }

    /// Return the existing unexpired request for `(channel, sender)`
    /// verbatim, or generate and persist a new one.
    pub fn issue(&self, channel_id: &str, sender_id: &str) -> Result<PairingRequest> {
        let now = now_ms();
        let code_length = self.code_length;
        store::mutate(&self.path, move |mut requests: Vec<PairingRequest>| {
            requests.retain(|r| r.expires_at_ms > now);

            if let Some(existing) = requests
                .iter()
                .find(|r| r.channel_id == channel_id && r.sender_id == sender_id)
                .cloned()
            {
                return (requests, existing);
            }

            let existing_codes: std::collections::HashSet<&str> =
                requests.iter().map(|r| r.code.as_str()).collect();
            let code = loop {
                let candidate = random_code(code_length);
                if !existing_codes.contains(candidate.as_str()) {
                    break candidate;
                }
            };

            let request = PairingRequest {
                code,
                channel_id: channel_id.to_string(),
                sender_id: sender_id.to_string(),
                created_at_ms: now,
                expires_at_ms: now + self.ttl_ms,
            };
            requests.push(request.clone());
            (requests, request)
        })
    }

    /// Approve a code (case-insensitive). Atomically deletes the pairing
    /// request and adds the allowlist entry. Returns `None` if the code is
    /// unknown or expired.
    pub fn approve(
        &self,
        code: &str,
        allowlist: &AllowlistStore,
        approved_by: Option<&str>,
    ) -> Result<Option<(String, String)>> {
        let code = code.to_uppercase();
        let now = now_ms();
        let found = store::mutate(&self.path, move |requests: Vec<PairingRequest>| {
            let mut matched = None;
            let kept: Vec<PairingRequest> = requests
                .into_iter()
                .filter(|r| {
                    if r.expires_at_ms <= now {
                        return false;
                    }
                    if r.code == code && matched.is_none() {
                        matched = Some((r.channel_id.clone(), r.sender_id.clone()));
                        return false;
                    }
                    true
                })
                .collect();
            (kept, matched)
        })?;

        if let Some((channel_id, sender_id)) = &found {
            allowlist.add(channel_id, sender_id, approved_by)?;
        }
        Ok(found)
    }

    pub fn list(&self) -> Result<Vec<PairingRequest>> {
        let now = now_ms();
        let requests: Vec<PairingRequest> = store::load(&self.path)?;
        Ok(requests.into_iter().filter(|r| r.expires_at_ms > now).collect())
    }

    pub fn revoke(&self, code: &str) -> Result<bool> {
        let code = code.to_uppercase();
        store::mutate(&self.path, move |requests: Vec<PairingRequest>| {
            let before = requests.len();
            let kept: Vec<PairingRequest> = requests.into_iter().filter(|r| r.code != code).collect();
            let removed = kept.len() != before;
            (kept, removed)
        })
    }
}

fn random_code(length: usize) -> String {
    let alphabet: Vec<char> = ALPHABET.chars().collect();
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.into_iter().map(|b| alphabet[(b as usize) % alphabet.len()]).collect()
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_returns_same_request_when_called_twice() {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::new(dir.path(), 8, 3_600_000);
        let a = store.issue("telegram", "u1").unwrap();
        let b = store.issue("telegram", "u1").unwrap();
        assert_eq!(a.code, b.code);
    }

    #[test]
    fn approve_consumes_code_and_adds_allowlist_entry() {
        let dir = tempfile::tempdir().unwrap();
        let pairing = PairingStore::new(dir.path(), 8, 3_600_000);
        let allowlist = AllowlistStore::new(dir.path());

        let req = pairing.issue("telegram", "u1").unwrap();
        let result = pairing.approve(&req.code.to_lowercase(), &allowlist, Some("owner")).unwrap();
        assert_eq!(result, Some(("telegram".to_string(), "u1".to_string())));
        assert!(allowlist.has("telegram", "u1").unwrap());
        assert!(pairing.list().unwrap().is_empty());
    }

    #[test]
    fn approve_unknown_code_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let pairing = PairingStore::new(dir.path(), 8, 3_600_000);
        let allowlist = AllowlistStore::new(dir.path());
        assert!(pairing.approve("NOPE1234", &allowlist, None).unwrap().is_none());
    }

    #[test]
    fn generated_codes_use_only_the_unambiguous_alphabet() {
        let code = random_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| ALPHABET.contains(c)));
    }
}
