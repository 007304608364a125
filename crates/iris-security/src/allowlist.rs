//! Persistent `(channelId, senderId)` approvals (§3 AllowlistEntry).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowlistEntry {
    pub channel_id: String,
    pub sender_id: String,
    pub approved_by: Option<String>,
    pub approved_at: String,
}

pub struct AllowlistStore {
    path: PathBuf,
}

impl AllowlistStore {
    pub fn new(state_dir: &Path) -> Self {
        Self { path: state_dir.join("allowlist.json") }
    }

    pub fn has(&self, channel_id: &str, sender_id: &str) -> Result<bool> {
        let entries: Vec<AllowlistEntry> = store::load(&self.path)?;
        Ok(entries.iter().any(|e| e.channel_id == channel_id && e.sender_id == sender_id))
    }

    /// Add an entry. Idempotent: adding the same `(channel, sender)` twice
    /// leaves the list length unchanged.
    pub fn add(&self, channel_id: &str, sender_id: &str, approved_by: Option<&str>) -> Result<()> {
        let approved_by = approved_by.map(str::to_string);
        store::mutate(&self.path, move |mut entries: Vec<AllowlistEntry>| {
            if !entries.iter().any(|e| e.channel_id == channel_id && e.sender_id == sender_id) {
                entries.push(AllowlistEntry {
                    channel_id: channel_id.to_string(),
                    sender_id: sender_id.to_string(),
                    approved_by,
                    approved_at: chrono::Utc::now().to_rfc3339(),
                });
            }
            (entries, ())
        })
    }

    pub fn revoke(&self, channel_id: &str, sender_id: &str) -> Result<bool> {
        store::mutate(&self.path, move |entries: Vec<AllowlistEntry>| {
            let before = entries.len();
            let kept: Vec<AllowlistEntry> = entries
                .into_iter()
                .filter(|e| !(e.channel_id == channel_id && e.sender_id == sender_id))
                .collect();
            let removed = kept.len() != before;
            (kept, removed)
        })
    }

    pub fn list(&self) -> Result<Vec<AllowlistEntry>> {
        store::load(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_has_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = AllowlistStore::new(dir.path());
        assert!(!store.has("telegram", "u1").unwrap());
        store.add("telegram", "u1", None).unwrap();
        assert!(store.has("telegram", "u1").unwrap());
    }

    #[test]
    fn adding_twice_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = AllowlistStore::new(dir.path());
        store.add("telegram", "u1", Some("owner")).unwrap();
        store.add("telegram", "u1", Some("owner")).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn revoke_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = AllowlistStore::new(dir.path());
        store.add("telegram", "u1", None).unwrap();
        assert!(store.revoke("telegram", "u1").unwrap());
        assert!(!store.has("telegram", "u1").unwrap());
        assert!(!store.revoke("telegram", "u1").unwrap());
    }
}
