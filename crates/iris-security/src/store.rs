//! Shared JSON-file persistence for the pairing and allowlist stores.
//!
//! Every read-modify-write takes an advisory lock on a sidecar `.lock` file
//! so two processes sharing a state directory serialize their mutations
//! instead of racing. Locking is best-effort with bounded retries, not a
//! correctness guarantee against processes that ignore the lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fd_lock::RwLock as FileLock;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

const LOCK_RETRY_ATTEMPTS: u32 = 20;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Load the JSON array at `path`, or an empty `Vec` if the file is absent.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

/// Run `mutate` against the current contents of `path` under an advisory
/// lock, then persist whatever it returns. Retries lock acquisition with a
/// short sleep before giving up and proceeding unlocked (a non-clustered,
/// single-directory deployment never contends this hard in practice).
pub fn mutate<T, F, R>(path: &Path, mutate: F) -> Result<R>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(Vec<T>) -> (Vec<T>, R),
{
    let lock_path = lock_path_for(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let lock_file = fs::OpenOptions::new().create(true).write(true).open(&lock_path)?;
    let mut lock = FileLock::new(lock_file);

    let mut guard = None;
    for _ in 0..LOCK_RETRY_ATTEMPTS {
        match lock.try_write() {
            Ok(g) => {
                guard = Some(g);
                break;
            }
            Err(_) => std::thread::sleep(LOCK_RETRY_DELAY),
        }
    }
    // Fall through unlocked after exhausting retries rather than deadlocking
    // the caller; lost races are rare and the next sweep self-heals.
    let _held = guard;

    let current: Vec<T> = load(path)?;
    let (next, result) = mutate(current);
    let serialized = serde_json::to_string_pretty(&next)?;
    fs::write(path, serialized)?;
    Ok(result)
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock = path.to_path_buf();
    let file_name = lock.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    lock.set_file_name(format!("{file_name}.lock"));
    lock
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Item {
        id: String,
    }

    #[test]
    fn load_missing_file_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let items: Vec<Item> = load(&path).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn mutate_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        mutate(&path, |mut items: Vec<Item>| {
            items.push(Item { id: "a".to_string() });
            (items, ())
        })
        .unwrap();

        let items: Vec<Item> = load(&path).unwrap();
        assert_eq!(items, vec![Item { id: "a".to_string() }]);
    }
}
