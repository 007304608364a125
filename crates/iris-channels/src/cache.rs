//! Bounded TTL map of outbound `messageId -> (channelId, chatId, timestamp)`.
//!
//! Lets the Agent or Tool Server later edit/delete/react to a message by id
//! alone, without the caller also knowing the originating chat.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub channel_id: String,
    pub chat_id: String,
    pub inserted_at: Instant,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// Insertion order, for oldest-first eviction on overflow.
    order: VecDeque<String>,
}

/// Thread-safe bounded TTL cache. Mutated only from the router task in
/// practice, but the lock makes concurrent reads from the Tool Server safe.
pub struct MessageCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    max_entries: usize,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_limits(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { entries: HashMap::new(), order: VecDeque::new() }),
            ttl,
            max_entries,
        }
    }

    /// Record a sent message. Evicts the oldest entry (by insertion order) if
    /// the cache is at capacity.
    pub fn insert(&self, message_id: String, channel_id: String, chat_id: String) {
        let mut inner = self.inner.lock().expect("message cache poisoned");
        if inner.entries.len() >= self.max_entries {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        inner.order.push_back(message_id.clone());
        inner.entries.insert(message_id, CacheEntry { channel_id, chat_id, inserted_at: Instant::now() });
    }

    /// Look up a message, returning `None` if absent or expired (a lazily
    /// pruned read — an expired entry observed here is also removed).
    pub fn get(&self, message_id: &str) -> Option<(String, String)> {
        let mut inner = self.inner.lock().expect("message cache poisoned");
        let expired = inner
            .entries
            .get(message_id)
            .map(|e| e.inserted_at.elapsed() > self.ttl)
            .unwrap_or(false);
        if expired {
            inner.entries.remove(message_id);
            return None;
        }
        inner.entries.get(message_id).map(|e| (e.channel_id.clone(), e.chat_id.clone()))
    }

    /// Periodic sweep: remove every entry whose TTL has elapsed. Intended to
    /// run on an interval alongside the router's other background sweeps.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().expect("message cache poisoned");
        let ttl = self.ttl;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
        let removed_ids: std::collections::HashSet<&String> = inner.order.iter().collect();
        let live: std::collections::HashSet<&String> = inner.entries.keys().collect();
        let _ = removed_ids;
        inner.order.retain(|id| live.contains(id));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("message cache poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let cache = MessageCache::new();
        cache.insert("m1".into(), "telegram".into(), "chat1".into());
        let (channel, chat) = cache.get("m1").unwrap();
        assert_eq!(channel, "telegram");
        assert_eq!(chat, "chat1");
    }

    #[test]
    fn overflow_evicts_oldest_insertion() {
        let cache = MessageCache::with_limits(DEFAULT_TTL, 2);
        cache.insert("m1".into(), "c".into(), "chat".into());
        cache.insert("m2".into(), "c".into(), "chat".into());
        cache.insert("m3".into(), "c".into(), "chat".into());
        assert!(cache.get("m1").is_none());
        assert!(cache.get("m2").is_some());
        assert!(cache.get("m3").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entry_is_pruned_on_read() {
        let cache = MessageCache::with_limits(Duration::from_millis(1), 10);
        cache.insert("m1".into(), "c".into(), "chat".into());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("m1").is_none());
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let cache = MessageCache::with_limits(Duration::from_millis(1), 10);
        cache.insert("m1".into(), "c".into(), "chat".into());
        std::thread::sleep(Duration::from_millis(5));
        let removed = cache.sweep();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 0);
    }
}
