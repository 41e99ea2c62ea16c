//! Short-lived in-memory cache.

use moka::sync::Cache;
use std::time::Duration;
use tracing::debug;

const MAX_ENTRIES: u64 = 1_000;

/// Keyed TTL cache with last-write-wins semantics.
///
/// Prefix invalidation is the only explicit removal. Expired entries are
/// never served and are evicted by the cache's own housekeeping.
pub struct TtlCache<V> {
    entries: Cache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(MAX_ENTRIES)
                .build(),
        }
    }

    /// Unexpired value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key)
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let matching: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();
        for key in &matching {
            self.entries.invalidate(key.as_str());
        }
        if !matching.is_empty() {
            debug!(prefix, removed = matching.len(), "cache entries invalidated");
        }
        matching.len()
    }
}

impl<V: Clone + Send + Sync + 'static> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.entries.entry_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn entries_expire_after_ttl() {
        let cache = TtlCache::new(Duration::from_millis(50));
        cache.set("chat-conversations:p1", vec![1, 2, 3]);
        assert_eq!(cache.get("chat-conversations:p1"), Some(vec![1, 2, 3]));

        sleep(Duration::from_millis(120));
        assert_eq!(cache.get("chat-conversations:p1"), None);
    }

    #[test]
    fn expired_entries_are_evicted_without_reads() {
        let cache = TtlCache::new(Duration::from_millis(50));
        for peer in 0..20 {
            cache.set(format!("chat-messages:p1:q{peer}:50:0"), peer);
        }

        sleep(Duration::from_millis(120));
        cache.entries.run_pending_tasks();
        assert_eq!(cache.entries.entry_count(), 0);
    }

    #[test]
    fn last_write_wins() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.set("k", 1);
        cache.set("k", 2);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn invalidate_by_prefix() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("chat-messages:p1:q1:50:0", "a");
        cache.set("chat-messages:p1:q2:50:0", "b");
        cache.set("chat-conversations:p1", "c");

        assert_eq!(cache.invalidate("chat-messages:p1:q1:"), 1);
        assert_eq!(cache.get("chat-messages:p1:q1:50:0"), None);
        assert_eq!(cache.get("chat-messages:p1:q2:50:0"), Some("b"));

        assert_eq!(cache.invalidate("chat-messages:p1:"), 1);
        assert_eq!(cache.invalidate("chat-messages:p1:"), 0);
        assert_eq!(cache.get("chat-messages:p1:q2:50:0"), None);
        assert_eq!(cache.get("chat-conversations:p1"), Some("c"));
    }

    #[test]
    fn writes_after_invalidation_are_served() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("chat-conversations:p1", 1);
        cache.invalidate("chat-conversations:p1");
        cache.set("chat-conversations:p1", 2);

        assert_eq!(cache.get("chat-conversations:p1"), Some(2));
    }
}
