//! In-memory TTL cache for upstream market data responses.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Simple expiring cache keyed by string. Expired entries are not
/// evicted on read: they stay around so [`TtlCache::peek_stale`] can
/// serve them when the upstream is unavailable, and are replaced on the
/// next insert.
pub struct TtlCache<T: Clone> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh entry for `key`, or None if absent or expired.
    pub fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    /// Entry for `key` even if expired. Used to serve stale data when the
    /// upstream is unavailable.
    pub fn peek_stale(&self, key: &str) -> Option<T> {
        let entries = self.entries.lock().ok()?;
        entries.get(key).map(|(_, value)| value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: T) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.into(), (Instant::now(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_returned() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("AAPL", 42);
        assert_eq!(cache.get("AAPL"), Some(42));
    }

    #[test]
    fn expired_entry_is_not_fresh_but_stays_peekable() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("AAPL", 42);
        // the read order used by the stale-fallback paths: a miss on the
        // fresh read must not destroy the entry
        assert_eq!(cache.get("AAPL"), None);
        assert_eq!(cache.peek_stale("AAPL"), Some(42));
        assert_eq!(cache.get("AAPL"), None);
    }

    #[test]
    fn insert_replaces_stale_entry() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("AAPL", 1);
        cache.insert("AAPL", 2);
        assert_eq!(cache.get("AAPL"), Some(2));
    }

    #[test]
    fn missing_key_is_none() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get("MSFT"), None);
        assert_eq!(cache.peek_stale("MSFT"), None);
    }
}
