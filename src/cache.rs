use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Pluggable key-value store for decoded entities.
///
/// Implementations use interior mutability so a shared cache can sit behind an
/// `Arc` without external locking.
pub trait Cache<T: Clone + Send + Sync>: Send + Sync {
    fn get(&self, key: &str) -> Option<T>;
    fn insert(&self, key: String, value: T);
    fn remove(&self, key: &str) -> Option<T>;
    fn len(&self) -> usize;
    fn clear(&self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

struct Inner<T> {
    map: HashMap<String, Entry<T>>,
    /// Insertion order; the front is evicted first when over capacity.
    order: VecDeque<String>,
}

/// In-memory [`Cache`] with optional per-entry TTL and a capacity bound.
///
/// When full, the oldest insertion is evicted. Expired entries are dropped
/// lazily on access.
pub struct MemoryCache<T> {
    ttl: Option<Duration>,
    max_entries: Option<usize>,
    inner: Mutex<Inner<T>>,
}

impl<T> MemoryCache<T> {
    /// Unbounded cache without expiry.
    pub fn new() -> MemoryCache<T> {
        Self::with_limits(None, None)
    }

    pub fn with_limits(ttl: Option<Duration>, max_entries: Option<usize>) -> MemoryCache<T> {
        MemoryCache {
            ttl,
            max_entries,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }
}

impl<T> MemoryCache<T> {
    /// Drop every expired entry now instead of waiting for access. Returns
    /// how many entries were removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.map.len();
        inner.map.retain(|_, entry| !entry.expired());
        let removed = before - inner.map.len();
        if removed > 0 {
            let live: VecDeque<String> = inner
                .order
                .iter()
                .filter(|key| inner.map.contains_key(*key))
                .cloned()
                .collect();
            inner.order = live;
        }
        removed
    }
}

impl<T> Default for MemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> Cache<T> for MemoryCache<T> {
    fn get(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.lock();
        match inner.map.get(key) {
            Some(entry) if !entry.expired() => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        inner.map.remove(key);
        inner.order.retain(|k| k != key);
        None
    }

    fn insert(&self, key: String, value: T) {
        let mut inner = self.inner.lock();
        let entry = Entry {
            value,
            expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
        };
        // Re-inserting moves the key to the back of the eviction order.
        if inner.map.insert(key.clone(), entry).is_some() {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key);

        if let Some(max) = self.max_entries {
            while inner.map.len() > max {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.map.remove(&oldest);
            }
        }
    }

    fn remove(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.lock();
        let removed = inner.map.remove(key);
        if removed.is_some() {
            inner.order.retain(|k| k != key);
        }
        removed.map(|entry| entry.value)
    }

    fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_round_trip() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty());

        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest_insertion() {
        let cache = MemoryCache::with_limits(None, Some(2));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("c".to_string(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_reinsert_refreshes_eviction_order() {
        let cache = MemoryCache::with_limits(None, Some(2));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        // "a" becomes the most recent insertion, so "b" goes first.
        cache.insert("a".to_string(), 10);
        cache.insert("c".to_string(), 3);

        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_sweep_drops_expired_entries() {
        let cache = MemoryCache::with_limits(Some(Duration::from_millis(20)), None);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        assert_eq!(cache.sweep(), 0);

        std::thread::sleep(Duration::from_millis(30));
        cache.insert("c".to_string(), 3);
        assert_eq!(cache.sweep(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_ttl_expires_entries() {
        let cache = MemoryCache::with_limits(Some(Duration::from_millis(20)), None);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get("a"), Some(1));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("a"), None);
        // The expired entry is gone, not just hidden.
        assert_eq!(cache.len(), 0);
    }
}
