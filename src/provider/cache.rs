//! Concurrent memo table for expensive provider objects
//!
//! Holds per-region service clients and discovered lists (regions, account
//! info). The cache never builds anything itself; callers load, build on a
//! miss, and store.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Key of the discovered region list
pub const REGIONS_KEY: &str = "_regions";

/// Key of the project identity
pub const ACCOUNT_KEY: &str = "_account";

/// Key of a service client: `_<service>_<region>`
pub fn client_key(service: &str, region: &str) -> String {
    format!("_{}_{}", service, region)
}

/// One memoised value. Immutable once stored.
#[derive(Clone)]
pub struct CacheEntry {
    /// Creation time, unix seconds
    pub timestamp: i64,
    pub valid: bool,
    pub data: Option<Arc<dyn Any + Send + Sync>>,
    pub error: Option<Arc<anyhow::Error>>,
}

impl CacheEntry {
    pub fn new<T: Any + Send + Sync>(data: T) -> Self {
        Self::from_arc(Arc::new(data))
    }

    pub fn from_arc<T: Any + Send + Sync>(data: Arc<T>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            valid: true,
            data: Some(data as Arc<dyn Any + Send + Sync>),
            error: None,
        }
    }

    /// Remember a failed construction
    pub fn failed(error: anyhow::Error) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            valid: false,
            data: None,
            error: Some(Arc::new(error)),
        }
    }

    /// The stored value, if present and of type `T`
    pub fn data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.data.clone()?.downcast::<T>().ok()
    }

    /// Older than `ttl`. Entries from the future count as fresh.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let age = chrono::Utc::now().timestamp() - self.timestamp;
        age > 0 && age as u64 > ttl.as_secs()
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("timestamp", &self.timestamp)
            .field("valid", &self.valid)
            .field("has_data", &self.data.is_some())
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

/// String-keyed concurrent store of [`CacheEntry`] values.
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct Cache {
    entries: Arc<DashMap<String, Arc<CacheEntry>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `key`
    pub fn store(&self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), Arc::new(entry));
    }

    /// Insert `entry` unless `key` is already present; returns whichever
    /// entry ends up stored
    pub fn store_if_absent(&self, key: &str, entry: CacheEntry) -> Arc<CacheEntry> {
        self.store_unless(key, entry, |_| true)
    }

    /// Insert `entry` unless the current entry for `key` satisfies `keep`.
    /// Check and write happen under one shard lock; returns whichever entry
    /// ends up stored.
    pub fn store_unless<F>(&self, key: &str, entry: CacheEntry, keep: F) -> Arc<CacheEntry>
    where
        F: FnOnce(&CacheEntry) -> bool,
    {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut current) => {
                if keep(current.get()) {
                    return current.get().clone();
                }
                let entry = Arc::new(entry);
                current.insert(entry.clone());
                entry
            }
            Entry::Vacant(slot) => slot.insert(Arc::new(entry)).value().clone(),
        }
    }

    pub fn load(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Like [`Cache::load`], but invalid entries and entries older than `ttl`
    /// are misses. `None` never expires.
    pub fn load_fresh(&self, key: &str, ttl: Option<Duration>) -> Option<Arc<CacheEntry>> {
        let entry = self.load(key)?;
        if !entry.valid {
            return None;
        }
        match ttl {
            Some(ttl) if entry.is_expired(ttl) => {
                tracing::debug!("cache entry {} expired", key);
                None
            }
            _ => Some(entry),
        }
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_store_then_load() {
        let cache = Cache::new();
        cache.store("k", CacheEntry::new(vec!["us-east1".to_string()]));

        let entry = cache.load("k").unwrap();
        assert!(entry.valid);
        assert_eq!(
            entry.data::<Vec<String>>().unwrap().as_slice(),
            ["us-east1".to_string()]
        );
        assert!(cache.load("missing").is_none());
    }

    #[test]
    fn test_wrong_type_is_none() {
        let entry = CacheEntry::new(42u32);
        assert!(entry.data::<String>().is_none());
        assert_eq!(*entry.data::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_delete() {
        let cache = Cache::new();
        cache.store("k", CacheEntry::new(1u8));
        cache.delete("k");
        cache.delete("never-stored");
        assert!(cache.load("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_overwrites() {
        let cache = Cache::new();
        cache.store("k", CacheEntry::new(1u8));
        cache.store("k", CacheEntry::new(2u8));
        assert_eq!(*cache.load("k").unwrap().data::<u8>().unwrap(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_store_if_absent_keeps_first() {
        let cache = Cache::new();
        let first = cache.store_if_absent("k", CacheEntry::new("first"));
        let second = cache.store_if_absent("k", CacheEntry::new("second"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second.data::<&str>().unwrap(), "first");
    }

    #[test]
    fn test_store_unless() {
        let cache = Cache::new();
        cache.store("k", CacheEntry::new(1u8));

        let kept = cache.store_unless("k", CacheEntry::new(2u8), |e| e.data::<u8>().is_some());
        assert_eq!(*kept.data::<u8>().unwrap(), 1);

        let replaced = cache.store_unless("k", CacheEntry::new("text"), |e| e.data::<&str>().is_some());
        assert_eq!(*replaced.data::<&str>().unwrap(), "text");
        assert!(Arc::ptr_eq(&replaced, &cache.load("k").unwrap()));

        let inserted = cache.store_unless("new", CacheEntry::new(3u8), |_| true);
        assert_eq!(*inserted.data::<u8>().unwrap(), 3);
    }

    #[test]
    fn test_load_fresh() {
        let cache = Cache::new();
        let mut old = CacheEntry::new(1u8);
        old.timestamp -= 120;
        cache.store("old", old);
        cache.store("failed", CacheEntry::failed(anyhow::anyhow!("nope")));

        assert!(cache.load_fresh("old", None).is_some());
        assert!(cache.load_fresh("old", Some(Duration::from_secs(300))).is_some());
        assert!(cache.load_fresh("old", Some(Duration::from_secs(60))).is_none());
        assert!(cache.load_fresh("failed", None).is_none());
        assert!(cache.load("failed").unwrap().error.is_some());
    }

    #[test]
    fn test_client_key() {
        assert_eq!(client_key("compute", "us-east1"), "_compute_us-east1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_access() {
        const KEYS: usize = 10;
        const TASKS: usize = 100;
        const ROUNDS: usize = 20;

        let cache = Cache::new();
        for k in 0..KEYS {
            cache.store(&format!("key-{}", k), CacheEntry::new(AtomicUsize::new(0)));
        }

        let handles: Vec<_> = (0..TASKS)
            .map(|t| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    for round in 0..ROUNDS {
                        let key = format!("key-{}", (t + round) % KEYS);
                        let counter = cache
                            .load(&key)
                            .and_then(|e| e.data::<AtomicUsize>())
                            .expect("counter present");
                        counter.fetch_add(1, Ordering::SeqCst);

                        // Churn unrelated keys at the same time
                        let scratch = format!("scratch-{}", t);
                        cache.store(&scratch, CacheEntry::new(round));
                        cache.delete(&scratch);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let total: usize = (0..KEYS)
            .map(|k| {
                cache
                    .load(&format!("key-{}", k))
                    .and_then(|e| e.data::<AtomicUsize>())
                    .unwrap()
                    .load(Ordering::SeqCst)
            })
            .sum();
        assert_eq!(total, TASKS * ROUNDS);
        assert_eq!(cache.len(), KEYS);
    }
}
