//! Cache storage backends.
//!
//! `CacheStore` is the raw string key/value contract; `MemoryCacheStore` is the
//! process-local implementation used by the server and the tests.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend failure: {0}")]
    Backend(String),
    #[error("cache value for `{key}` could not be serialized: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Expiry bounds for one entry. The entry expires at whichever bound is hit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryOptions {
    /// Idle window; every read pushes the idle deadline forward.
    pub sliding: Duration,
    /// Hard lifetime measured from the write.
    pub absolute: Duration,
}

impl EntryOptions {
    /// Apply the same duration as both the sliding and the absolute bound.
    pub fn expiring_in(expiry: Duration) -> Self {
        Self {
            sliding: expiry,
            absolute: expiry,
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the live value for `key`, refreshing its sliding window.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value`, replacing any previous entry in full.
    async fn set(&self, key: &str, value: String, options: EntryOptions) -> Result<(), CacheError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    sliding: Duration,
    absolute_deadline: Instant,
    last_access: Instant,
}

impl StoredEntry {
    fn expires_at(&self) -> Instant {
        (self.last_access + self.sliding).min(self.absolute_deadline)
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

/// In-memory store with LRU eviction and lazy expiry.
///
/// Time is read from `tokio::time`, so paused test runtimes control expiry.
pub struct MemoryCacheStore {
    entries: RwLock<LruCache<String, StoredEntry>>,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.max_entries_non_zero())),
        }
    }

    /// Number of entries currently held, expired ones included until touched.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "purge_expired");
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access = now;
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            debug!(cache_key = key, "expired entry purged on read");
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, options: EntryOptions) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = StoredEntry {
            value,
            sliding: options.sliding,
            absolute_deadline: now + options.absolute,
            last_access: now,
        };

        let evicted = rw_write(&self.entries, SOURCE, "set").push(key.to_string(), entry);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            debug!(cache_key = key, evicted_key = %evicted_key, "capacity eviction");
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        rw_write(&self.entries, SOURCE, "remove").pop(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn store() -> MemoryCacheStore {
        MemoryCacheStore::new(&CacheConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_at_absolute_bound() {
        let store = store();
        let options = EntryOptions {
            sliding: Duration::from_secs(60),
            absolute: Duration::from_secs(90),
        };
        store
            .set("k", "v".to_string(), options)
            .await
            .expect("set");

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(store.get("k").await.expect("get").as_deref(), Some("v"));

        // Sliding window was refreshed at t=50, absolute bound is t=90.
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(store.get("k").await.expect("get").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entry_expires_at_sliding_bound() {
        let store = store();
        let options = EntryOptions {
            sliding: Duration::from_secs(10),
            absolute: Duration::from_secs(3600),
        };
        store
            .set("k", "v".to_string(), options)
            .await
            .expect("set");

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.contains("k").await.expect("contains"));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.contains("k").await.expect("contains"));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store.contains("k").await.expect("contains"));
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let store = store();
        let options = EntryOptions::expiring_in(Duration::from_secs(60));
        store.set("k", "first".to_string(), options).await.expect("set");
        store.set("k", "second".to_string(), options).await.expect("set");

        assert_eq!(store.get("k").await.expect("get").as_deref(), Some("second"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let store = MemoryCacheStore::new(&CacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        let options = EntryOptions::expiring_in(Duration::from_secs(60));

        store.set("a", "1".to_string(), options).await.expect("set");
        store.set("b", "2".to_string(), options).await.expect("set");
        store.get("a").await.expect("get");
        store.set("c", "3".to_string(), options).await.expect("set");

        assert!(store.contains("a").await.expect("contains"));
        assert!(!store.contains("b").await.expect("contains"));
        assert!(store.contains("c").await.expect("contains"));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_drops_only_dead_entries() {
        let store = store();
        store
            .set("short", "v".to_string(), EntryOptions::expiring_in(Duration::from_secs(1)))
            .await
            .expect("set");
        store
            .set("long", "v".to_string(), EntryOptions::expiring_in(Duration::from_secs(100)))
            .await
            .expect("set");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn removing_absent_key_succeeds() {
        let store = store();
        store.remove("missing").await.expect("remove");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn store_recovers_from_poisoned_lock() {
        let store = store();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.write().expect("lock should be acquired");
            panic!("poison entries lock");
        }));

        store
            .set("k", "v".to_string(), EntryOptions::expiring_in(Duration::from_secs(5)))
            .await
            .expect("set");
        assert!(store.contains("k").await.expect("contains"));
    }
}
