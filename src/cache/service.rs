//! Typed cache facade used by the request pipeline and the event handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use super::store::{CacheError, CacheStore, EntryOptions};

const METRIC_CACHE_HIT: &str = "newsletter_cache_hit_total";
const METRIC_CACHE_MISS: &str = "newsletter_cache_miss_total";
const METRIC_CACHE_INVALIDATED: &str = "newsletter_cache_invalidated_total";

/// Shared handle over a [`CacheStore`].
///
/// Values are stored as strings: plain strings verbatim, everything else as JSON.
#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn CacheStore>,
}

impl CacheService {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// True iff an unexpired entry is present for `key`.
    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.store.contains(key).await
    }

    /// Store `value` under `key` with identical sliding and absolute expiry.
    pub async fn set<T>(&self, key: &str, value: &T, expiry: Duration) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = match to_json(key, value)? {
            Value::String(raw) => raw,
            other => other.to_string(),
        };
        self.store
            .set(key, encoded, EntryOptions::expiring_in(expiry))
            .await
    }

    /// Return the cached value for `key`, or run `compute` and cache its result.
    ///
    /// Errors from `compute` propagate and nothing is cached. A result that
    /// serializes to JSON `null` is returned but not cached. Cache backend
    /// failures only degrade to a recompute; they never fail the read.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        expiry: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.store.get(key).await {
            Ok(Some(cached)) => match serde_json::from_str::<T>(&cached) {
                Ok(value) => {
                    counter!(METRIC_CACHE_HIT).increment(1);
                    debug!(cache_key = key, outcome = "hit", "serving cached value");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(
                        cache_key = key,
                        error = %err,
                        "cached value could not be decoded, recomputing"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(cache_key = key, error = %err, "cache read failed, recomputing");
            }
        }

        counter!(METRIC_CACHE_MISS).increment(1);
        debug!(cache_key = key, outcome = "miss", "computing value");

        let value = compute().await?;

        match to_json(key, &value) {
            Ok(Value::Null) => {
                debug!(cache_key = key, "empty result not cached");
            }
            Ok(encoded) => {
                if let Err(err) = self
                    .store
                    .set(key, encoded.to_string(), EntryOptions::expiring_in(expiry))
                    .await
                {
                    warn!(cache_key = key, error = %err, "cache write failed");
                }
            }
            Err(err) => {
                warn!(cache_key = key, error = %err, "computed value not cached");
            }
        }

        Ok(value)
    }

    /// Remove every key in `keys` concurrently.
    ///
    /// Each removal is independent: all keys are attempted even when some fail,
    /// and the first failure is reported once every attempt has finished.
    pub async fn remove(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }

        let results = join_all(keys.iter().map(|key| self.store.remove(key))).await;
        counter!(METRIC_CACHE_INVALIDATED).increment(keys.len() as u64);

        let mut first_error = None;
        for (key, result) in keys.iter().zip(results) {
            if let Err(err) = result {
                warn!(cache_key = %key, error = %err, "cache key removal failed");
                first_error.get_or_insert(err);
            }
        }

        debug!(count = keys.len(), "cache keys invalidated");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Value, CacheError> {
    serde_json::to_value(value).map_err(|source| CacheError::Serialization {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::Deserialize;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::store::MemoryCacheStore;

    fn service() -> (CacheService, Arc<MemoryCacheStore>) {
        let store = Arc::new(MemoryCacheStore::new(&CacheConfig::default()));
        (CacheService::new(store.clone()), store)
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Summary {
        id: i64,
        title: String,
    }

    #[tokio::test(start_paused = true)]
    async fn set_then_exists_until_expiry() {
        let (cache, _) = service();
        cache
            .set("flag", "on", Duration::from_secs(30))
            .await
            .expect("set");

        assert!(cache.exists("flag").await.expect("exists"));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!cache.exists("flag").await.expect("exists"));
    }

    #[tokio::test]
    async fn strings_are_stored_verbatim_and_structs_as_json() {
        let (cache, store) = service();
        let ttl = Duration::from_secs(60);
        cache.set("plain", "q", ttl).await.expect("set");
        cache
            .set(
                "json",
                &Summary {
                    id: 1,
                    title: "t".to_string(),
                },
                ttl,
            )
            .await
            .expect("set");

        assert_eq!(store.get("plain").await.expect("get").as_deref(), Some("q"));
        assert_eq!(
            store.get("json").await.expect("get").as_deref(),
            Some(r#"{"id":1,"title":"t"}"#)
        );
    }

    #[tokio::test]
    async fn get_or_compute_runs_compute_once_within_window() {
        let (cache, _) = service();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CacheError>(vec![Summary {
                id: 3,
                title: "cached".to_string(),
            }])
        };

        let first = cache
            .get_or_compute("FetchArticles:1:10", Duration::from_secs(60), compute)
            .await
            .expect("first");
        let second = cache
            .get_or_compute("FetchArticles:1:10", Duration::from_secs(60), compute)
            .await
            .expect("second");

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_or_compute_does_not_cache_none() {
        let (cache, _) = service();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<Summary>, CacheError>(None)
        };

        for _ in 0..3 {
            let value = cache
                .get_or_compute("FetchArticle:404", Duration::from_secs(60), compute)
                .await
                .expect("value");
            assert!(value.is_none());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!cache.exists("FetchArticle:404").await.expect("exists"));
    }

    #[tokio::test]
    async fn get_or_compute_propagates_errors_uncached() {
        let (cache, _) = service();

        let result: Result<Summary, &str> = cache
            .get_or_compute("FetchArticle:1", Duration::from_secs(60), || async {
                Err("database unavailable")
            })
            .await;
        assert_eq!(result, Err("database unavailable"));
        assert!(!cache.exists("FetchArticle:1").await.expect("exists"));

        let recovered: Result<Summary, &str> = cache
            .get_or_compute("FetchArticle:1", Duration::from_secs(60), || async {
                Ok(Summary {
                    id: 1,
                    title: "back".to_string(),
                })
            })
            .await;
        assert_eq!(recovered.expect("recomputed").title, "back");
    }

    #[tokio::test]
    async fn undecodable_entry_is_recomputed_and_replaced() {
        let (cache, _) = service();
        cache
            .set("FetchArticle:9", "not json", Duration::from_secs(60))
            .await
            .expect("set");

        let value: Summary = cache
            .get_or_compute("FetchArticle:9", Duration::from_secs(60), || async {
                Ok::<_, CacheError>(Summary {
                    id: 9,
                    title: "fresh".to_string(),
                })
            })
            .await
            .expect("value");
        assert_eq!(value.id, 9);

        let cached: Summary = cache
            .get_or_compute("FetchArticle:9", Duration::from_secs(60), || async {
                Err(CacheError::backend("must not recompute"))
            })
            .await
            .expect("cached");
        assert_eq!(cached, value);
    }

    #[tokio::test]
    async fn remove_clears_present_and_absent_keys_idempotently() {
        let (cache, _) = service();
        cache
            .set("k1", "v", Duration::from_secs(60))
            .await
            .expect("set");
        let keys = vec!["k1".to_string(), "k2".to_string()];

        cache.remove(&keys).await.expect("remove");
        assert!(!cache.exists("k1").await.expect("exists"));
        assert!(!cache.exists("k2").await.expect("exists"));

        cache.remove(&keys).await.expect("second remove");
        assert!(!cache.exists("k1").await.expect("exists"));
        assert!(!cache.exists("k2").await.expect("exists"));
    }

    /// Store whose removal fails for selected keys.
    struct FlakyStore {
        inner: MemoryCacheStore,
        failing: HashSet<String>,
        attempted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.inner.get(key).await
        }

        async fn set(
            &self,
            key: &str,
            value: String,
            options: EntryOptions,
        ) -> Result<(), CacheError> {
            self.inner.set(key, value, options).await
        }

        async fn remove(&self, key: &str) -> Result<(), CacheError> {
            self.attempted
                .lock()
                .expect("attempted lock")
                .push(key.to_string());
            if self.failing.contains(key) {
                return Err(CacheError::backend(format!("cannot remove {key}")));
            }
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn partial_removal_failure_does_not_block_other_keys() {
        let store = Arc::new(FlakyStore {
            inner: MemoryCacheStore::default(),
            failing: HashSet::from(["b".to_string()]),
            attempted: Mutex::new(Vec::new()),
        });
        let cache = CacheService::new(store.clone());
        for key in ["a", "b", "c"] {
            cache
                .set(key, "v", Duration::from_secs(60))
                .await
                .expect("set");
        }

        let err = cache
            .remove(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .expect_err("b fails");
        assert!(matches!(err, CacheError::Backend(_)));

        assert_eq!(store.attempted.lock().expect("attempted lock").len(), 3);
        assert!(!cache.exists("a").await.expect("exists"));
        assert!(cache.exists("b").await.expect("exists"));
        assert!(!cache.exists("c").await.expect("exists"));
    }
}
