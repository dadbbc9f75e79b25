//! `QueryClient`: the cross-query cache and in-flight-fetch dedup table
//! (spec §4.7's "query client").
//!
//! Auto-singleton via [`reactive_core::Injector`] (spec §9's "query client
//! ownership" resolution): [`crate::query::use_query`] resolves one through
//! the injector unless a caller passes an explicit [`QueryOptions::client`]
//! for standalone use (tests, or an app that wants an isolated cache).

use std::any::Any;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use reactive_core::Injectable;
use tracing::trace;

use crate::query::{QueryFetcher, QueryFuture};

struct CacheEntry {
    key: Vec<serde_json::Value>,
    value: Box<dyn Any + Send + Sync>,
    fetched_at: Instant,
}

/// Fingerprint a query key array as its JSON serialisation (spec §4.7's
/// "cache key is the JSON serialisation of the key array").
pub(crate) fn fingerprint(key: &[serde_json::Value]) -> String {
    serde_json::to_string(key).expect("serialising a Vec<serde_json::Value> is infallible")
}

/// Process-wide cache of query results plus in-flight fetch dedup.
pub struct QueryClient {
    cache: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("cached_entries", &self.cache.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl Injectable for QueryClient {
    fn create() -> Self {
        Self::new()
    }
}

impl QueryClient {
    /// An empty client with no cached entries.
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Store a value under `key`, stamping it with the current time.
    pub fn set<T: Clone + Send + Sync + 'static>(&self, key: &[serde_json::Value], value: T) {
        self.cache.insert(
            fingerprint(key),
            CacheEntry {
                key: key.to_vec(),
                value: Box::new(value),
                fetched_at: Instant::now(),
            },
        );
    }

    /// Read a cached value regardless of freshness, if one exists and was
    /// stored as `T`.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &[serde_json::Value]) -> Option<T> {
        self.cache
            .get(&fingerprint(key))
            .and_then(|entry| entry.value.downcast_ref::<T>().cloned())
    }

    /// Whether a cached entry for `key` exists and is younger than
    /// `stale_time`.
    pub fn is_fresh(&self, key: &[serde_json::Value], stale_time: Duration) -> bool {
        self.cache
            .get(&fingerprint(key))
            .is_some_and(|entry| entry.fetched_at.elapsed() < stale_time)
    }

    /// Remove every cached entry whose key array starts with `prefix`
    /// (element-wise JSON equality), per spec §4.7's invalidation contract.
    /// Returns the number of entries removed.
    pub fn invalidate_prefix(&self, prefix: &[serde_json::Value]) -> usize {
        let before = self.cache.len();
        self.cache
            .retain(|_, entry| !(entry.key.len() >= prefix.len() && entry.key[..prefix.len()] == *prefix));
        let removed = before - self.cache.len();
        trace!(removed, "invalidated cache prefix");
        removed
    }

    /// Drop every cached entry and in-flight fetch.
    pub fn clear_all(&self) {
        self.cache.clear();
        self.in_flight.clear();
    }

    /// Fetch `key` in the background and cache the result if it succeeds.
    /// A no-op if a fresh entry already exists.
    pub fn prefetch<T, F, Fut>(self: &std::sync::Arc<Self>, key: &[serde_json::Value], stale_time: Duration, fetcher: F)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, crate::error::QueryError>> + Send + 'static,
    {
        if self.is_fresh(key, stale_time) {
            return;
        }
        let client = std::sync::Arc::clone(self);
        let key = key.to_vec();
        any_spawner::Executor::spawn(async move {
            if let Ok(value) = fetcher().await {
                client.set(&key, value);
            }
        });
    }

    /// Get the in-flight shared future for `fingerprint`, or start a new
    /// retrying fetch and register it, per spec §4.7's "two concurrent
    /// fetches for the same key share a single in-flight promise".
    pub(crate) fn get_or_start_fetch<T>(
        self: &std::sync::Arc<Self>,
        fingerprint: &str,
        retry: u32,
        fetcher: QueryFetcher<T>,
    ) -> futures::future::Shared<QueryFuture<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        if let Some(existing) = self.in_flight.get(fingerprint) {
            if let Some(shared) = existing.value().downcast_ref::<futures::future::Shared<QueryFuture<T>>>() {
                return shared.clone();
            }
        }

        use futures::FutureExt;

        let fut: QueryFuture<T> = Box::pin(async move {
            let mut retries_left = retry;
            loop {
                match fetcher().await {
                    Ok(value) => break Ok(value),
                    Err(err) => {
                        if retries_left == 0 {
                            break Err(err);
                        }
                        retries_left -= 1;
                        trace!(retries_left, "query fetch failed, retrying: {}", err.message);
                    }
                }
            }
        });
        let shared = fut.shared();
        self.in_flight
            .insert(fingerprint.to_string(), Box::new(shared.clone()));

        // Swallow the settled result here so its rejection never escapes as
        // an unhandled promise (spec §7 taxonomy 3); waiters each poll their
        // own clone of `shared` and do their own stale-guard check.
        let client = std::sync::Arc::clone(self);
        let key = fingerprint.to_string();
        let settle = shared.clone();
        any_spawner::Executor::spawn(async move {
            let _ = settle.await;
            client.in_flight.remove(&key);
        });

        shared
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn set_then_get_round_trips() {
        let client = QueryClient::new();
        client.set(&[json!("user"), json!(1)], "alice".to_string());
        assert_eq!(client.get::<String>(&[json!("user"), json!(1)]), Some("alice".to_string()));
    }

    #[test]
    fn freshness_respects_stale_time() {
        let client = QueryClient::new();
        client.set(&[json!("k")], 1_i64);
        assert!(client.is_fresh(&[json!("k")], Duration::from_secs(60)));
        assert!(!client.is_fresh(&[json!("k")], Duration::from_nanos(0)));
    }

    #[test]
    fn prefix_invalidation_removes_matching_entries_only() {
        let client = QueryClient::new();
        client.set(&[json!("user"), json!(1)], "alice".to_string());
        client.set(&[json!("user"), json!(2)], "bob".to_string());
        client.set(&[json!("post"), json!(1)], "hello".to_string());

        client.invalidate_prefix(&[json!("user")]);

        assert!(!client.is_fresh(&[json!("user"), json!(1)], Duration::from_secs(60)));
        assert!(!client.is_fresh(&[json!("user"), json!(2)], Duration::from_secs(60)));
        assert!(client.is_fresh(&[json!("post"), json!(1)], Duration::from_secs(60)));
    }

    #[test]
    fn prefix_invalidation_returns_the_removed_count() {
        let client = QueryClient::new();
        client.set(&[json!("tasks"), json!("1")], "a".to_string());
        client.set(&[json!("tasks"), json!("2")], "b".to_string());
        client.set(&[json!("users"), json!("1")], "c".to_string());

        let removed = client.invalidate_prefix(&[json!("tasks")]);

        assert_eq!(removed, 2);
        assert!(client.get::<String>(&[json!("users"), json!("1")]).is_some());
    }

    #[test]
    fn clear_all_empties_the_cache() {
        let client = QueryClient::new();
        client.set(&[json!("k")], 1_i64);
        client.clear_all();
        assert_eq!(client.get::<i64>(&[json!("k")]), None);
    }

    #[test]
    fn resolving_via_the_injector_yields_the_same_instance() {
        let a = reactive_core::Injector::global().resolve::<QueryClient>();
        let b = reactive_core::Injector::global().resolve::<QueryClient>();
        a.set(&[json!("shared")], "x".to_string());
        assert_eq!(b.get::<String>(&[json!("shared")]), Some("x".to_string()));
    }
}
