//! `use_query`: a reactive key function plus an async fetcher, producing a
//! data/loading/error triple and a refetch function (spec §4.7).
//!
//! Grounded on the teacher's own async-resource hook
//! (`flui-reactivity/src/hooks/resource.rs`, `Resource<T, E>` /
//! `ResourceState` / `any_spawner::Executor::spawn`-on-`refetch`), adapted
//! from its position-indexed hook shape onto a standalone handle built
//! directly on [`reactive_core::Effect`] and [`reactive_core::Signal`], with
//! the cache, generation-tagged staleness, retry and in-flight dedup the
//! teacher's resource hook does not have.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reactive_core::{on_dispose, untrack, Effect, Signal};
use tracing::trace;

use crate::client::{fingerprint, QueryClient};
use crate::error::QueryError;

/// A fetcher's future: always `Send` so it can be handed to
/// [`any_spawner::Executor::spawn`].
pub type QueryFuture<T> = Pin<Box<dyn Future<Output = Result<T, QueryError>> + Send>>;

/// Type-erased fetcher, shared between the query's own fetch attempts and
/// the client's in-flight dedup entry.
pub type QueryFetcher<T> = Arc<dyn Fn() -> QueryFuture<T> + Send + Sync>;

/// Options accepted by [`use_query`]. All fields default to the
/// spec-mandated defaults via [`Default`]; most callers only override one or
/// two.
pub struct QueryOptions<T> {
    /// How long a cached entry is considered fresh. Default: zero (always
    /// refetch).
    pub stale_time: Duration,
    /// Additional attempts after the first failure. Default: 0.
    pub retry: u32,
    /// When present and returning `false`, no fetch runs and `loading` stays
    /// `false`.
    pub enabled: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
    /// A value to seed `data` with before the first fetch settles.
    pub initial_value: Option<T>,
    /// Called with the fetched value on success.
    pub on_success: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    /// Called with the captured error on failure (after retries exhaust).
    pub on_error: Option<Arc<dyn Fn(&QueryError) + Send + Sync>>,
    /// Explicit client to use instead of the injector-resolved singleton
    /// (spec §9's "query client ownership": the standalone-test fallback).
    pub client: Option<Arc<QueryClient>>,
}

impl<T> Default for QueryOptions<T> {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            retry: 0,
            enabled: None,
            initial_value: None,
            on_success: None,
            on_error: None,
            client: None,
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("stale_time", &self.stale_time)
            .field("retry", &self.retry)
            .field("initial_value", &self.initial_value)
            .finish_non_exhaustive()
    }
}

struct QueryState<T> {
    generation: AtomicU64,
    disposed: AtomicBool,
    data: Signal<Option<T>>,
    loading: Signal<bool>,
    error: Signal<Option<QueryError>>,
    client: Arc<QueryClient>,
    fetcher: QueryFetcher<T>,
    retry: u32,
    stale_time: Duration,
    enabled: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
    on_success: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    on_error: Option<Arc<dyn Fn(&QueryError) + Send + Sync>>,
}

/// The four observables a query produces (spec §4.7): `data`, `loading`,
/// `error`, and a `refetch` function. Held alive for as long as the owning
/// component's setup context, which auto-disposes its internal effect.
#[derive(Clone)]
pub struct QueryHandle<T> {
    data: Signal<Option<T>>,
    loading: Signal<bool>,
    error: Signal<Option<QueryError>>,
    refetch: Arc<dyn Fn() + Send + Sync>,
    _effect: Effect,
}

impl<T: std::fmt::Debug> std::fmt::Debug for QueryHandle<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("loading", &self.loading.get())
            .field("error", &self.error.get())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> QueryHandle<T> {
    /// The current data value, `None` until the first fetch settles (or the
    /// configured initial value).
    pub fn data(&self) -> Option<T> {
        self.data.get()
    }

    /// Whether a fetch is currently in flight.
    pub fn loading(&self) -> bool {
        self.loading.get()
    }

    /// The most recent fetch error, if the last completed attempt failed.
    pub fn error(&self) -> Option<QueryError> {
        self.error.get()
    }

    /// Run a fresh attempt unconditionally, bypassing any fresh cache entry
    /// (spec §9's "does refetch bypass a fresh cache entry" resolution: yes).
    pub fn refetch(&self) {
        (self.refetch)();
    }
}

/// Run (or re-run) a query's fetch for `key`. `force` bypasses the freshness
/// check — used by [`QueryHandle::refetch`].
fn run_query<T>(state: &Arc<QueryState<T>>, key: Vec<serde_json::Value>, force: bool)
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    if let Some(enabled) = &state.enabled {
        if !enabled() {
            state.loading.set(false);
            return;
        }
    }

    if !force {
        if state.client.is_fresh(&key, state.stale_time) {
            if let Some(cached) = state.client.get::<T>(&key) {
                state.data.set(Some(cached));
                state.loading.set(false);
                state.error.set(None);
                return;
            }
        }
    }

    let my_generation = state.generation.fetch_add(1, Ordering::AcqRel) + 1;
    state.loading.set(true);
    state.error.set(None);

    let key_fp = fingerprint(&key);
    let shared = state
        .client
        .get_or_start_fetch(&key_fp, state.retry, Arc::clone(&state.fetcher));

    let state = Arc::clone(state);
    any_spawner::Executor::spawn(async move {
        let result = shared.await;

        if state.disposed.load(Ordering::Acquire) {
            trace!("query disposed before fetch settled, ignoring result");
            return;
        }
        if state.generation.load(Ordering::Acquire) != my_generation {
            trace!(my_generation, "discarding stale query response");
            return;
        }

        match result {
            Ok(value) => {
                state.client.set(&key, value.clone());
                state.data.set(Some(value.clone()));
                state.loading.set(false);
                state.error.set(None);
                if let Some(on_success) = &state.on_success {
                    on_success(&value);
                }
            }
            Err(err) => {
                state.loading.set(false);
                state.error.set(Some(err.clone()));
                if let Some(on_error) = &state.on_error {
                    on_error(&err);
                }
            }
        }
    });
}

/// Declarative async query (spec §4.7): `key_fn` is read inside an internal
/// effect, so any signal it reads becomes a dependency — a change re-derives
/// the key and starts a new fetch unless a fresh cache entry already covers
/// it. `fetcher` is called once per attempt (more than once under `retry`).
pub fn use_query<K, T, Fetcher, Fut>(key_fn: K, fetcher: Fetcher, options: QueryOptions<T>) -> QueryHandle<T>
where
    K: Fn() -> Vec<serde_json::Value> + Send + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    Fetcher: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    let client = options
        .client
        .clone()
        .unwrap_or_else(|| reactive_core::Injector::global().resolve::<QueryClient>());

    let data = Signal::new(options.initial_value.clone());
    let loading = Signal::new(false);
    let error: Signal<Option<QueryError>> = Signal::new(None);

    let state = Arc::new(QueryState {
        generation: AtomicU64::new(0),
        disposed: AtomicBool::new(false),
        data,
        loading,
        error,
        client,
        fetcher: Arc::new(move || Box::pin(fetcher()) as QueryFuture<T>),
        retry: options.retry,
        stale_time: options.stale_time,
        enabled: options.enabled,
        on_success: options.on_success,
        on_error: options.on_error,
    });

    {
        let state = Arc::clone(&state);
        on_dispose(move || {
            state.disposed.store(true, Ordering::Release);
        });
    }

    let key_fn = Arc::new(key_fn);

    let effect_key_fn = Arc::clone(&key_fn);
    let effect_state = Arc::clone(&state);
    let effect = Effect::new(move || {
        let key = effect_key_fn();
        run_query(&effect_state, key, false);
    });

    let refetch_state = Arc::clone(&state);
    let refetch: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
        let key = untrack(|| key_fn());
        run_query(&refetch_state, key, true);
    });

    QueryHandle {
        data: state.data,
        loading: state.loading,
        error: state.error,
        refetch,
        _effect: effect,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactive_core::{flush_effects, SetupHost};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn ensure_executor() {
        let _ = any_spawner::Executor::init_tokio();
    }

    #[test]
    fn disabled_predicate_skips_the_fetch() {
        let host = SetupHost::new();
        let handle = host.run(|| {
            use_query(
                || vec![json!("k")],
                || async { Ok::<String, QueryError>("v".to_string()) },
                QueryOptions {
                    enabled: Some(Arc::new(|| false)),
                    client: Some(Arc::new(QueryClient::new())),
                    ..Default::default()
                },
            )
        });

        assert!(!handle.loading());
        assert_eq!(handle.data(), None);
    }

    #[test]
    fn initial_value_seeds_data_before_any_fetch() {
        let host = SetupHost::new();
        let handle = host.run(|| {
            use_query(
                || vec![json!("k")],
                || async { Ok::<String, QueryError>("fetched".to_string()) },
                QueryOptions {
                    initial_value: Some("placeholder".to_string()),
                    enabled: Some(Arc::new(|| false)),
                    client: Some(Arc::new(QueryClient::new())),
                    ..Default::default()
                },
            )
        });

        assert_eq!(handle.data(), Some("placeholder".to_string()));
        assert!(!handle.loading());
    }

    #[tokio::test]
    async fn retry_exhaustion_surfaces_the_final_error() {
        ensure_executor();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_for_fetch = Arc::clone(&attempts);

        let host = SetupHost::new();
        let handle = host.run(|| {
            use_query(
                || vec![json!("always-fails")],
                move || {
                    attempts_for_fetch.fetch_add(1, Ordering::SeqCst);
                    async { Err::<String, _>(QueryError::new("always fails")) }
                },
                QueryOptions {
                    retry: 2,
                    client: Some(Arc::new(QueryClient::new())),
                    ..Default::default()
                },
            )
        });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!handle.loading());
        assert_eq!(handle.error().map(|e| e.message), Some("always fails".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3, "initial attempt plus 2 retries");
    }

    #[tokio::test]
    async fn stale_response_is_discarded_by_generation() {
        ensure_executor();
        let client = Arc::new(QueryClient::new());
        let scope = Signal::new("s1".to_string());

        let (tx1, rx1) = tokio::sync::oneshot::channel::<String>();
        let (tx2, rx2) = tokio::sync::oneshot::channel::<String>();
        let receivers = Arc::new(parking_lot::Mutex::new(vec![Some(rx1), Some(rx2)]));

        let scope_for_key = scope;
        let host = SetupHost::new();
        let handle = host.run(|| {
            use_query(
                move || vec![json!("x"), json!(scope_for_key.get())],
                move || {
                    let receivers = Arc::clone(&receivers);
                    async move {
                        let rx = receivers.lock().remove(0).expect("a receiver is queued for this call");
                        rx.await.map_err(|_| QueryError::new("channel dropped"))
                    }
                },
                QueryOptions {
                    client: Some(Arc::clone(&client)),
                    ..Default::default()
                },
            )
        });

        tokio::task::yield_now().await;

        scope.set("s2".to_string());
        flush_effects();
        tokio::task::yield_now().await;

        tx2.send("R2".to_string()).expect("receiver for fetch2 still alive");
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.data(), Some("R2".to_string()));

        tx1.send("R1".to_string()).expect("receiver for fetch1 still alive");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.data(), Some("R2".to_string()), "late response for a stale generation must be discarded");
    }

    #[tokio::test]
    async fn fresh_cache_entry_is_reused_without_refetching() {
        ensure_executor();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_fetch = Arc::clone(&calls);

        let host = SetupHost::new();
        let handle = host.run(|| {
            use_query(
                || vec![json!("k")],
                move || {
                    calls_for_fetch.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<String, QueryError>("v1".to_string()) }
                },
                QueryOptions {
                    stale_time: Duration::from_secs(60),
                    client: Some(Arc::new(QueryClient::new())),
                    ..Default::default()
                },
            )
        });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.data(), Some("v1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.refetch();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2, "refetch bypasses the fresh cache entry");
    }

    #[tokio::test]
    async fn disposing_the_setup_host_stops_further_state_writes() {
        ensure_executor();
        let (tx, rx) = tokio::sync::oneshot::channel::<String>();
        let rx = Arc::new(parking_lot::Mutex::new(Some(rx)));

        let host = SetupHost::new();
        let handle = host.run(|| {
            use_query(
                || vec![json!("k")],
                move || {
                    let rx = Arc::clone(&rx);
                    async move {
                        let rx = rx.lock().take().expect("called once");
                        rx.await.map_err(|_| QueryError::new("channel dropped"))
                    }
                },
                QueryOptions {
                    client: Some(Arc::new(QueryClient::new())),
                    ..Default::default()
                },
            )
        });

        tokio::task::yield_now().await;
        host.dispose();
        tx.send("late".to_string()).expect("receiver still alive");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(handle.data(), None, "disposed query must not apply a late result");
    }
}
