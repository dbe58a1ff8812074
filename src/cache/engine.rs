//! Cache-aside engine
//!
//! [`Cacher::fetch`] sits between a caller and its upstream getter. It serves
//! fresh values directly, serves stale values immediately while refreshing
//! them in the background, and only makes the caller wait when there is no
//! value at all. Every key has at most one fetch in flight; concurrent
//! callers attach to that fetch instead of starting their own.

use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::entry::{validate_key, CachePolicy, EntryState, Flight};
use super::store::{CacheStore, Refresh};
use super::CacheError;

/// Default upper bound on a single getter invocation
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacherConfig {
    /// Getters that take longer than this are abandoned and counted as failures
    pub fetch_timeout: Duration,
    /// Retry window after a failed refresh for policies without `retry_when`
    ///
    /// `None` retries on every call until a refresh succeeds, with the
    /// in-flight fetch still deduplicating concurrent callers.
    pub failure_backoff: Option<Duration>,
}

impl Default for CacherConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            failure_backoff: None,
        }
    }
}

/// Counters describing how lookups were resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a fresh entry
    pub fresh_hits: u64,
    /// Lookups answered from a stale or refreshing entry
    pub stale_hits: u64,
    /// Fetches started because no value existed
    pub cold_fetches: u64,
    /// Background refreshes started for stale entries
    pub refreshes_started: u64,
    /// Fetches that failed or timed out
    pub fetch_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    fresh_hits: AtomicU64,
    stale_hits: AtomicU64,
    cold_fetches: AtomicU64,
    refreshes_started: AtomicU64,
    fetch_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            cold_fetches: self.cold_fetches.load(Ordering::Relaxed),
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
        }
    }
}

/// Stale-while-revalidate front for upstream getters
///
/// Cloning a `Cacher` is cheap; clones share the same store and counters.
pub struct Cacher<V> {
    store: Arc<CacheStore<V>>,
    config: CacherConfig,
    counters: Arc<Counters>,
}

impl<V> Clone for Cacher<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<V> Cacher<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an engine backed by a new, empty store
    pub fn new(config: CacherConfig) -> Self {
        Self::with_store(Arc::new(CacheStore::new()), config)
    }

    /// Creates an engine over an existing store
    pub fn with_store(store: Arc<CacheStore<V>>, config: CacherConfig) -> Self {
        Self {
            store,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<CacheStore<V>> {
        &self.store
    }

    /// The engine settings
    pub fn config(&self) -> &CacherConfig {
        &self.config
    }

    /// Current lookup counters
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// State of `key` under `policy` right now
    pub fn state(&self, key: &str, policy: &CachePolicy) -> EntryState {
        self.store
            .get(key)
            .map(|entry| entry.state(policy, self.config.failure_backoff, Instant::now()))
            .unwrap_or(EntryState::Empty)
    }

    /// Resolves `key`, calling `getter` only when the cache cannot answer
    ///
    /// * Fresh value: returned without contacting upstream.
    /// * Stale value: returned immediately; a background refresh is started
    ///   unless one is already running.
    /// * No value: the caller waits on the single in-flight fetch for the
    ///   key, starting it if needed. Its error is returned as-is.
    ///
    /// Refresh failures never reach callers that were served a value.
    pub async fn fetch<F, Fut, E>(
        &self,
        key: &str,
        policy: CachePolicy,
        getter: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        validate_key(key)?;
        policy.validate()?;

        let (state, cached) = match self.store.get(key) {
            Some(entry) => (
                entry.state(&policy, self.config.failure_backoff, Instant::now()),
                entry.value,
            ),
            None => (EntryState::Empty, None),
        };

        match (state, cached) {
            (EntryState::Fresh, Some(value)) => {
                Counters::bump(&self.counters.fresh_hits);
                debug!(key = %key, "cache hit");
                Ok(value)
            }
            (EntryState::Refreshing, Some(value)) => {
                Counters::bump(&self.counters.stale_hits);
                debug!(key = %key, "serving stale value while refresh runs");
                Ok(value)
            }
            (EntryState::Stale, Some(value)) => {
                Counters::bump(&self.counters.stale_hits);
                self.refresh_in_background(key, &policy, getter);
                Ok(value)
            }
            _ => self.fetch_cold(key, getter).await,
        }
    }

    /// Waits for the fetch currently running for `key`, if there is one
    pub async fn wait_for_refresh(&self, key: &str) -> Option<Result<V, CacheError>> {
        let flight = self.store.in_flight(key)?;
        Some(flight.await)
    }

    async fn fetch_cold<F, Fut, E>(&self, key: &str, getter: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let claim = self.store.mark_refreshing_if(
            key,
            |entry| entry.value.is_none(),
            || self.launch(key, getter),
        );
        let flight = match claim {
            // only skipped once a value exists
            Refresh::Skipped(cached) => {
                Counters::bump(&self.counters.fresh_hits);
                debug!(key = %key, "cold start, value arrived before claim");
                return cached.ok_or_else(|| CacheError::UpstreamFetch {
                    key: key.to_string(),
                    message: "entry lost its value".to_string(),
                });
            }
            Refresh::Started(flight) => {
                Counters::bump(&self.counters.cold_fetches);
                debug!(key = %key, "cold start, fetching");
                drive(flight.clone());
                flight
            }
            Refresh::Joined(flight) => {
                debug!(key = %key, "cold start, joining in-flight fetch");
                flight
            }
        };
        flight.await
    }

    fn refresh_in_background<F, Fut, E>(&self, key: &str, policy: &CachePolicy, getter: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let backoff = self.config.failure_backoff;
        let claim = self.store.mark_refreshing_if(
            key,
            |entry| entry.state(policy, backoff, Instant::now()) == EntryState::Stale,
            || self.launch(key, getter),
        );
        match claim {
            Refresh::Started(flight) => {
                Counters::bump(&self.counters.refreshes_started);
                debug!(key = %key, "stale hit, refreshing in background");
                drive(flight);
            }
            Refresh::Joined(_) => {
                debug!(key = %key, "stale hit, refresh already running");
            }
            Refresh::Skipped(_) => {
                debug!(key = %key, "stale hit, entry refreshed before claim");
            }
        }
    }

    /// Builds the shared fetch future for `key`
    ///
    /// The future records its own outcome in the store, so it must be driven
    /// to completion exactly once by [`drive`].
    fn launch<F, Fut, E>(&self, key: &str, getter: F) -> Flight<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let key = key.to_string();
        let store = Arc::clone(&self.store);
        let counters = Arc::clone(&self.counters);
        let timeout = self.config.fetch_timeout;

        async move {
            let started = Instant::now();
            // a panicking getter must still release the refresh slot
            let guarded = AssertUnwindSafe(async move { getter().await }).catch_unwind();
            let outcome = match tokio::time::timeout(timeout, guarded).await {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(err))) => Err(CacheError::UpstreamFetch {
                    key: key.clone(),
                    message: err.to_string(),
                }),
                Ok(Err(_)) => Err(CacheError::UpstreamFetch {
                    key: key.clone(),
                    message: "getter panicked".to_string(),
                }),
                Err(_) => Err(CacheError::Timeout {
                    key: key.clone(),
                    after: timeout,
                }),
            };

            match &outcome {
                Ok(value) => {
                    store.put(&key, value.clone());
                    info!(
                        key = %key,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "upstream fetch succeeded"
                    );
                }
                Err(err) => {
                    store.record_failure(&key);
                    Counters::bump(&counters.fetch_failures);
                    warn!(key = %key, error = %err, "upstream fetch failed");
                }
            }
            outcome
        }
        .boxed()
        .shared()
    }
}

/// Runs a flight on the runtime so it completes even if every waiter is dropped
fn drive<V>(flight: Flight<V>)
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(flight);
}
