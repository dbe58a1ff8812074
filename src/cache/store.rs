//! In-process cache store
//!
//! Provides a `CacheStore` mapping caller-defined keys to [`CacheEntry`]
//! slots. All operations take the lock once and never hold it across an
//! `.await`, so the refresh claim in [`CacheStore::mark_refreshing`] is
//! atomic with respect to every other caller.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

use super::entry::{CacheEntry, Flight};

/// Outcome of trying to claim the refresh slot of a key
pub enum Refresh<V> {
    /// This caller installed a new flight and is responsible for driving it
    Started(Flight<V>),
    /// Another caller's flight was already running
    Joined(Flight<V>),
    /// The entry no longer needed a fetch once the lock was held; carries its value
    Skipped(Option<V>),
}

impl<V> Refresh<V> {
    /// Whether this caller won the race for the refresh slot
    pub fn won(&self) -> bool {
        matches!(self, Refresh::Started(_))
    }

    /// The flight to await, whoever started it
    pub fn into_flight(self) -> Option<Flight<V>> {
        match self {
            Refresh::Started(flight) | Refresh::Joined(flight) => Some(flight),
            Refresh::Skipped(_) => None,
        }
    }
}

/// Point-in-time view of one entry, without the value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    /// Cache key
    pub key: String,
    /// Whether a value has ever been stored
    pub has_value: bool,
    /// Wall-clock time of the last successful fetch
    pub fetched_at: Option<DateTime<Utc>>,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Whether a fetch is running
    pub refreshing: bool,
}

/// Process-wide mapping from key to cache entry
///
/// A store starts empty and lives as long as its owner; there is no eviction.
/// Share it between call sites through an `Arc`, or create a fresh one per
/// test for isolation.
pub struct CacheStore<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheStore<V> {
    /// Creates an empty store
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys that have been accessed
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no key has been accessed yet
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// All known keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Replaces the value of `key` after a successful fetch
    ///
    /// Resets failure tracking and releases the refresh slot.
    pub fn put(&self, key: &str, value: V) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_default();
        entry.value = Some(value);
        entry.fetched_at = Some(Instant::now());
        entry.fetched_at_utc = Some(Utc::now());
        entry.last_failure = None;
        entry.consecutive_failures = 0;
        entry.in_flight = None;
    }

    /// Releases the refresh slot of `key` without touching its data
    pub fn clear_refreshing(&self, key: &str) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.in_flight = None;
        }
    }

    /// Records a failed fetch and releases the refresh slot
    ///
    /// The previous value and its fetch time are kept.
    pub fn record_failure(&self, key: &str) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_default();
        entry.last_failure = Some(Instant::now());
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.in_flight = None;
    }

    /// Summaries of every entry, sorted by key
    pub fn summaries(&self) -> Vec<EntrySummary> {
        let entries = self.entries.lock();
        let mut summaries: Vec<EntrySummary> = entries
            .iter()
            .map(|(key, entry)| EntrySummary {
                key: key.clone(),
                has_value: entry.value.is_some(),
                fetched_at: entry.fetched_at_utc,
                consecutive_failures: entry.consecutive_failures,
                refreshing: entry.in_flight.is_some(),
            })
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }
}

impl<V: Clone> CacheStore<V> {
    /// Returns a copy of the entry for `key`, if it has ever been accessed
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.lock().get(key).cloned()
    }

    /// Claims the refresh slot of `key`
    ///
    /// If a flight is already installed it is returned as
    /// [`Refresh::Joined`] and `start` is not called. Otherwise `start`
    /// builds the flight, which is installed before the lock is released.
    /// The entry is created as empty on first access.
    pub fn mark_refreshing<F>(&self, key: &str, start: F) -> Refresh<V>
    where
        F: FnOnce() -> Flight<V>,
    {
        self.mark_refreshing_if(key, |_| true, start)
    }

    /// Claims the refresh slot of `key` only if `needed` still holds
    ///
    /// `needed` sees the entry under the same lock acquisition as the claim,
    /// so an entry that another flight refreshed in the meantime yields
    /// [`Refresh::Skipped`] with its current value. A running flight is
    /// joined without consulting `needed`.
    pub fn mark_refreshing_if<P, F>(&self, key: &str, needed: P, start: F) -> Refresh<V>
    where
        P: FnOnce(&CacheEntry<V>) -> bool,
        F: FnOnce() -> Flight<V>,
    {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_default();
        if let Some(flight) = &entry.in_flight {
            return Refresh::Joined(flight.clone());
        }
        if !needed(entry) {
            return Refresh::Skipped(entry.value.clone());
        }
        let flight = start();
        entry.in_flight = Some(flight.clone());
        Refresh::Started(flight)
    }

    /// The flight currently running for `key`, if any
    pub fn in_flight(&self, key: &str) -> Option<Flight<V>> {
        self.entries
            .lock()
            .get(key)
            .and_then(|entry| entry.in_flight.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheError;
    use futures::FutureExt;

    fn ready_flight(value: &str) -> Flight<String> {
        let value = value.to_string();
        async move { Ok::<_, CacheError>(value) }.boxed().shared()
    }

    #[test]
    fn test_get_returns_none_for_unknown_key() {
        let store: CacheStore<String> = CacheStore::new();
        assert!(store.get("missing").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_put_then_get() {
        let store = CacheStore::new();
        store.put("rss", "<rss/>".to_string());

        let entry = store.get("rss").expect("entry should exist");
        assert_eq!(entry.value.as_deref(), Some("<rss/>"));
        assert!(entry.fetched_at.is_some());
        assert!(entry.fetched_at_utc.is_some());
        assert!(!entry.is_refreshing());
    }

    #[test]
    fn test_mark_refreshing_only_first_caller_wins() {
        let store: CacheStore<String> = CacheStore::new();

        let first = store.mark_refreshing("k", || ready_flight("a"));
        assert!(first.won());

        let mut started_again = false;
        let second = store.mark_refreshing("k", || {
            started_again = true;
            ready_flight("b")
        });
        assert!(!second.won());
        assert!(!started_again, "start closure must not run when joined");
        assert!(store.get("k").expect("entry created").is_refreshing());
    }

    #[test]
    fn test_mark_refreshing_if_skips_entry_refreshed_meanwhile() {
        let store = CacheStore::new();
        store.put("k", "v2".to_string());

        let mut started = false;
        let claim = store.mark_refreshing_if(
            "k",
            |entry| entry.value.is_none(),
            || {
                started = true;
                ready_flight("v3")
            },
        );

        assert!(!claim.won());
        assert!(!started);
        assert!(matches!(claim, Refresh::Skipped(Some(ref v)) if v == "v2"));
        assert!(store.in_flight("k").is_none());
    }

    #[test]
    fn test_mark_refreshing_if_starts_when_needed() {
        let store: CacheStore<String> = CacheStore::new();

        let claim = store.mark_refreshing_if("k", |entry| entry.value.is_none(), || ready_flight("a"));

        assert!(claim.won());
        assert!(claim.into_flight().is_some());
        assert!(store.in_flight("k").is_some());
    }

    #[test]
    fn test_put_releases_refresh_slot() {
        let store: CacheStore<String> = CacheStore::new();
        let _ = store.mark_refreshing("k", || ready_flight("a"));

        store.put("k", "a".to_string());

        assert!(store.in_flight("k").is_none());
        assert!(store.mark_refreshing("k", || ready_flight("b")).won());
    }

    #[test]
    fn test_record_failure_keeps_value() {
        let store = CacheStore::new();
        store.put("k", "v1".to_string());
        let before = store.get("k").expect("entry").fetched_at;
        let _ = store.mark_refreshing("k", || ready_flight("v2"));

        store.record_failure("k");
        store.record_failure("k");

        let entry = store.get("k").expect("entry");
        assert_eq!(entry.value.as_deref(), Some("v1"));
        assert_eq!(entry.fetched_at, before);
        assert_eq!(entry.consecutive_failures, 2);
        assert!(entry.last_failure.is_some());
        assert!(!entry.is_refreshing());
    }

    #[test]
    fn test_put_resets_failures() {
        let store = CacheStore::new();
        store.record_failure("k");
        store.put("k", "v".to_string());

        let entry = store.get("k").expect("entry");
        assert_eq!(entry.consecutive_failures, 0);
        assert!(entry.last_failure.is_none());
    }

    #[test]
    fn test_clear_refreshing_ignores_unknown_key() {
        let store: CacheStore<String> = CacheStore::new();
        store.clear_refreshing("nothing");
        assert!(store.is_empty());

        let _ = store.mark_refreshing("k", || ready_flight("a"));
        store.clear_refreshing("k");
        assert!(store.in_flight("k").is_none());
    }

    #[test]
    fn test_summaries_sorted_by_key() {
        let store = CacheStore::new();
        store.put("twitter_tweets", "[]".to_string());
        store.record_failure("instagram");

        let summaries = store.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].key, "instagram");
        assert!(!summaries[0].has_value);
        assert_eq!(summaries[0].consecutive_failures, 1);
        assert_eq!(summaries[1].key, "twitter_tweets");
        assert!(summaries[1].has_value);
        assert_eq!(store.keys(), vec!["instagram", "twitter_tweets"]);
    }
}
