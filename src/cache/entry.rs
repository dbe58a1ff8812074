//! Cache entry model and freshness policy
//!
//! An entry holds the last good value for a key together with the timing
//! metadata needed to decide whether it can be served as-is, served while a
//! refresh runs, or must be fetched before anything can be returned.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use super::CacheError;

/// Longest key accepted by the engine
pub const MAX_KEY_LEN: usize = 256;

/// A fetch in progress, shared by every caller waiting on the same key
pub type Flight<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

/// Freshness windows supplied by the caller on each lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// How long a fetched value is considered fresh
    pub age: Duration,
    /// Shorter window after a failed refresh before the next attempt
    pub retry_when: Option<Duration>,
}

impl CachePolicy {
    /// Creates a policy with only a freshness window
    pub fn new(age: Duration) -> Self {
        Self {
            age,
            retry_when: None,
        }
    }

    /// Creates a policy from whole seconds, the unit the route table uses
    pub fn from_secs(age_secs: u64, retry_when_secs: Option<u64>) -> Self {
        Self {
            age: Duration::from_secs(age_secs),
            retry_when: retry_when_secs.map(Duration::from_secs),
        }
    }

    /// Sets the retry window used after a failed refresh
    pub fn with_retry_when(mut self, retry_when: Duration) -> Self {
        self.retry_when = Some(retry_when);
        self
    }

    /// Checks that both windows are positive and `retry_when <= age`
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.age.is_zero() {
            return Err(CacheError::InvalidPolicy("age must be positive".to_string()));
        }
        if let Some(retry_when) = self.retry_when {
            if retry_when.is_zero() {
                return Err(CacheError::InvalidPolicy(
                    "retry_when must be positive".to_string(),
                ));
            }
            if retry_when > self.age {
                return Err(CacheError::InvalidPolicy(format!(
                    "retry_when ({:?}) must not exceed age ({:?})",
                    retry_when, self.age
                )));
            }
        }
        Ok(())
    }
}

/// Where an entry stands relative to a policy at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Never fetched successfully
    Empty,
    /// Servable without contacting upstream
    Fresh,
    /// Servable, but a refresh should be started
    Stale,
    /// A fetch for this key is in flight
    Refreshing,
}

/// A single slot in the cache store
#[derive(Clone)]
pub struct CacheEntry<V> {
    /// Last successfully fetched value
    pub value: Option<V>,
    /// When `value` was fetched
    pub fetched_at: Option<Instant>,
    /// Wall-clock time of the same fetch, for reporting
    pub fetched_at_utc: Option<DateTime<Utc>>,
    /// When the most recent fetch failed, cleared by a success
    pub last_failure: Option<Instant>,
    /// Failures since the last success
    pub consecutive_failures: u32,
    pub(crate) in_flight: Option<Flight<V>>,
}

impl<V> Default for CacheEntry<V> {
    fn default() -> Self {
        Self {
            value: None,
            fetched_at: None,
            fetched_at_utc: None,
            last_failure: None,
            consecutive_failures: 0,
            in_flight: None,
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("value", &self.value)
            .field("fetched_at", &self.fetched_at)
            .field("fetched_at_utc", &self.fetched_at_utc)
            .field("last_failure", &self.last_failure)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("refreshing", &self.in_flight.is_some())
            .finish()
    }
}

impl<V> CacheEntry<V> {
    /// Whether a fetch for this entry is currently running
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Time elapsed since the last successful fetch
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.fetched_at.map(|at| now.saturating_duration_since(at))
    }

    /// Classifies the entry under `policy` at `now`
    ///
    /// `failure_backoff` is the engine-wide retry window used when the policy
    /// has no `retry_when` of its own. Within the retry window after a
    /// failure the entry counts as `Fresh`.
    pub fn state(
        &self,
        policy: &CachePolicy,
        failure_backoff: Option<Duration>,
        now: Instant,
    ) -> EntryState {
        if self.in_flight.is_some() {
            return EntryState::Refreshing;
        }
        let Some(elapsed) = self.elapsed(now).filter(|_| self.value.is_some()) else {
            return EntryState::Empty;
        };
        if elapsed < policy.age {
            return EntryState::Fresh;
        }
        if let (Some(failed_at), Some(window)) =
            (self.last_failure, policy.retry_when.or(failure_backoff))
        {
            if now.saturating_duration_since(failed_at) < window {
                return EntryState::Fresh;
            }
        }
        EntryState::Stale
    }
}

/// Rejects keys that are empty, too long or contain whitespace/control characters
pub fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}
