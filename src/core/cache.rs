//! Single-flight, lazily refreshed values.
//!
//! [`RefreshingCell`] backs both the public-key cache (refreshed whenever the
//! published lifetime runs out) and the memoized service-account discovery
//! (computed once, valid forever). Reads of a fresh value take a short
//! synchronous read lock and never touch the refresh mutex. Concurrent misses
//! queue on one async mutex; the first caller runs the refresh, and every
//! caller that was already waiting receives that same outcome, success or
//! failure.

use crate::core::error::FirebaseError;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// How long a freshly computed value stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The value never expires.
    Forever,
    /// The value expires at the given instant.
    Until(DateTime<Utc>),
    /// Keep the expiry of the value being replaced (immediately stale if there
    /// was none).
    KeepPrevious,
}

struct Cached<T> {
    value: Arc<T>,
    expires_at: Option<DateTime<Utc>>,
}

impl<T> Cached<T> {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => now < expires_at,
        }
    }
}

struct Flight<T> {
    attempt: u64,
    outcome: Option<Result<Arc<T>, FirebaseError>>,
}

pub struct RefreshingCell<T> {
    current: RwLock<Option<Cached<T>>>,
    flight: Mutex<Flight<T>>,
    attempts: AtomicU64,
}

impl<T> Default for RefreshingCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RefreshingCell<T> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            flight: Mutex::new(Flight {
                attempt: 0,
                outcome: None,
            }),
            attempts: AtomicU64::new(0),
        }
    }

    /// Returns the cached value if it is still fresh at `now`.
    pub fn get_fresh(&self, now: DateTime<Utc>) -> Option<Arc<T>> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        current
            .as_ref()
            .filter(|cached| cached.is_fresh(now))
            .map(|cached| Arc::clone(&cached.value))
    }

    /// Returns the cached value regardless of freshness.
    pub fn peek(&self) -> Option<Arc<T>> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        current.as_ref().map(|cached| Arc::clone(&cached.value))
    }

    /// Returns the instant the cached value goes stale, if any.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        current.as_ref().and_then(|cached| cached.expires_at)
    }

    /// Returns the fresh value, running `refresh` when there is none.
    ///
    /// On failure the previously cached value stays in place, but the error is
    /// returned to the caller (and to everyone waiting on the same refresh)
    /// rather than the stale value.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        now: DateTime<Utc>,
        refresh: F,
    ) -> Result<Arc<T>, FirebaseError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, Freshness), FirebaseError>>,
    {
        if let Some(value) = self.get_fresh(now) {
            return Ok(value);
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let mut flight = self.flight.lock().await;

        if flight.attempt != seen {
            if let Some(outcome) = &flight.outcome {
                return outcome.clone();
            }
        }
        if let Some(value) = self.get_fresh(now) {
            return Ok(value);
        }

        let outcome = match refresh().await {
            Ok((value, freshness)) => {
                let value = Arc::new(value);
                self.store(Arc::clone(&value), freshness, now);
                Ok(value)
            }
            Err(err) => Err(err),
        };

        flight.attempt += 1;
        flight.outcome = Some(outcome.clone());
        self.attempts.store(flight.attempt, Ordering::Release);
        outcome
    }

    fn store(&self, value: Arc<T>, freshness: Freshness, now: DateTime<Utc>) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let expires_at = match freshness {
            Freshness::Forever => None,
            Freshness::Until(at) => Some(at),
            Freshness::KeepPrevious => Some(
                current
                    .as_ref()
                    .and_then(|cached| cached.expires_at)
                    .unwrap_or(now),
            ),
        };
        *current = Some(Cached { value, expires_at });
    }
}
