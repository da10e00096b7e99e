//! Request cache — de-duplicated fetches keyed by hierarchical query keys.
//!
//! DESIGN
//! ======
//! Entries hold JSON values under keys such as `["loggedUser"]` or
//! `["profile", <id>]`. A fetch for a key that already has one in flight
//! joins the existing future instead of issuing a second request. Data
//! stays fresh until it is overwritten with `set_data` or marked stale by
//! `invalidate`, which matches entries by key prefix.
//!
//! ERROR HANDLING
//! ==============
//! Failed fetches are retried with capped exponential back-off
//! (`RetryPolicy`). Nothing is cached for a fetch that ultimately fails, so
//! a stale entry keeps serving until a later fetch succeeds.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use tracing::{debug, warn};

use crate::fetcher::FetchError;

// =============================================================================
// QUERY KEY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// True when `prefix` names this key or one of its ancestors.
    #[must_use]
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

// =============================================================================
// RETRY POLICY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first failure. Zero disables retrying.
    pub retries: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: crate::config::DEFAULT_FETCH_RETRIES,
            base: Duration::from_millis(crate::config::DEFAULT_RETRY_BASE_MS),
            max: Duration::from_millis(crate::config::DEFAULT_RETRY_MAX_MS),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self { retries: 0, ..Self::default() }
    }

    /// Back-off before retry number `attempt` (zero-based): `min(base * 2^attempt, max)`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    async fn run<F, Fut>(self, key: &QueryKey, fetch: &F) -> Result<Value, FetchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match fetch().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries => {
                    let delay = self.delay(attempt);
                    warn!(%key, error = %e, attempt = attempt + 1, delay_ms = delay.as_millis(), "fetch failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// =============================================================================
// REQUEST CACHE
// =============================================================================

type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    stale: bool,
    updated_at: Instant,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<QueryKey, CacheEntry>,
    in_flight: HashMap<QueryKey, SharedFetch>,
}

/// Shared handle; clones see the same entries.
#[derive(Clone, Default)]
pub struct RequestCache {
    inner: Arc<Mutex<CacheInner>>,
    retry: RetryPolicy,
}

impl RequestCache {
    #[must_use]
    pub fn new(retry: RetryPolicy) -> Self {
        Self { inner: Arc::default(), retry }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Return fresh data for `key`, fetching it if absent or stale.
    pub async fn get_or_fetch<F, Fut>(&self, key: &QueryKey, fetch: F) -> Result<Value, FetchError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        self.run_fetch(key, fetch, false).await
    }

    /// Fetch `key` regardless of freshness, joining any fetch already in flight.
    pub async fn fetch<F, Fut>(&self, key: &QueryKey, fetch: F) -> Result<Value, FetchError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        self.run_fetch(key, fetch, true).await
    }

    async fn run_fetch<F, Fut>(&self, key: &QueryKey, fetch: F, force: bool) -> Result<Value, FetchError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        let shared = {
            let mut inner = self.lock();
            if !force {
                if let Some(entry) = inner.entries.get(key).filter(|e| !e.stale) {
                    debug!(%key, "cache hit");
                    return Ok(entry.data.clone());
                }
            }
            let existing = inner.in_flight.get(key).cloned();
            if let Some(pending) = existing {
                debug!(%key, "joining in-flight fetch");
                pending
            } else {
                let retry = self.retry;
                let task_key = key.clone();
                let pending = async move { retry.run(&task_key, &fetch).await }.boxed().shared();
                inner.in_flight.insert(key.clone(), pending.clone());
                pending
            }
        };

        let result = shared.clone().await;

        let mut inner = self.lock();
        let owns_slot = inner.in_flight.get(key).is_some_and(|pending| pending.ptr_eq(&shared));
        if owns_slot {
            inner.in_flight.remove(key);
            if let Ok(data) = &result {
                inner.entries.insert(key.clone(), CacheEntry { data: data.clone(), stale: false, updated_at: Instant::now() });
            }
        }
        result
    }

    /// Cached data for `key`, fresh or stale, without fetching.
    #[must_use]
    pub fn get_data(&self, key: &QueryKey) -> Option<Value> {
        self.lock().entries.get(key).map(|entry| entry.data.clone())
    }

    /// True if `key` has data that has not been invalidated.
    #[must_use]
    pub fn is_fresh(&self, key: &QueryKey) -> bool {
        self.lock().entries.get(key).is_some_and(|entry| !entry.stale)
    }

    /// Time since `key` was last written, if it has data.
    #[must_use]
    pub fn age(&self, key: &QueryKey) -> Option<Duration> {
        self.lock().entries.get(key).map(|entry| entry.updated_at.elapsed())
    }

    /// Overwrite the data for `key` and mark it fresh.
    pub fn set_data(&self, key: &QueryKey, data: Value) {
        self.lock()
            .entries
            .insert(key.clone(), CacheEntry { data, stale: false, updated_at: Instant::now() });
        debug!(%key, "cache data set");
    }

    /// Mark every entry under `prefix` stale. Returns how many were marked.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut inner = self.lock();
        let mut count = 0;
        for (key, entry) in &mut inner.entries {
            if key.starts_with(prefix) {
                entry.stale = true;
                count += 1;
            }
        }
        debug!(%prefix, count, "cache invalidated");
        count
    }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod tests;
