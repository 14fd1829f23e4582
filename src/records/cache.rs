//! TTL record cache with single-flight fetches.
//!
//! Concurrent lookups for the same uncached phone share one upstream fetch.
//! The fetch runs in its own task, so a caller that goes away (closed
//! session, dropped request) never cancels it; the result still lands in
//! the cache for everyone else. Late joiners subscribe to the same
//! [`Shared`] outcome instead of starting a second fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::CacheError;
use crate::phone::CanonicalPhone;
use crate::records::{Lookup, Record, RecordSource, RetryPolicy};

/// Cache tuning.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// How long a fetched record (or miss) stays fresh.
    pub ttl: Duration,
    /// Retry policy for upstream calls.
    pub retry: RetryPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
        }
    }
}

/// Upper bound on entry lifetime when `now + ttl` is not representable.
const MAX_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

struct CacheEntry {
    value: Lookup,
    expires_at: Instant,
}

fn expiry_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(MAX_LIFETIME))
        .unwrap_or(now)
}

type SharedLookup = Shared<BoxFuture<'static, Result<Lookup, CacheError>>>;

struct InFlight {
    id: u64,
    outcome: SharedLookup,
    abort: AbortHandle,
}

struct CacheInner {
    source: Arc<dyn RecordSource>,
    settings: CacheSettings,
    entries: RwLock<HashMap<CanonicalPhone, CacheEntry>>,
    in_flight: Mutex<HashMap<CanonicalPhone, InFlight>>,
    next_flight: AtomicU64,
}

/// Process-wide record cache. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct RecordCache {
    inner: Arc<CacheInner>,
}

impl RecordCache {
    /// Create a cache in front of `source`.
    pub fn new(source: Arc<dyn RecordSource>, settings: CacheSettings) -> Self {
        tracing::info!(
            source = source.name(),
            ttl_secs = settings.ttl.as_secs(),
            attempts = settings.retry.attempts,
            "Record cache initialized"
        );

        Self {
            inner: Arc::new(CacheInner {
                source,
                settings,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(1),
            }),
        }
    }

    /// Return the cached lookup for `key`, fetching it if absent or expired.
    pub async fn get_or_fetch(&self, key: &CanonicalPhone) -> Result<Lookup, CacheError> {
        // Fast path: fresh entry, no locks beyond a read.
        if let Some(hit) = self.inner.fresh(key).await {
            tracing::debug!(key = %key, "Record cache hit");
            return Ok(hit);
        }

        let outcome = {
            let mut in_flight = self.inner.in_flight.lock().await;

            // A fetch may have completed between the fast path and the lock.
            if let Some(hit) = self.inner.fresh(key).await {
                tracing::debug!(key = %key, "Record cache hit");
                return Ok(hit);
            }

            match in_flight.get(key) {
                Some(flight) if !flight.abort.is_finished() => {
                    tracing::debug!(key = %key, "Joining in-flight record fetch");
                    flight.outcome.clone()
                }
                _ => {
                    let flight = self.start_fetch(key);
                    let outcome = flight.outcome.clone();
                    in_flight.insert(key.clone(), flight);
                    outcome
                }
            }
        };

        outcome.await
    }

    fn start_fetch(&self, key: &CanonicalPhone) -> InFlight {
        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();

        tracing::debug!(key = %key, flight = id, "Starting record fetch");

        let handle = tokio::spawn(async move { inner.fetch_and_store(task_key, id).await });
        let abort = handle.abort_handle();

        let cancel_key = key.to_string();
        let outcome = async move {
            match handle.await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Cancelled { key: cancel_key }),
            }
        }
        .boxed()
        .shared();

        InFlight { id, outcome, abort }
    }

    /// Drop the entry for `key`. In-flight fetches are not affected.
    pub async fn invalidate(&self, key: &CanonicalPhone) -> bool {
        let removed = self.inner.entries.write().await.remove(key).is_some();
        if removed {
            tracing::info!(key = %key, "Invalidated cached record");
        }
        removed
    }

    /// Drop every entry. Returns how many were removed.
    pub async fn invalidate_all(&self) -> usize {
        let mut entries = self.inner.entries.write().await;
        let count = entries.len();
        entries.clear();
        tracing::info!("Invalidated {} cached record(s)", count);
        count
    }

    /// Fetch the full record listing, bypassing the per-phone cache.
    pub async fn list(&self) -> Result<Vec<Record>, CacheError> {
        let source = &self.inner.source;
        self.inner
            .settings
            .retry
            .run("*", |_| source.list_all())
            .await
    }

    /// Number of entries that are still fresh.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Abort in-flight fetches and drop all entries.
    ///
    /// Callers waiting on an aborted fetch receive [`CacheError::Cancelled`].
    pub async fn shutdown(&self) {
        let flights: Vec<InFlight> = {
            let mut in_flight = self.inner.in_flight.lock().await;
            in_flight.drain().map(|(_, flight)| flight).collect()
        };
        for flight in &flights {
            flight.abort.abort();
        }
        self.inner.entries.write().await.clear();

        tracing::info!(
            "Record cache shut down ({} in-flight fetch(es) cancelled)",
            flights.len()
        );
    }
}

impl CacheInner {
    async fn fresh(&self, key: &CanonicalPhone) -> Option<Lookup> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    async fn fetch_and_store(
        self: Arc<Self>,
        key: CanonicalPhone,
        id: u64,
    ) -> Result<Lookup, CacheError> {
        let result = self
            .settings
            .retry
            .run(key.as_str(), |attempt| {
                tracing::debug!(key = %key, attempt, "Fetching record");
                self.source.fetch(&key)
            })
            .await;

        let outcome = match result {
            Ok(found) => {
                let lookup = match found {
                    Some(record) => {
                        tracing::info!(key = %key, name = %record.name, "Found record");
                        Lookup::Found(Arc::new(record))
                    }
                    None => {
                        tracing::info!(key = %key, "No record for phone");
                        Lookup::NotFound
                    }
                };
                self.entries.write().await.insert(
                    key.clone(),
                    CacheEntry {
                        value: lookup.clone(),
                        expires_at: expiry_after(self.settings.ttl),
                    },
                );
                Ok(lookup)
            }
            Err(err) => Err(err),
        };

        let mut in_flight = self.in_flight.lock().await;
        if in_flight.get(&key).map(|f| f.id) == Some(id) {
            in_flight.remove(&key);
        }

        outcome
    }
}
