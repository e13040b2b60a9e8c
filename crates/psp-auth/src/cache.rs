//! TTL cache cell with single-flight population
//!
//! Backs both the discovery metadata and the key set caches:
//!
//! - Reads of a fresh value are a single atomic load (`ArcSwapOption`), no lock.
//! - A stale or empty cell is repopulated by exactly one upstream fetch. Concurrent
//!   callers clone the same [`Shared`] future and receive the same value or error.
//! - A failed fetch is never stored; the next call starts a new fetch.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;

/// A cached value and when it was fetched
struct Entry<T> {
    value: Arc<T>,
    fetched_at: Instant,
}

/// The fetch currently in flight, tagged so only its own waiters retire it
struct InFlight<T> {
    generation: u64,
    fetch: SharedFetch<T>,
}

/// Single-value TTL cache with dogpile prevention
pub(crate) struct SingleFlight<T> {
    name: &'static str,
    ttl: Duration,
    current: ArcSwapOption<Entry<T>>,
    in_flight: Mutex<Option<InFlight<T>>>,
    generation: AtomicU64,
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("populated", &self.current.load().is_some())
            .finish()
    }
}

impl<T> SingleFlight<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            current: ArcSwapOption::empty(),
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// The cached value if it is still within its TTL
    pub(crate) fn fresh(&self) -> Option<Arc<T>> {
        let guard = self.current.load();
        let entry = guard.as_ref()?;
        (entry.fetched_at.elapsed() < self.ttl).then(|| Arc::clone(&entry.value))
    }

    /// Age of the cached value, fresh or not
    pub(crate) fn age(&self) -> Option<Duration> {
        self.current.load().as_ref().map(|e| e.fetched_at.elapsed())
    }

    /// Drop the cached value so the next read fetches
    pub(crate) fn invalidate(&self) {
        self.current.store(None);
        debug!(cache = self.name, "Cache invalidated");
    }

    /// Return the fresh value or join/start the single upstream fetch
    pub(crate) async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(value) = self.fresh() {
            debug!(cache = self.name, "Using cached value");
            return Ok(value);
        }
        self.join_or_start(fetch, true).await
    }

    /// Join/start an upstream fetch even if the cached value is fresh
    ///
    /// The cached value stays readable while the fetch runs and is replaced
    /// only when it succeeds.
    pub(crate) async fn refetch<F, Fut>(&self, fetch: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.join_or_start(fetch, false).await
    }

    async fn join_or_start<F, Fut>(&self, fetch: F, reuse_fresh: bool) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (generation, shared) = {
            let mut slot = self.in_flight.lock();
            // A fetch may have completed between the lock-free read and here
            if reuse_fresh && let Some(value) = self.fresh() {
                return Ok(value);
            }
            match slot.as_ref() {
                Some(running) => {
                    debug!(cache = self.name, "Joining in-flight fetch");
                    (running.generation, running.fetch.clone())
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let fetch = fetch().map(|r| r.map(Arc::new)).boxed().shared();
                    *slot = Some(InFlight {
                        generation,
                        fetch: fetch.clone(),
                    });
                    (generation, fetch)
                }
            }
        };

        let result = shared.await;

        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|r| r.generation == generation) {
            *slot = None;
            if let Ok(value) = &result {
                self.current.store(Some(Arc::new(Entry {
                    value: Arc::clone(value),
                    fetched_at: Instant::now(),
                })));
            }
        }

        result
    }
}
