//! Single-flight query execution
//!
//! `QueryExecutor` sits between consumers and the [`CacheStore`]: given a
//! key and a zero-argument async producer it serves Fresh entries directly,
//! coalesces concurrent requests for the same key into one producer run, and
//! writes the outcome (value or failure) back into the store.
//!
//! Producers are typically network or database calls; without coalescing,
//! rapid re-renders of the same screen would fire redundant requests for
//! identical data. The at-most-one-execution-per-key rule bounds request
//! amplification to the number of distinct keys, independent of how many
//! consumers subscribe.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use crate::{CacheConfig, CacheStore, FetchError};

/// Boxed error type accepted from producers.
pub type ProducerError = Box<dyn std::error::Error + Send + Sync>;

/// Represents an in-flight producer run that other requests can wait on.
type InFlightRx<V> = watch::Receiver<Option<Result<Arc<V>, String>>>;
type InFlightTx<V> = watch::Sender<Option<Result<Arc<V>, String>>>;

/// Guard that ensures in-flight entries are cleaned up even on panic/cancel.
///
/// When dropped, removes the key from the in-flight map and notifies waiters
/// with an error if no result was sent.
struct InFlightGuard<V: Send + Sync + 'static> {
    key: String,
    in_flight: Arc<RwLock<HashMap<String, InFlightRx<V>>>>,
    tx: Option<InFlightTx<V>>,
    // Identifies this run's channel so cleanup never removes a newer
    // registration for the same key.
    rx: InFlightRx<V>,
}

impl<V: Send + Sync + 'static> InFlightGuard<V> {
    fn new(
        key: String,
        in_flight: Arc<RwLock<HashMap<String, InFlightRx<V>>>>,
        tx: InFlightTx<V>,
        rx: InFlightRx<V>,
    ) -> Self {
        Self {
            key,
            in_flight,
            tx: Some(tx),
            rx,
        }
    }

    /// Complete the run with a result, consuming the guard.
    fn complete(mut self, result: Result<Arc<V>, String>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(result));
        }
    }
}

impl<V: Send + Sync + 'static> Drop for InFlightGuard<V> {
    fn drop(&mut self) {
        // If tx is still Some, complete() was never called: the producer
        // panicked or the driving task was cancelled. Wake waiters with an
        // error rather than leaving them parked forever.
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(Err("fetch was cancelled or panicked".to_owned())));
        }

        let key = std::mem::take(&mut self.key);
        let in_flight = Arc::clone(&self.in_flight);
        let rx = self.rx.clone();
        tokio::spawn(async move {
            let mut guard = in_flight.write().await;
            if guard
                .get(&key)
                .is_some_and(|current| current.same_channel(&rx))
            {
                guard.remove(&key);
            }
        });
    }
}

/// Deduplicating query executor over a shared [`CacheStore`].
///
/// One executor is created per session and shared (via `Arc`) by every
/// fetch handle; the in-flight registry is what guarantees that concurrent
/// queries for the same key run the producer at most once.
pub struct QueryExecutor<V> {
    store: Arc<CacheStore<V>>,
    config: CacheConfig,
    in_flight: Arc<RwLock<HashMap<String, InFlightRx<V>>>>,
}

impl<V: Send + Sync + 'static> QueryExecutor<V> {
    pub fn new(store: Arc<CacheStore<V>>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            in_flight: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The underlying store, for session-level operations such as
    /// [`CacheStore::clear_all`] on logout.
    pub fn store(&self) -> &Arc<CacheStore<V>> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Execute a query for `key`.
    ///
    /// Serves a Fresh cache entry without invoking `producer` (when caching
    /// is enabled); otherwise joins any in-flight run for the key or starts
    /// a new one. All callers of the same run observe the identical value or
    /// the identical error. Failures are never retried here; since Failed is
    /// not Fresh, the next call for the key runs the producer again.
    pub async fn execute<F, Fut>(&self, key: &str, producer: F) -> Result<Arc<V>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ProducerError>>,
    {
        if self.config.use_cache {
            if let Some(entry) = self.store.get(key) {
                if entry.is_fresh(self.config.fresh_ttl) {
                    if let Some(value) = entry.value {
                        debug!("cache hit for key: {}", key);
                        return Ok(value);
                    }
                }
            }
            debug!("cache miss for key: {}", key);
        }

        self.execute_inner(key, producer).await
    }

    /// Execute a query for `key`, skipping the freshness check.
    ///
    /// Still joins an in-flight run if one exists; forced refresh changes
    /// what counts as a hit, not the single-flight guarantee.
    pub async fn execute_fresh<F, Fut>(&self, key: &str, producer: F) -> Result<Arc<V>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ProducerError>>,
    {
        self.execute_inner(key, producer).await
    }

    /// Run a mutation through the single-flight path, then invalidate the
    /// listed keys so subsequent reads refetch instead of serving stale
    /// Fresh data.
    ///
    /// Invalidation happens only on success, and before the outcome is
    /// returned; a failed mutation leaves prior cached reads untouched.
    pub async fn mutate<F, Fut>(
        &self,
        key: &str,
        mutation: F,
        keys_to_invalidate: &[&str],
    ) -> Result<Arc<V>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ProducerError>>,
    {
        let result = self.execute_inner(key, mutation).await?;
        for invalid_key in keys_to_invalidate {
            self.store.invalidate(invalid_key);
        }
        Ok(result)
    }

    async fn execute_inner<F, Fut>(&self, key: &str, producer: F) -> Result<Arc<V>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ProducerError>>,
    {
        // Join an in-flight run for this key if one exists. A receiver that
        // already carries a result belongs to a settled run whose cleanup
        // task has not landed yet; joining it would replay the previous
        // generation's outcome, so it counts as not-in-flight.
        {
            let in_flight = self.in_flight.read().await;
            if let Some(rx) = in_flight.get(key) {
                if rx.borrow().is_none() {
                    let rx = rx.clone();
                    drop(in_flight);

                    debug!("waiting for in-flight fetch for key: {}", key);
                    return Self::wait_for(rx).await;
                }
            }
        }

        // No in-flight run; register one.
        let (tx, rx) = watch::channel(None);
        let guard = {
            let mut in_flight = self.in_flight.write().await;
            // Double-check: another task may have registered a run while we
            // waited for the write lock.
            if let Some(existing_rx) = in_flight.get(key) {
                if existing_rx.borrow().is_none() {
                    let existing_rx = existing_rx.clone();
                    drop(in_flight);

                    debug!("waiting for in-flight fetch for key (race): {}", key);
                    return Self::wait_for(existing_rx).await;
                }
            }
            in_flight.insert(key.to_owned(), rx.clone());
            InFlightGuard::new(key.to_owned(), Arc::clone(&self.in_flight), tx, rx)
        };

        self.store.mark_pending(key);

        // The guard ensures registry cleanup and waiter wakeup happen even
        // if the producer panics or this task is cancelled.
        let result = match producer().await {
            Ok(value) => {
                debug!("producer succeeded for key: {}", key);
                let value = Arc::new(value);
                self.store.set(key, Arc::clone(&value));
                Ok(value)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("producer failed for key {}: {}", key, message);
                self.store.set_error(key, message.clone());
                Err(message)
            }
        };

        // The store already holds the outcome; deregister the run before
        // waking waiters so a back-to-back caller cannot join a settled
        // channel and observe a stale generation.
        self.in_flight.write().await.remove(key);
        guard.complete(result.clone());

        result.map_err(FetchError::Producer)
    }

    /// Await the outcome of an in-flight run through its watch channel.
    async fn wait_for(mut rx: InFlightRx<V>) -> Result<Arc<V>, FetchError> {
        loop {
            if let Some(result) = rx.borrow().as_ref() {
                return match result {
                    Ok(value) => Ok(Arc::clone(value)),
                    Err(e) => Err(FetchError::Producer(e.clone())),
                };
            }
            if rx.changed().await.is_err() {
                // Sender dropped without sending.
                return Err(FetchError::Producer(
                    "in-flight fetch was cancelled".to_owned(),
                ));
            }
        }
    }
}
