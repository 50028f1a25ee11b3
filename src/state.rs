//! Per-consumer fetch state
//!
//! Each data-driven screen owns a [`FetchHandle`]: a small state machine
//! (Idle -> Loading -> Ready or Errored, re-enterable) driven by the shared
//! [`QueryExecutor`] and read by the UI as a `{loading, data, error}`
//! snapshot. The handle never returns an error for producer failures; the
//! failure lands in the snapshot so the UI can always render deterministically.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use crate::executor::ProducerError;
use crate::{FetchError, QueryExecutor};

/// States of one consumer's fetch lifecycle. No terminal state; the machine
/// is re-entered for every query the consumer issues.
#[derive(Debug)]
pub enum FetchState<V> {
    /// No query issued yet.
    Idle,
    /// A producer is outstanding, or this consumer is attached to another
    /// caller's in-flight run.
    Loading,
    /// Last query succeeded.
    Ready(Arc<V>),
    /// Last query failed; holds the producer's message.
    Errored(String),
}

// Manual impl: values are shared via `Arc`, so cloning a state must not
// require `V: Clone`.
impl<V> Clone for FetchState<V> {
    fn clone(&self) -> Self {
        match self {
            FetchState::Idle => FetchState::Idle,
            FetchState::Loading => FetchState::Loading,
            FetchState::Ready(value) => FetchState::Ready(Arc::clone(value)),
            FetchState::Errored(message) => FetchState::Errored(message.clone()),
        }
    }
}

/// What the UI reads: the current state flattened into three fields plus
/// derived booleans, mirroring the shape the suspense dispatcher consumes.
#[derive(Debug)]
pub struct FetchSnapshot<V> {
    pub loading: bool,
    pub data: Option<Arc<V>>,
    pub error: Option<String>,
}

impl<V> Clone for FetchSnapshot<V> {
    fn clone(&self) -> Self {
        Self {
            loading: self.loading,
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }
}

impl<V> FetchSnapshot<V> {
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

/// Per-consumer handle over the shared session executor.
///
/// Cloning the handle shares its state; a clone observes the same
/// Loading/Ready/Errored transitions, which is how a watcher task can see
/// the Loading tick while a fetch is outstanding.
pub struct FetchHandle<V> {
    executor: Arc<QueryExecutor<V>>,
    state: Arc<RwLock<FetchState<V>>>,
}

impl<V> Clone for FetchHandle<V> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            state: Arc::clone(&self.state),
        }
    }
}

impl<V: Send + Sync + 'static> FetchHandle<V> {
    pub fn new(executor: Arc<QueryExecutor<V>>) -> Self {
        Self {
            executor,
            state: Arc::new(RwLock::new(FetchState::Idle)),
        }
    }

    pub fn executor(&self) -> &Arc<QueryExecutor<V>> {
        &self.executor
    }

    /// Execute a query and drive the state machine.
    ///
    /// A Fresh cache hit transitions straight to Ready with no visible
    /// Loading tick; otherwise the state is Loading until the (possibly
    /// shared) producer run settles. Producer failures are returned inside
    /// the snapshot, never as an `Err`.
    pub async fn execute_query<F, Fut>(&self, key: &str, producer: F) -> FetchSnapshot<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ProducerError>>,
    {
        // Synchronous hit: no suspension, no Loading state.
        if self.executor.config().use_cache {
            if let Some(entry) = self.executor.store().get(key) {
                if entry.is_fresh(self.executor.config().fresh_ttl) {
                    if let Some(value) = entry.value {
                        self.set_state(FetchState::Ready(value));
                        return self.snapshot();
                    }
                }
            }
        }

        self.set_state(FetchState::Loading);
        match self.executor.execute(key, producer).await {
            Ok(value) => self.set_state(FetchState::Ready(value)),
            Err(e) => self.set_state(FetchState::Errored(e.message())),
        }
        self.snapshot()
    }

    /// Run a mutation through the executor, invalidating the listed keys on
    /// success. The machine transitions like any other query.
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
        self.set_state(FetchState::Loading);
        let result = self
            .executor
            .mutate(key, mutation, keys_to_invalidate)
            .await;
        match &result {
            Ok(value) => self.set_state(FetchState::Ready(Arc::clone(value))),
            Err(e) => self.set_state(FetchState::Errored(e.message())),
        }
        result
    }

    /// Remove one entry from the shared cache.
    pub fn clear_cache(&self, key: &str) {
        self.executor.store().invalidate(key);
    }

    /// Remove every entry matching a key prefix from the shared cache.
    pub fn clear_cache_prefix(&self, prefix: &str) {
        self.executor.store().invalidate_by_prefix(prefix);
    }

    /// Return this handle to Idle, dropping its local value/error. Other
    /// handles on the same executor are unaffected, as is the shared cache.
    pub fn reset(&self) {
        self.set_state(FetchState::Idle);
    }

    pub fn snapshot(&self) -> FetchSnapshot<V> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            FetchState::Idle => FetchSnapshot {
                loading: false,
                data: None,
                error: None,
            },
            FetchState::Loading => FetchSnapshot {
                loading: true,
                data: None,
                error: None,
            },
            FetchState::Ready(value) => FetchSnapshot {
                loading: false,
                data: Some(Arc::clone(value)),
                error: None,
            },
            FetchState::Errored(message) => FetchSnapshot {
                loading: false,
                data: None,
                error: Some(message.clone()),
            },
        }
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().loading
    }

    pub fn has_error(&self) -> bool {
        self.snapshot().has_error()
    }

    pub fn has_data(&self) -> bool {
        self.snapshot().has_data()
    }

    fn set_state(&self, state: FetchState<V>) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}
