//! dgcache - Keyed async fetch cache for the Datagotchi client
//!
//! This library is the data layer behind every data-driven screen:
//! - In-memory keyed cache with Fresh/Pending/Failed entry states
//! - Single-flight deduplication: concurrent queries for the same key share
//!   one producer run and observe the identical outcome
//! - Invalidation by key, by prefix, or whole-session (logout)
//! - Per-screen fetch state machine exposed as `{loading, data, error}`
//! - Declarative suspense dispatch over skeleton/error/empty/data branches
//! - Typed pet/profile/leaderboard queries over a pluggable backend
//!
//! The cache is process-local and session-scoped: no persistence, no
//! cross-process sharing, no automatic retries. Producers own their own
//! timeouts.

mod config;
mod error;
pub mod executor;
pub mod pets;
mod state;
mod store;
mod suspense;

pub use config::CacheConfig;
pub use error::FetchError;
pub use executor::{ProducerError, QueryExecutor};
pub use state::{FetchHandle, FetchSnapshot, FetchState};
pub use store::{CacheEntry, CacheStore, EntryStatus};
pub use suspense::{select_branch, Suspense, SuspenseBranch};

// Re-export async_trait for backend implementations
pub use async_trait::async_trait;
