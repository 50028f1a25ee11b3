//! Fetch error types

/// Errors surfaced by the fetch engine and the domain query layer.
///
/// A cache miss is not an error; it simply triggers a (re)fetch. Producer
/// failures are stored on the cache entry and delivered to every waiter of
/// the same in-flight execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The async producer rejected. Carries the underlying message verbatim.
    #[error("producer failed: {0}")]
    Producer(String),

    /// A domain function was called without a required argument.
    /// Surfaced immediately, without touching the cache.
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
}

impl FetchError {
    /// The user-facing message, as stored on Failed cache entries.
    pub fn message(&self) -> String {
        match self {
            FetchError::Producer(msg) => msg.clone(),
            FetchError::MissingArgument(arg) => format!("missing argument: {arg}"),
        }
    }
}
