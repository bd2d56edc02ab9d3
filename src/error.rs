//! Error types for buffered counters and their collaborators.
//!
//! Errors are split by who produces them:
//!
//! - [`QueueError`] comes from a [`LeasedQueue`](crate::queue::LeasedQueue)
//!   implementation. Queue failures on the write and drain paths are fatal.
//! - [`CacheError`] comes from an [`IncrementCache`](crate::cache::IncrementCache)
//!   implementation. The cache is a hint, so these never escape a
//!   [`BufferedCounter`](crate::buffered::BufferedCounter) operation.
//! - [`CounterError`] is what the counter operations return.
//!
//! # Example
//!
//! ```rust
//! use accumulatori::{CounterError, QueueError};
//!
//! let err = CounterError::Enqueue(QueueError::Unavailable("backend down".into()));
//! assert_eq!(err.to_string(), "could not enqueue delta: queue unavailable: backend down");
//! ```

use thiserror::Error;

use crate::queue::ItemId;

/// Error reported by a leased queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The backend could not serve the request.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// The item was re-leased by another consumer after our lease expired.
    #[error("lease lost on item {0}")]
    LeaseLost(ItemId),

    /// The item no longer exists in the queue.
    #[error("unknown item {0}")]
    UnknownItem(ItemId),

    /// The request itself was malformed (e.g. a zero lease duration).
    #[error("invalid queue request: {0}")]
    InvalidRequest(String),
}

/// Error reported by an increment cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The key is absent and no initial value was supplied.
    #[error("cache miss")]
    Miss,

    /// The backend could not serve the request.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// The increment would overflow the stored value.
    #[error("cache value overflow")]
    Overflow,

    /// Caching is turned off.
    #[error("cache disabled")]
    Disabled,
}

/// Error returned by [`BufferedCounter`](crate::buffered::BufferedCounter) operations.
#[derive(Debug, Error)]
pub enum CounterError {
    /// The delta could not be written to the queue and is lost.
    #[error("could not enqueue delta: {0}")]
    Enqueue(#[source] QueueError),

    /// Leasing from the queue failed.
    #[error("could not lease deltas: {0}")]
    Lease(#[source] QueueError),

    /// Deleting a drained batch failed; the batch will be leased again later.
    #[error("could not delete drained batch: {0}")]
    Delete(#[source] QueueError),

    /// A queue item carried a payload that is not a base-10 integer.
    #[error("malformed delta payload for key {key:?}: {payload:?}")]
    Decode {
        /// Tag of the offending item.
        key: String,
        /// Lossy rendering of the raw payload.
        payload: String,
    },

    /// A [`BufferConfig`](crate::config::BufferConfig) value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The persistence callback rejected an aggregate.
    #[error("persist failed: {0}")]
    Persist(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CounterError {
    /// Wraps an arbitrary persistence error.
    ///
    /// ```rust
    /// use accumulatori::CounterError;
    ///
    /// let err = CounterError::persist("database is read-only");
    /// assert!(err.to_string().contains("read-only"));
    /// ```
    pub fn persist(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        CounterError::Persist(err.into())
    }

    /// Returns `true` if the error came from the queue.
    pub fn is_queue_error(&self) -> bool {
        matches!(
            self,
            CounterError::Enqueue(_) | CounterError::Lease(_) | CounterError::Delete(_)
        )
    }
}

/// Result type for counter operations.
pub type Result<T> = std::result::Result<T, CounterError>;
