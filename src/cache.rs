//! The volatile increment-cache capability.
//!
//! The cache holds, per `(namespace, key)`, the running total of deltas that
//! have not been aggregated yet. It only makes reads cheaper: every operation
//! of [`BufferedCounter`](crate::buffered::BufferedCounter) stays correct if
//! the cache loses entries, returns errors, or is [`NoCache`] altogether.

mod memory;

pub use memory::MemoryCache;

use std::sync::Arc;

use crate::error::CacheError;

/// A key-value store with atomic integer increments.
pub trait IncrementCache: Send + Sync {
    /// Atomically adds `delta` to the value under `key` and returns the result.
    ///
    /// If the key is absent it is first created with `initial`; with
    /// `initial == None` an absent key yields [`CacheError::Miss`] and nothing
    /// is stored. Incrementing by zero with no initial value is a pure read.
    fn increment(&self, key: &str, delta: i64, initial: Option<i64>) -> Result<i64, CacheError>;

    /// Removes every listed key. Absent keys are ignored.
    fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError>;
}

impl<C: IncrementCache + ?Sized> IncrementCache for Arc<C> {
    fn increment(&self, key: &str, delta: i64, initial: Option<i64>) -> Result<i64, CacheError> {
        (**self).increment(key, delta, initial)
    }

    fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        (**self).delete_multi(keys)
    }
}

impl<C: IncrementCache + ?Sized> IncrementCache for &C {
    fn increment(&self, key: &str, delta: i64, initial: Option<i64>) -> Result<i64, CacheError> {
        (**self).increment(key, delta, initial)
    }

    fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        (**self).delete_multi(keys)
    }
}

/// A cache that never holds anything.
///
/// Every read misses, so the read path always recomputes from the queue.
///
/// ```rust
/// use accumulatori::cache::{IncrementCache, NoCache};
/// use accumulatori::CacheError;
///
/// assert_eq!(NoCache.increment("k", 1, Some(0)), Err(CacheError::Disabled));
/// assert!(NoCache.delete_multi(&["k".to_string()]).is_ok());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl IncrementCache for NoCache {
    fn increment(&self, _key: &str, _delta: i64, _initial: Option<i64>) -> Result<i64, CacheError> {
        Err(CacheError::Disabled)
    }

    fn delete_multi(&self, _keys: &[String]) -> Result<(), CacheError> {
        Ok(())
    }
}
