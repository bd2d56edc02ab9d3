use tracing::debug;

use super::BufferedCounter;
use crate::cache::IncrementCache;
use crate::codec::encode_delta;
use crate::error::{CacheError, CounterError, Result};
use crate::keys::cache_key;
use crate::queue::LeasedQueue;

impl<Q: LeasedQueue, C: IncrementCache> BufferedCounter<Q, C> {
    /// Records `delta` for `key` in `namespace`.
    ///
    /// Exactly one queue item is written per successful call. The cached
    /// running total is then nudged by `delta` if it exists; a missing entry
    /// is left for the next read to rebuild from the queue. A cache failure
    /// is logged and counted but does not fail the call. If the enqueue fails the delta is
    /// lost, the cache is left alone, and [`CounterError::Enqueue`] is
    /// returned. There is no retry.
    pub fn record_delta(&self, namespace: &str, key: &str, delta: i64) -> Result<()> {
        self.queue
            .enqueue(namespace, key, encode_delta(delta))
            .map_err(|err| {
                self.stats.enqueue_failures.incr();
                CounterError::Enqueue(err)
            })?;
        self.stats.deltas_recorded.incr();

        match self
            .cache
            .increment(&cache_key(namespace, key), delta, None)
        {
            Ok(_) | Err(CacheError::Miss | CacheError::Disabled) => {}
            Err(err) => {
                self.stats.cache_nudge_failures.incr();
                debug!(namespace, key, error = %err, "could not nudge buffered count");
            }
        }
        Ok(())
    }
}
