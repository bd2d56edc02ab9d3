use tracing::{debug, instrument};

use super::BufferedCounter;
use crate::cache::IncrementCache;
use crate::codec::decode_delta;
use crate::error::{CacheError, CounterError, Result};
use crate::keys::cache_key;
use crate::queue::{LeasedQueue, QueueItem};

impl<Q: LeasedQueue, C: IncrementCache> BufferedCounter<Q, C> {
    /// Returns the sum of the deltas of `key` that have not been aggregated.
    ///
    /// The cached total is returned when present. Otherwise the items tagged
    /// `key` are leased for [`read_lease`](crate::config::BufferConfig::read_lease)
    /// and summed without being deleted, then released. The sum is written
    /// back to the cache only when the cache reported the entry missing; after
    /// any other cache error the entry may still exist and is left alone.
    /// Only lease failures (and decode failures under
    /// [`DecodePolicy::Fail`](crate::codec::DecodePolicy::Fail)) are errors.
    ///
    /// While the items are leased here an aggregation cannot see them, and a
    /// concurrent read of the same key may come up short.
    #[instrument(level = "debug", skip_all, fields(namespace = %namespace, key = %key))]
    pub fn buffered_total(&self, namespace: &str, key: &str) -> Result<i64> {
        let cache_key = cache_key(namespace, key);
        let missing = match self.cache.increment(&cache_key, 0, None) {
            Ok(total) => {
                self.stats.fast_reads.incr();
                return Ok(total);
            }
            Err(CacheError::Miss) => true,
            Err(CacheError::Disabled) => false,
            Err(err) => {
                debug!(error = %err, "cache read failed, summing the queue");
                false
            }
        };

        self.stats.slow_reads.incr();
        let total = self.sum_buffered(namespace, key)?;
        if !missing {
            return Ok(total);
        }

        if let Err(err) = self.cache.increment(&cache_key, total, Some(0)) {
            self.stats.cache_prime_failures.incr();
            debug!(error = %err, "could not prime buffered count");
        }
        Ok(total)
    }

    fn sum_buffered(&self, namespace: &str, key: &str) -> Result<i64> {
        let mut leased = Vec::new();
        let total = self.sum_tagged(namespace, key, &mut leased);

        if !leased.is_empty() {
            if let Err(err) = self.queue.release(namespace, &leased) {
                debug!(items = leased.len(), error = %err, "could not release read leases");
            }
        }
        total
    }

    /// Leases every visible item tagged `key` into `leased` and sums them.
    fn sum_tagged(&self, namespace: &str, key: &str, leased: &mut Vec<QueueItem>) -> Result<i64> {
        let batch_size = self.config.batch_size();
        let lease = self.config.read_lease();
        let policy = self.config.decode_policy();

        let mut total = 0i64;
        loop {
            let batch = self
                .queue
                .lease_by_tag(namespace, batch_size, lease, key)
                .map_err(CounterError::Lease)?;
            let short = batch.len() < batch_size;

            let start = leased.len();
            leased.extend(batch);
            for item in &leased[start..] {
                let decoded = decode_delta(policy, key, &item.payload)?;
                total = total.wrapping_add(decoded.value());
            }

            if short {
                return Ok(total);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::buffered::BufferedCounter;
    use crate::cache::{IncrementCache, MemoryCache, NoCache};
    use crate::clock::ManualClock;
    use crate::codec::DecodePolicy;
    use crate::config::BufferConfig;
    use crate::error::{CacheError, CounterError, QueueError};
    use crate::keys::cache_key;
    use crate::queue::{LeasedQueue, MemoryQueue, QueueOp};

    #[test]
    fn test_fast_path_uses_cache() {
        let counter = BufferedCounter::new(MemoryQueue::new(), MemoryCache::new());
        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 0);
        counter.record_delta("ns", "k", 5).unwrap();
        counter.record_delta("ns", "k", -2).unwrap();

        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 3);
        assert_eq!(counter.queue().stats().leased, 0);
        assert_eq!(counter.stats().snapshot().fast_reads, 1);
    }

    #[test]
    fn test_slow_path_sums_and_primes() {
        let counter = BufferedCounter::new(MemoryQueue::new(), MemoryCache::new());
        counter.record_delta("ns", "k", 5).unwrap();
        counter.record_delta("ns", "k", -2).unwrap();
        counter.cache().clear();

        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 3);
        assert_eq!(counter.cache().get(&cache_key("ns", "k")), Some(3));
        // nothing was deleted
        assert_eq!(counter.queue().len("ns"), 2);

        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 3);
        let stats = counter.stats().snapshot();
        assert_eq!(stats.slow_reads, 1);
        assert_eq!(stats.fast_reads, 1);
    }

    #[test]
    fn test_missing_key_reads_zero() {
        let counter = BufferedCounter::new(MemoryQueue::new(), MemoryCache::new());
        assert_eq!(counter.buffered_total("ns", "nothing").unwrap(), 0);
        assert_eq!(counter.cache().get(&cache_key("ns", "nothing")), Some(0));
    }

    #[test]
    fn test_slow_path_releases_leases() {
        let counter = BufferedCounter::without_cache(MemoryQueue::new());
        counter.record_delta("ns", "k", 5).unwrap();
        counter.record_delta("ns", "k", 1).unwrap();

        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 6);
        assert_eq!(counter.queue().visible_len("ns"), 2);
        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 6);
    }

    #[test]
    fn test_tag_isolation() {
        let counter = BufferedCounter::without_cache(MemoryQueue::new());
        counter.record_delta("ns", "a", 1).unwrap();
        counter.record_delta("ns", "b", 10).unwrap();
        counter.record_delta("ns", "b", 10).unwrap();
        counter.record_delta("other", "a", 100).unwrap();

        assert_eq!(counter.buffered_total("ns", "a").unwrap(), 1);
        assert_eq!(counter.buffered_total("ns", "b").unwrap(), 20);
        assert_eq!(counter.buffered_total("other", "a").unwrap(), 100);
    }

    #[test]
    fn test_slow_path_spans_batches() {
        let config = BufferConfig::new().with_batch_size(3);
        let counter = BufferedCounter::with_config(MemoryQueue::new(), NoCache, config).unwrap();
        for _ in 0..10 {
            counter.record_delta("ns", "k", 2).unwrap();
        }
        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 20);
        assert_eq!(counter.queue().visible_len("ns"), 10);
    }

    #[test]
    fn test_lease_failure_is_fatal() {
        let counter = BufferedCounter::without_cache(MemoryQueue::new());
        counter.record_delta("ns", "k", 1).unwrap();
        counter.queue().fail_next(QueueOp::LeaseByTag);

        let err = counter.buffered_total("ns", "k").unwrap_err();
        assert!(matches!(err, CounterError::Lease(QueueError::Unavailable(_))));
    }

    #[test]
    fn test_cache_outage_falls_back_to_queue() {
        let counter = BufferedCounter::new(MemoryQueue::new(), MemoryCache::new());
        counter.record_delta("ns", "k", 4).unwrap();
        counter.cache().set_available(false);

        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 4);
        let stats = counter.stats().snapshot();
        assert_eq!(stats.slow_reads, 1);
        // an unreachable cache is not primed
        assert_eq!(stats.cache_prime_failures, 0);
    }

    /// Fails the first `count` peeks, then behaves like the wrapped cache.
    #[derive(Debug, Default)]
    struct FlakyPeeks {
        inner: MemoryCache,
        count: usize,
        failed: AtomicUsize,
    }

    impl IncrementCache for FlakyPeeks {
        fn increment(&self, key: &str, delta: i64, initial: Option<i64>) -> Result<i64, CacheError> {
            let peek = delta == 0 && initial.is_none();
            if peek && self.failed.fetch_add(1, Ordering::SeqCst) < self.count {
                return Err(CacheError::Unavailable("read timed out".into()));
            }
            self.inner.increment(key, delta, initial)
        }

        fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
            self.inner.delete_multi(keys)
        }
    }

    #[test]
    fn test_failed_peek_does_not_add_to_existing_entry() {
        let cache = FlakyPeeks {
            count: 1,
            ..FlakyPeeks::default()
        };
        let counter = BufferedCounter::new(MemoryQueue::new(), cache);
        counter.cache().inner.increment(&cache_key("ns", "k"), 0, Some(0)).unwrap();
        counter.record_delta("ns", "k", 3).unwrap();

        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 3);
        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 3);
        assert_eq!(counter.cache().inner.get(&cache_key("ns", "k")), Some(3));

        let stats = counter.stats().snapshot();
        assert_eq!(stats.slow_reads, 1);
        assert_eq!(stats.fast_reads, 1);
    }

    #[test]
    fn test_expired_cache_entry_is_recomputed() {
        let clock = ManualClock::new();
        let cache = MemoryCache::with_clock(clock.clone()).with_ttl(Duration::from_secs(60));
        let counter = BufferedCounter::new(MemoryQueue::with_clock(clock.clone()), cache);
        counter.record_delta("ns", "k", 4).unwrap();
        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 4);

        clock.advance(Duration::from_secs(61));
        counter.record_delta("ns", "k", 1).unwrap();
        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 5);
        assert_eq!(counter.buffered_total("ns", "k").unwrap(), 5);

        let stats = counter.stats().snapshot();
        assert_eq!(stats.slow_reads, 2);
        assert_eq!(stats.fast_reads, 1);
    }

    #[test]
    fn test_malformed_payload_under_policies() {
        let lenient = BufferedCounter::without_cache(MemoryQueue::new());
        lenient.record_delta("ns", "k", 3).unwrap();
        lenient.queue().enqueue("ns", "k", b"3.5".to_vec()).unwrap();
        assert_eq!(lenient.buffered_total("ns", "k").unwrap(), 3);
        assert_eq!(lenient.buffered_total("ns", "k").unwrap(), 3);
        // counted once, when aggregation deletes it
        assert_eq!(lenient.stats().snapshot().malformed_payloads, 0);
        lenient
            .aggregate("ns", |_, _| Ok::<_, CounterError>(()))
            .unwrap();
        assert_eq!(lenient.stats().snapshot().malformed_payloads, 1);

        let config = BufferConfig::new().with_decode_policy(DecodePolicy::Fail);
        let strict = BufferedCounter::with_config(MemoryQueue::new(), NoCache, config).unwrap();
        strict.record_delta("ns", "k", 3).unwrap();
        strict.queue().enqueue("ns", "k", b"3.5".to_vec()).unwrap();
        let err = strict.buffered_total("ns", "k").unwrap_err();
        assert!(matches!(err, CounterError::Decode { ref payload, .. } if payload == "3.5"));
        // leases are released even when decoding fails
        assert_eq!(strict.queue().visible_len("ns"), 2);
    }
}
