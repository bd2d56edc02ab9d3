use tracing::{debug, instrument, warn};

use super::{AggregateSummary, BufferedCounter, DiffMap};
use crate::cache::IncrementCache;
use crate::codec::decode_delta;
use crate::error::{CounterError, Result};
use crate::keys::cache_key;
use crate::queue::LeasedQueue;

/// Progress of one drain. Only batches the queue has deleted are in here.
#[derive(Debug, Default)]
struct Drained {
    diffs: DiffMap,
    items: usize,
    batches: usize,
    malformed: usize,
}

impl Drained {
    fn summary(&self) -> AggregateSummary {
        AggregateSummary {
            keys: self.diffs.len(),
            items: self.items,
            batches: self.batches,
            malformed: self.malformed,
        }
    }
}

impl<Q: LeasedQueue, C: IncrementCache> BufferedCounter<Q, C> {
    /// Drains every buffered delta of `namespace` and persists the sums.
    ///
    /// Items are leased in batches of
    /// [`batch_size`](crate::config::BufferConfig::batch_size), summed per key,
    /// and deleted batch by batch. The drain stops on an empty or short batch.
    /// The cache entries of every drained key are then invalidated, and
    /// `persist` is called once with the namespace and the per-key sums, even
    /// when there was nothing to drain.
    ///
    /// The error of `persist` is returned as is. Queue and decode failures are
    /// converted into `E` through `From<CounterError>`.
    ///
    /// If the drain fails after some batches were already deleted, those
    /// batches are still invalidated and persisted before the drain error is
    /// returned; if that persist fails too, its error wins. Deltas are gone
    /// from the queue by the time `persist` runs, so a failing `persist` is
    /// responsible for retrying them itself.
    #[instrument(level = "debug", skip_all, fields(namespace = %namespace))]
    pub fn aggregate<E, F>(
        &self,
        namespace: &str,
        persist: F,
    ) -> std::result::Result<AggregateSummary, E>
    where
        F: FnOnce(&str, DiffMap) -> std::result::Result<(), E>,
        E: From<CounterError>,
    {
        let mut drained = Drained::default();

        if let Err(err) = self.drain(namespace, &mut drained) {
            self.stats.aggregation_failures.incr();
            if drained.batches == 0 {
                warn!(error = %err, "aggregation aborted before draining anything");
                return Err(err.into());
            }
            warn!(
                batches = drained.batches,
                items = drained.items,
                error = %err,
                "aggregation aborted, flushing drained batches"
            );
            self.flush(namespace, drained, persist)?;
            return Err(err.into());
        }

        let summary = self.flush(namespace, drained, persist).map_err(|err| {
            self.stats.aggregation_failures.incr();
            err
        })?;
        self.stats.aggregations.incr();
        self.stats.mark_aggregated();
        debug!(
            keys = summary.keys,
            items = summary.items,
            batches = summary.batches,
            "aggregated buffered counts"
        );
        Ok(summary)
    }

    fn drain(&self, namespace: &str, drained: &mut Drained) -> Result<()> {
        let batch_size = self.config.batch_size();
        let lease = self.config.aggregate_lease();
        let policy = self.config.decode_policy();

        loop {
            let items = self
                .queue
                .lease(namespace, batch_size, lease)
                .map_err(CounterError::Lease)?;
            if items.is_empty() {
                return Ok(());
            }

            let mut sums = DiffMap::new();
            let mut malformed = 0;
            for item in &items {
                let decoded = decode_delta(policy, &item.tag, &item.payload)?;
                malformed += usize::from(decoded.is_coerced());
                let sum = sums.entry(item.tag.clone()).or_insert(0);
                *sum = sum.wrapping_add(decoded.value());
            }

            if let Err(err) = self.queue.delete(namespace, &items) {
                self.stats.delete_failures.incr();
                return Err(CounterError::Delete(err));
            }

            for (key, sum) in sums {
                let total = drained.diffs.entry(key).or_insert(0);
                *total = total.wrapping_add(sum);
            }
            drained.items += items.len();
            drained.batches += 1;
            drained.malformed += malformed;
            self.stats.items_aggregated.add(items.len() as u64);
            self.stats.batches_drained.incr();
            self.stats.malformed_payloads.add(malformed as u64);

            if items.len() < batch_size {
                return Ok(());
            }
        }
    }

    fn flush<E, F>(
        &self,
        namespace: &str,
        drained: Drained,
        persist: F,
    ) -> std::result::Result<AggregateSummary, E>
    where
        F: FnOnce(&str, DiffMap) -> std::result::Result<(), E>,
    {
        self.invalidate(namespace, &drained.diffs);
        let summary = drained.summary();
        persist(namespace, drained.diffs).map_err(|err| {
            self.stats.persist_failures.incr();
            err
        })?;
        Ok(summary)
    }

    fn invalidate(&self, namespace: &str, diffs: &DiffMap) {
        if diffs.is_empty() {
            return;
        }
        let keys: Vec<String> = diffs.keys().map(|key| cache_key(namespace, key)).collect();
        if let Err(err) = self.cache.delete_multi(&keys) {
            self.stats.invalidation_failures.incr();
            debug!(keys = keys.len(), error = %err, "could not invalidate buffered counts");
        }
    }
}
