//! Operational statistics of a buffered counter.
//!
//! Every [`BufferedCounter`](crate::buffered::BufferedCounter) owns a
//! [`BufferStats`] and bumps it on each operation: how many deltas were
//! recorded, how often the cache had to be bypassed, how many items each
//! aggregation drained, and so on. The counts are kept in sharded [`Tally`]
//! counters so that recording statistics never serializes the producers.
//!
//! All tallies implement [`Observable`], the interface the exporters in
//! [`observers`](crate::observers) consume.
//!
//! # Examples
//!
//! ```rust
//! use accumulatori::buffered::BufferedCounter;
//! use accumulatori::cache::MemoryCache;
//! use accumulatori::queue::MemoryQueue;
//!
//! let counter = BufferedCounter::new(MemoryQueue::new(), MemoryCache::new());
//! counter.record_delta("likes", "post:1", 1).unwrap();
//! counter.record_delta("likes", "post:1", 1).unwrap();
//!
//! let snapshot = counter.stats().snapshot();
//! assert_eq!(snapshot.deltas_recorded, 2);
//! assert_eq!(snapshot.enqueue_failures, 0);
//! ```

mod tally;

pub use tally::Tally;

use std::fmt::Debug;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use atomic_time::AtomicOptionInstant;

/// How an exporter should present a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    /// Only ever goes up (between resets).
    #[default]
    Counter,
    /// Can go up and down.
    Gauge,
}

/// Something with a name and a current value.
pub trait Observable: Debug + Send + Sync {
    /// Metric name, e.g. `deltas_recorded`.
    fn name(&self) -> &str;

    /// Human-readable description. Empty if none was set.
    fn help(&self) -> &str {
        ""
    }

    fn metric_kind(&self) -> MetricKind {
        MetricKind::Counter
    }

    /// Current value.
    fn value(&self) -> u64;

    /// Current value, resetting the source to zero.
    fn value_and_reset(&self) -> u64;
}

impl std::fmt::Display for dyn Observable + '_ {
    /// Formats as `name:value`, or just `value` when unnamed.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.name().is_empty() {
            write!(f, "{}:{}", self.name(), self.value())
        } else {
            write!(f, "{}", self.value())
        }
    }
}

/// Statistics shared by the record, aggregate and read paths.
pub struct BufferStats {
    pub(crate) deltas_recorded: Tally,
    pub(crate) enqueue_failures: Tally,
    pub(crate) cache_nudge_failures: Tally,
    pub(crate) aggregations: Tally,
    pub(crate) aggregation_failures: Tally,
    pub(crate) items_aggregated: Tally,
    pub(crate) batches_drained: Tally,
    pub(crate) delete_failures: Tally,
    pub(crate) invalidation_failures: Tally,
    pub(crate) persist_failures: Tally,
    pub(crate) fast_reads: Tally,
    pub(crate) slow_reads: Tally,
    pub(crate) cache_prime_failures: Tally,
    pub(crate) malformed_payloads: Tally,
    last_aggregation: AtomicOptionInstant,
}

impl BufferStats {
    pub fn new() -> Self {
        BufferStats {
            deltas_recorded: Tally::new("deltas_recorded")
                .with_help("Deltas durably enqueued"),
            enqueue_failures: Tally::new("enqueue_failures")
                .with_help("Deltas lost because the queue rejected them"),
            cache_nudge_failures: Tally::new("cache_nudge_failures")
                .with_help("Recorded deltas whose cache increment failed"),
            aggregations: Tally::new("aggregations")
                .with_help("Aggregation passes that persisted successfully"),
            aggregation_failures: Tally::new("aggregation_failures")
                .with_help("Aggregation passes that returned an error"),
            items_aggregated: Tally::new("items_aggregated")
                .with_help("Queue items drained and deleted by aggregation"),
            batches_drained: Tally::new("batches_drained")
                .with_help("Leased batches deleted by aggregation"),
            delete_failures: Tally::new("delete_failures")
                .with_help("Drained batches the queue refused to delete"),
            invalidation_failures: Tally::new("invalidation_failures")
                .with_help("Cache invalidations that failed after aggregation"),
            persist_failures: Tally::new("persist_failures")
                .with_help("Persistence callbacks that returned an error"),
            fast_reads: Tally::new("fast_reads")
                .with_help("Buffered totals served from the cache"),
            slow_reads: Tally::new("slow_reads")
                .with_help("Buffered totals recomputed from the queue"),
            cache_prime_failures: Tally::new("cache_prime_failures")
                .with_help("Recomputed totals that could not be cached"),
            malformed_payloads: Tally::new("malformed_payloads")
                .with_help("Aggregated items whose payload was not an integer"),
            last_aggregation: AtomicOptionInstant::none(),
        }
    }

    /// All tallies, in a stable order.
    pub fn observables(&self) -> Vec<&dyn Observable> {
        vec![
            &self.deltas_recorded,
            &self.enqueue_failures,
            &self.cache_nudge_failures,
            &self.aggregations,
            &self.aggregation_failures,
            &self.items_aggregated,
            &self.batches_drained,
            &self.delete_failures,
            &self.invalidation_failures,
            &self.persist_failures,
            &self.fast_reads,
            &self.slow_reads,
            &self.cache_prime_failures,
            &self.malformed_payloads,
        ]
    }

    pub(crate) fn mark_aggregated(&self) {
        self.last_aggregation
            .store(Some(Instant::now()), Ordering::Relaxed);
    }

    /// Time since the last aggregation pass that persisted successfully.
    pub fn since_last_aggregation(&self) -> Option<Duration> {
        self.last_aggregation
            .load(Ordering::Relaxed)
            .map(|at| at.elapsed())
    }

    /// Copies every value into a plain struct.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            deltas_recorded: self.deltas_recorded.value(),
            enqueue_failures: self.enqueue_failures.value(),
            cache_nudge_failures: self.cache_nudge_failures.value(),
            aggregations: self.aggregations.value(),
            aggregation_failures: self.aggregation_failures.value(),
            items_aggregated: self.items_aggregated.value(),
            batches_drained: self.batches_drained.value(),
            delete_failures: self.delete_failures.value(),
            invalidation_failures: self.invalidation_failures.value(),
            persist_failures: self.persist_failures.value(),
            fast_reads: self.fast_reads.value(),
            slow_reads: self.slow_reads.value(),
            cache_prime_failures: self.cache_prime_failures.value(),
            malformed_payloads: self.malformed_payloads.value(),
        }
    }
}

impl Debug for BufferStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferStats")
            .field("snapshot", &self.snapshot())
            .field("since_last_aggregation", &self.since_last_aggregation())
            .finish()
    }
}

impl Default for BufferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`BufferStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsSnapshot {
    pub deltas_recorded: u64,
    pub enqueue_failures: u64,
    pub cache_nudge_failures: u64,
    pub aggregations: u64,
    pub aggregation_failures: u64,
    pub items_aggregated: u64,
    pub batches_drained: u64,
    pub delete_failures: u64,
    pub invalidation_failures: u64,
    pub persist_failures: u64,
    pub fast_reads: u64,
    pub slow_reads: u64,
    pub cache_prime_failures: u64,
    pub malformed_payloads: u64,
}
