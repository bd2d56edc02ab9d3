//! The buffered counter.
//!
//! A [`BufferedCounter`] ties a [`LeasedQueue`] and an [`IncrementCache`]
//! together into three operations:
//!
//! - [`record_delta`](BufferedCounter::record_delta) appends one delta to the
//!   queue and nudges the cached running total;
//! - [`aggregate`](BufferedCounter::aggregate) drains the queue, sums the
//!   deltas per key and hands the sums to a persistence callback;
//! - [`buffered_total`](BufferedCounter::buffered_total) returns the sum of
//!   deltas recorded but not yet aggregated for one key.
//!
//! ```text
//!   record_delta ──enqueue──►  ┌──────────────┐  ──lease/delete──► aggregate ──► persist(ns, sums)
//!        │                     │ LeasedQueue  │                        │
//!        │                     └──────────────┘                        │
//!        │                            ▲ lease_by_tag (slow path)       │
//!        │                            │                                │
//!        └──increment──►  ┌──────────────────┐  ◄──── delete_multi ────┘
//!                         │  IncrementCache  │
//!                         └──────────────────┘  ◄──── peek (fast path) ── buffered_total
//! ```
//!
//! The queue is the source of truth. The cache only speeds up reads, and every
//! operation stays correct with [`NoCache`].

mod aggregator;
mod reader;
mod recorder;

use std::collections::HashMap;

use crate::cache::{IncrementCache, NoCache};
use crate::config::BufferConfig;
use crate::error::Result;
use crate::queue::LeasedQueue;
use crate::stats::BufferStats;

/// Net delta per key produced by one aggregation.
pub type DiffMap = HashMap<String, i64>;

/// What an aggregation pass drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateSummary {
    /// Distinct keys in the persisted map.
    pub keys: usize,
    /// Queue items deleted.
    pub items: usize,
    /// Leased batches deleted.
    pub batches: usize,
    /// Items whose payload was malformed and counted as zero.
    pub malformed: usize,
}

/// A distributed counter that buffers deltas in a leased queue.
///
/// # Examples
///
/// ```rust
/// use accumulatori::buffered::BufferedCounter;
/// use accumulatori::cache::MemoryCache;
/// use accumulatori::queue::MemoryQueue;
/// use accumulatori::CounterError;
///
/// let counter = BufferedCounter::new(MemoryQueue::new(), MemoryCache::new());
/// counter.record_delta("likes", "post:1", 5).unwrap();
/// counter.record_delta("likes", "post:1", -2).unwrap();
/// assert_eq!(counter.buffered_total("likes", "post:1").unwrap(), 3);
///
/// let mut persisted = Vec::new();
/// counter
///     .aggregate("likes", |_, diffs| {
///         persisted.extend(diffs);
///         Ok::<_, CounterError>(())
///     })
///     .unwrap();
/// assert_eq!(persisted, vec![("post:1".to_string(), 3)]);
/// assert_eq!(counter.buffered_total("likes", "post:1").unwrap(), 0);
/// ```
#[derive(Debug)]
pub struct BufferedCounter<Q, C = NoCache> {
    queue: Q,
    cache: C,
    config: BufferConfig,
    stats: BufferStats,
}

impl<Q: LeasedQueue> BufferedCounter<Q, NoCache> {
    /// Creates a counter that always reads from the queue.
    pub fn without_cache(queue: Q) -> Self {
        Self::new(queue, NoCache)
    }
}

impl<Q: LeasedQueue, C: IncrementCache> BufferedCounter<Q, C> {
    /// Creates a counter with the default [`BufferConfig`].
    pub fn new(queue: Q, cache: C) -> Self {
        BufferedCounter {
            queue,
            cache,
            config: BufferConfig::default(),
            stats: BufferStats::new(),
        }
    }

    /// Creates a counter with a custom configuration.
    ///
    /// Fails with [`CounterError::InvalidConfig`](crate::CounterError::InvalidConfig)
    /// if `config` does not validate.
    pub fn with_config(queue: Q, cache: C, config: BufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(BufferedCounter {
            queue,
            cache,
            config,
            stats: BufferStats::new(),
        })
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Operational statistics of this counter.
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Binds a namespace, so calls only need the key.
    ///
    /// ```rust
    /// use accumulatori::buffered::BufferedCounter;
    /// use accumulatori::queue::MemoryQueue;
    ///
    /// let counter = BufferedCounter::without_cache(MemoryQueue::new());
    /// let views = counter.namespace("views");
    /// views.record("home", 1).unwrap();
    /// views.record("home", 1).unwrap();
    /// assert_eq!(views.total("home").unwrap(), 2);
    /// ```
    pub fn namespace<'a>(&'a self, name: &'a str) -> Namespace<'a, Q, C> {
        Namespace {
            counter: self,
            name,
        }
    }
}

/// A [`BufferedCounter`] bound to one namespace.
pub struct Namespace<'a, Q, C> {
    counter: &'a BufferedCounter<Q, C>,
    name: &'a str,
}

impl<Q, C> Clone for Namespace<'_, Q, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Q, C> Copy for Namespace<'_, Q, C> {}

impl<'a, Q: LeasedQueue, C: IncrementCache> Namespace<'a, Q, C> {
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// See [`BufferedCounter::record_delta`].
    pub fn record(&self, key: &str, delta: i64) -> Result<()> {
        self.counter.record_delta(self.name, key, delta)
    }

    /// See [`BufferedCounter::buffered_total`].
    pub fn total(&self, key: &str) -> Result<i64> {
        self.counter.buffered_total(self.name, key)
    }

    /// See [`BufferedCounter::aggregate`].
    pub fn aggregate<E, F>(&self, persist: F) -> std::result::Result<AggregateSummary, E>
    where
        F: FnOnce(&str, DiffMap) -> std::result::Result<(), E>,
        E: From<crate::error::CounterError>,
    {
        self.counter.aggregate(self.name, persist)
    }
}
