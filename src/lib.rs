//! # Accumulatori - Buffered, Eventually-Aggregated Distributed Counters
//!
//! A Rust library for counters that many writers update at high volume, where
//! the persisted total only needs to be *eventually* exact. Writes are buffered
//! as independent events in a durable leased queue and periodically folded
//! into the persisted value in one batch.
//!
//! ## The Problem
//!
//! The naive way to count in a shared store is to read-modify-write one row
//! per counter. Under many concurrent writers every update contends for the
//! same row: transactions retry, locks queue up, and the counter becomes the
//! bottleneck of the whole write path.
//!
//! ## The Solution: Buffer, Then Aggregate
//!
//! Instead of touching the persisted row, each writer **enqueues** its delta
//! as its own queue item, tagged with the counter key. Enqueues never contend
//! with each other. An aggregation pass later **leases** the items in batches,
//! sums them per key, deletes them, and hands the sums to a persistence
//! callback, turning thousands of contended updates into one.
//!
//! ```text
//!   writers ──record_delta──► [ leased queue ] ──aggregate──► persist(ns, {key: sum})
//!      │                            ▲
//!      │                            │ lease_by_tag (recompute)
//!      └──nudge──► [ increment cache ] ◄──peek── buffered_total
//! ```
//!
//! An optional **increment cache** keeps a running total of the un-aggregated
//! deltas per key so that [`buffered_total`](buffered::BufferedCounter::buffered_total)
//! is usually a single cache read. The cache is only an accelerator: it may
//! lose entries or fail, and every operation stays correct without it.
//!
//! ### Design Principles
//!
//! 1. **The queue is the source of truth**: the sum of the un-deleted deltas
//!    of a key is its buffered total at any instant.
//!
//! 2. **Leases, not locks**: consumers coordinate only through time-bounded
//!    leases on queue items. A consumer that dies mid-batch loses nothing;
//!    its lease expires and the items are delivered again.
//!
//! 3. **Deleted means persisted**: a batch's sums join the aggregate only once
//!    the batch is deleted, and an aggregation that aborts midway still
//!    persists what it already deleted.
//!
//! 4. **No retries inside**: every operation makes one attempt and reports a
//!    single error. Retrying is the caller's decision.
//!
//! ## Quick Start
//!
//! ```rust
//! use accumulatori::buffered::BufferedCounter;
//! use accumulatori::cache::MemoryCache;
//! use accumulatori::queue::MemoryQueue;
//! use accumulatori::CounterError;
//! use std::collections::HashMap;
//!
//! let counter = BufferedCounter::new(MemoryQueue::new(), MemoryCache::new());
//!
//! // From any number of threads
//! counter.record_delta("likes", "post:1", 1).unwrap();
//! counter.record_delta("likes", "post:1", 1).unwrap();
//! counter.record_delta("likes", "post:2", 1).unwrap();
//!
//! assert_eq!(counter.buffered_total("likes", "post:1").unwrap(), 2);
//!
//! // Periodically, from one place per namespace
//! let mut store: HashMap<String, i64> = HashMap::new();
//! counter
//!     .aggregate("likes", |_namespace, diffs| {
//!         for (key, diff) in diffs {
//!             *store.entry(key).or_insert(0) += diff;
//!         }
//!         Ok::<_, CounterError>(())
//!     })
//!     .unwrap();
//!
//! assert_eq!(store["post:1"], 2);
//! assert_eq!(counter.buffered_total("likes", "post:1").unwrap(), 0);
//! ```
//!
//! ## Collaborators
//!
//! The queue, the cache and the persistence target are supplied by the caller:
//!
//! | Capability | Trait | Provided implementations |
//! |------------|-------|--------------------------|
//! | Durable leased queue | [`LeasedQueue`](queue::LeasedQueue) | [`MemoryQueue`](queue::MemoryQueue) |
//! | Increment cache | [`IncrementCache`](cache::IncrementCache) | [`MemoryCache`](cache::MemoryCache), [`NoCache`](cache::NoCache) |
//! | Persistence | `FnOnce(&str, DiffMap) -> Result<(), E>` | - |
//!
//! The in-memory implementations take a [`Clock`](clock::Clock), so tests can
//! move time past a lease, and [`MemoryQueue`](queue::MemoryQueue) can inject
//! failures from a seeded RNG.
//!
//! ## Thread Safety
//!
//! [`BufferedCounter`](buffered::BufferedCounter) is `Send + Sync` whenever its
//! collaborators are, and is shared across threads by reference or `Arc`.
//! Recording is safe with unbounded parallelism. Aggregations of one namespace
//! should be serialized by the caller when the persistence target needs it.
//!
//! ## Configuration
//!
//! [`BufferConfig`](config::BufferConfig) holds the batch size, the two lease
//! durations and the [`DecodePolicy`](codec::DecodePolicy), and can be read
//! from `ACCUMULATORI_*` environment variables with
//! [`BufferConfig::from_env`](config::BufferConfig::from_env).
//!
//! ## Observers
//!
//! Every counter keeps [`BufferStats`](stats::BufferStats), sharded tallies
//! that are cheap to bump on the hot path. They can be exported with the
//! optional observer modules:
//!
//! | Feature | Module | Description |
//! |---------|--------|-------------|
//! | `json` | [`observers::json`] | Serialize stats and aggregates to JSON |
//! | `prometheus` | [`observers::prometheus`] | Export stats in Prometheus exposition format |
//! | `full` | All observers | Enables all observer modules |
//!
//! ### Example: Prometheus Output
//!
//! ```toml
//! [dependencies]
//! accumulatori = { version = "0.1", features = ["prometheus"] }
//! ```
//!
//! ```rust,ignore
//! use accumulatori::observers::prometheus::PrometheusObserver;
//!
//! let output = PrometheusObserver::new()
//!     .with_namespace("myapp")
//!     .with_const_label("instance", "server-1")
//!     .render(counter.stats().observables().into_iter())?;
//! ```

pub mod buffered;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod keys;
pub mod observers;
pub mod queue;
pub mod stats;

#[cfg(feature = "serde")]
pub mod snapshot;

pub use buffered::{AggregateSummary, BufferedCounter, DiffMap, Namespace};
pub use config::BufferConfig;
pub use error::{CacheError, CounterError, QueueError, Result};
