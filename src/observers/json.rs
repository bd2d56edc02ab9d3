//! JSON observer for statistics and aggregates.
//!
//! [`JsonObserver`] serializes a set of [`Observable`] metrics, typically
//! [`BufferStats::observables`](crate::stats::BufferStats::observables), and
//! [`AggregateSnapshot`]s with serde.
//!
//! # Feature Flag
//!
//! This module requires the `json` feature:
//!
//! ```toml
//! [dependencies]
//! accumulatori = { version = "0.1", features = ["json"] }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use accumulatori::buffered::BufferedCounter;
//! use accumulatori::observers::json::JsonObserver;
//! use accumulatori::queue::MemoryQueue;
//!
//! let counter = BufferedCounter::without_cache(MemoryQueue::new());
//! counter.record_delta("ns", "k", 1).unwrap();
//!
//! let json = JsonObserver::new()
//!     .to_json(counter.stats().observables().into_iter())
//!     .unwrap();
//! assert!(json.contains(r#"{"name":"deltas_recorded","value":1}"#));
//! ```

use serde::Serialize;

use super::Result;
use crate::snapshot::{current_timestamp_ms, AggregateSnapshot, MetricSnapshot, MetricsSnapshot};
use crate::stats::Observable;

/// Configuration for the JSON observer.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    /// Pretty-print the output.
    pub pretty: bool,
    /// Add a timestamp. Only used together with `wrap_in_snapshot`, and for
    /// aggregates that carry none yet.
    pub include_timestamp: bool,
    /// Emit a [`MetricsSnapshot`] object instead of a bare array.
    pub wrap_in_snapshot: bool,
}

/// An observer that serializes metrics to JSON.
#[derive(Debug, Clone, Default)]
pub struct JsonObserver {
    config: JsonConfig,
}

impl JsonObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: JsonConfig) -> Self {
        Self { config }
    }

    pub fn pretty(mut self, enabled: bool) -> Self {
        self.config.pretty = enabled;
        self
    }

    pub fn include_timestamp(mut self, enabled: bool) -> Self {
        self.config.include_timestamp = enabled;
        self
    }

    pub fn wrap_in_snapshot(mut self, enabled: bool) -> Self {
        self.config.wrap_in_snapshot = enabled;
        self
    }

    /// Serializes metrics to a JSON string.
    pub fn to_json<'a>(&self, metrics: impl Iterator<Item = &'a dyn Observable>) -> Result<String> {
        self.render(metrics.map(MetricSnapshot::from_observable).collect())
    }

    /// Serializes metrics to JSON and resets them.
    pub fn to_json_and_reset<'a>(
        &self,
        metrics: impl Iterator<Item = &'a dyn Observable>,
    ) -> Result<String> {
        self.render(
            metrics
                .map(MetricSnapshot::from_observable_and_reset)
                .collect(),
        )
    }

    /// Serializes one aggregate.
    pub fn aggregate_to_json(&self, aggregate: &AggregateSnapshot) -> Result<String> {
        if self.config.include_timestamp && aggregate.timestamp_ms.is_none() {
            return self.encode(&aggregate.clone().with_timestamp(current_timestamp_ms()));
        }
        self.encode(aggregate)
    }

    fn render(&self, snapshots: Vec<MetricSnapshot>) -> Result<String> {
        if !self.config.wrap_in_snapshot {
            return self.encode(&snapshots);
        }
        let snapshot = if self.config.include_timestamp {
            MetricsSnapshot::with_timestamp(snapshots, current_timestamp_ms())
        } else {
            MetricsSnapshot::new(snapshots)
        };
        self.encode(&snapshot)
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let json = if self.config.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(json)
    }
}
