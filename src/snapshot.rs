//! Serializable snapshots of statistics and aggregates.
//!
//! # Feature Flag
//!
//! This module requires the `serde` feature:
//!
//! ```toml
//! [dependencies]
//! accumulatori = { version = "0.1", features = ["serde"] }
//! ```
//!
//! # Examples
//!
//! A persistence callback that ships each aggregate as a JSON document:
//!
//! ```rust,ignore
//! use accumulatori::snapshot::AggregateSnapshot;
//!
//! counter.aggregate("likes", |namespace, diffs| {
//!     let snapshot = AggregateSnapshot::new(namespace, diffs).stamped();
//!     outbox.push(serde_json::to_vec(&snapshot)?);
//!     Ok::<_, AppError>(())
//! })?;
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::buffered::DiffMap;
use crate::stats::Observable;

/// The value of one metric at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub name: String,
    pub value: u64,
}

impl MetricSnapshot {
    pub fn new(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Reads an observable without resetting it.
    pub fn from_observable(metric: &dyn Observable) -> Self {
        Self::new(display_name(metric), metric.value())
    }

    /// Reads an observable and resets it.
    pub fn from_observable_and_reset(metric: &dyn Observable) -> Self {
        Self::new(display_name(metric), metric.value_and_reset())
    }
}

fn display_name(metric: &dyn Observable) -> String {
    if metric.name().is_empty() {
        "(unnamed)".to_string()
    } else {
        metric.name().to_string()
    }
}

/// A point-in-time capture of a set of metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    pub metrics: Vec<MetricSnapshot>,
}

impl MetricsSnapshot {
    pub fn new(metrics: Vec<MetricSnapshot>) -> Self {
        Self {
            timestamp_ms: None,
            metrics,
        }
    }

    pub fn with_timestamp(metrics: Vec<MetricSnapshot>, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            metrics,
        }
    }

    /// Finds a metric by name.
    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn collect<'a>(metrics: impl Iterator<Item = &'a dyn Observable>) -> Self {
        Self::new(metrics.map(MetricSnapshot::from_observable).collect())
    }

    pub fn collect_and_reset<'a>(metrics: impl Iterator<Item = &'a dyn Observable>) -> Self {
        Self::new(
            metrics
                .map(MetricSnapshot::from_observable_and_reset)
                .collect(),
        )
    }
}

/// The sums produced by one aggregation of a namespace.
///
/// Keys are kept sorted so the serialized form is stable.
///
/// ```rust
/// use accumulatori::snapshot::AggregateSnapshot;
/// use std::collections::HashMap;
///
/// let diffs = HashMap::from([("b".to_string(), -1), ("a".to_string(), 4)]);
/// let snapshot = AggregateSnapshot::new("likes", diffs);
/// assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["a", "b"]);
/// assert_eq!(snapshot.net(), 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateSnapshot {
    pub namespace: String,
    /// Milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    pub diffs: BTreeMap<String, i64>,
}

impl AggregateSnapshot {
    pub fn new(namespace: impl Into<String>, diffs: DiffMap) -> Self {
        Self {
            namespace: namespace.into(),
            timestamp_ms: None,
            diffs: diffs.into_iter().collect(),
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Stamps the snapshot with the current wall-clock time.
    pub fn stamped(self) -> Self {
        self.with_timestamp(current_timestamp_ms())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.diffs.keys().map(String::as_str)
    }

    /// Sum of every key's diff.
    pub fn net(&self) -> i64 {
        self.diffs.values().fold(0i64, |acc, v| acc.wrapping_add(*v))
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    /// Converts back into the map handed to persistence callbacks.
    pub fn into_diffs(self) -> DiffMap {
        self.diffs.into_iter().collect()
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
