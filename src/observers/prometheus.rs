//! Prometheus observer built on the official `prometheus` crate.
//!
//! [`PrometheusObserver`] turns a set of [`Observable`] metrics into
//! Prometheus metrics and encodes them with
//! [`TextEncoder`](prometheus::TextEncoder). Each metric is exported as a
//! counter or a gauge according to its [`MetricKind`], with its own help
//! text, unless the observer overrides either.
//!
//! # Feature Flag
//!
//! This module requires the `prometheus` feature:
//!
//! ```toml
//! [dependencies]
//! accumulatori = { version = "0.1", features = ["prometheus"] }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use accumulatori::buffered::BufferedCounter;
//! use accumulatori::observers::prometheus::PrometheusObserver;
//! use accumulatori::queue::MemoryQueue;
//!
//! let counter = BufferedCounter::without_cache(MemoryQueue::new());
//! counter.record_delta("ns", "k", 1).unwrap();
//!
//! let output = PrometheusObserver::new()
//!     .with_namespace("myapp")
//!     .render(counter.stats().observables().into_iter())
//!     .unwrap();
//! assert!(output.contains("# TYPE myapp_deltas_recorded counter"));
//! assert!(output.contains("myapp_deltas_recorded 1"));
//! ```

use std::collections::HashMap;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use super::{ObserverError, PrometheusError, Result};
use crate::stats::{MetricKind, Observable};

/// Per-metric overrides.
#[derive(Debug, Clone, Default)]
pub struct MetricConfig {
    /// Export as this kind instead of the metric's own.
    pub kind: Option<MetricKind>,
    /// Help text instead of the metric's own.
    pub help: Option<String>,
}

/// Observer that renders metrics in the Prometheus exposition format.
#[derive(Debug, Clone, Default)]
pub struct PrometheusObserver {
    namespace: Option<String>,
    subsystem: Option<String>,
    const_labels: HashMap<String, String>,
    metric_configs: HashMap<String, MetricConfig>,
}

impl PrometheusObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the prefix of every metric name.
    ///
    /// Namespace "myapp" + metric "slow_reads" = "myapp_slow_reads".
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Sets the part between namespace and metric name.
    pub fn with_subsystem(mut self, subsystem: &str) -> Self {
        self.subsystem = Some(subsystem.to_string());
        self
    }

    /// Adds a label to every metric.
    pub fn with_const_label(mut self, name: &str, value: &str) -> Self {
        self.const_labels
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_metric_config(mut self, name: &str, config: MetricConfig) -> Self {
        self.metric_configs.insert(name.to_string(), config);
        self
    }

    pub fn with_kind(mut self, name: &str, kind: MetricKind) -> Self {
        self.metric_configs
            .entry(name.to_string())
            .or_default()
            .kind = Some(kind);
        self
    }

    pub fn with_help(mut self, name: &str, help: &str) -> Self {
        self.metric_configs
            .entry(name.to_string())
            .or_default()
            .help = Some(help.to_string());
        self
    }

    /// Makes a name match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    fn sanitize_name(name: &str) -> String {
        let mut result = String::with_capacity(name.len());
        for c in name.chars() {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                result.push(c);
            } else if c == '-' || c == '.' || c == ' ' {
                result.push('_');
            }
        }
        if result.is_empty() {
            result.push_str("unnamed");
        }
        if result.starts_with(|c: char| c.is_ascii_digit()) {
            result.insert(0, '_');
        }
        result
    }

    fn full_name(&self, name: &str) -> String {
        let sanitized = Self::sanitize_name(name);
        match (&self.namespace, &self.subsystem) {
            (Some(ns), Some(ss)) => format!("{ns}_{ss}_{sanitized}"),
            (Some(ns), None) => format!("{ns}_{sanitized}"),
            (None, Some(ss)) => format!("{ss}_{sanitized}"),
            (None, None) => sanitized,
        }
    }

    /// Renders metrics to the exposition format.
    ///
    /// Every call builds a fresh registry, so rendering the same metrics twice
    /// never conflicts.
    pub fn render<'a>(&self, metrics: impl Iterator<Item = &'a dyn Observable>) -> Result<String> {
        self.render_with(metrics, |m| m.value())
    }

    /// Renders metrics and resets them.
    pub fn render_and_reset<'a>(
        &self,
        metrics: impl Iterator<Item = &'a dyn Observable>,
    ) -> Result<String> {
        self.render_with(metrics, |m| m.value_and_reset())
    }

    fn render_with<'a>(
        &self,
        metrics: impl Iterator<Item = &'a dyn Observable>,
        read: impl Fn(&dyn Observable) -> u64,
    ) -> Result<String> {
        let registry = Registry::new();

        for metric in metrics {
            let raw_name = if metric.name().is_empty() {
                "unnamed"
            } else {
                metric.name()
            };
            let config = self.metric_configs.get(raw_name);
            let kind = config
                .and_then(|c| c.kind)
                .unwrap_or_else(|| metric.metric_kind());
            let help = config
                .and_then(|c| c.help.clone())
                .or_else(|| Some(metric.help().to_string()).filter(|h| !h.is_empty()))
                .unwrap_or_else(|| format!("{raw_name} metric"));

            let opts = Opts::new(self.full_name(raw_name), help);
            let value = read(metric);
            match kind {
                MetricKind::Counter => self.register_counter(&registry, opts, value)?,
                MetricKind::Gauge => self.register_gauge(&registry, opts, value)?,
            }
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(|e| PrometheusError::EncodeError(e.to_string()))?;
        Ok(String::from_utf8(buffer)?)
    }

    fn register_counter(&self, registry: &Registry, opts: Opts, value: u64) -> Result<()> {
        if self.const_labels.is_empty() {
            let counter = IntCounter::with_opts(opts)?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        } else {
            let (names, values) = self.label_pairs();
            let counter = IntCounterVec::new(opts, &names)?;
            counter.with_label_values(&values).inc_by(value);
            registry.register(Box::new(counter))?;
        }
        Ok(())
    }

    fn register_gauge(&self, registry: &Registry, opts: Opts, value: u64) -> Result<()> {
        let value = i64::try_from(value)
            .map_err(|_| ObserverError::Metric(format!("{} overflows a gauge", opts.name)))?;
        if self.const_labels.is_empty() {
            let gauge = IntGauge::with_opts(opts)?;
            gauge.set(value);
            registry.register(Box::new(gauge))?;
        } else {
            let (names, values) = self.label_pairs();
            let gauge = IntGaugeVec::new(opts, &names)?;
            gauge.with_label_values(&values).set(value);
            registry.register(Box::new(gauge))?;
        }
        Ok(())
    }

    fn label_pairs(&self) -> (Vec<&str>, Vec<&str>) {
        self.const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .unzip()
    }
}
