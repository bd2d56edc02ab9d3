//! Exporters for buffered-counter statistics.
//!
//! - [`json`] - Serialize metrics and aggregates to JSON
//! - [`prometheus`] - Export metrics in Prometheus exposition format
//!
//! Both consume any iterator of [`Observable`](crate::stats::Observable),
//! usually [`BufferStats::observables`](crate::stats::BufferStats::observables).
//!
//! # Unified Error Handling
//!
//! All observers return the same [`ObserverError`], so switching exporters
//! does not change error handling code.
//!
//! # Feature Flags
//!
//! - `json` - Enables the [`json`] module
//! - `prometheus` - Enables the [`prometheus`] module
//! - `full` - Enables all observer modules

mod error;

pub use error::{ObserverError, Result};

#[cfg(feature = "prometheus")]
pub use error::PrometheusError;

#[cfg(feature = "json")]
pub mod json;

#[cfg(feature = "prometheus")]
pub mod prometheus;
