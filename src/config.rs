//! Tuning knobs for a [`BufferedCounter`](crate::buffered::BufferedCounter).
//!
//! The defaults mirror the classic pull-queue counter: batches of 1000 items,
//! a 180 second lease for aggregation passes and a 30 second lease for the
//! read path's peek.
//!
//! # Examples
//!
//! ```rust
//! use accumulatori::config::BufferConfig;
//! use accumulatori::codec::DecodePolicy;
//! use std::time::Duration;
//!
//! let config = BufferConfig::new()
//!     .with_batch_size(500)
//!     .with_read_lease(Duration::from_secs(10))
//!     .with_decode_policy(DecodePolicy::Fail);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.batch_size(), 500);
//! ```

use std::time::Duration;

use crate::codec::DecodePolicy;
use crate::error::{CounterError, Result};

/// Default maximum number of items leased per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default lease held by an aggregation pass, in seconds.
pub const DEFAULT_AGGREGATE_LEASE_SECS: u64 = 180;

/// Default lease held by the read path's peek, in seconds.
pub const DEFAULT_READ_LEASE_SECS: u64 = 30;

/// Environment variable overriding [`BufferConfig::batch_size`].
pub const ENV_BATCH_SIZE: &str = "ACCUMULATORI_BATCH_SIZE";
/// Environment variable overriding [`BufferConfig::aggregate_lease`], in seconds.
pub const ENV_AGGREGATE_LEASE_SECS: &str = "ACCUMULATORI_AGGREGATE_LEASE_SECS";
/// Environment variable overriding [`BufferConfig::read_lease`], in seconds.
pub const ENV_READ_LEASE_SECS: &str = "ACCUMULATORI_READ_LEASE_SECS";
/// Environment variable overriding [`BufferConfig::decode_policy`].
pub const ENV_DECODE_POLICY: &str = "ACCUMULATORI_DECODE_POLICY";

/// Configuration shared by the record, aggregate and read paths.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BufferConfig {
    batch_size: usize,
    aggregate_lease_secs: u64,
    read_lease_secs: u64,
    decode_policy: DecodePolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            aggregate_lease_secs: DEFAULT_AGGREGATE_LEASE_SECS,
            read_lease_secs: DEFAULT_READ_LEASE_SECS,
            decode_policy: DecodePolicy::default(),
        }
    }
}

impl BufferConfig {
    /// Creates a configuration with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the configuration from `ACCUMULATORI_*` environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        BufferConfig {
            batch_size: lookup(ENV_BATCH_SIZE)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.batch_size),
            aggregate_lease_secs: lookup(ENV_AGGREGATE_LEASE_SECS)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.aggregate_lease_secs),
            read_lease_secs: lookup(ENV_READ_LEASE_SECS)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.read_lease_secs),
            decode_policy: lookup(ENV_DECODE_POLICY)
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.decode_policy),
        }
    }

    /// Sets the maximum number of items leased per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the lease held on items during an aggregation pass.
    ///
    /// Sub-second precision is truncated.
    pub fn with_aggregate_lease(mut self, lease: Duration) -> Self {
        self.aggregate_lease_secs = lease.as_secs();
        self
    }

    /// Sets the lease held on items while the read path sums them.
    ///
    /// Sub-second precision is truncated.
    pub fn with_read_lease(mut self, lease: Duration) -> Self {
        self.read_lease_secs = lease.as_secs();
        self
    }

    /// Sets how malformed payloads are handled.
    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn aggregate_lease(&self) -> Duration {
        Duration::from_secs(self.aggregate_lease_secs)
    }

    pub fn read_lease(&self) -> Duration {
        Duration::from_secs(self.read_lease_secs)
    }

    pub fn decode_policy(&self) -> DecodePolicy {
        self.decode_policy
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::InvalidConfig`] for a zero batch size or a
    /// zero lease.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CounterError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.aggregate_lease_secs == 0 {
            return Err(CounterError::InvalidConfig(
                "aggregate lease must be at least one second".into(),
            ));
        }
        if self.read_lease_secs == 0 {
            return Err(CounterError::InvalidConfig(
                "read lease must be at least one second".into(),
            ));
        }
        Ok(())
    }
}
