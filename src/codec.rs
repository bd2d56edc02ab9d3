//! Delta payload encoding.
//!
//! A delta travels through the queue as the base-10 ASCII rendering of its
//! value (`-2` becomes the bytes `b"-2"`), tagged with the counter key.
//! What happens to a payload that does not parse is decided by a
//! [`DecodePolicy`].

use tracing::warn;

use crate::error::{CounterError, Result};

/// How to treat a queue item whose payload is not a base-10 integer.
///
/// # Examples
///
/// ```rust
/// use accumulatori::codec::DecodePolicy;
///
/// assert_eq!(DecodePolicy::default(), DecodePolicy::CoerceToZero);
/// assert_eq!("fail".parse::<DecodePolicy>(), Ok(DecodePolicy::Fail));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DecodePolicy {
    /// Count the item as a delta of zero and report it as an anomaly.
    #[default]
    CoerceToZero,
    /// Abort the operation with [`CounterError::Decode`].
    Fail,
}

impl std::str::FromStr for DecodePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coerce" | "coerce_to_zero" | "zero" => Ok(DecodePolicy::CoerceToZero),
            "fail" | "strict" => Ok(DecodePolicy::Fail),
            other => Err(format!("unknown decode policy {other:?}")),
        }
    }
}

/// Result of decoding one item under a lenient policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// The payload parsed.
    Delta(i64),
    /// The payload was malformed and counted as zero.
    Coerced,
}

impl Decoded {
    /// The value to add to the running sum.
    #[inline]
    pub fn value(self) -> i64 {
        match self {
            Decoded::Delta(v) => v,
            Decoded::Coerced => 0,
        }
    }

    #[inline]
    pub fn is_coerced(self) -> bool {
        matches!(self, Decoded::Coerced)
    }
}

/// Encodes a delta as its base-10 ASCII representation.
///
/// ```rust
/// use accumulatori::codec::encode_delta;
///
/// assert_eq!(encode_delta(-42), b"-42".to_vec());
/// ```
pub fn encode_delta(delta: i64) -> Vec<u8> {
    delta.to_string().into_bytes()
}

/// Parses a payload produced by [`encode_delta`].
///
/// Returns `None` for anything that is not a base-10 `i64`.
pub fn parse_delta(payload: &[u8]) -> Option<i64> {
    std::str::from_utf8(payload).ok()?.parse().ok()
}

/// Decodes the payload of the item tagged `key` according to `policy`.
pub fn decode_delta(policy: DecodePolicy, key: &str, payload: &[u8]) -> Result<Decoded> {
    if let Some(value) = parse_delta(payload) {
        return Ok(Decoded::Delta(value));
    }

    let rendered = String::from_utf8_lossy(payload);
    match policy {
        DecodePolicy::CoerceToZero => {
            warn!(key, payload = %rendered, "malformed delta payload counted as zero");
            Ok(Decoded::Coerced)
        }
        DecodePolicy::Fail => Err(CounterError::Decode {
            key: key.to_string(),
            payload: rendered.into_owned(),
        }),
    }
}
