//! Sharded event tally.
//!
//! The record path of a [`BufferedCounter`](crate::buffered::BufferedCounter)
//! runs with unbounded parallelism, so the statistics it bumps on every call
//! must not become the contention point the queue was introduced to remove.
//! A [`Tally`] spreads increments across 64 cache-line-padded slots, one per
//! thread (modulo 64), and only sums them when read.
//!
//! ```text
//!   Thread 0 ──add──►  [Slot 0]  (CachePadded)
//!   Thread 1 ──add──►  [Slot 1]  (CachePadded)
//!        ...                ...
//!   Thread 63 ─add──►  [Slot 63] (CachePadded)
//!                           │
//!                           ▼
//!                   value() sums all slots
//! ```

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use super::Observable;

/// Number of slots per tally.
pub(crate) const NUM_SLOTS: usize = 64;

static NEXT_SLOT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Slot of the current thread, assigned round-robin on first use.
    static THREAD_SLOT_INDEX: usize = NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed) % NUM_SLOTS;
}

/// A named, sharded, monotonically increasing event count.
///
/// # Examples
///
/// ```rust
/// use accumulatori::stats::{Observable, Tally};
/// use std::sync::Arc;
/// use std::thread;
///
/// let tally = Arc::new(Tally::new("deltas_recorded"));
/// let handles: Vec<_> = (0..4)
///     .map(|_| {
///         let t = Arc::clone(&tally);
///         thread::spawn(move || {
///             for _ in 0..1000 {
///                 t.incr();
///             }
///         })
///     })
///     .collect();
/// for h in handles {
///     h.join().unwrap();
/// }
///
/// assert_eq!(tally.value(), 4000);
/// assert_eq!(tally.name(), "deltas_recorded");
/// ```
pub struct Tally {
    name: &'static str,
    help: &'static str,
    slots: [CachePadded<AtomicU64>; NUM_SLOTS],
}

impl Tally {
    /// Creates a zeroed tally.
    pub const fn new(name: &'static str) -> Self {
        const ZERO: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
        Tally {
            name,
            help: "",
            slots: [ZERO; NUM_SLOTS],
        }
    }

    /// Attaches a help text, shown by exporters.
    pub const fn with_help(self, help: &'static str) -> Self {
        Self { help, ..self }
    }

    #[inline]
    fn local_slot(&self) -> &AtomicU64 {
        THREAD_SLOT_INDEX.with(|idx| &*self.slots[*idx])
    }

    /// Adds one.
    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    /// Adds `n`.
    #[inline]
    pub fn add(&self, n: u64) {
        self.local_slot().fetch_add(n, Ordering::Relaxed);
    }

    /// Sums every slot.
    #[inline]
    pub fn total(&self) -> u64 {
        self.slots
            .iter()
            .fold(0u64, |acc, slot| acc.wrapping_add(slot.load(Ordering::Relaxed)))
    }

    /// Sums every slot and zeroes them.
    ///
    /// Slots are swapped one at a time, so an increment racing with the reset
    /// lands either in the returned total or in the next one, never in both.
    pub fn take(&self) -> u64 {
        self.slots
            .iter()
            .fold(0u64, |acc, slot| acc.wrapping_add(slot.swap(0, Ordering::Relaxed)))
    }
}

impl Observable for Tally {
    #[inline]
    fn name(&self) -> &str {
        self.name
    }

    fn help(&self) -> &str {
        self.help
    }

    #[inline]
    fn value(&self) -> u64 {
        self.total()
    }

    fn value_and_reset(&self) -> u64 {
        self.take()
    }
}

impl Default for Tally {
    fn default() -> Self {
        Self::new("")
    }
}

impl Debug for Tally {
    /// Shows the non-zero slots.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, slot) in self.slots.iter().enumerate() {
            let val = slot.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::MetricKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new() {
        let tally = Tally::new("t");
        assert_eq!(tally.value(), 0);
        assert_eq!(tally.name(), "t");
        assert_eq!(tally.help(), "");
        assert_eq!(tally.metric_kind(), MetricKind::Counter);
    }

    #[test]
    fn test_add() {
        let tally = Tally::new("t");
        tally.incr();
        tally.add(9);
        assert_eq!(tally.value(), 10);
    }

    #[test]
    fn test_take_resets() {
        let tally = Tally::new("t");
        tally.add(7);
        assert_eq!(tally.value_and_reset(), 7);
        assert_eq!(tally.value(), 0);
    }

    #[test]
    fn test_builders() {
        let tally = Tally::new("depth").with_help("items waiting");
        assert_eq!(tally.help(), "items waiting");
        assert_eq!(tally.metric_kind(), MetricKind::Counter);
    }

    #[test]
    fn test_static_tally() {
        static EVENTS: Tally = Tally::new("events");
        EVENTS.add(3);
        assert!(EVENTS.value() >= 3);
    }

    #[test]
    fn test_debug() {
        let tally = Tally::new("dbg");
        tally.add(5);
        let s = format!("{:?}", tally);
        assert!(s.starts_with("dbg{"));
        assert!(s.contains(":5"));
        assert!(s.ends_with("}"));
    }

    #[test]
    fn test_multiple_threads() {
        let tally = Arc::new(Tally::new("t"));
        let mut handles = vec![];

        for _ in 0..8 {
            let tally = Arc::clone(&tally);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    tally.incr();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tally.value(), 80_000);
    }

    #[test]
    fn test_take_concurrent_with_adds_loses_nothing() {
        let tally = Arc::new(Tally::new("t"));
        let writer = {
            let tally = Arc::clone(&tally);
            thread::spawn(move || {
                for _ in 0..50_000 {
                    tally.incr();
                }
            })
        };

        let mut taken = 0;
        while !writer.is_finished() {
            taken += tally.take();
        }
        writer.join().unwrap();
        taken += tally.take();

        assert_eq!(taken, 50_000);
    }
}
