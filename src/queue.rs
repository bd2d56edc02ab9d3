//! The durable leased-queue capability.
//!
//! Deltas are buffered as independent queue items, so producers never contend
//! on a shared row. Consumers take items with a *lease*: a leased item is
//! hidden from other consumers until the lease expires or the item is deleted.
//! An item that is leased but never deleted becomes visible again, which gives
//! at-least-once delivery.
//!
//! ```text
//!   enqueue ──► [visible] ──lease──► [leased until t+L] ──delete──► gone
//!                   ▲                        │
//!                   └────── lease expires ───┘
//! ```
//!
//! [`MemoryQueue`] is an in-process implementation with controllable time and
//! fault injection, meant for tests and demos. Each lease scans the namespace
//! from its oldest item.

mod memory;

pub use memory::{FaultConfig, MemoryQueue, QueueOp, QueueStats};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueueError;

/// Identifier of an item within its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Proof of a specific lease on an item.
///
/// Each time an item is leased it receives a fresh token. Deleting with a
/// stale token (because the lease expired and someone else leased the item)
/// fails with [`QueueError::LeaseLost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseToken(pub u64);

/// An item handed out by a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Queue-assigned identifier.
    pub id: ItemId,
    /// Tag the item was enqueued with (the counter key).
    pub tag: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Token of the lease under which this copy was handed out.
    pub lease: LeaseToken,
}

/// A durable multi-consumer queue with time-bounded leases.
///
/// Implementations must be safe to call from many threads at once. All
/// operations address one queue by `namespace`.
pub trait LeasedQueue: Send + Sync {
    /// Appends an item tagged with `tag`.
    fn enqueue(&self, namespace: &str, tag: &str, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Leases up to `max_items` visible items of any tag for `lease`.
    fn lease(
        &self,
        namespace: &str,
        max_items: usize,
        lease: Duration,
    ) -> Result<Vec<QueueItem>, QueueError>;

    /// Leases up to `max_items` visible items tagged exactly `tag` for `lease`.
    fn lease_by_tag(
        &self,
        namespace: &str,
        max_items: usize,
        lease: Duration,
        tag: &str,
    ) -> Result<Vec<QueueItem>, QueueError>;

    /// Deletes leased items.
    ///
    /// Either every item is deleted or none is.
    fn delete(&self, namespace: &str, items: &[QueueItem]) -> Result<(), QueueError>;

    /// Gives up the leases on `items`, making them visible again right away.
    ///
    /// Items whose lease has since passed to another consumer are left alone.
    /// Backends without early release may keep the default, which lets the
    /// leases run out on their own.
    fn release(&self, namespace: &str, items: &[QueueItem]) -> Result<(), QueueError> {
        let _ = (namespace, items);
        Ok(())
    }
}

impl<Q: LeasedQueue + ?Sized> LeasedQueue for Arc<Q> {
    fn enqueue(&self, namespace: &str, tag: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        (**self).enqueue(namespace, tag, payload)
    }

    fn lease(
        &self,
        namespace: &str,
        max_items: usize,
        lease: Duration,
    ) -> Result<Vec<QueueItem>, QueueError> {
        (**self).lease(namespace, max_items, lease)
    }

    fn lease_by_tag(
        &self,
        namespace: &str,
        max_items: usize,
        lease: Duration,
        tag: &str,
    ) -> Result<Vec<QueueItem>, QueueError> {
        (**self).lease_by_tag(namespace, max_items, lease, tag)
    }

    fn delete(&self, namespace: &str, items: &[QueueItem]) -> Result<(), QueueError> {
        (**self).delete(namespace, items)
    }

    fn release(&self, namespace: &str, items: &[QueueItem]) -> Result<(), QueueError> {
        (**self).release(namespace, items)
    }
}

impl<Q: LeasedQueue + ?Sized> LeasedQueue for &Q {
    fn enqueue(&self, namespace: &str, tag: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        (**self).enqueue(namespace, tag, payload)
    }

    fn lease(
        &self,
        namespace: &str,
        max_items: usize,
        lease: Duration,
    ) -> Result<Vec<QueueItem>, QueueError> {
        (**self).lease(namespace, max_items, lease)
    }

    fn lease_by_tag(
        &self,
        namespace: &str,
        max_items: usize,
        lease: Duration,
        tag: &str,
    ) -> Result<Vec<QueueItem>, QueueError> {
        (**self).lease_by_tag(namespace, max_items, lease, tag)
    }

    fn delete(&self, namespace: &str, items: &[QueueItem]) -> Result<(), QueueError> {
        (**self).delete(namespace, items)
    }

    fn release(&self, namespace: &str, items: &[QueueItem]) -> Result<(), QueueError> {
        (**self).release(namespace, items)
    }
}
