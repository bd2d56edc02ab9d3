//! In-memory leased queue with deterministic fault injection.
//!
//! Leases expire according to an injected [`Clock`], so a test can lease a
//! batch, advance a [`ManualClock`](crate::clock::ManualClock) past the lease
//! and watch the items come back. Failures can be scheduled one at a time with
//! [`MemoryQueue::fail_next`] or drawn from a seeded RNG with
//! [`MemoryQueue::with_faults`]; the same seed replays the same failures.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{ItemId, LeaseToken, LeasedQueue, QueueItem};
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::QueueError;

/// A queue operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOp {
    Enqueue,
    Lease,
    LeaseByTag,
    Delete,
    Release,
}

/// Failure probabilities for randomized fault injection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultConfig {
    /// Probability of an enqueue failing.
    pub enqueue_fail_prob: f64,
    /// Probability of a lease (tagged or not) failing.
    pub lease_fail_prob: f64,
    /// Probability of a delete failing.
    pub delete_fail_prob: f64,
}

impl FaultConfig {
    /// No faults.
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Frequent failures on every operation, for stress tests.
    pub fn high_chaos() -> Self {
        FaultConfig {
            enqueue_fail_prob: 0.05,
            lease_fail_prob: 0.05,
            delete_fail_prob: 0.10,
        }
    }

    fn probability(&self, op: QueueOp) -> f64 {
        match op {
            QueueOp::Enqueue => self.enqueue_fail_prob,
            QueueOp::Lease | QueueOp::LeaseByTag => self.lease_fail_prob,
            QueueOp::Delete => self.delete_fail_prob,
            QueueOp::Release => 0.0,
        }
    }
}

/// Counters describing what the queue has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub leased: u64,
    /// Leases granted on items whose previous lease had expired.
    pub redelivered: u64,
    pub deleted: u64,
    pub released: u64,
    pub injected_failures: u64,
}

#[derive(Debug)]
struct StoredItem {
    tag: String,
    payload: Vec<u8>,
    visible_at: Timestamp,
    lease: Option<LeaseToken>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    next_token: u64,
    namespaces: HashMap<String, BTreeMap<ItemId, StoredItem>>,
    stats: QueueStats,
}

#[derive(Debug)]
struct Faults {
    config: FaultConfig,
    rng: ChaCha8Rng,
    scheduled: HashMap<QueueOp, u32>,
}

/// An in-process [`LeasedQueue`].
///
/// # Examples
///
/// ```rust
/// use accumulatori::clock::ManualClock;
/// use accumulatori::queue::{LeasedQueue, MemoryQueue};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let queue = MemoryQueue::with_clock(clock.clone());
/// queue.enqueue("ns", "k", b"1".to_vec()).unwrap();
///
/// let leased = queue.lease("ns", 10, Duration::from_secs(30)).unwrap();
/// assert_eq!(leased.len(), 1);
///
/// // hidden while leased
/// assert!(queue.lease("ns", 10, Duration::from_secs(30)).unwrap().is_empty());
///
/// // visible again once the lease runs out
/// clock.advance(Duration::from_secs(31));
/// assert_eq!(queue.lease("ns", 10, Duration::from_secs(30)).unwrap().len(), 1);
/// ```
#[derive(Debug)]
pub struct MemoryQueue<C: Clock = SystemClock> {
    clock: C,
    state: Mutex<State>,
    faults: Mutex<Faults>,
}

impl MemoryQueue<SystemClock> {
    /// Creates an empty queue driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }
}

impl Default for MemoryQueue<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryQueue<C> {
    /// Creates an empty queue driven by `clock`.
    pub fn with_clock(clock: C) -> Self {
        MemoryQueue {
            clock,
            state: Mutex::new(State::default()),
            faults: Mutex::new(Faults {
                config: FaultConfig::no_faults(),
                rng: ChaCha8Rng::seed_from_u64(0),
                scheduled: HashMap::new(),
            }),
        }
    }

    /// Enables randomized fault injection, reproducible from `seed`.
    pub fn with_faults(self, config: FaultConfig, seed: u64) -> Self {
        {
            let mut faults = self.faults.lock();
            faults.config = config;
            faults.rng = ChaCha8Rng::seed_from_u64(seed);
        }
        self
    }

    /// Makes the next call of `op` fail.
    pub fn fail_next(&self, op: QueueOp) {
        self.fail_next_n(op, 1);
    }

    /// Makes the next `n` calls of `op` fail.
    pub fn fail_next_n(&self, op: QueueOp, n: u32) {
        *self.faults.lock().scheduled.entry(op).or_insert(0) += n;
    }

    /// Turns randomized fault injection off and clears scheduled failures.
    pub fn heal(&self) {
        let mut faults = self.faults.lock();
        faults.config = FaultConfig::no_faults();
        faults.scheduled.clear();
    }

    /// Number of items in `namespace`, leased or not.
    pub fn len(&self, namespace: &str) -> usize {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .map_or(0, BTreeMap::len)
    }

    /// Returns `true` if `namespace` holds no items.
    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }

    /// Number of items in `namespace` that a lease would return right now.
    pub fn visible_len(&self, namespace: &str) -> usize {
        let now = self.clock.now();
        self.state.lock().namespaces.get(namespace).map_or(0, |items| {
            items.values().filter(|item| item.visible_at <= now).count()
        })
    }

    /// Number of namespaces holding at least one item.
    pub fn namespace_count(&self) -> usize {
        self.state.lock().namespaces.len()
    }

    /// Returns a copy of the queue's activity counters.
    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats.clone()
    }

    fn check_fault(&self, op: QueueOp) -> Result<(), QueueError> {
        let injected = {
            let mut faults = self.faults.lock();
            match faults.scheduled.get_mut(&op) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => {
                    let p = faults.config.probability(op);
                    p > 0.0 && faults.rng.gen_bool(p.min(1.0))
                }
            }
        };

        if injected {
            self.state.lock().stats.injected_failures += 1;
            return Err(QueueError::Unavailable(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn lease_matching(
        &self,
        namespace: &str,
        max_items: usize,
        lease: Duration,
        tag: Option<&str>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        if max_items == 0 {
            return Err(QueueError::InvalidRequest("max_items must be positive".into()));
        }
        if lease.is_zero() {
            return Err(QueueError::InvalidRequest("lease must be positive".into()));
        }

        let now = self.clock.now();
        let expires = now + lease;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(items) = state.namespaces.get_mut(namespace) else {
            return Ok(Vec::new());
        };

        let mut leased = Vec::with_capacity(max_items.min(items.len()));
        for (id, item) in items.iter_mut() {
            if leased.len() == max_items {
                break;
            }
            if item.visible_at > now || tag.is_some_and(|t| t != item.tag) {
                continue;
            }

            if item.lease.is_some() {
                state.stats.redelivered += 1;
            }
            state.next_token += 1;
            let token = LeaseToken(state.next_token);
            item.lease = Some(token);
            item.visible_at = expires;

            leased.push(QueueItem {
                id: *id,
                tag: item.tag.clone(),
                payload: item.payload.clone(),
                lease: token,
            });
        }

        state.stats.leased += leased.len() as u64;
        Ok(leased)
    }
}

impl<C: Clock> LeasedQueue for MemoryQueue<C> {
    fn enqueue(&self, namespace: &str, tag: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.check_fault(QueueOp::Enqueue)?;

        let now = self.clock.now();
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = ItemId(state.next_id);
        state
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(
                id,
                StoredItem {
                    tag: tag.to_string(),
                    payload,
                    visible_at: now,
                    lease: None,
                },
            );
        state.stats.enqueued += 1;
        Ok(())
    }

    fn lease(
        &self,
        namespace: &str,
        max_items: usize,
        lease: Duration,
    ) -> Result<Vec<QueueItem>, QueueError> {
        self.check_fault(QueueOp::Lease)?;
        self.lease_matching(namespace, max_items, lease, None)
    }

    fn lease_by_tag(
        &self,
        namespace: &str,
        max_items: usize,
        lease: Duration,
        tag: &str,
    ) -> Result<Vec<QueueItem>, QueueError> {
        self.check_fault(QueueOp::LeaseByTag)?;
        self.lease_matching(namespace, max_items, lease, Some(tag))
    }

    fn delete(&self, namespace: &str, items: &[QueueItem]) -> Result<(), QueueError> {
        self.check_fault(QueueOp::Delete)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(stored) = state.namespaces.get_mut(namespace) else {
            return match items.first() {
                Some(item) => Err(QueueError::UnknownItem(item.id)),
                None => Ok(()),
            };
        };

        // validate the whole batch first so a rejected delete removes nothing
        for item in items {
            match stored.get(&item.id) {
                None => return Err(QueueError::UnknownItem(item.id)),
                Some(current) if current.lease != Some(item.lease) => {
                    return Err(QueueError::LeaseLost(item.id));
                }
                Some(_) => {}
            }
        }

        for item in items {
            stored.remove(&item.id);
        }
        if stored.is_empty() {
            state.namespaces.remove(namespace);
        }
        state.stats.deleted += items.len() as u64;
        Ok(())
    }

    fn release(&self, namespace: &str, items: &[QueueItem]) -> Result<(), QueueError> {
        self.check_fault(QueueOp::Release)?;

        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(stored) = state.namespaces.get_mut(namespace) else {
            return Ok(());
        };

        for item in items {
            if let Some(current) = stored.get_mut(&item.id) {
                if current.lease == Some(item.lease) {
                    current.lease = None;
                    current.visible_at = now;
                    state.stats.released += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const LEASE: Duration = Duration::from_secs(60);

    fn queue() -> (ManualClock, MemoryQueue<ManualClock>) {
        let clock = ManualClock::new();
        (clock.clone(), MemoryQueue::with_clock(clock))
    }

    #[test]
    fn test_enqueue_and_len() {
        let (_, q) = queue();
        assert!(q.is_empty("ns"));
        q.enqueue("ns", "a", b"1".to_vec()).unwrap();
        q.enqueue("ns", "b", b"2".to_vec()).unwrap();
        q.enqueue("other", "a", b"3".to_vec()).unwrap();
        assert_eq!(q.len("ns"), 2);
        assert_eq!(q.len("other"), 1);
        assert_eq!(q.stats().enqueued, 3);
    }

    #[test]
    fn test_lease_respects_max_items_and_order() {
        let (_, q) = queue();
        for i in 0..5 {
            q.enqueue("ns", "k", i.to_string().into_bytes()).unwrap();
        }
        let first = q.lease("ns", 3, LEASE).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].payload, b"0");
        let rest = q.lease("ns", 3, LEASE).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].payload, b"3");
        assert_eq!(q.visible_len("ns"), 0);
    }

    #[test]
    fn test_lease_unknown_namespace_is_empty() {
        let (_, q) = queue();
        assert!(q.lease("missing", 10, LEASE).unwrap().is_empty());
    }

    #[test]
    fn test_lease_rejects_bad_requests() {
        let (_, q) = queue();
        assert!(matches!(
            q.lease("ns", 0, LEASE),
            Err(QueueError::InvalidRequest(_))
        ));
        assert!(matches!(
            q.lease_by_tag("ns", 1, Duration::ZERO, "k"),
            Err(QueueError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_lease_by_tag_filters() {
        let (_, q) = queue();
        q.enqueue("ns", "a", b"1".to_vec()).unwrap();
        q.enqueue("ns", "b", b"2".to_vec()).unwrap();
        q.enqueue("ns", "a", b"3".to_vec()).unwrap();

        let leased = q.lease_by_tag("ns", 10, LEASE, "a").unwrap();
        assert_eq!(leased.len(), 2);
        assert!(leased.iter().all(|item| item.tag == "a"));

        // "b" is untouched by the tagged lease
        let rest = q.lease("ns", 10, LEASE).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].tag, "b");
    }

    #[test]
    fn test_lease_expiry_redelivers() {
        let (clock, q) = queue();
        q.enqueue("ns", "k", b"1".to_vec()).unwrap();
        let first = q.lease("ns", 1, LEASE).unwrap();

        clock.advance(LEASE - Duration::from_millis(1));
        assert!(q.lease("ns", 1, LEASE).unwrap().is_empty());

        clock.advance(Duration::from_millis(1));
        let second = q.lease("ns", 1, LEASE).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_ne!(second[0].lease, first[0].lease);
        assert_eq!(q.stats().redelivered, 1);
    }

    #[test]
    fn test_delete_removes_items() {
        let (_, q) = queue();
        q.enqueue("ns", "k", b"1".to_vec()).unwrap();
        q.enqueue("ns", "k", b"2".to_vec()).unwrap();
        let leased = q.lease("ns", 10, LEASE).unwrap();
        q.delete("ns", &leased).unwrap();
        assert!(q.is_empty("ns"));
        assert_eq!(q.stats().deleted, 2);
    }

    #[test]
    fn test_delete_with_stale_lease_is_rejected_atomically() {
        let (clock, q) = queue();
        q.enqueue("ns", "k", b"1".to_vec()).unwrap();
        q.enqueue("ns", "k", b"2".to_vec()).unwrap();
        let stale = q.lease("ns", 10, LEASE).unwrap();

        clock.advance(LEASE);
        let fresh = q.lease("ns", 1, LEASE).unwrap();
        assert_eq!(fresh.len(), 1);

        let err = q.delete("ns", &stale).unwrap_err();
        assert_eq!(err, QueueError::LeaseLost(fresh[0].id));
        // nothing was removed, not even the item whose lease was still ours
        assert_eq!(q.len("ns"), 2);
    }

    #[test]
    fn test_delete_after_expiry_without_release_succeeds() {
        let (clock, q) = queue();
        q.enqueue("ns", "k", b"1".to_vec()).unwrap();
        let leased = q.lease("ns", 1, LEASE).unwrap();
        clock.advance(LEASE * 2);
        q.delete("ns", &leased).unwrap();
        assert!(q.is_empty("ns"));
    }

    #[test]
    fn test_delete_twice_is_unknown_item() {
        let (_, q) = queue();
        q.enqueue("ns", "k", b"1".to_vec()).unwrap();
        let leased = q.lease("ns", 1, LEASE).unwrap();
        q.delete("ns", &leased).unwrap();
        assert_eq!(
            q.delete("ns", &leased),
            Err(QueueError::UnknownItem(leased[0].id))
        );
    }

    #[test]
    fn test_drained_namespace_is_dropped() {
        let (_, q) = queue();
        q.enqueue("ns", "k", b"1".to_vec()).unwrap();
        q.enqueue("ns", "k", b"2".to_vec()).unwrap();
        q.enqueue("other", "k", b"3".to_vec()).unwrap();
        assert_eq!(q.namespace_count(), 2);

        let first = q.lease("ns", 1, LEASE).unwrap();
        q.delete("ns", &first).unwrap();
        assert_eq!(q.namespace_count(), 2);

        let rest = q.lease("ns", 10, LEASE).unwrap();
        q.delete("ns", &rest).unwrap();
        assert_eq!(q.namespace_count(), 1);
        assert!(q.is_empty("ns"));

        // a stale handle on a dropped namespace is still rejected
        assert_eq!(
            q.delete("ns", &rest),
            Err(QueueError::UnknownItem(rest[0].id))
        );
        q.enqueue("ns", "k", b"4".to_vec()).unwrap();
        assert_eq!(q.len("ns"), 1);
    }

    #[test]
    fn test_delete_empty_batch() {
        let (_, q) = queue();
        assert!(q.delete("nowhere", &[]).is_ok());
    }

    #[test]
    fn test_release_makes_items_visible() {
        let (_, q) = queue();
        q.enqueue("ns", "k", b"1".to_vec()).unwrap();
        q.enqueue("ns", "k", b"2".to_vec()).unwrap();
        let leased = q.lease_by_tag("ns", 10, LEASE, "k").unwrap();
        assert_eq!(q.visible_len("ns"), 0);

        q.release("ns", &leased).unwrap();
        assert_eq!(q.visible_len("ns"), 2);
        assert_eq!(q.stats().released, 2);
        // a released item is a fresh delivery, not a redelivery
        assert_eq!(q.lease("ns", 10, LEASE).unwrap().len(), 2);
        assert_eq!(q.stats().redelivered, 0);
    }

    #[test]
    fn test_release_skips_items_leased_by_someone_else() {
        let (clock, q) = queue();
        q.enqueue("ns", "k", b"1".to_vec()).unwrap();
        let stale = q.lease("ns", 1, LEASE).unwrap();
        clock.advance(LEASE);
        let fresh = q.lease("ns", 1, LEASE).unwrap();

        q.release("ns", &stale).unwrap();
        assert_eq!(q.visible_len("ns"), 0);
        q.delete("ns", &fresh).unwrap();
    }

    #[test]
    fn test_release_with_stale_handle_after_delete_is_noop() {
        let (_, q) = queue();
        q.enqueue("ns", "k", b"1".to_vec()).unwrap();
        let leased = q.lease("ns", 1, LEASE).unwrap();
        q.delete("ns", &leased).unwrap();
        assert!(q.release("ns", &leased).is_ok());
        assert!(q.release("missing", &leased).is_ok());
    }

    #[test]
    fn test_fail_next() {
        let (_, q) = queue();
        q.fail_next_n(QueueOp::Enqueue, 2);
        assert!(q.enqueue("ns", "k", b"1".to_vec()).is_err());
        assert!(q.enqueue("ns", "k", b"1".to_vec()).is_err());
        assert!(q.enqueue("ns", "k", b"1".to_vec()).is_ok());
        assert_eq!(q.len("ns"), 1);
        assert_eq!(q.stats().injected_failures, 2);
    }

    #[test]
    fn test_fail_next_targets_one_op() {
        let (_, q) = queue();
        q.enqueue("ns", "k", b"1".to_vec()).unwrap();
        q.fail_next(QueueOp::Delete);
        let leased = q.lease("ns", 1, LEASE).unwrap();
        assert!(q.delete("ns", &leased).is_err());
        assert!(q.delete("ns", &leased).is_ok());
    }

    #[test]
    fn test_seeded_faults_are_reproducible() {
        let run = |seed| {
            let q = MemoryQueue::with_clock(ManualClock::new())
                .with_faults(FaultConfig::high_chaos(), seed);
            (0..200)
                .map(|_| q.enqueue("ns", "k", b"1".to_vec()).is_ok())
                .collect::<Vec<_>>()
        };
        let a = run(42);
        assert_eq!(a, run(42));
        assert!(a.iter().any(|ok| !ok));
        assert!(a.iter().filter(|ok| **ok).count() > 150);
    }

    #[test]
    fn test_heal() {
        let (_, q) = queue();
        let q = q.with_faults(
            FaultConfig {
                enqueue_fail_prob: 1.0,
                ..FaultConfig::default()
            },
            7,
        );
        assert!(q.enqueue("ns", "k", b"1".to_vec()).is_err());
        q.heal();
        assert!(q.enqueue("ns", "k", b"1".to_vec()).is_ok());
    }

    #[test]
    fn test_concurrent_enqueue() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(MemoryQueue::new());
        let mut handles = vec![];
        for t in 0..4 {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    q.enqueue("ns", &format!("k{t}"), b"1".to_vec()).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(q.len("ns"), 1000);
    }
}
