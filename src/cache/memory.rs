//! In-memory increment cache with optional expiry.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use super::IncrementCache;
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::CacheError;

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires_at: Option<Timestamp>,
}

#[derive(Debug)]
struct State {
    entries: HashMap<String, Entry>,
    available: bool,
}

/// An in-process [`IncrementCache`].
///
/// Entries optionally expire a fixed time after creation; increments do not
/// extend an entry's life. The cache can be switched off with
/// [`set_available`](MemoryCache::set_available) to simulate an outage.
///
/// # Examples
///
/// ```rust
/// use accumulatori::cache::{IncrementCache, MemoryCache};
/// use accumulatori::CacheError;
///
/// let cache = MemoryCache::new();
/// assert_eq!(cache.increment("k", 0, None), Err(CacheError::Miss));
/// assert_eq!(cache.increment("k", 5, Some(0)), Ok(5));
/// assert_eq!(cache.increment("k", -2, None), Ok(3));
/// ```
#[derive(Debug)]
pub struct MemoryCache<C: Clock = SystemClock> {
    clock: C,
    ttl: Option<Duration>,
    state: Mutex<State>,
}

impl MemoryCache<SystemClock> {
    /// Creates an empty cache whose entries never expire.
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }
}

impl Default for MemoryCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryCache<C> {
    /// Creates an empty cache driven by `clock`.
    pub fn with_clock(clock: C) -> Self {
        MemoryCache {
            clock,
            ttl: None,
            state: Mutex::new(State {
                entries: HashMap::new(),
                available: true,
            }),
        }
    }

    /// Sets the lifetime of newly created entries.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Turns the cache on or off. While off every call fails.
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Reads a value without touching it.
    pub fn get(&self, key: &str) -> Option<i64> {
        let now = self.clock.now();
        self.state
            .lock()
            .entries
            .get(key)
            .filter(|entry| !Self::expired(entry, now))
            .map(|entry| entry.value)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| !Self::expired(entry, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    #[inline]
    fn expired(entry: &Entry, now: Timestamp) -> bool {
        entry.expires_at.is_some_and(|at| at <= now)
    }
}

impl<C: Clock> IncrementCache for MemoryCache<C> {
    fn increment(&self, key: &str, delta: i64, initial: Option<i64>) -> Result<i64, CacheError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if !state.available {
            return Err(CacheError::Unavailable("cache switched off".into()));
        }

        if let Some(entry) = state.entries.get_mut(key) {
            if !Self::expired(entry, now) {
                entry.value = entry.value.checked_add(delta).ok_or(CacheError::Overflow)?;
                return Ok(entry.value);
            }
        }

        let Some(initial) = initial else {
            state.entries.remove(key);
            return Err(CacheError::Miss);
        };
        let value = initial.checked_add(delta).ok_or(CacheError::Overflow)?;
        state.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: self.ttl.map(|ttl| now + ttl),
            },
        );
        Ok(value)
    }

    fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(CacheError::Unavailable("cache switched off".into()));
        }
        for key in keys {
            state.entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_peek_does_not_create() {
        let cache = MemoryCache::new();
        assert_eq!(cache.increment("k", 0, None), Err(CacheError::Miss));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_increment_with_initial() {
        let cache = MemoryCache::new();
        assert_eq!(cache.increment("k", 3, Some(10)), Ok(13));
        // initial is ignored once the key exists
        assert_eq!(cache.increment("k", 1, Some(100)), Ok(14));
        assert_eq!(cache.get("k"), Some(14));
    }

    #[test]
    fn test_negative_values() {
        let cache = MemoryCache::new();
        assert_eq!(cache.increment("k", -7, Some(0)), Ok(-7));
        assert_eq!(cache.increment("k", 0, None), Ok(-7));
    }

    #[test]
    fn test_overflow() {
        let cache = MemoryCache::new();
        cache.increment("k", i64::MAX, Some(0)).unwrap();
        assert_eq!(cache.increment("k", 1, None), Err(CacheError::Overflow));
        assert_eq!(cache.get("k"), Some(i64::MAX));
        assert_eq!(
            cache.increment("fresh", i64::MIN, Some(-1)),
            Err(CacheError::Overflow)
        );
        assert_eq!(cache.get("fresh"), None);
    }

    #[test]
    fn test_delete_multi() {
        let cache = MemoryCache::new();
        cache.increment("a", 1, Some(0)).unwrap();
        cache.increment("b", 2, Some(0)).unwrap();
        cache.increment("c", 3, Some(0)).unwrap();
        cache
            .delete_multi(&["a".to_string(), "c".to_string(), "zzz".to_string()])
            .unwrap();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let clock = ManualClock::new();
        let cache = MemoryCache::with_clock(clock.clone()).with_ttl(Duration::from_secs(10));
        cache.increment("k", 5, Some(0)).unwrap();

        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.increment("k", 1, None), Ok(6));

        // increments do not extend the entry's life
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.increment("k", 0, None), Err(CacheError::Miss));
        assert_eq!(cache.increment("k", 2, Some(0)), Ok(2));
    }

    #[test]
    fn test_unavailable() {
        let cache = MemoryCache::new();
        cache.increment("k", 1, Some(0)).unwrap();
        cache.set_available(false);
        assert!(matches!(
            cache.increment("k", 1, None),
            Err(CacheError::Unavailable(_))
        ));
        assert!(cache.delete_multi(&["k".to_string()]).is_err());
        cache.set_available(true);
        assert_eq!(cache.increment("k", 1, None), Ok(2));
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(MemoryCache::new());
        let mut handles = vec![];
        for i in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let delta = if i % 2 == 0 { 2 } else { -1 };
                    cache.increment("k", delta, Some(0)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.get("k"), Some(4000));
    }
}
