//! Rolling dedup window over observation fingerprints.
//!
//! Fingerprints map to their last-seen time in a concurrent table. The
//! window duration and entry capacity are published by the adaptive sizers
//! through atomics, so producers read them lock-light. Shrinking either
//! bound never invalidates in-flight entries; they age out naturally.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::defaults;

/// Concurrent fingerprint window.
pub struct DedupCache {
    entries: DashMap<String, Instant>,
    /// Window duration in seconds; updated by the window sizer.
    window_secs: AtomicU64,
    /// Target entry capacity; updated by the cache sizer.
    capacity: AtomicUsize,
}

impl DedupCache {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            window_secs: AtomicU64::new(window.as_secs()),
            capacity: AtomicUsize::new(capacity),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            Duration::from_secs(defaults::DEDUP_WINDOW_LONG_SECS),
            defaults::CACHE_HIGH_SIZE,
        )
    }

    /// Check a fingerprint against the window, recording it as seen.
    ///
    /// Returns `true` when the fingerprint was already seen inside the
    /// current window (the event is a duplicate).
    pub fn check_and_record(&self, fingerprint: &str) -> bool {
        let window = self.window();
        let now = Instant::now();

        let duplicate = match self.entries.get(fingerprint) {
            Some(seen) => now.duration_since(*seen) <= window,
            None => false,
        };
        self.entries.insert(fingerprint.to_string(), now);

        // Opportunistic trim when well past capacity, so a traffic burst
        // cannot grow the table unboundedly between sweeps.
        let capacity = self.capacity.load(Ordering::Relaxed);
        if self.entries.len() > capacity.saturating_mul(2) {
            self.sweep();
        }

        duplicate
    }

    /// Drop entries older than the window, then enforce the capacity bound.
    /// Called periodically by the cache sizer loop.
    pub fn sweep(&self) {
        let window = self.window();
        let now = Instant::now();
        self.entries
            .retain(|_, seen| now.duration_since(*seen) <= window);

        let capacity = self.capacity.load(Ordering::Relaxed);
        let len = self.entries.len();
        if len > capacity {
            // Over budget even after expiry: drop the oldest surplus.
            let mut ages: Vec<(String, Instant)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect();
            ages.sort_by_key(|(_, seen)| *seen);
            for (key, _) in ages.into_iter().take(len - capacity) {
                self.entries.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.load(Ordering::Relaxed))
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Publish a new window duration (window sizer).
    pub fn set_window(&self, window: Duration) {
        self.window_secs.store(window.as_secs(), Ordering::Relaxed);
    }

    /// Publish a new capacity target (cache sizer).
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity.max(1), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_a_duplicate() {
        let cache = DedupCache::new(Duration::from_secs(60), 100);
        assert!(!cache.check_and_record("fp-1"));
        assert!(cache.check_and_record("fp-1"));
    }

    #[test]
    fn distinct_fingerprints_do_not_collide() {
        let cache = DedupCache::new(Duration::from_secs(60), 100);
        assert!(!cache.check_and_record("fp-1"));
        assert!(!cache.check_and_record("fp-2"));
    }

    #[test]
    fn entries_expire_after_the_window() {
        let cache = DedupCache::new(Duration::from_millis(0), 100);
        assert!(!cache.check_and_record("fp-1"));
        std::thread::sleep(Duration::from_millis(5));
        // Window of 0s: the earlier sighting is already stale.
        assert!(!cache.check_and_record("fp-1"));
    }

    #[test]
    fn sweep_enforces_capacity() {
        let cache = DedupCache::new(Duration::from_secs(600), 10);
        for i in 0..50 {
            cache.check_and_record(&format!("fp-{}", i));
        }
        cache.sweep();
        assert!(cache.len() <= 10);
    }

    #[test]
    fn shrinking_window_keeps_existing_entries() {
        let cache = DedupCache::new(Duration::from_secs(600), 100);
        cache.check_and_record("fp-1");
        cache.set_window(Duration::from_secs(60));
        // Entry still within the shorter window: still a duplicate.
        assert!(cache.check_and_record("fp-1"));
    }

    #[test]
    fn published_sizes_are_readable() {
        let cache = DedupCache::with_defaults();
        cache.set_capacity(123);
        cache.set_window(Duration::from_secs(77));
        assert_eq!(cache.capacity(), 123);
        assert_eq!(cache.window(), Duration::from_secs(77));
    }
}
