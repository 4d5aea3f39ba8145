use std::sync::atomic::{AtomicU64, Ordering};

/// Cache statistics for monitoring how fetches are served.
///
/// Counters are updated with `Relaxed` atomics; they are monitoring data,
/// not synchronization.
///
/// # Counters
///
/// * `hits` - served from a completed slot the strategy accepted
/// * `misses` - a raw fetch was started
/// * `coalesced` - joined a fetch already in flight for the key
/// * `stale` - completions discarded because their fetch was superseded
///
/// # Examples
///
/// ```
/// use cachelito_query_core::CacheStats;
///
/// let stats = CacheStats::new();
///
/// stats.record_miss();
/// stats.record_coalesced();
/// stats.record_hit();
/// stats.record_hit();
///
/// assert_eq!(stats.hits(), 2);
/// assert_eq!(stats.misses(), 1);
/// assert_eq!(stats.total_accesses(), 4);
/// assert!((stats.hit_rate() - 0.75).abs() < 0.001);
/// ```
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    stale: AtomicU64,
}

impl CacheStats {
    /// Creates a new `CacheStats` instance with zero counters.
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of accesses served from a completed slot.
    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of raw fetches started.
    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns the number of accesses that joined an in-flight fetch.
    #[inline]
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Returns the number of discarded stale completions.
    #[inline]
    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    /// Returns the total number of accesses (hits + misses + coalesced).
    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.hits() + self.misses() + self.coalesced()
    }

    /// Fraction of accesses that did not start a raw fetch (0.0 to 1.0).
    ///
    /// Returns 0.0 if there have been no accesses.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            (self.hits() + self.coalesced()) as f64 / total as f64
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.coalesced.store(0, Ordering::Relaxed);
        self.stale.store(0, Ordering::Relaxed);
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            coalesced: AtomicU64::new(self.coalesced()),
            stale: AtomicU64::new(self.stale()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats() {
        let stats = CacheStats::new();
        assert_eq!(stats.total_accesses(), 0);
        assert_eq!(stats.stale(), 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_counts_coalesced_as_served() {
        let stats = CacheStats::new();
        stats.record_miss();
        stats.record_coalesced();
        stats.record_coalesced();
        stats.record_hit();
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_stale_not_an_access() {
        let stats = CacheStats::new();
        stats.record_stale();
        assert_eq!(stats.stale(), 1);
        assert_eq!(stats.total_accesses(), 0);
    }

    #[test]
    fn test_reset_and_clone() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_miss();
        let snapshot = stats.clone();
        stats.reset();
        assert_eq!(stats.total_accesses(), 0);
        assert_eq!(snapshot.hits(), 1);
        assert_eq!(snapshot.misses(), 1);
    }
}
