//! Cache hit/miss accounting.

use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    l1_hits: u64,
    l1_misses: u64,
    l2_hits: u64,
    l2_misses: u64,
}

/// Counters behind a dedicated mutex, sampled via [`CacheMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct CacheMetrics {
    counters: Mutex<Counters>,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
}

impl CacheStats {
    /// Overall hit rate across both tiers, in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        // A lookup that misses L1 but hits L2 is still one hit overall.
        let lookups = self.l1_hits + self.l1_misses;
        if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        }
    }
}

impl CacheMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l1_hit(&self) {
        self.counters.lock().l1_hits += 1;
    }

    pub fn record_l1_miss(&self) {
        self.counters.lock().l1_misses += 1;
    }

    pub fn record_l2_hit(&self) {
        self.counters.lock().l2_hits += 1;
    }

    pub fn record_l2_miss(&self) {
        self.counters.lock().l2_misses += 1;
    }

    #[must_use]
    pub fn snapshot(&self) -> CacheStats {
        let c = *self.counters.lock();
        CacheStats {
            l1_hits: c.l1_hits,
            l1_misses: c.l1_misses,
            l2_hits: c.l2_hits,
            l2_misses: c.l2_misses,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let metrics = CacheMetrics::new();
        metrics.record_l1_hit();
        metrics.record_l1_miss();
        metrics.record_l2_hit();
        metrics.record_l1_miss();
        metrics.record_l2_miss();

        let stats = metrics.snapshot();
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.l1_misses, 2);
        // 2 effective hits out of 3 lookups.
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_hit_rate_no_lookups() {
        let metrics = CacheMetrics::new();
        assert!((metrics.snapshot().hit_rate() - 0.0).abs() < f64::EPSILON);
    }
}
