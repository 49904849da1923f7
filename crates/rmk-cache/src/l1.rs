//! In-process admission cache (L1).
//!
//! Sized by total byte cost rather than entry count, with frequency-aware
//! admission: a new entry only displaces the LRU victim when it has been
//! asked for at least as often. One-shot scans therefore cannot flush the
//! working set.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Frequency samples are halved once this many have accumulated, so stale
/// popularity ages out instead of pinning entries forever.
const FREQ_RESET_THRESHOLD: u64 = 100_000;

struct Entry {
    value: Vec<u8>,
    cost: usize,
}

struct Inner {
    entries: LruCache<String, Entry>,
    freq: HashMap<u64, u32>,
    samples: u64,
    cost: usize,
}

impl Inner {
    fn key_hash(key: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn bump(&mut self, key: &str) -> u32 {
        self.samples += 1;
        if self.samples >= FREQ_RESET_THRESHOLD {
            self.samples = 0;
            for count in self.freq.values_mut() {
                *count /= 2;
            }
            self.freq.retain(|_, count| *count > 0);
        }
        let slot = self.freq.entry(Self::key_hash(key)).or_insert(0);
        *slot = slot.saturating_add(1);
        *slot
    }

    fn frequency(&self, key: &str) -> u32 {
        self.freq.get(&Self::key_hash(key)).copied().unwrap_or(0)
    }
}

/// Byte-cost-bounded LRU with frequency-gated admission.
pub struct AdmissionCache {
    inner: Mutex<Inner>,
    max_cost: usize,
}

impl AdmissionCache {
    /// A cache holding at most `max_cost` bytes of keys + values.
    #[must_use]
    pub fn new(max_cost: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                freq: HashMap::new(),
                samples: 0,
                cost: 0,
            }),
            max_cost,
        }
    }

    /// Fetch a value, marking the key as recently and frequently used.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.bump(key);
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert a value, evicting colder entries as needed.
    ///
    /// Returns false when the entry was not admitted (it is larger than the
    /// whole cache, or colder than every victim it would displace).
    pub fn insert(&self, key: &str, value: Vec<u8>) -> bool {
        let cost = key.len() + value.len();
        if cost > self.max_cost {
            return false;
        }

        let mut inner = self.inner.lock();
        let incoming_freq = inner.bump(key);

        // Replacing an existing entry always succeeds.
        if let Some(existing) = inner.entries.pop(key) {
            inner.cost -= existing.cost;
        }

        while inner.cost + cost > self.max_cost {
            let Some((victim_key, _)) = inner.entries.peek_lru() else {
                break;
            };
            if inner.frequency(victim_key) > incoming_freq {
                // The victim is hotter; the newcomer is not admitted.
                return false;
            }
            if let Some((_, victim)) = inner.entries.pop_lru() {
                inner.cost -= victim.cost;
            }
        }

        inner.cost += cost;
        inner.entries.put(key.to_string(), Entry { value, cost });
        true
    }

    /// Drop a key, if present.
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.pop(key) {
            inner.cost -= entry.cost;
        }
    }

    /// Current total byte cost.
    #[must_use]
    pub fn cost(&self) -> usize {
        self.inner.lock().cost
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_get() {
        let cache = AdmissionCache::new(1024);
        assert!(cache.insert("k", b"value".to_vec()));
        assert_eq!(cache.get("k"), Some(b"value".to_vec()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let cache = AdmissionCache::new(8);
        assert!(!cache.insert("key", vec![0u8; 64]));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_frees_cost() {
        let cache = AdmissionCache::new(40);
        assert!(cache.insert("a", vec![0u8; 15])); // cost 16
        assert!(cache.insert("b", vec![0u8; 15])); // cost 16
        // Needs 16 more; "a" is LRU with equal frequency, so it goes.
        assert!(cache.insert("c", vec![0u8; 15]));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.cost() <= 40);
    }

    #[test]
    fn test_hot_victim_blocks_admission() {
        let cache = AdmissionCache::new(40);
        assert!(cache.insert("hot", vec![0u8; 30]));
        // Heat the resident entry well past any newcomer.
        for _ in 0..10 {
            let _ = cache.get("hot");
        }
        // The newcomer has frequency 1 and would need to displace "hot".
        assert!(!cache.insert("cold", vec![0u8; 30]));
        assert!(cache.get("hot").is_some());
    }

    #[test]
    fn test_repeatedly_requested_entry_gets_admitted() {
        let cache = AdmissionCache::new(40);
        assert!(cache.insert("resident", vec![0u8; 25]));
        let _ = cache.get("resident");

        // First attempt loses to the hotter resident; the miss traffic
        // itself builds the newcomer's frequency until it wins.
        for _ in 0..4 {
            let _ = cache.get("wanted");
        }
        assert!(cache.insert("wanted", vec![0u8; 25]));
        assert!(cache.get("wanted").is_some());
    }

    #[test]
    fn test_replace_existing_key() {
        let cache = AdmissionCache::new(64);
        assert!(cache.insert("k", b"one".to_vec()));
        assert!(cache.insert("k", b"two".to_vec()));
        assert_eq!(cache.get("k"), Some(b"two".to_vec()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cost(), 1 + 3);
    }

    #[test]
    fn test_remove() {
        let cache = AdmissionCache::new(64);
        assert!(cache.insert("k", b"v".to_vec()));
        cache.remove("k");
        assert!(cache.get("k").is_none());
        assert_eq!(cache.cost(), 0);
    }
}
