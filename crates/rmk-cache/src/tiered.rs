//! Two-tier cache facade.
//!
//! L1 is the in-process admission cache; L2 is the shared KV. Reads probe
//! L1 then L2, promoting L2 hits. Writes land in L1 synchronously and are
//! handed to a small bounded worker pool for the L2 write-through, so a
//! slow or absent KV never stalls the caller. A `set` followed by a `get`
//! on the same instance always returns the written bytes; cross-instance
//! consistency is eventual via L2.

use crate::l1::AdmissionCache;
use crate::metrics::{CacheMetrics, CacheStats};
use parking_lot::Mutex;
use rmk_core::{Result, SharedKv};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default L1 capacity: 32 MiB of keys + values.
const DEFAULT_L1_COST: usize = 32 * 1024 * 1024;
/// Write-through queue depth.
const WRITE_QUEUE_DEPTH: usize = 1024;
/// Write-through worker count.
const WRITE_WORKERS: usize = 4;

struct WriteJob {
    key: String,
    value: Vec<u8>,
}

/// Two-tier byte cache with async write-through and TTL expiry.
pub struct TieredCache {
    l1: Arc<AdmissionCache>,
    l2: Arc<dyn SharedKv>,
    ttl: Duration,
    metrics: Arc<CacheMetrics>,
    write_tx: Mutex<Option<mpsc::Sender<WriteJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TieredCache {
    /// Build a cache over the given L2 with the default L1 size.
    #[must_use]
    pub fn new(l2: Arc<dyn SharedKv>, ttl: Duration) -> Self {
        Self::with_l1_cost(l2, ttl, DEFAULT_L1_COST)
    }

    /// Build a cache with an explicit L1 byte budget.
    #[must_use]
    pub fn with_l1_cost(l2: Arc<dyn SharedKv>, ttl: Duration, l1_cost: usize) -> Self {
        let l1 = Arc::new(AdmissionCache::new(l1_cost));
        let (tx, rx) = mpsc::channel::<WriteJob>(WRITE_QUEUE_DEPTH);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(WRITE_WORKERS);
        for _ in 0..WRITE_WORKERS {
            let rx = Arc::clone(&rx);
            let l2_worker = Arc::clone(&l2);
            workers.push(tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    if let Err(err) = l2_worker.set(&job.key, &job.value, Some(ttl)).await {
                        tracing::warn!(key = %job.key, error = %err, "l2 write-through failed");
                    }
                }
            }));
        }

        Self {
            l1,
            l2,
            ttl,
            metrics: Arc::new(CacheMetrics::new()),
            write_tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Probe L1, then L2. An L2 hit is promoted into L1 and scheduled for
    /// expiry at the TTL.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(value) = self.l1.get(key) {
            self.metrics.record_l1_hit();
            return Some(value);
        }
        self.metrics.record_l1_miss();

        match self.l2.get(key).await {
            Ok(Some(value)) => {
                self.metrics.record_l2_hit();
                self.promote(key, value.clone());
                Some(value)
            }
            Ok(None) => {
                self.metrics.record_l2_miss();
                None
            }
            Err(err) => {
                // Cache failures always fall through to the source of truth.
                tracing::warn!(key = %key, error = %err, "l2 read failed");
                self.metrics.record_l2_miss();
                None
            }
        }
    }

    /// Write L1 synchronously, L2 asynchronously.
    pub fn set(&self, key: &str, value: Vec<u8>) {
        self.l1.insert(key, value.clone());
        self.schedule_expiry(key.to_string());

        let tx = self.write_tx.lock().clone();
        let Some(tx) = tx else {
            return; // shut down: L1 only
        };
        let job = WriteJob {
            key: key.to_string(),
            value,
        };
        if let Err(err) = tx.try_send(job) {
            tracing::warn!(key = %key, error = %err, "l2 write queue full, skipping write-through");
        }
    }

    /// The canonical memoisation pattern: fetch, or compute-and-store.
    ///
    /// `compute` runs only on a full miss; its failure is the caller's
    /// failure, never the cache's.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    /// Bulk-load keys through `loader`, isolating per-key failures.
    pub async fn warm_up<F, Fut>(&self, keys: &[String], loader: F)
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        for key in keys {
            match loader(key.clone()).await {
                Ok(value) => self.set(key, value),
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "warm-up load failed, skipping key");
                }
            }
        }
    }

    /// Drop a key from L1 and L2.
    pub async fn invalidate(&self, key: &str) {
        self.l1.remove(key);
        if let Err(err) = self.l2.delete(key).await {
            tracing::warn!(key = %key, error = %err, "l2 invalidate failed");
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Stop accepting L2 writes and drain the in-flight queue.
    pub async fn shutdown(&self) {
        // Dropping the sender lets the workers drain the queue and exit.
        drop(self.write_tx.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
    }

    fn promote(&self, key: &str, value: Vec<u8>) {
        self.l1.insert(key, value);
        self.schedule_expiry(key.to_string());
    }

    fn schedule_expiry(&self, key: String) {
        let l1 = Arc::clone(&self.l1);
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            l1.remove(&key);
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::kv_mem::InMemoryKv;

    fn cache_with_kv(ttl: Duration) -> (TieredCache, Arc<InMemoryKv>) {
        let kv = Arc::new(InMemoryKv::new());
        let cache = TieredCache::with_l1_cost(kv.clone() as Arc<dyn SharedKv>, ttl, 1024 * 1024);
        (cache, kv)
    }

    #[tokio::test]
    async fn test_set_then_get_same_instance() {
        let (cache, _) = cache_with_kv(Duration::from_secs(60));
        cache.set("k", b"payload".to_vec());
        assert_eq!(cache.get("k").await, Some(b"payload".to_vec()));
        let stats = cache.stats();
        assert_eq!(stats.l1_hits, 1);
    }

    #[tokio::test]
    async fn test_l2_promotion() {
        let (cache, kv) = cache_with_kv(Duration::from_secs(60));
        kv.set("warm", b"from-l2", None).await.unwrap();

        // First read: L1 miss, L2 hit, promoted.
        assert_eq!(cache.get("warm").await, Some(b"from-l2".to_vec()));
        // Second read: L1 hit.
        assert_eq!(cache.get("warm").await, Some(b"from-l2".to_vec()));

        let stats = cache.stats();
        assert_eq!(stats.l2_hits, 1);
        assert_eq!(stats.l1_hits, 1);
    }

    #[tokio::test]
    async fn test_write_through_reaches_l2() {
        let (cache, kv) = cache_with_kv(Duration::from_secs(60));
        cache.set("k", b"v".to_vec());
        cache.shutdown().await; // drain the write pool
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_l2_failure_is_absorbed() {
        let (cache, kv) = cache_with_kv(Duration::from_secs(60));
        kv.set_failing(true);
        cache.set("k", b"v".to_vec());
        // L1 still serves; the failed write-through only logs.
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_get_or_compute_memoises() {
        let (cache, _) = cache_with_kv(Duration::from_secs(60));
        let computed = std::sync::atomic::AtomicU32::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_compute("fib", || {
                    computed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async { Ok(b"55".to_vec()) }
                })
                .await
                .unwrap();
            assert_eq!(value, b"55".to_vec());
        }
        assert_eq!(computed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_warm_up_isolates_failures() {
        let (cache, _) = cache_with_kv(Duration::from_secs(60));
        let keys = vec!["good".to_string(), "bad".to_string(), "fine".to_string()];
        cache
            .warm_up(&keys, |key| async move {
                if key == "bad" {
                    Err(rmk_core::Error::Cache("loader exploded".into()))
                } else {
                    Ok(key.into_bytes())
                }
            })
            .await;

        assert_eq!(cache.get("good").await, Some(b"good".to_vec()));
        assert!(cache.get("bad").await.is_none());
        assert_eq!(cache.get("fine").await, Some(b"fine".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_l1_ttl_expiry() {
        let (cache, kv) = cache_with_kv(Duration::from_secs(30));
        kv.set_failing(true); // isolate L1 behaviour
        cache.set("k", b"v".to_vec());
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_clears_both_tiers() {
        let (cache, kv) = cache_with_kv(Duration::from_secs(60));
        cache.set("k", b"v".to_vec());
        cache.shutdown().await;
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));

        cache.invalidate("k").await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
