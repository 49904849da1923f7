//! Shared key-value store contract.
//!
//! The L2 cache tier, the rate limiter, and consultation memoisation all
//! sit on this interface. Implementations live in `rmk-cache` (Redis and
//! in-memory).

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// An external shared KV with TTL support and atomic counters.
#[async_trait]
pub trait SharedKv: Send + Sync {
    /// Fetch a value. `Ok(None)` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, with an optional TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Atomically increment a counter key, creating it at 1 if absent.
    /// Returns the post-increment value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set a TTL on an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
