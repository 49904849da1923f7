//! # RMK Cache
//!
//! The two-tier cache in front of hot kernel lookups, plus the Redis and
//! in-memory implementations of the [`rmk_core::SharedKv`] and
//! [`rmk_core::EventBus`] contracts.

pub mod kv_mem;
pub mod l1;
pub mod metrics;
pub mod redis_kv;
pub mod tiered;

pub use kv_mem::InMemoryKv;
pub use l1::AdmissionCache;
pub use metrics::{CacheMetrics, CacheStats};
pub use redis_kv::{RedisBus, RedisKv};
pub use tiered::TieredCache;
