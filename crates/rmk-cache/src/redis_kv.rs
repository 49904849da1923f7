//! Redis implementations of the shared KV and the event bus.
//!
//! Both ride one async connection manager, which reconnects under the hood
//! on transient failures. Counter keys use plain `INCR`/`PEXPIRE`; value
//! keys use `SET`/`SET PX`. The bus maps topics straight onto Redis
//! pub/sub channels.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rmk_core::{Error, EventBus, Result, SharedKv};
use std::time::Duration;

fn kv_err(err: redis::RedisError) -> Error {
    Error::Kv(err.to_string())
}

/// Shared KV over Redis.
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    /// Connect to the given Redis URL (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Kv(format!("invalid redis url: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Kv(format!("redis connect failed: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl SharedKv for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(kv_err)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let millis = ttl.as_millis().min(u128::from(u64::MAX)) as u64;
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(millis)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(kv_err)
            }
            None => conn.set(key, value).await.map_err(kv_err),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1).await.map_err(kv_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let millis = ttl.as_millis().min(u128::from(u64::MAX)) as i64;
        let set: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis)
            .query_async(&mut conn)
            .await
            .map_err(kv_err)?;
        Ok(set == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await.map_err(kv_err)
    }
}

/// Event bus over Redis pub/sub.
#[derive(Clone)]
pub struct RedisBus {
    manager: ConnectionManager,
}

impl RedisBus {
    /// Connect to the given Redis URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Kv(format!("invalid redis url: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Kv(format!("redis connect failed: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(topic, payload)
            .await
            .map_err(kv_err)
    }
}
