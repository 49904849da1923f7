//! In-process [`SharedKv`] implementation.
//!
//! Backs tests and single-node embedded deployments. Counter keys follow
//! the KV convention of storing integers as decimal strings, so `incr` and
//! `get` interoperate the same way they do against the real backend. A
//! failure toggle lets tests exercise outage behaviour (the rate limiter's
//! fail-open path, write-through error absorption).

use async_trait::async_trait;
use parking_lot::Mutex;
use rmk_core::{Error, Result, SharedKv};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// Hash-map KV with TTL support and simulated-outage toggle.
#[derive(Default)]
pub struct InMemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    failing: AtomicBool,
}

impl InMemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until toggled back. Test hook.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_up(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Kv("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn live_value(entry: &Entry, now: Instant) -> Option<Vec<u8>> {
        match entry.expires_at {
            Some(expires_at) if now >= expires_at => None,
            _ => Some(entry.value.clone()),
        }
    }
}

#[async_trait]
impl SharedKv for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_up()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        match Self::live_value(entry, now) {
            Some(value) => Ok(Some(value)),
            None => {
                entries.remove(key);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check_up()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.check_up()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        // An expired counter restarts from zero with no TTL, matching the
        // backend's INCR-after-expiry behaviour.
        let (current, expires_at) = match entries.get(key) {
            Some(entry) => match Self::live_value(entry, now) {
                Some(value) => {
                    let parsed = std::str::from_utf8(&value)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| {
                            Error::Kv(format!("key {key} holds a non-integer value"))
                        })?;
                    (parsed, entry.expires_at)
                }
                None => (0, None),
            },
            None => (0, None),
        };

        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_up()?;
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_up()?;
        self.entries.lock().remove(key);
        Ok(())
    }
}
