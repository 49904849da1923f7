//! Pub/sub bus contract.
//!
//! Audit streaming publishes JSON payloads on dotted topics
//! (`audit.<namespace>.<EVENT_TYPE>`). The bus is an external collaborator;
//! the Redis implementation lives in `rmk-cache`, and [`NullBus`] serves
//! bootstrap and test paths that do not care about fan-out.

use crate::error::Result;
use async_trait::async_trait;

/// Fire-and-forget topic publisher.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a payload on a topic.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// A bus that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBus;

#[async_trait]
impl EventBus for NullBus {
    async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}
