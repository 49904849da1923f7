//! Append-only audit sink.
//!
//! Events flow through a bounded ring buffer to a background writer that
//! persists each one as an `AuditEvent` node and publishes it on the bus.
//! When the buffer is full — or the writer is gone during shutdown — the
//! producer degrades to a synchronous persist, so overflow and shutdown
//! both lose nothing.

use parking_lot::Mutex;
use rmk_core::{AuditEvent, EventBus, Node, NodeType};
use rmk_graph::{GraphStore, SharedGraphStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Ring buffer depth before the sync fallback kicks in.
const BUFFER_SLOTS: usize = 1000;

/// Async audit logger over a graph store and an event bus.
pub struct AuditLogger {
    tx: Mutex<Option<mpsc::Sender<AuditEvent>>>,
    store: SharedGraphStore,
    bus: Arc<dyn EventBus>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Start the logger and its drain task.
    #[must_use]
    pub fn new(store: SharedGraphStore, bus: Arc<dyn EventBus>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(BUFFER_SLOTS);

        let worker_store = Arc::clone(&store);
        let worker_bus = Arc::clone(&bus);
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                persist(&worker_store, &worker_bus, event).await;
            }
        });

        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            store,
            bus,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Record an event.
    ///
    /// Fast path enqueues; a full or closed buffer falls back to writing
    /// inline so the event is never dropped.
    pub async fn log(&self, event: AuditEvent) {
        let tx = self.tx.lock().clone();
        if let Some(tx) = tx {
            match tx.try_send(event) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(event))
                | Err(mpsc::error::TrySendError::Closed(event)) => {
                    tracing::debug!("audit buffer unavailable, persisting synchronously");
                    persist(&self.store, &self.bus, event).await;
                }
            }
        } else {
            persist(&self.store, &self.bus, event).await;
        }
    }

    /// Stop accepting buffered writes and drain everything in flight.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

async fn persist(store: &SharedGraphStore, bus: &Arc<dyn EventBus>, event: AuditEvent) {
    if let Err(err) = store.create_node(&audit_node(&event)).await {
        tracing::warn!(event_id = %event.id, error = %err, "audit graph persist failed");
    }

    match serde_json::to_vec(&event) {
        Ok(payload) => {
            if let Err(err) = bus.publish(&event.topic(), &payload).await {
                tracing::warn!(event_id = %event.id, error = %err, "audit publish failed");
            }
        }
        Err(err) => {
            tracing::warn!(event_id = %event.id, error = %err, "audit event not serializable");
        }
    }
}

/// Project an [`AuditEvent`] onto its persisted node shape.
#[must_use]
pub fn audit_node(event: &AuditEvent) -> Node {
    let mut node = Node::new(NodeType::AuditEvent, event.action.clone(), event.timestamp)
        .with_description(event.reason.clone())
        .with_attribute("event_id", event.id.clone())
        .with_attribute("event_type", event.event_type.clone())
        .with_attribute("user_id", event.user_id.clone())
        .with_attribute("effect", event.effect.to_string());
    if let Some(namespace) = &event.namespace {
        node = node.with_attribute("namespace", namespace.clone());
    }
    if !event.resource.is_empty() {
        node = node.with_attribute("resource", event.resource.clone());
        node = node.with_attribute("resource_id", event.resource_id.clone());
    }
    if let Some(duration_ms) = event.duration_ms {
        node = node.with_attribute("duration_ms", duration_ms.to_string());
    }
    node
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rmk_core::{Effect, Result};
    use rmk_graph::{GraphStore, MemoryGraphStore};

    fn now() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    /// Bus that remembers what was published.
    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
            self.published
                .lock()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_log_persists_node_and_publishes() {
        let store = Arc::new(MemoryGraphStore::new());
        let bus = Arc::new(RecordingBus::default());
        let logger = AuditLogger::new(
            store.clone() as SharedGraphStore,
            bus.clone() as Arc<dyn EventBus>,
        );

        let event = AuditEvent::deny("CONSULT", "bob", "READ_NODE", "namespace mismatch", now())
            .with_namespace("user_alice");
        logger.log(event.clone()).await;
        logger.shutdown().await;

        // One AuditEvent node landed.
        let nodes = store
            .nodes_by_type(None, NodeType::AuditEvent, 10)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].attributes.get("user_id").unwrap(), "bob");
        assert_eq!(nodes[0].attributes.get("effect").unwrap(), "DENY");

        // One message on the right topic.
        let published = bus.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "audit.user_alice.CONSULT");
        let decoded: AuditEvent = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(decoded.reason, "namespace mismatch");
    }

    #[tokio::test]
    async fn test_log_after_shutdown_is_synchronous_not_lost() {
        let store = Arc::new(MemoryGraphStore::new());
        let bus = Arc::new(RecordingBus::default());
        let logger = AuditLogger::new(
            store.clone() as SharedGraphStore,
            bus.clone() as Arc<dyn EventBus>,
        );
        logger.shutdown().await;

        logger
            .log(AuditEvent::allow("INGEST", "alice", "INGEST_BATCH", now()))
            .await;

        let nodes = store
            .nodes_by_type(None, NodeType::AuditEvent, 10)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_events() {
        let store = Arc::new(MemoryGraphStore::new());
        let bus = Arc::new(RecordingBus::default());
        let logger = AuditLogger::new(
            store.clone() as SharedGraphStore,
            bus.clone() as Arc<dyn EventBus>,
        );

        for i in 0..25 {
            logger
                .log(
                    AuditEvent::allow("CONSULT", format!("user{i}"), "CONSULT", now())
                        .with_namespace("user_alice"),
                )
                .await;
        }
        logger.shutdown().await;

        let nodes = store
            .nodes_by_type(None, NodeType::AuditEvent, 100)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 25);
    }

    #[test]
    fn test_audit_node_projection() {
        let event = AuditEvent::deny("CONSULT", "bob", "READ_NODE", "nope", now())
            .with_resource("node", "0x42")
            .with_duration_ms(7);
        let node = audit_node(&event);
        assert_eq!(node.primary_type(), NodeType::AuditEvent);
        assert_eq!(node.name, "READ_NODE");
        assert_eq!(node.description, "nope");
        assert_eq!(node.attributes.get("resource_id").unwrap(), "0x42");
        assert_eq!(node.attributes.get("duration_ms").unwrap(), "7");
        assert_eq!(
            node.attributes.get("effect").map(String::as_str),
            Some(Effect::Deny.to_string().as_str())
        );
    }
}
