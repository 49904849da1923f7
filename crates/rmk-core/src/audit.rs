//! Immutable audit event record.

use crate::policy::Effect;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An append-only audit record, persisted as an `AuditEvent` node and
/// published on `audit.<namespace>.<EVENT_TYPE>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Event category, uppercase (e.g. `CONSULT`, `INGEST`, `REFLECTION_DECAY`).
    pub event_type: String,
    pub user_id: String,
    /// Namespace the operation targeted, when one was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Specific action attempted (e.g. `READ_NODE`, `RATE_LIMITED`).
    pub action: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub resource_id: String,
    pub effect: Effect,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AuditEvent {
    fn base(
        event_type: impl Into<String>,
        user_id: impl Into<String>,
        action: impl Into<String>,
        effect: Effect,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            event_type: event_type.into(),
            user_id: user_id.into(),
            namespace: None,
            action: action.into(),
            resource: String::new(),
            resource_id: String::new(),
            effect,
            reason: String::new(),
            ip: None,
            user_agent: None,
            duration_ms: None,
            metadata: BTreeMap::new(),
        }
    }

    /// An `effect=ALLOW` event.
    #[must_use]
    pub fn allow(
        event_type: impl Into<String>,
        user_id: impl Into<String>,
        action: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::base(event_type, user_id, action, Effect::Allow, now)
    }

    /// An `effect=DENY` event with the denial reason.
    #[must_use]
    pub fn deny(
        event_type: impl Into<String>,
        user_id: impl Into<String>,
        action: impl Into<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut ev = Self::base(event_type, user_id, action, Effect::Deny, now);
        ev.reason = reason.into();
        ev
    }

    /// Set the targeted namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the resource kind and id.
    #[must_use]
    pub fn with_resource(
        mut self,
        resource: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource = resource.into();
        self.resource_id = resource_id.into();
        self
    }

    /// Set the operation duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach a metadata value.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach caller transport details.
    #[must_use]
    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }

    /// Pub/sub topic this event publishes on:
    /// `audit.<namespace>.<EVENT_TYPE>`, with `system` for namespace-less events.
    #[must_use]
    pub fn topic(&self) -> String {
        let ns = self.namespace.as_deref().unwrap_or("system");
        format!("audit.{ns}.{}", self.event_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_deny_event() {
        let ev = AuditEvent::deny("CONSULT", "bob", "READ_NODE", "namespace mismatch", now())
            .with_namespace("user_alice")
            .with_resource("node", "0x42");
        assert_eq!(ev.effect, Effect::Deny);
        assert_eq!(ev.reason, "namespace mismatch");
        assert_eq!(ev.resource_id, "0x42");
        assert!(!ev.id.is_empty());
    }

    #[test]
    fn test_topic_format() {
        let ev = AuditEvent::allow("INGEST", "alice", "INGEST_BATCH", now())
            .with_namespace("user_alice");
        assert_eq!(ev.topic(), "audit.user_alice.INGEST");
    }

    #[test]
    fn test_topic_without_namespace() {
        let ev = AuditEvent::allow("REFLECTION_DECAY", "system", "DECAY", now());
        assert_eq!(ev.topic(), "audit.system.REFLECTION_DECAY");
    }

    #[test]
    fn test_serde_round_trip() {
        let ev = AuditEvent::allow("CONSULT", "alice", "CONSULT", now())
            .with_namespace("user_alice")
            .with_duration_ms(12)
            .with_metadata("facts", serde_json::json!(3));
        let json = serde_json::to_string(&ev).unwrap();
        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
