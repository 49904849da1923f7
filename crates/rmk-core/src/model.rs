//! Persisted graph shapes: nodes and edges.

use crate::namespace::Namespace;
use crate::schema::{ActivationConfig, EdgeStatus, EdgeType, NodeType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An entity in the graph.
///
/// Nodes are created by ingestion, reflection, or administrative operations
/// and mutated only through activation/access bumps, tag or description
/// enrichment, and edge additions. Deletion is an explicit admin call that
/// verifies namespace ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Store-assigned stable identifier. Empty until first persisted.
    #[serde(default)]
    pub uid: String,

    /// Ordered type tags; the first is the primary type.
    pub types: Vec<NodeType>,

    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    /// Salience score, clamped to the configured bounds on every write.
    pub activation: f64,
    pub access_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Tenant boundary. `None` only for system types (Policy, AuditEvent, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,

    /// Dense vector, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Node {
    /// Create a node with the given primary type and name, timestamps at `now`.
    #[must_use]
    pub fn new(primary_type: NodeType, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            uid: String::new(),
            types: vec![primary_type],
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            last_accessed: now,
            occurred_at: None,
            valid_from: None,
            valid_until: None,
            activation: ActivationConfig::default().initial_activation,
            access_count: 0,
            source_conversation_id: None,
            confidence: None,
            namespace: None,
            embedding: None,
        }
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the initial activation (clamped later at the store boundary).
    #[must_use]
    pub fn with_activation(mut self, activation: f64) -> Self {
        self.activation = activation;
        self
    }

    /// Set the provenance conversation id.
    #[must_use]
    pub fn with_source_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.source_conversation_id = Some(conversation_id.into());
        self
    }

    /// Set the extraction confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// The primary (first) type tag.
    #[must_use]
    pub fn primary_type(&self) -> NodeType {
        self.types.first().copied().unwrap_or(NodeType::Entity)
    }

    /// Whether the node carries the given type tag anywhere in its list.
    #[must_use]
    pub fn has_type(&self, node_type: NodeType) -> bool {
        self.types.contains(&node_type)
    }

    /// Record an access: bump `access_count`, refresh `last_accessed`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        // last_accessed never precedes created_at
        self.last_accessed = now.max(self.created_at);
    }

    /// Apply a clamped activation update.
    pub fn set_activation(&mut self, cfg: &ActivationConfig, activation: f64) {
        self.activation = cfg.clamp(activation);
    }

    /// Model-level invariant check, run before any persist.
    ///
    /// (i) user-visible types carry a name, (ii) tenant-scoped types carry a
    /// namespace, (iv) `last_accessed ≥ created_at`. Activation clamping (iii)
    /// is enforced by the write paths themselves.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::Error;
        let primary = self.primary_type();
        if primary.requires_name() && self.name.trim().is_empty() {
            return Err(Error::validation(format!(
                "{primary} node requires a non-empty name"
            )));
        }
        if primary.requires_namespace() && self.namespace.is_none() {
            return Err(Error::validation(format!(
                "{primary} node requires a namespace"
            )));
        }
        if self.last_accessed < self.created_at {
            return Err(Error::validation(
                "last_accessed precedes created_at".to_string(),
            ));
        }
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(Error::validation(format!("confidence {c} out of [0,1]")));
            }
        }
        Ok(())
    }
}

/// A directed typed relation between two nodes, with optional facets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub edge_type: EdgeType,
    /// Facet: relation strength in `(0, 1]`. Read as 0.5 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default)]
    pub status: EdgeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Edge {
    /// A current edge with no explicit facets.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>, edge_type: EdgeType) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            edge_type,
            weight: None,
            status: EdgeStatus::Current,
            created_at: None,
            confidence: None,
        }
    }

    /// Set the weight facet.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set the status facet.
    #[must_use]
    pub fn with_status(mut self, status: EdgeStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the creation timestamp facet.
    #[must_use]
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Set the confidence facet.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// The stored weight, or the schema default of 0.5 when absent.
    #[must_use]
    pub fn weight_or_default(&self) -> f64 {
        self.weight.unwrap_or_else(EdgeType::default_weight)
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
    fn test_node_builder() {
        let ns = Namespace::parse("user_alice").unwrap();
        let node = Node::new(NodeType::Entity, "Acme", now())
            .with_namespace(ns.clone())
            .with_description("Employer")
            .with_tags(vec!["company".into()])
            .with_confidence(0.9);

        assert_eq!(node.primary_type(), NodeType::Entity);
        assert_eq!(node.namespace.as_ref(), Some(&ns));
        assert_eq!(node.confidence, Some(0.9));
        node.validate().unwrap();
    }

    #[test]
    fn test_node_validate_missing_namespace() {
        let node = Node::new(NodeType::Entity, "Acme", now());
        assert!(node.validate().is_err());
    }

    #[test]
    fn test_node_validate_empty_name() {
        let ns = Namespace::parse("user_alice").unwrap();
        let node = Node::new(NodeType::Entity, "  ", now()).with_namespace(ns);
        assert!(node.validate().is_err());
    }

    #[test]
    fn test_system_node_without_namespace() {
        let node = Node::new(NodeType::AuditEvent, "", now());
        node.validate().unwrap();
    }

    #[test]
    fn test_touch_monotonicity() {
        let mut node = Node::new(NodeType::Entity, "Acme", now());
        let earlier = now() - chrono::Duration::days(1);
        node.touch(earlier);
        assert_eq!(node.last_accessed, node.created_at);
        assert_eq!(node.access_count, 1);

        let later = now() + chrono::Duration::hours(2);
        node.touch(later);
        assert_eq!(node.last_accessed, later);
        assert_eq!(node.access_count, 2);
    }

    #[test]
    fn test_set_activation_clamps() {
        let cfg = ActivationConfig::default();
        let mut node = Node::new(NodeType::Entity, "Acme", now());
        node.set_activation(&cfg, 3.0);
        assert!((node.activation - 1.0).abs() < f64::EPSILON);
        node.set_activation(&cfg, 0.0);
        assert!((node.activation - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn test_edge_weight_default() {
        let edge = Edge::new("0x1", "0x2", EdgeType::WorksAt);
        assert!((edge.weight_or_default() - 0.5).abs() < f64::EPSILON);
        assert_eq!(edge.status, EdgeStatus::Current);

        let weighted = edge.with_weight(0.8);
        assert!((weighted.weight_or_default() - 0.8).abs() < f64::EPSILON);
    }
}
