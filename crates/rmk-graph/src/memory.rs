//! In-process implementation of the [`GraphStore`] contract.
//!
//! Backs embedded deployments and the engine test suites. Semantics match
//! the Dgraph adapter where the contract specifies them: conditional
//! activation updates, functional-edge archival by status flip, facet
//! defaults, and namespace-verified deletes.

use crate::store::{ActivationState, BatchCreated, GraphStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use rmk_core::{
    ActivationConfig, Clock, Edge, EdgeStatus, EdgeType, Error, Namespace, Node, NodeType, Result,
    SystemClock,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    next_uid: u64,
}

impl Inner {
    fn assign_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("0x{:x}", self.next_uid)
    }
}

/// Hash-map graph store guarded by a single read/write lock.
pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    activation: ActivationConfig,
}

impl MemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock: Arc::new(SystemClock),
            activation: ActivationConfig::default(),
        }
    }

    /// Use an explicit clock for `updated_at` stamping.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
            activation: ActivationConfig::default(),
        }
    }

    /// Override the activation bounds used to clamp writes.
    #[must_use]
    pub fn with_activation_config(mut self, activation: ActivationConfig) -> Self {
        self.activation = activation;
        self
    }

    /// Number of stored nodes. Test helper.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Snapshot of every stored edge. Test helper.
    #[must_use]
    pub fn all_edges(&self) -> Vec<Edge> {
        self.inner.read().edges.clone()
    }

    fn insert_node(&self, inner: &mut Inner, node: &Node) -> Result<String> {
        node.validate()?;
        let mut stored = node.clone();
        stored.activation = self.activation.clamp(stored.activation);
        let uid = if stored.uid.is_empty() {
            inner.assign_uid()
        } else {
            stored.uid.clone()
        };
        stored.uid = uid.clone();
        inner.nodes.insert(uid.clone(), stored);
        Ok(uid)
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

fn in_namespace(node: &Node, namespace: &Namespace) -> bool {
    node.namespace.as_ref() == Some(namespace)
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn create_node(&self, node: &Node) -> Result<String> {
        let mut inner = self.inner.write();
        self.insert_node(&mut inner, node)
    }

    async fn create_nodes(&self, nodes: &[Node]) -> Result<BatchCreated> {
        let mut inner = self.inner.write();
        let mut outcome = BatchCreated::default();
        for node in nodes {
            match self.insert_node(&mut inner, node) {
                Ok(uid) => {
                    outcome.uids.insert(node.name.clone(), uid);
                }
                Err(err) => outcome.failures.push((node.name.clone(), err.to_string())),
            }
        }
        Ok(outcome)
    }

    async fn get_node(&self, uid: &str) -> Result<Option<Node>> {
        Ok(self.inner.read().nodes.get(uid).cloned())
    }

    async fn find_node(
        &self,
        namespace: &Namespace,
        name: &str,
        node_type: Option<NodeType>,
    ) -> Result<Option<Node>> {
        let inner = self.inner.read();
        Ok(inner
            .nodes
            .values()
            .find(|n| {
                in_namespace(n, namespace)
                    && n.name == name
                    && node_type.map_or(true, |t| n.primary_type() == t)
            })
            .cloned())
    }

    async fn find_node_ci(&self, namespace: &Namespace, name: &str) -> Result<Option<Node>> {
        let needle = name.to_lowercase();
        let inner = self.inner.read();
        Ok(inner
            .nodes
            .values()
            .find(|n| in_namespace(n, namespace) && n.name.to_lowercase() == needle)
            .cloned())
    }

    async fn get_nodes_by_uids(&self, uids: &[String]) -> Result<Vec<Node>> {
        let inner = self.inner.read();
        Ok(uids
            .iter()
            .filter_map(|uid| inner.nodes.get(uid).cloned())
            .collect())
    }

    async fn get_nodes_by_names(
        &self,
        namespace: &Namespace,
        names: &[String],
    ) -> Result<Vec<Node>> {
        let inner = self.inner.read();
        Ok(inner
            .nodes
            .values()
            .filter(|n| in_namespace(n, namespace) && names.contains(&n.name))
            .cloned()
            .collect())
    }

    async fn list_named_nodes(&self, namespace: &Namespace) -> Result<Vec<Node>> {
        let inner = self.inner.read();
        Ok(inner
            .nodes
            .values()
            .filter(|n| in_namespace(n, namespace) && !n.name.is_empty())
            .cloned()
            .collect())
    }

    async fn search_nodes(&self, namespace: &Namespace, term: &str) -> Result<Vec<Node>> {
        let needle = term.to_lowercase();
        let inner = self.inner.read();
        let mut seen = std::collections::HashSet::new();
        Ok(inner
            .nodes
            .values()
            .filter(|n| in_namespace(n, namespace))
            .filter(|n| {
                n.name.to_lowercase().contains(&needle)
                    || n.description.to_lowercase().contains(&needle)
                    || n.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .filter(|n| seen.insert(n.uid.clone()))
            .cloned()
            .collect())
    }

    async fn nodes_by_type(
        &self,
        namespace: Option<&Namespace>,
        node_type: NodeType,
        limit: usize,
    ) -> Result<Vec<Node>> {
        let inner = self.inner.read();
        Ok(inner
            .nodes
            .values()
            .filter(|n| n.primary_type() == node_type)
            .filter(|n| namespace.map_or(true, |ns| in_namespace(n, ns)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn nodes_with_activation_above(
        &self,
        namespace: &Namespace,
        floor: f64,
    ) -> Result<Vec<Node>> {
        let inner = self.inner.read();
        Ok(inner
            .nodes
            .values()
            .filter(|n| in_namespace(n, namespace) && n.activation > floor)
            .cloned()
            .collect())
    }

    async fn create_edge(&self, edge: &Edge) -> Result<()> {
        let mut inner = self.inner.write();
        // Rewriting an existing triple replaces its facets, matching the
        // store's one-facet-set-per-triple semantics.
        if let Some(existing) = inner.edges.iter_mut().find(|e| {
            e.from == edge.from && e.to == edge.to && e.edge_type == edge.edge_type
        }) {
            *existing = edge.clone();
        } else {
            inner.edges.push(edge.clone());
        }
        Ok(())
    }

    async fn create_edges(&self, edges: &[Edge]) -> Result<usize> {
        for edge in edges {
            self.create_edge(edge).await?;
        }
        Ok(edges.len())
    }

    async fn outgoing_edges(&self, uid: &str) -> Result<Vec<Edge>> {
        let inner = self.inner.read();
        Ok(inner
            .edges
            .iter()
            .filter(|e| e.from == uid)
            .cloned()
            .collect())
    }

    async fn edges_from(&self, uid: &str, edge_type: EdgeType) -> Result<Vec<Edge>> {
        let inner = self.inner.read();
        Ok(inner
            .edges
            .iter()
            .filter(|e| e.from == uid && e.edge_type == edge_type)
            .cloned()
            .collect())
    }

    async fn set_edge_status(
        &self,
        from: &str,
        to: &str,
        edge_type: EdgeType,
        status: EdgeStatus,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let mut touched = false;
        for edge in inner
            .edges
            .iter_mut()
            .filter(|e| e.from == from && e.to == to && e.edge_type == edge_type)
        {
            edge.status = status;
            touched = true;
        }
        if touched {
            Ok(())
        } else {
            Err(Error::not_found(format!(
                "edge {from} -{edge_type}-> {to}"
            )))
        }
    }

    async fn archive_functional(&self, from: &str, edge_type: EdgeType) -> Result<usize> {
        let mut inner = self.inner.write();
        let mut archived = 0;
        for edge in inner.edges.iter_mut().filter(|e| {
            e.from == from && e.edge_type == edge_type && e.status == EdgeStatus::Current
        }) {
            edge.status = EdgeStatus::Archived;
            archived += 1;
        }
        Ok(archived)
    }

    async fn conflicting_functional_sources(
        &self,
        edge_type: EdgeType,
        namespace: Option<&Namespace>,
    ) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for edge in inner
            .edges
            .iter()
            .filter(|e| e.edge_type == edge_type && e.status == EdgeStatus::Current)
        {
            let scoped = match namespace {
                Some(ns) => inner
                    .nodes
                    .get(&edge.from)
                    .is_some_and(|n| in_namespace(n, ns)),
                None => true,
            };
            if scoped {
                *counts.entry(edge.from.as_str()).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(uid, _)| uid.to_string())
            .collect())
    }

    async fn update_activation(
        &self,
        uid: &str,
        expected: ActivationState,
        next: ActivationState,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let now = self.clock.now();
        let node = inner
            .nodes
            .get_mut(uid)
            .ok_or_else(|| Error::not_found(format!("node {uid}")))?;
        let matches = node.activation.to_bits() == expected.activation.to_bits()
            && node.access_count == expected.access_count;
        if !matches {
            return Err(Error::PreconditionFailed(format!(
                "node {uid} changed underneath the update"
            )));
        }
        node.activation = self.activation.clamp(next.activation);
        node.access_count = next.access_count;
        // Only a genuine access refreshes recency; decay writes do not.
        if next.access_count > expected.access_count {
            node.last_accessed = now.max(node.created_at);
        }
        node.updated_at = now;
        Ok(())
    }

    async fn enrich_node(
        &self,
        uid: &str,
        description: Option<&str>,
        tags: &[String],
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let now = self.clock.now();
        let node = inner
            .nodes
            .get_mut(uid)
            .ok_or_else(|| Error::not_found(format!("node {uid}")))?;
        if let Some(description) = description {
            if !description.is_empty() {
                node.description = description.to_string();
            }
        }
        for tag in tags {
            if !node.tags.contains(tag) {
                node.tags.push(tag.clone());
            }
        }
        node.updated_at = now;
        Ok(())
    }

    async fn delete_node(&self, uid: &str, namespace: &Namespace) -> Result<()> {
        let mut inner = self.inner.write();
        let owned = match inner.nodes.get(uid) {
            Some(node) => in_namespace(node, namespace),
            None => return Err(Error::not_found(format!("node {uid}"))),
        };
        if !owned {
            return Err(Error::deny("namespace mismatch"));
        }
        inner.nodes.remove(uid);
        inner.edges.retain(|e| e.from != uid && e.to != uid);
        Ok(())
    }

    async fn query(
        &self,
        _text: &str,
        _vars: &HashMap<String, String>,
    ) -> Result<serde_json::Value> {
        Err(Error::store(
            "raw queries are not supported by the in-memory store",
        ))
    }

    async fn mutate(&self, _ops: serde_json::Value) -> Result<()> {
        Err(Error::store(
            "raw mutations are not supported by the in-memory store",
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::store::GraphStoreExt;
    use chrono::{DateTime, Utc};
    use rmk_core::{ActivationConfig, ManualClock};

    fn now() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    fn ns() -> Namespace {
        Namespace::parse("user_alice").unwrap()
    }

    fn entity(name: &str) -> Node {
        Node::new(NodeType::Entity, name, now()).with_namespace(ns())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryGraphStore::new();
        let uid = store.create_node(&entity("Acme")).await.unwrap();
        let node = store.get_node(&uid).await.unwrap().unwrap();
        assert_eq!(node.name, "Acme");
        assert_eq!(node.uid, uid);
    }

    #[tokio::test]
    async fn test_create_nodes_partial_failure() {
        let store = MemoryGraphStore::new();
        let good = entity("Acme");
        let bad = Node::new(NodeType::Entity, "Orphan", now()); // missing namespace
        let outcome = store.create_nodes(&[good, bad]).await.unwrap();
        assert_eq!(outcome.uids.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.error().unwrap().to_string().contains("Orphan"));
    }

    #[tokio::test]
    async fn test_find_node_scoped_by_namespace() {
        let store = MemoryGraphStore::new();
        store.create_node(&entity("Acme")).await.unwrap();
        let other = Namespace::parse("user_bob").unwrap();
        assert!(store
            .find_node(&other, "Acme", None)
            .await
            .unwrap()
            .is_none());
        assert!(store.find_node(&ns(), "Acme", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_node_ci() {
        let store = MemoryGraphStore::new();
        store.create_node(&entity("Acme Corp")).await.unwrap();
        let hit = store.find_node_ci(&ns(), "ACME corp").await.unwrap();
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn test_search_covers_tags_and_description() {
        let store = MemoryGraphStore::new();
        store
            .create_node(&entity("Acme").with_description("industrial supplier"))
            .await
            .unwrap();
        store
            .create_node(&entity("Widget").with_tags(vec!["supplier".into()]))
            .await
            .unwrap();
        let hits = store.search_nodes(&ns(), "supplier").await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_cas_success_and_conflict() {
        let store = MemoryGraphStore::new();
        let uid = store
            .create_node(&entity("Acme").with_activation(0.5))
            .await
            .unwrap();

        store
            .update_activation(
                &uid,
                ActivationState::new(0.5, 0),
                ActivationState::new(0.65, 1),
            )
            .await
            .unwrap();

        // Stale expectation loses.
        let err = store
            .update_activation(
                &uid,
                ActivationState::new(0.5, 0),
                ActivationState::new(0.8, 2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_boost_activation_clamps() {
        let store = MemoryGraphStore::new();
        let cfg = ActivationConfig::default();
        let uid = store
            .create_node(&entity("Acme").with_activation(0.95))
            .await
            .unwrap();
        let state = store.boost_activation(&uid, &cfg, 0.15).await.unwrap();
        assert!((state.activation - 1.0).abs() < f64::EPSILON);
        assert_eq!(state.access_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_no_updates() {
        let store = Arc::new(MemoryGraphStore::new());
        let uid = store.create_node(&entity("Acme")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let uid = uid.clone();
            handles.push(tokio::spawn(async move {
                store.increment_access_count(&uid).await
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        let node = store.get_node(&uid).await.unwrap().unwrap();
        assert_eq!(node.access_count, successes);
    }

    #[tokio::test]
    async fn test_functional_archive_flow() {
        let store = MemoryGraphStore::new();
        let clock = ManualClock::at(now());
        let alice = store.create_node(&entity("alice")).await.unwrap();
        let acme = store.create_node(&entity("Acme")).await.unwrap();
        let globex = store.create_node(&entity("Globex")).await.unwrap();

        store
            .replace_functional_edge(&Edge::new(&alice, &acme, EdgeType::WorksAt), &clock)
            .await
            .unwrap();
        store
            .replace_functional_edge(&Edge::new(&alice, &globex, EdgeType::WorksAt), &clock)
            .await
            .unwrap();

        let edges = store.edges_from(&alice, EdgeType::WorksAt).await.unwrap();
        assert_eq!(edges.len(), 2);
        let current: Vec<_> = edges
            .iter()
            .filter(|e| e.status == EdgeStatus::Current)
            .collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].to, globex);
        assert!(edges
            .iter()
            .any(|e| e.to == acme && e.status == EdgeStatus::Archived));
    }

    #[tokio::test]
    async fn test_archive_functional_idempotent() {
        let store = MemoryGraphStore::new();
        let alice = store.create_node(&entity("alice")).await.unwrap();
        let acme = store.create_node(&entity("Acme")).await.unwrap();
        store
            .create_edge(&Edge::new(&alice, &acme, EdgeType::WorksAt))
            .await
            .unwrap();

        assert_eq!(
            store
                .archive_functional(&alice, EdgeType::WorksAt)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .archive_functional(&alice, EdgeType::WorksAt)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_conflicting_functional_sources() {
        let store = MemoryGraphStore::new();
        let alice = store.create_node(&entity("alice")).await.unwrap();
        let acme = store.create_node(&entity("Acme")).await.unwrap();
        let globex = store.create_node(&entity("Globex")).await.unwrap();

        // Two current works_at edges: a contradiction.
        store
            .create_edge(&Edge::new(&alice, &acme, EdgeType::WorksAt))
            .await
            .unwrap();
        store
            .create_edge(&Edge::new(&alice, &globex, EdgeType::WorksAt))
            .await
            .unwrap();

        let conflicted = store
            .conflicting_functional_sources(EdgeType::WorksAt, None)
            .await
            .unwrap();
        assert_eq!(conflicted, vec![alice.clone()]);

        let other = Namespace::parse("user_bob").unwrap();
        let scoped = store
            .conflicting_functional_sources(EdgeType::WorksAt, Some(&other))
            .await
            .unwrap();
        assert!(scoped.is_empty());
    }

    #[tokio::test]
    async fn test_delete_requires_ownership() {
        let store = MemoryGraphStore::new();
        let uid = store.create_node(&entity("Acme")).await.unwrap();
        let other = Namespace::parse("user_bob").unwrap();

        let err = store.delete_node(&uid, &other).await.unwrap_err();
        assert!(matches!(err, Error::PolicyDeny { .. }));

        store.delete_node(&uid, &ns()).await.unwrap();
        assert!(store.get_node(&uid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enrich_merges_tags() {
        let store = MemoryGraphStore::new();
        let uid = store
            .create_node(&entity("Acme").with_tags(vec!["company".into()]))
            .await
            .unwrap();
        store
            .enrich_node(&uid, Some("updated"), &["company".into(), "employer".into()])
            .await
            .unwrap();
        let node = store.get_node(&uid).await.unwrap().unwrap();
        assert_eq!(node.description, "updated");
        assert_eq!(node.tags, vec!["company".to_string(), "employer".to_string()]);
    }
}
