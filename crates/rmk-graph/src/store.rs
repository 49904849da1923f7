//! The typed graph-store contract.
//!
//! Every engine component talks to persistence through [`GraphStore`]; any
//! backend with typed node/edge CRUD, indexed filters, facet retrieval, and
//! conditional mutations can satisfy it. The Dgraph HTTP adapter and the
//! in-memory store are the two implementations in-tree.

use async_trait::async_trait;
use rmk_core::{
    with_retry, ActivationConfig, Clock, Edge, EdgeStatus, EdgeType, Error, Namespace, Node,
    NodeType, Result, RetryPolicy,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a batch node creation.
///
/// A failed batch degrades to per-node creation, so the outcome can be
/// partial: `uids` maps every successfully created input name to its new
/// uid, and `failures` names the inputs that could not be created.
#[derive(Debug, Default)]
pub struct BatchCreated {
    /// Input name → store-assigned uid.
    pub uids: HashMap<String, String>,
    /// `(input name, reason)` for each node that failed.
    pub failures: Vec<(String, String)>,
}

impl BatchCreated {
    /// Aggregate error naming every failed input, if any failed.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        if self.failures.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.failures.iter().map(|(n, _)| n.as_str()).collect();
        Some(Error::store(format!(
            "batch create failed for {} node(s): {}",
            self.failures.len(),
            names.join(", ")
        )))
    }
}

/// Expected-versus-next state for a conditional activation update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationState {
    pub activation: f64,
    pub access_count: u64,
}

impl ActivationState {
    #[must_use]
    pub fn new(activation: f64, access_count: u64) -> Self {
        Self {
            activation,
            access_count,
        }
    }
}

/// Typed graph persistence contract.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create one node, returning its uid. The node is validated first.
    async fn create_node(&self, node: &Node) -> Result<String>;

    /// Create a batch of nodes in one mutation where possible.
    ///
    /// On batch failure the adapter degrades to per-node creation and
    /// reports a partial outcome; see [`BatchCreated`].
    async fn create_nodes(&self, nodes: &[Node]) -> Result<BatchCreated>;

    /// Fetch one node by uid.
    async fn get_node(&self, uid: &str) -> Result<Option<Node>>;

    /// Exact name lookup within a namespace, optionally type-filtered.
    async fn find_node(
        &self,
        namespace: &Namespace,
        name: &str,
        node_type: Option<NodeType>,
    ) -> Result<Option<Node>>;

    /// Case-insensitive exact name lookup within a namespace.
    async fn find_node_ci(&self, namespace: &Namespace, name: &str) -> Result<Option<Node>>;

    /// Fetch several nodes by uid. Unknown uids are skipped.
    async fn get_nodes_by_uids(&self, uids: &[String]) -> Result<Vec<Node>>;

    /// Fetch several nodes by exact name within a namespace.
    async fn get_nodes_by_names(&self, namespace: &Namespace, names: &[String])
        -> Result<Vec<Node>>;

    /// All named nodes in a namespace. Backs the ingestion pre-fetch and
    /// the fuzzy-match pass of entity resolution.
    async fn list_named_nodes(&self, namespace: &Namespace) -> Result<Vec<Node>>;

    /// Full-text OR search over `name | description | tags`, deduplicated
    /// by uid.
    async fn search_nodes(&self, namespace: &Namespace, term: &str) -> Result<Vec<Node>>;

    /// Nodes whose primary type matches, optionally namespace-scoped.
    async fn nodes_by_type(
        &self,
        namespace: Option<&Namespace>,
        node_type: NodeType,
        limit: usize,
    ) -> Result<Vec<Node>>;

    /// Nodes in a namespace with activation above the floor. Backs the
    /// reflection decay scan.
    async fn nodes_with_activation_above(
        &self,
        namespace: &Namespace,
        floor: f64,
    ) -> Result<Vec<Node>>;

    /// Create a single edge, writing weight and status as facets.
    async fn create_edge(&self, edge: &Edge) -> Result<()>;

    /// Create a batch of edges in one mutation. Returns the count written.
    async fn create_edges(&self, edges: &[Edge]) -> Result<usize>;

    /// All outgoing edges of a node, with facets. Backs traversal.
    async fn outgoing_edges(&self, uid: &str) -> Result<Vec<Edge>>;

    /// Outgoing edges of one predicate, with facets.
    async fn edges_from(&self, uid: &str, edge_type: EdgeType) -> Result<Vec<Edge>>;

    /// Flip the status facet of a specific edge.
    async fn set_edge_status(
        &self,
        from: &str,
        to: &str,
        edge_type: EdgeType,
        status: EdgeStatus,
    ) -> Result<()>;

    /// Archive every `status=current` edge of a functional predicate on
    /// `from`. Idempotent; returns the number of edges archived.
    async fn archive_functional(&self, from: &str, edge_type: EdgeType) -> Result<usize>;

    /// Source uids owning more than one `status=current` edge of the given
    /// functional predicate. Namespace-scoped when given, system-wide
    /// otherwise (the background reflection pass runs system-wide).
    async fn conflicting_functional_sources(
        &self,
        edge_type: EdgeType,
        namespace: Option<&Namespace>,
    ) -> Result<Vec<String>>;

    /// One conditional activation update attempt.
    ///
    /// Succeeds only while the stored `(activation, access_count)` still
    /// equal `expected`; a lost race surfaces [`Error::PreconditionFailed`].
    /// Callers go through [`GraphStoreExt::update_if_unchanged`], which owns
    /// the bounded retry.
    async fn update_activation(
        &self,
        uid: &str,
        expected: ActivationState,
        next: ActivationState,
    ) -> Result<()>;

    /// Merge description/tag enrichment into an existing node.
    async fn enrich_node(
        &self,
        uid: &str,
        description: Option<&str>,
        tags: &[String],
    ) -> Result<()>;

    /// Delete a node after verifying namespace ownership.
    async fn delete_node(&self, uid: &str, namespace: &Namespace) -> Result<()>;

    /// Raw parametric query escape hatch (`$var` → string).
    async fn query(&self, text: &str, vars: &HashMap<String, String>)
        -> Result<serde_json::Value>;

    /// Raw mutation escape hatch.
    async fn mutate(&self, ops: serde_json::Value) -> Result<()>;
}

/// Derived operations every store gets for free.
///
/// Callers never reason about compare-and-set themselves: the bounded
/// retry (3 attempts, 10·attempt ms backoff) lives here, and exhaustion
/// surfaces as [`Error::FailedConcurrent`].
#[async_trait]
pub trait GraphStoreExt: GraphStore {
    /// Re-read/modify/CAS loop around [`GraphStore::update_activation`].
    ///
    /// `next` maps the currently stored state to the desired state; it may
    /// be called once per attempt.
    async fn update_if_unchanged<F>(&self, uid: &str, next: F) -> Result<ActivationState>
    where
        F: Fn(&Node) -> ActivationState + Send + Sync,
    {
        let policy = RetryPolicy::linear(3);
        with_retry(&policy, || async {
            let node = self
                .get_node(uid)
                .await?
                .ok_or_else(|| Error::not_found(format!("node {uid}")))?;
            let expected = ActivationState::new(node.activation, node.access_count);
            let desired = next(&node);
            self.update_activation(uid, expected, desired).await?;
            Ok(desired)
        })
        .await
        .map_err(|err| match err {
            Error::PreconditionFailed(msg) => Error::FailedConcurrent(msg),
            other => other,
        })
    }

    /// Boost a node's activation by `boost` (clamped) and record the access.
    async fn boost_activation(
        &self,
        uid: &str,
        cfg: &ActivationConfig,
        boost: f64,
    ) -> Result<ActivationState> {
        let cfg = cfg.clone();
        self.update_if_unchanged(uid, move |node| {
            ActivationState::new(
                cfg.clamp(node.activation + boost),
                node.access_count.saturating_add(1),
            )
        })
        .await
    }

    /// Bump only the access counter, leaving activation untouched.
    async fn increment_access_count(&self, uid: &str) -> Result<ActivationState> {
        self.update_if_unchanged(uid, |node| {
            ActivationState::new(node.activation, node.access_count.saturating_add(1))
        })
        .await
    }

    /// Write a functional edge: archive any current edge of the same
    /// predicate on `from`, then insert the new one as current.
    async fn replace_functional_edge(&self, edge: &Edge, clock: &dyn Clock) -> Result<()> {
        debug_assert!(edge.edge_type.is_functional());
        self.archive_functional(&edge.from, edge.edge_type).await?;
        let edge = edge
            .clone()
            .with_status(EdgeStatus::Current)
            .with_created_at(clock.now());
        self.create_edge(&edge).await
    }
}

#[async_trait]
impl<S: GraphStore + ?Sized> GraphStoreExt for S {}

/// Shared handle alias used across the engine.
pub type SharedGraphStore = Arc<dyn GraphStore>;
