//! Dgraph HTTP adapter.
//!
//! Implements the [`GraphStore`] contract over Dgraph's HTTP API
//! (`/query`, `/mutate?commitNow=true`, `/alter`). Node writes go out as
//! JSON set mutations; edge writes go out as N-Quads so weight, status,
//! confidence, and timestamp facets ride on the triple. Conditional
//! activation updates compile to upsert blocks with an `@if` guard.
//!
//! Every literal embedded in an N-Quad passes through the escaper in
//! [`crate::nquad`]; every caller-supplied literal in a query travels as a
//! `$var` binding, never by string pasting.

use crate::nquad;
use crate::store::{ActivationState, BatchCreated, GraphStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rmk_core::{
    ActivationConfig, Clock, Edge, EdgeStatus, EdgeType, Error, Namespace, Node, NodeType, Result,
    SystemClock,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Predicates selected whenever a full node is read back.
const NODE_FRAGMENT: &str = "\
uid \
dgraph.type \
name \
description \
tags \
attributes \
namespace \
activation \
access_count \
confidence \
source_conversation_id \
created_at \
updated_at \
last_accessed \
occurred_at \
valid_from \
valid_until";

/// Graph store backed by a Dgraph cluster over HTTP.
pub struct DgraphStore {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    activation: ActivationConfig,
    clock: Arc<dyn Clock>,
}

impl DgraphStore {
    /// Connect to the given Dgraph HTTP endpoint (e.g. `http://localhost:8080`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::store(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
            activation: ActivationConfig::default(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Override the default 10 s per-call deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the activation bounds used to clamp writes.
    #[must_use]
    pub fn with_activation_config(mut self, activation: ActivationConfig) -> Self {
        self.activation = activation;
        self
    }

    /// Use an explicit clock for write timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The DQL schema the engine requires: indexed predicates plus
    /// `@reverse` on the functional edges so archival can traverse back.
    #[must_use]
    pub fn schema() -> String {
        let mut schema = String::from(
            "name: string @index(exact, term, trigram) .\n\
             description: string @index(term) .\n\
             tags: [string] @index(term) .\n\
             namespace: string @index(exact) .\n\
             activation: float @index(float) .\n\
             access_count: int @index(int) .\n\
             is_active: bool @index(bool) .\n\
             workspace_id: string @index(exact) .\n\
             token: string @index(exact) .\n\
             role: string @index(exact) .\n\
             invitee_user_id: string @index(exact) .\n\
             created_by: string @index(exact) .\n\
             entity_type: string @index(exact) .\n",
        );
        for edge_type in EdgeType::ALL {
            let reverse = if edge_type.is_functional() {
                " @reverse"
            } else {
                ""
            };
            schema.push_str(&format!("{}: [uid]{reverse} .\n", edge_type.as_str()));
        }
        schema
    }

    /// Push the schema to the cluster. Run once at deploy time.
    pub async fn ensure_schema(&self) -> Result<()> {
        let url = format!("{}/alter", self.base_url);
        let response = self
            .bounded(self.client.post(&url).body(Self::schema()).send())
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = std::result::Result<T, reqwest::Error>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if err.is_timeout() || err.is_connect() => {
                Err(Error::transient(err.to_string()))
            }
            Ok(Err(err)) => Err(Error::store(err.to_string())),
            Err(_) => Err(Error::transient(format!(
                "dgraph call exceeded {:?} deadline",
                self.timeout
            ))),
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::store(format!("malformed dgraph response: {e}")))?;
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let msg = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("; ");
                return if msg.contains("Transaction has been aborted") {
                    Err(Error::transient(msg))
                } else {
                    Err(Error::store(msg))
                };
            }
        }
        if status.is_server_error() {
            return Err(Error::transient(format!("dgraph returned {status}")));
        }
        if !status.is_success() {
            return Err(Error::store(format!("dgraph returned {status}")));
        }
        Ok(body)
    }

    async fn run_query(&self, text: &str, vars: &HashMap<String, String>) -> Result<Value> {
        let url = format!("{}/query", self.base_url);
        let body = json!({ "query": text, "variables": vars });
        let response = self
            .bounded(self.client.post(&url).json(&body).send())
            .await?;
        let body = Self::check_status(response).await?;
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn run_mutate(&self, body: Value) -> Result<Value> {
        let url = format!("{}/mutate?commitNow=true", self.base_url);
        let response = self
            .bounded(self.client.post(&url).json(&body).send())
            .await?;
        Self::check_status(response).await
    }

    fn edge_nquad(edge: &Edge) -> String {
        let mut facets = vec![
            format!("weight={}", edge.weight_or_default()),
            format!("status={}", nquad::literal(edge.status.as_str())),
        ];
        if let Some(confidence) = edge.confidence {
            facets.push(format!("confidence={confidence}"));
        }
        if let Some(created_at) = edge.created_at {
            facets.push(format!("created_at={}", nquad::literal(&rfc3339(created_at))));
        }
        format!(
            "<{}> <{}> <{}> ({}) .",
            edge.from,
            edge.edge_type.as_str(),
            edge.to,
            facets.join(", ")
        )
    }

    fn wire_node(&self, node: &Node, blank: &str) -> Result<Value> {
        node.validate()?;
        let mut clamped = node.clone();
        clamped.activation = self.activation.clamp(node.activation);
        let wire = WireNode::from_node(&clamped, blank);
        serde_json::to_value(wire).map_err(Error::from)
    }

    fn parse_nodes(data: &Value, block: &str) -> Vec<Node> {
        data.get(block)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        serde_json::from_value::<WireNode>(item.clone())
                            .ok()
                            .map(WireNode::into_node)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse_first_node(data: &Value, block: &str) -> Option<Node> {
        Self::parse_nodes(data, block).into_iter().next()
    }

    /// Read current edges of one predicate with facets, as stored.
    async fn current_edges_with_facets(&self, from: &str, edge_type: EdgeType) -> Result<Vec<Edge>> {
        let all = self.edges_from(from, edge_type).await?;
        Ok(all
            .into_iter()
            .filter(|e| e.status == EdgeStatus::Current)
            .collect())
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Wire representation of a node as Dgraph predicates.
#[derive(Debug, Serialize, Deserialize)]
struct WireNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    uid: Option<String>,
    #[serde(rename = "dgraph.type")]
    types: Vec<String>,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attributes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    activation: f64,
    access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_conversation_id: Option<String>,
    created_at: String,
    updated_at: String,
    last_accessed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    occurred_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    valid_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    valid_until: Option<String>,
}

impl WireNode {
    fn from_node(node: &Node, blank: &str) -> Self {
        Self {
            uid: Some(if node.uid.is_empty() {
                format!("_:{blank}")
            } else {
                node.uid.clone()
            }),
            types: node.types.iter().map(|t| t.as_str().to_string()).collect(),
            name: node.name.clone(),
            description: node.description.clone(),
            tags: node.tags.clone(),
            attributes: if node.attributes.is_empty() {
                None
            } else {
                serde_json::to_string(&node.attributes).ok()
            },
            namespace: node.namespace.as_ref().map(|ns| ns.as_str().to_string()),
            activation: node.activation,
            access_count: node.access_count,
            confidence: node.confidence,
            source_conversation_id: node.source_conversation_id.clone(),
            created_at: rfc3339(node.created_at),
            updated_at: rfc3339(node.updated_at),
            last_accessed: rfc3339(node.last_accessed),
            occurred_at: node.occurred_at.map(rfc3339),
            valid_from: node.valid_from.map(rfc3339),
            valid_until: node.valid_until.map(rfc3339),
        }
    }

    fn into_node(self) -> Node {
        let parse_ts = |raw: &str| raw.parse::<DateTime<Utc>>().unwrap_or_default();
        let created_at = parse_ts(&self.created_at);
        Node {
            uid: self.uid.unwrap_or_default(),
            types: self
                .types
                .iter()
                .filter_map(|t| t.parse::<NodeType>().ok())
                .collect(),
            name: self.name,
            description: self.description,
            tags: self.tags,
            attributes: self
                .attributes
                .as_deref()
                .and_then(|raw| serde_json::from_str::<BTreeMap<String, String>>(raw).ok())
                .unwrap_or_default(),
            created_at,
            updated_at: parse_ts(&self.updated_at),
            last_accessed: parse_ts(&self.last_accessed).max(created_at),
            occurred_at: self.occurred_at.as_deref().map(parse_ts),
            valid_from: self.valid_from.as_deref().map(parse_ts),
            valid_until: self.valid_until.as_deref().map(parse_ts),
            activation: self.activation,
            access_count: self.access_count,
            source_conversation_id: self.source_conversation_id,
            confidence: self.confidence,
            namespace: self
                .namespace
                .and_then(|ns| Namespace::parse(ns).ok()),
            embedding: None,
        }
    }
}

#[async_trait]
impl GraphStore for DgraphStore {
    async fn create_node(&self, node: &Node) -> Result<String> {
        let wire = self.wire_node(node, "n0")?;
        let response = self.run_mutate(json!({ "set": [wire] })).await?;
        response
            .pointer("/data/uids/n0")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::store("mutation returned no uid"))
    }

    async fn create_nodes(&self, nodes: &[Node]) -> Result<BatchCreated> {
        let mut outcome = BatchCreated::default();
        if nodes.is_empty() {
            return Ok(outcome);
        }

        // Validation failures never reach the wire.
        let mut wires = Vec::new();
        let mut wired_names = Vec::new();
        for (idx, node) in nodes.iter().enumerate() {
            match self.wire_node(node, &format!("n{idx}")) {
                Ok(wire) => {
                    wires.push(wire);
                    wired_names.push((format!("n{idx}"), node.name.clone()));
                }
                Err(err) => outcome.failures.push((node.name.clone(), err.to_string())),
            }
        }

        match self.run_mutate(json!({ "set": wires })).await {
            Ok(response) => {
                for (blank, name) in wired_names {
                    match response
                        .pointer(&format!("/data/uids/{blank}"))
                        .and_then(Value::as_str)
                    {
                        Some(uid) => {
                            outcome.uids.insert(name, uid.to_string());
                        }
                        None => outcome.failures.push((name, "no uid returned".to_string())),
                    }
                }
            }
            Err(batch_err) => {
                // Degrade to per-node creation so one bad input cannot sink
                // the whole batch.
                tracing::warn!(error = %batch_err, "batch create failed, degrading to per-node");
                for node in nodes {
                    if outcome.failures.iter().any(|(n, _)| *n == node.name) {
                        continue;
                    }
                    match self.create_node(node).await {
                        Ok(uid) => {
                            outcome.uids.insert(node.name.clone(), uid);
                        }
                        Err(err) => {
                            outcome.failures.push((node.name.clone(), err.to_string()));
                        }
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn get_node(&self, uid: &str) -> Result<Option<Node>> {
        let text = format!(
            "query node($uid: string) {{ node(func: uid($uid)) {{ {NODE_FRAGMENT} }} }}"
        );
        let vars = HashMap::from([("$uid".to_string(), uid.to_string())]);
        let data = self.run_query(&text, &vars).await?;
        Ok(Self::parse_first_node(&data, "node"))
    }

    async fn find_node(
        &self,
        namespace: &Namespace,
        name: &str,
        node_type: Option<NodeType>,
    ) -> Result<Option<Node>> {
        let type_filter = node_type
            .map(|t| format!(" AND type({})", t.as_str()))
            .unwrap_or_default();
        let text = format!(
            "query find($ns: string, $name: string) {{ \
             node(func: eq(name, $name), first: 1) \
             @filter(eq(namespace, $ns){type_filter}) {{ {NODE_FRAGMENT} }} }}"
        );
        let vars = HashMap::from([
            ("$ns".to_string(), namespace.as_str().to_string()),
            ("$name".to_string(), name.to_string()),
        ]);
        let data = self.run_query(&text, &vars).await?;
        Ok(Self::parse_first_node(&data, "node"))
    }

    async fn find_node_ci(&self, namespace: &Namespace, name: &str) -> Result<Option<Node>> {
        // regexp() wants the pattern inline; the name is regex-escaped so
        // only the case-insensitivity is dynamic.
        let pattern = regex::escape(name);
        let text = format!(
            "query find($ns: string) {{ \
             node(func: eq(namespace, $ns), first: 1) \
             @filter(regexp(name, /^{pattern}$/i)) {{ {NODE_FRAGMENT} }} }}"
        );
        let vars = HashMap::from([("$ns".to_string(), namespace.as_str().to_string())]);
        let data = self.run_query(&text, &vars).await?;
        Ok(Self::parse_first_node(&data, "node"))
    }

    async fn get_nodes_by_uids(&self, uids: &[String]) -> Result<Vec<Node>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        // uid() accepts a literal list; uids are store-assigned hex, not
        // caller-controlled text.
        let list = uids.join(", ");
        let text =
            format!("{{ nodes(func: uid({list})) {{ {NODE_FRAGMENT} }} }}");
        let data = self.run_query(&text, &HashMap::new()).await?;
        Ok(Self::parse_nodes(&data, "nodes"))
    }

    async fn get_nodes_by_names(
        &self,
        namespace: &Namespace,
        names: &[String],
    ) -> Result<Vec<Node>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut nodes = Vec::new();
        let mut seen = HashSet::new();
        for name in names {
            if let Some(node) = self.find_node(namespace, name, None).await? {
                if seen.insert(node.uid.clone()) {
                    nodes.push(node);
                }
            }
        }
        Ok(nodes)
    }

    async fn list_named_nodes(&self, namespace: &Namespace) -> Result<Vec<Node>> {
        let text = format!(
            "query all($ns: string) {{ \
             nodes(func: eq(namespace, $ns)) @filter(has(name)) {{ {NODE_FRAGMENT} }} }}"
        );
        let vars = HashMap::from([("$ns".to_string(), namespace.as_str().to_string())]);
        let data = self.run_query(&text, &vars).await?;
        Ok(Self::parse_nodes(&data, "nodes"))
    }

    async fn search_nodes(&self, namespace: &Namespace, term: &str) -> Result<Vec<Node>> {
        let text = format!(
            "query search($ns: string, $term: string) {{ \
             nodes(func: eq(namespace, $ns)) \
             @filter(anyoftext(name, $term) OR anyoftext(description, $term) \
             OR anyoftext(tags, $term)) {{ {NODE_FRAGMENT} }} }}"
        );
        let vars = HashMap::from([
            ("$ns".to_string(), namespace.as_str().to_string()),
            ("$term".to_string(), term.to_string()),
        ]);
        let data = self.run_query(&text, &vars).await?;
        let mut seen = HashSet::new();
        Ok(Self::parse_nodes(&data, "nodes")
            .into_iter()
            .filter(|n| seen.insert(n.uid.clone()))
            .collect())
    }

    async fn nodes_by_type(
        &self,
        namespace: Option<&Namespace>,
        node_type: NodeType,
        limit: usize,
    ) -> Result<Vec<Node>> {
        let (filter, vars) = match namespace {
            Some(ns) => (
                " @filter(eq(namespace, $ns))".to_string(),
                HashMap::from([("$ns".to_string(), ns.as_str().to_string())]),
            ),
            None => (String::new(), HashMap::new()),
        };
        let text = format!(
            "query typed($ns: string) {{ \
             nodes(func: type({}), first: {limit}){filter} {{ {NODE_FRAGMENT} }} }}",
            node_type.as_str()
        );
        let data = self.run_query(&text, &vars).await?;
        Ok(Self::parse_nodes(&data, "nodes"))
    }

    async fn nodes_with_activation_above(
        &self,
        namespace: &Namespace,
        floor: f64,
    ) -> Result<Vec<Node>> {
        let text = format!(
            "query hot($ns: string) {{ \
             nodes(func: eq(namespace, $ns)) @filter(gt(activation, {floor})) \
             {{ {NODE_FRAGMENT} }} }}"
        );
        let vars = HashMap::from([("$ns".to_string(), namespace.as_str().to_string())]);
        let data = self.run_query(&text, &vars).await?;
        Ok(Self::parse_nodes(&data, "nodes"))
    }

    async fn create_edge(&self, edge: &Edge) -> Result<()> {
        let nquads = Self::edge_nquad(edge);
        self.run_mutate(json!({ "setNquads": nquads })).await?;
        Ok(())
    }

    async fn create_edges(&self, edges: &[Edge]) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }
        let nquads = edges
            .iter()
            .map(Self::edge_nquad)
            .collect::<Vec<_>>()
            .join("\n");
        self.run_mutate(json!({ "setNquads": nquads })).await?;
        Ok(edges.len())
    }

    async fn outgoing_edges(&self, uid: &str) -> Result<Vec<Edge>> {
        // One query selecting every declared predicate with @facets.
        let mut body = String::new();
        for edge_type in EdgeType::ALL {
            body.push_str(&format!("{} @facets {{ uid }} ", edge_type.as_str()));
        }
        let text = format!("query out($uid: string) {{ node(func: uid($uid)) {{ uid {body} }} }}");
        let vars = HashMap::from([("$uid".to_string(), uid.to_string())]);
        let data = self.run_query(&text, &vars).await?;

        let Some(node) = data
            .get("node")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
        else {
            return Ok(Vec::new());
        };

        let mut edges = Vec::new();
        for edge_type in EdgeType::ALL {
            let Some(children) = node.get(edge_type.as_str()).and_then(Value::as_array) else {
                continue;
            };
            for child in children {
                edges.push(parse_edge_child(uid, edge_type, child));
            }
        }
        Ok(edges)
    }

    async fn edges_from(&self, uid: &str, edge_type: EdgeType) -> Result<Vec<Edge>> {
        let text = format!(
            "query out($uid: string) {{ node(func: uid($uid)) {{ uid {} @facets {{ uid }} }} }}",
            edge_type.as_str()
        );
        let vars = HashMap::from([("$uid".to_string(), uid.to_string())]);
        let data = self.run_query(&text, &vars).await?;
        let Some(node) = data
            .get("node")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
        else {
            return Ok(Vec::new());
        };
        Ok(node
            .get(edge_type.as_str())
            .and_then(Value::as_array)
            .map(|children| {
                children
                    .iter()
                    .map(|child| parse_edge_child(uid, edge_type, child))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_edge_status(
        &self,
        from: &str,
        to: &str,
        edge_type: EdgeType,
        status: EdgeStatus,
    ) -> Result<()> {
        let edges = self.edges_from(from, edge_type).await?;
        let Some(edge) = edges.into_iter().find(|e| e.to == to) else {
            return Err(Error::not_found(format!("edge {from} -{edge_type}-> {to}")));
        };
        // Facets can only be replaced by rewriting the triple.
        let rewritten = edge.with_status(status);
        self.create_edge(&rewritten).await
    }

    async fn archive_functional(&self, from: &str, edge_type: EdgeType) -> Result<usize> {
        let current = self.current_edges_with_facets(from, edge_type).await?;
        if current.is_empty() {
            return Ok(0);
        }
        let rewritten: Vec<Edge> = current
            .into_iter()
            .map(|e| e.with_status(EdgeStatus::Archived))
            .collect();
        let count = rewritten.len();
        self.create_edges(&rewritten).await?;
        Ok(count)
    }

    async fn conflicting_functional_sources(
        &self,
        edge_type: EdgeType,
        namespace: Option<&Namespace>,
    ) -> Result<Vec<String>> {
        let (filter, vars) = match namespace {
            Some(ns) => (
                " @filter(eq(namespace, $ns))".to_string(),
                HashMap::from([("$ns".to_string(), ns.as_str().to_string())]),
            ),
            None => (String::new(), HashMap::new()),
        };
        let pred = edge_type.as_str();
        let text = format!(
            "query conflicted($ns: string) {{ \
             nodes(func: has({pred})){filter} {{ uid {pred} @facets {{ uid }} }} }}"
        );
        let data = self.run_query(&text, &vars).await?;

        let mut conflicted = Vec::new();
        if let Some(nodes) = data.get("nodes").and_then(Value::as_array) {
            for node in nodes {
                let Some(uid) = node.get("uid").and_then(Value::as_str) else {
                    continue;
                };
                let current = node
                    .get(pred)
                    .and_then(Value::as_array)
                    .map(|children| {
                        children
                            .iter()
                            .filter(|child| {
                                parse_edge_child(uid, edge_type, child).status
                                    == EdgeStatus::Current
                            })
                            .count()
                    })
                    .unwrap_or(0);
                if current > 1 {
                    conflicted.push(uid.to_string());
                }
            }
        }
        Ok(conflicted)
    }

    async fn update_activation(
        &self,
        uid: &str,
        expected: ActivationState,
        next: ActivationState,
    ) -> Result<()> {
        let now = rfc3339(self.clock.now());
        let next_activation = self.activation.clamp(next.activation);
        // Upsert: bind the node only while the expected state still holds,
        // then mutate under an @if guard on the binding.
        let query = format!(
            "query {{ \
             target as var(func: uid({uid})) \
             @filter(eq(activation, {}) AND eq(access_count, {})) \
             check(func: uid(target)) {{ uid }} }}",
            expected.activation, expected.access_count
        );
        let mut set = serde_json::Map::new();
        set.insert("uid".to_string(), json!("uid(target)"));
        set.insert("activation".to_string(), json!(next_activation));
        set.insert("access_count".to_string(), json!(next.access_count));
        set.insert("updated_at".to_string(), json!(now));
        // Only a genuine access refreshes recency; decay writes do not.
        if next.access_count > expected.access_count {
            set.insert("last_accessed".to_string(), json!(now));
        }
        let body = json!({
            "query": query,
            "mutations": [{
                "cond": "@if(eq(len(target), 1))",
                "set": [Value::Object(set)],
            }],
        });
        let response = self.run_mutate(body).await?;
        let matched = response
            .pointer("/data/queries/check")
            .and_then(Value::as_array)
            .map(|hits| !hits.is_empty())
            .unwrap_or(false);
        if matched {
            Ok(())
        } else {
            Err(Error::PreconditionFailed(format!(
                "node {uid} changed underneath the update"
            )))
        }
    }

    async fn enrich_node(
        &self,
        uid: &str,
        description: Option<&str>,
        tags: &[String],
    ) -> Result<()> {
        let mut set = serde_json::Map::new();
        set.insert("uid".to_string(), json!(uid));
        set.insert("updated_at".to_string(), json!(rfc3339(self.clock.now())));
        if let Some(description) = description {
            if !description.is_empty() {
                set.insert("description".to_string(), json!(description));
            }
        }
        if !tags.is_empty() {
            set.insert("tags".to_string(), json!(tags));
        }
        self.run_mutate(json!({ "set": [Value::Object(set)] }))
            .await?;
        Ok(())
    }

    async fn delete_node(&self, uid: &str, namespace: &Namespace) -> Result<()> {
        let node = self
            .get_node(uid)
            .await?
            .ok_or_else(|| Error::not_found(format!("node {uid}")))?;
        if node.namespace.as_ref() != Some(namespace) {
            return Err(Error::deny("namespace mismatch"));
        }
        self.run_mutate(json!({ "delete": [{ "uid": uid }] }))
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        text: &str,
        vars: &HashMap<String, String>,
    ) -> Result<serde_json::Value> {
        self.run_query(text, vars).await
    }

    async fn mutate(&self, ops: serde_json::Value) -> Result<()> {
        self.run_mutate(ops).await?;
        Ok(())
    }
}

/// Decode one edge child object (`{"uid": …, "<pred>|weight": …, …}`).
fn parse_edge_child(from: &str, edge_type: EdgeType, child: &Value) -> Edge {
    let pred = edge_type.as_str();
    let to = child
        .get("uid")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let facet = |name: &str| child.get(format!("{pred}|{name}"));

    let mut edge = Edge::new(from, to, edge_type);
    if let Some(weight) = facet("weight").and_then(Value::as_f64) {
        edge.weight = Some(weight);
    }
    if let Some(status) = facet("status").and_then(Value::as_str) {
        edge.status = match status {
            "archived" => EdgeStatus::Archived,
            "pending" => EdgeStatus::Pending,
            _ => EdgeStatus::Current,
        };
    }
    if let Some(confidence) = facet("confidence").and_then(Value::as_f64) {
        edge.confidence = Some(confidence);
    }
    if let Some(created_at) = facet("created_at").and_then(Value::as_str) {
        edge.created_at = created_at.parse().ok();
    }
    edge
}
