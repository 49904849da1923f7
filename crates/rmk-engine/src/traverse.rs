//! Spreading activation, temporal ranking, and community grouping.
//!
//! Traversal is plain BFS with monotonically decaying carried activation:
//! each hop multiplies by `decay_factor · edge_weight`, so the first visit
//! of a node always dominates any later one. That makes a single
//! `first_seen_at_hop` map a sufficient cycle defence — no per-path visit
//! sets. Nodes outside the requested namespace are dropped silently; the
//! traversal never confirms their existence.

use crate::types::RankedFact;
use chrono::{DateTime, Utc};
use regex::Regex;
use rmk_core::{EdgeStatus, Namespace, Node, Result};
use rmk_graph::{GraphStore, SharedGraphStore};
use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

/// Hard cap on visited nodes per traversal.
const MAX_VISITED: usize = 10_000;
/// Hard cap on queued frontier entries per traversal.
const MAX_QUEUE: usize = 5_000;

/// Traversal tuning.
#[derive(Debug, Clone, Copy)]
pub struct SpreadParams {
    pub decay_factor: f64,
    pub max_hops: u32,
    pub min_activation: f64,
    pub max_results: usize,
}

impl Default for SpreadParams {
    fn default() -> Self {
        Self {
            decay_factor: 0.7,
            max_hops: 3,
            min_activation: 0.05,
            max_results: 50,
        }
    }
}

/// A node reached by traversal, with its carried activation.
#[derive(Debug, Clone)]
pub struct ActivatedNode {
    pub node: Node,
    pub activation: f64,
    pub hops: u32,
}

/// Spreading-activation BFS from `start_uid`, confined to `namespace`.
pub async fn spread(
    store: &SharedGraphStore,
    namespace: &Namespace,
    start_uid: &str,
    params: &SpreadParams,
) -> Result<Vec<ActivatedNode>> {
    let mut visited: HashMap<String, ActivatedNode> = HashMap::new();
    let mut first_seen_at_hop: HashMap<String, u32> = HashMap::new();
    let mut queue: VecDeque<(String, f64, u32)> = VecDeque::new();

    queue.push_back((start_uid.to_string(), 1.0, 0));
    first_seen_at_hop.insert(start_uid.to_string(), 0);

    while let Some((uid, activation, hops)) = queue.pop_front() {
        if activation < params.min_activation {
            continue;
        }
        if let Some(existing) = visited.get(&uid) {
            if existing.activation >= activation {
                continue;
            }
        }

        let Some(node) = store.get_node(&uid).await? else {
            continue;
        };
        // Tenant isolation holds even mid-traversal: a foreign node is
        // dropped without comment and never expanded.
        if node.namespace.as_ref() != Some(namespace) {
            continue;
        }

        visited.insert(
            uid.clone(),
            ActivatedNode {
                node,
                activation,
                hops,
            },
        );
        if visited.len() >= MAX_VISITED {
            tracing::warn!(start = %start_uid, "traversal visited-node cap reached, stopping");
            break;
        }
        if hops >= params.max_hops {
            continue;
        }

        let next_hop = hops + 1;
        for edge in store.outgoing_edges(&uid).await? {
            if edge.status != EdgeStatus::Current {
                continue;
            }
            match first_seen_at_hop.get(&edge.to) {
                // An earlier (or equal) visit carries at least as much
                // activation; skip.
                Some(seen) if *seen <= next_hop => continue,
                _ => {}
            }
            if queue.len() >= MAX_QUEUE {
                tracing::warn!(start = %start_uid, "traversal queue cap reached, stopping expansion");
                break;
            }
            first_seen_at_hop.insert(edge.to.clone(), next_hop);
            let carried = activation * params.decay_factor * edge.weight_or_default();
            queue.push_back((edge.to, carried, next_hop));
        }
    }

    let mut results: Vec<ActivatedNode> = visited.into_values().collect();
    results.sort_by(|a, b| {
        b.activation
            .partial_cmp(&a.activation)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(params.max_results);
    Ok(results)
}

/// Temporal ranking tuning.
#[derive(Debug, Clone, Copy)]
pub struct RankParams {
    pub recency_cutoff_days: i64,
    pub recency_weight: f64,
    pub max_results: usize,
}

impl Default for RankParams {
    fn default() -> Self {
        Self {
            recency_cutoff_days: 365,
            recency_weight: 0.3,
            max_results: 50,
        }
    }
}

/// Blend carried activation with recency and rank.
///
/// Candidates whose last access lies beyond the cutoff are rejected
/// outright; the rest score `activation·(1−w) + recency·w`.
#[must_use]
pub fn rank_temporal(
    candidates: Vec<ActivatedNode>,
    now: DateTime<Utc>,
    params: &RankParams,
) -> Vec<RankedFact> {
    let mut ranked: Vec<RankedFact> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let days_since = (now - candidate.node.last_accessed).num_days();
            if days_since > params.recency_cutoff_days {
                return None;
            }
            let recency =
                (1.0 - days_since as f64 / params.recency_cutoff_days as f64).max(0.0);
            let final_score = candidate.activation * (1.0 - params.recency_weight)
                + recency * params.recency_weight;
            Some(RankedFact {
                uid: candidate.node.uid,
                name: candidate.node.name,
                description: candidate.node.description,
                activation: candidate.activation,
                final_score,
                last_accessed: candidate.node.last_accessed,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(params.max_results);
    ranked
}

static COMMUNITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // compile-time constant
    Regex::new(r"(?i)\b(department|team|group|community)\s*:\s*([A-Za-z0-9_-]+)").expect("community regex")
});

/// Extract a node's community marker from its description.
#[must_use]
pub fn extract_community(description: &str) -> Option<(String, String)> {
    COMMUNITY_RE.captures(description).map(|caps| {
        (
            caps[1].to_lowercase(),
            caps[2].to_lowercase(),
        )
    })
}

/// Namespace peers sharing the seed's community marker.
///
/// The candidate pool is bounded to `max_results · 2` fetched nodes.
pub async fn community_peers(
    store: &SharedGraphStore,
    namespace: &Namespace,
    seed_uid: &str,
    max_results: usize,
) -> Result<Vec<Node>> {
    let Some(seed) = store.get_node(seed_uid).await? else {
        return Ok(Vec::new());
    };
    if seed.namespace.as_ref() != Some(namespace) {
        return Ok(Vec::new());
    }
    let Some((_, seed_value)) = extract_community(&seed.description) else {
        return Ok(Vec::new());
    };

    let peers = store
        .list_named_nodes(namespace)
        .await?
        .into_iter()
        .take(max_results * 2)
        .filter(|node| node.uid != seed_uid)
        .filter(|node| {
            extract_community(&node.description)
                .map(|(_, value)| value == seed_value)
                .unwrap_or(false)
        })
        .take(max_results)
        .collect();
    Ok(peers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use rmk_core::{Edge, EdgeType, Node, NodeType};
    use rmk_graph::{GraphStore, MemoryGraphStore};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    fn ns() -> Namespace {
        Namespace::parse("user_alice").unwrap()
    }

    async fn node(store: &MemoryGraphStore, name: &str) -> String {
        store
            .create_node(&Node::new(NodeType::Entity, name, now()).with_namespace(ns()))
            .await
            .unwrap()
    }

    async fn edge(store: &MemoryGraphStore, from: &str, to: &str, weight: f64) {
        store
            .create_edge(&Edge::new(from, to, EdgeType::Knows).with_weight(weight))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_single_hop_decay_times_weight() {
        let store = Arc::new(MemoryGraphStore::new());
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        edge(&store, &a, &b, 0.5).await;

        let shared: SharedGraphStore = store;
        let results = spread(&shared, &ns(), &a, &SpreadParams::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].node.uid, a);
        assert!((results[0].activation - 1.0).abs() < 1e-12);
        assert_eq!(results[1].node.uid, b);
        assert!((results[1].activation - 0.35).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_max_hops_bounds_expansion() {
        let store = Arc::new(MemoryGraphStore::new());
        let uids = {
            let mut uids = Vec::new();
            for i in 0..6 {
                uids.push(node(&store, &format!("n{i}")).await);
            }
            uids
        };
        for pair in uids.windows(2) {
            edge(&store, &pair[0], &pair[1], 1.0).await;
        }

        let shared: SharedGraphStore = store;
        let params = SpreadParams {
            max_hops: 2,
            min_activation: 0.0001,
            ..Default::default()
        };
        let results = spread(&shared, &ns(), &uids[0], &params).await.unwrap();
        // Start + 2 hops.
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let store = Arc::new(MemoryGraphStore::new());
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        edge(&store, &a, &b, 1.0).await;
        edge(&store, &b, &a, 1.0).await;

        let shared: SharedGraphStore = store;
        let results = spread(&shared, &ns(), &a, &SpreadParams::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_min_activation_prunes() {
        let store = Arc::new(MemoryGraphStore::new());
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        // 1.0 * 0.7 * 0.05 = 0.035 < 0.05 floor.
        edge(&store, &a, &b, 0.05).await;

        let shared: SharedGraphStore = store;
        let results = spread(&shared, &ns(), &a, &SpreadParams::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_archived_edges_not_followed() {
        let store = Arc::new(MemoryGraphStore::new());
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        store
            .create_edge(
                &Edge::new(&a, &b, EdgeType::WorksAt).with_status(EdgeStatus::Archived),
            )
            .await
            .unwrap();

        let shared: SharedGraphStore = store;
        let results = spread(&shared, &ns(), &a, &SpreadParams::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_namespace_nodes_dropped_silently() {
        let store = Arc::new(MemoryGraphStore::new());
        let a = node(&store, "a").await;
        let foreign = store
            .create_node(
                &Node::new(NodeType::Entity, "secret", now())
                    .with_namespace(Namespace::parse("user_bob").unwrap()),
            )
            .await
            .unwrap();
        edge(&store, &a, &foreign, 1.0).await;

        let shared: SharedGraphStore = store;
        let results = spread(&shared, &ns(), &a, &SpreadParams::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].node.uid, a);
    }

    fn activated(name: &str, activation: f64, last_accessed_days_ago: i64) -> ActivatedNode {
        let mut node = Node::new(NodeType::Entity, name, now() - chrono::Duration::days(400))
            .with_namespace(ns());
        node.last_accessed = now() - chrono::Duration::days(last_accessed_days_ago);
        node.uid = format!("0x{name}");
        ActivatedNode {
            node,
            activation,
            hops: 1,
        }
    }

    #[test]
    fn test_rank_blends_recency() {
        let params = RankParams {
            recency_cutoff_days: 100,
            recency_weight: 0.3,
            max_results: 10,
        };
        let ranked = rank_temporal(
            vec![activated("old", 0.9, 90), activated("fresh", 0.5, 0)],
            now(),
            &params,
        );
        // old: 0.9*0.7 + 0.1*0.3 = 0.66 ; fresh: 0.5*0.7 + 1.0*0.3 = 0.65
        assert_eq!(ranked[0].name, "old");
        assert!((ranked[0].final_score - 0.66).abs() < 1e-9);
        assert!((ranked[1].final_score - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_rank_rejects_beyond_cutoff() {
        let params = RankParams {
            recency_cutoff_days: 30,
            recency_weight: 0.3,
            max_results: 10,
        };
        let ranked = rank_temporal(vec![activated("stale", 1.0, 31)], now(), &params);
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_extract_community() {
        assert_eq!(
            extract_community("Works in department: Engineering at Acme"),
            Some(("department".to_string(), "engineering".to_string()))
        );
        assert_eq!(
            extract_community("team:platform"),
            Some(("team".to_string(), "platform".to_string()))
        );
        assert_eq!(extract_community("no marker here"), None);
    }

    #[tokio::test]
    async fn test_community_peers() {
        let store = Arc::new(MemoryGraphStore::new());
        let seed = store
            .create_node(
                &Node::new(NodeType::Entity, "Sarah", now())
                    .with_namespace(ns())
                    .with_description("department: engineering"),
            )
            .await
            .unwrap();
        store
            .create_node(
                &Node::new(NodeType::Entity, "Bob", now())
                    .with_namespace(ns())
                    .with_description("department: engineering"),
            )
            .await
            .unwrap();
        store
            .create_node(
                &Node::new(NodeType::Entity, "Carol", now())
                    .with_namespace(ns())
                    .with_description("department: sales"),
            )
            .await
            .unwrap();

        let shared: SharedGraphStore = store;
        let peers = community_peers(&shared, &ns(), &seed, 10).await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "Bob");
    }
}
