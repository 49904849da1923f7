//! Entity resolution within a namespace.
//!
//! Ingestion and consultation both need to answer "is this name already a
//! node?" without being fooled by case, invisible characters, or lookalike
//! scripts. The strategy is staged from cheapest to most expensive:
//!
//! 1. exact match on the raw and normalised name,
//! 2. case-insensitive match,
//! 3. for short names, a Levenshtein sweep over every named node in the
//!    namespace (distance ≤ 2, or ≤ 3 past 10 characters).
//!
//! Stage 3 is what collapses homograph variants (`Ѕarah` vs `Sarah`) onto
//! the node already in the graph instead of minting a duplicate.

use crate::store::GraphStore;
use rmk_core::normalize::{fuzzy_distance_ceiling, levenshtein, normalize_name};
use rmk_core::{Namespace, Node, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Names longer than this skip the fuzzy sweep entirely.
const FUZZY_MAX_NAME_LEN: usize = 15;

/// Namespace-scoped entity lookup over a [`GraphStore`].
pub struct EntityResolver {
    store: Arc<dyn GraphStore>,
}

impl EntityResolver {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Find the node an entity name refers to, if any.
    pub async fn find_entity(&self, namespace: &Namespace, name: &str) -> Result<Option<Node>> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return Ok(None);
        }

        // Exact, on the raw then the normalised form.
        if let Some(node) = self.store.find_node(namespace, name, None).await? {
            return Ok(Some(node));
        }
        if normalized != name {
            if let Some(node) = self.store.find_node(namespace, &normalized, None).await? {
                return Ok(Some(node));
            }
        }

        // Case-insensitive.
        if let Some(node) = self.store.find_node_ci(namespace, &normalized).await? {
            return Ok(Some(node));
        }

        // Fuzzy, for short names only.
        if normalized.chars().count() > FUZZY_MAX_NAME_LEN {
            return Ok(None);
        }
        let candidates = self.store.list_named_nodes(namespace).await?;
        Ok(best_fuzzy_match(&normalized, candidates))
    }

    /// Resolve a batch of names against one pre-fetched snapshot of the
    /// namespace, avoiding a store round-trip per name. Returns
    /// `normalised name → node` for every name that resolved.
    pub async fn resolve_against_snapshot(
        &self,
        namespace: &Namespace,
        names: &[String],
    ) -> Result<HashMap<String, Node>> {
        let snapshot = self.store.list_named_nodes(namespace).await?;
        let by_normalized: HashMap<String, &Node> = snapshot
            .iter()
            .map(|n| (normalize_name(&n.name), n))
            .collect();

        let mut resolved = HashMap::new();
        for name in names {
            let normalized = normalize_name(name);
            if normalized.is_empty() || resolved.contains_key(&normalized) {
                continue;
            }
            if let Some(node) = by_normalized.get(&normalized) {
                resolved.insert(normalized, (*node).clone());
                continue;
            }
            if normalized.chars().count() <= FUZZY_MAX_NAME_LEN {
                if let Some(node) = best_fuzzy_match(&normalized, snapshot.clone()) {
                    resolved.insert(normalized, node);
                }
            }
        }
        Ok(resolved)
    }
}

/// The candidate with minimal Levenshtein distance within the ceiling.
fn best_fuzzy_match(normalized: &str, candidates: Vec<Node>) -> Option<Node> {
    let ceiling = fuzzy_distance_ceiling(normalized.chars().count());
    candidates
        .into_iter()
        .filter_map(|node| {
            let candidate = normalize_name(&node.name);
            let distance = levenshtein(normalized, &candidate);
            (distance <= ceiling).then_some((distance, node))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, node)| node)
}
