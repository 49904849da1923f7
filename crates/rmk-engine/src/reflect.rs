//! Reflection: decay, contradiction resolution, synthesis.
//!
//! A background pass over every active namespace. Decay applies the daily
//! exponential rate for each whole day elapsed since a node's last write,
//! so the trajectory is the same whether ticks run every five minutes or
//! once a week. Contradiction resolution restores functional-edge
//! uniqueness by keeping the strongest claim and archiving the rest.
//! Synthesis distils batches of crystallised fact summaries into Insight
//! nodes via the Cognifier.
//!
//! Cancellation is polled between namespaces and between phases; a
//! shutdown mid-tick finishes the in-flight mutation and stops.

use crate::types::NamespaceRegistry;
use rmk_cognify::{Cognifier, CommunitySummaryRequest};
use rmk_core::{
    AuditEvent, Clock, Edge, EdgeStatus, EdgeType, EngineConfig, Namespace, Node, NodeType, Result,
};
use rmk_graph::{ActivationState, GraphStore, GraphStoreExt, SharedGraphStore};
use rmk_guard::AuditLogger;
use std::sync::Arc;
use tokio::sync::watch;

/// Tag marking a crystallised fact as already synthesised into an insight.
const SYNTHESIZED_TAG: &str = "synthesized";

/// What one reflection tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReflectionReport {
    pub namespaces: usize,
    pub decayed: usize,
    pub conflicts_resolved: usize,
    pub insights_created: usize,
}

/// Periodic reflection worker.
pub struct ReflectionLoop {
    store: SharedGraphStore,
    cognifier: Arc<dyn Cognifier>,
    audit: Arc<AuditLogger>,
    registry: NamespaceRegistry,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ReflectionLoop {
    #[must_use]
    pub fn new(
        store: SharedGraphStore,
        cognifier: Arc<dyn Cognifier>,
        audit: Arc<AuditLogger>,
        registry: NamespaceRegistry,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            cognifier,
            audit,
            registry,
            clock,
            config,
        }
    }

    /// Run ticks until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.reflection_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so boot isn't a tick.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick(Some(&shutdown)).await {
                        tracing::error!(error = %err, "reflection tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// One full reflection pass over every active namespace.
    pub async fn tick(&self, cancel: Option<&watch::Receiver<bool>>) -> Result<ReflectionReport> {
        let cancelled = || cancel.is_some_and(|rx| *rx.borrow());
        let mut report = ReflectionReport::default();

        for namespace in self.registry.all() {
            if cancelled() {
                break;
            }
            report.namespaces += 1;

            report.decayed += self.decay_namespace(&namespace).await?;
            if cancelled() {
                break;
            }
            report.conflicts_resolved += self.resolve_contradictions(Some(&namespace)).await?;
            if cancelled() {
                break;
            }
            report.insights_created += self.synthesize_namespace(&namespace).await?;
        }
        Ok(report)
    }

    /// Phase 1: activation decay.
    ///
    /// For each node above the floor, apply `(1 − rate)^days` for the whole
    /// days elapsed since its last write. Writes go through the CAS path;
    /// a node that moved underneath the pass is simply skipped this tick.
    pub async fn decay_namespace(&self, namespace: &Namespace) -> Result<usize> {
        let cfg = &self.config.activation;
        let now = self.clock.now();
        let nodes = self
            .store
            .nodes_with_activation_above(namespace, cfg.min_activation)
            .await?;

        let mut decayed = 0usize;
        for node in nodes {
            let days = (now - node.updated_at).num_days();
            if days < 1 {
                continue;
            }
            let factor = (1.0 - cfg.decay_rate_per_day).powi(days as i32);
            let cfg = cfg.clone();
            let outcome = self
                .store
                .update_if_unchanged(&node.uid, move |current| {
                    ActivationState::new(
                        cfg.clamp(current.activation * factor),
                        current.access_count,
                    )
                })
                .await;
            match outcome {
                Ok(_) => decayed += 1,
                Err(err) => {
                    tracing::warn!(uid = %node.uid, error = %err, "decay skipped node");
                }
            }
        }

        if decayed > 0 {
            self.audit
                .log(
                    AuditEvent::allow("REFLECTION_DECAY", "system", "DECAY", now)
                        .with_namespace(namespace.as_str().to_string())
                        .with_metadata("nodes", serde_json::json!(decayed)),
                )
                .await;
        }
        Ok(decayed)
    }

    /// Phase 2: functional-edge contradiction resolution.
    ///
    /// System-wide when called without a namespace (the background worker's
    /// mode); namespace-scoped otherwise. For each conflicted source the
    /// edge with the highest `target activation + confidence` stays
    /// current; the rest are archived.
    pub async fn resolve_contradictions(&self, namespace: Option<&Namespace>) -> Result<usize> {
        let now = self.clock.now();
        let mut resolved = 0usize;

        for edge_type in EdgeType::FUNCTIONAL {
            let sources = self
                .store
                .conflicting_functional_sources(edge_type, namespace)
                .await?;
            for source in sources {
                let current: Vec<Edge> = self
                    .store
                    .edges_from(&source, edge_type)
                    .await?
                    .into_iter()
                    .filter(|e| e.status == EdgeStatus::Current)
                    .collect();
                if current.len() <= 1 {
                    continue;
                }

                let mut scored = Vec::with_capacity(current.len());
                for edge in current {
                    let target_activation = self
                        .store
                        .get_node(&edge.to)
                        .await?
                        .map(|n| n.activation)
                        .unwrap_or(0.0);
                    let score = target_activation + edge.confidence.unwrap_or(0.0);
                    scored.push((score, edge));
                }
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

                for (_, edge) in scored.into_iter().skip(1) {
                    self.store
                        .set_edge_status(&edge.from, &edge.to, edge_type, EdgeStatus::Archived)
                        .await?;
                    resolved += 1;
                }

                self.audit
                    .log(
                        AuditEvent::allow("REFLECTION_CONFLICT", "system", "ARCHIVE_EDGE", now)
                            .with_resource("node", source.clone())
                            .with_metadata("edge_type", serde_json::json!(edge_type.as_str())),
                    )
                    .await;
            }
        }
        Ok(resolved)
    }

    /// Phase 3: synthesis of crystallised summaries into insights.
    pub async fn synthesize_namespace(&self, namespace: &Namespace) -> Result<usize> {
        let now = self.clock.now();
        let facts: Vec<Node> = self
            .store
            .nodes_by_type(Some(namespace), NodeType::Fact, self.config.max_reflection_batch * 2)
            .await?
            .into_iter()
            .filter(|n| n.attributes.get("status").map(String::as_str) == Some("crystallized"))
            .filter(|n| !n.tags.iter().any(|t| t == SYNTHESIZED_TAG))
            .take(self.config.max_reflection_batch)
            .collect();

        if facts.len() < self.config.min_reflection_batch {
            return Ok(0);
        }

        let summaries: Vec<String> = facts
            .iter()
            .map(|f| f.description.clone())
            .filter(|d| !d.is_empty())
            .collect();
        let response = self
            .cognifier
            .summarize_community(&CommunitySummaryRequest {
                community_name: namespace.as_str().to_string(),
                community_type: "crystallized_facts".to_string(),
                entities: summaries,
                max_summary_length: 600,
            })
            .await?;

        let insight_name = if response.insight_type.is_empty() {
            "Reflection Insight".to_string()
        } else {
            format!("Insight: {}", response.insight_type)
        };
        let mut insight = Node::new(NodeType::Insight, insight_name, now)
            .with_namespace(namespace.clone())
            .with_description(response.summary);
        if !response.action_suggestion.is_empty() {
            insight = insight.with_attribute("action_suggestion", response.action_suggestion);
        }
        if let Some(confidence) = response.confidence {
            insight = insight.with_confidence(confidence);
        }
        let insight_uid = self.store.create_node(&insight).await?;

        // Provenance edges, then mark the facts consumed.
        let edges: Vec<Edge> = facts
            .iter()
            .map(|fact| Edge::new(&insight_uid, &fact.uid, EdgeType::DerivedFrom).with_created_at(now))
            .collect();
        self.store.create_edges(&edges).await?;
        for fact in &facts {
            if let Err(err) = self
                .store
                .enrich_node(&fact.uid, None, &[SYNTHESIZED_TAG.to_string()])
                .await
            {
                tracing::warn!(uid = %fact.uid, error = %err, "failed to mark fact synthesized");
            }
        }

        self.audit
            .log(
                AuditEvent::allow("REFLECTION_SYNTHESIS", "system", "CREATE_INSIGHT", now)
                    .with_namespace(namespace.as_str().to_string())
                    .with_resource("node", insight_uid)
                    .with_metadata("facts", serde_json::json!(facts.len())),
            )
            .await;
        Ok(1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use rmk_cognify::testing::ScriptedCognifier;
    use rmk_core::{ManualClock, NullBus};
    use rmk_graph::{GraphStore, MemoryGraphStore};

    fn start() -> chrono::DateTime<chrono::Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    fn ns() -> Namespace {
        Namespace::parse("user_alice").unwrap()
    }

    struct Fixture {
        reflection: ReflectionLoop,
        store: Arc<MemoryGraphStore>,
        clock: ManualClock,
        registry: NamespaceRegistry,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::at(start());
        let store = Arc::new(MemoryGraphStore::with_clock(Arc::new(clock.clone())));
        let registry = NamespaceRegistry::new();
        registry.register(ns());
        let audit = AuditLogger::new(store.clone() as SharedGraphStore, Arc::new(NullBus));
        let reflection = ReflectionLoop::new(
            store.clone() as SharedGraphStore,
            Arc::new(ScriptedCognifier::new()) as Arc<dyn Cognifier>,
            audit,
            registry.clone(),
            Arc::new(clock.clone()),
            EngineConfig::default(),
        );
        Fixture {
            reflection,
            store,
            clock,
            registry,
        }
    }

    #[tokio::test]
    async fn test_decay_thirty_days() {
        let fx = fixture();
        let uid = fx
            .store
            .create_node(
                &Node::new(NodeType::Entity, "Acme", start())
                    .with_namespace(ns())
                    .with_activation(0.5),
            )
            .await
            .unwrap();

        fx.clock.advance(chrono::Duration::days(30));
        let decayed = fx.reflection.decay_namespace(&ns()).await.unwrap();
        assert_eq!(decayed, 1);

        let node = fx.store.get_node(&uid).await.unwrap().unwrap();
        let expected = 0.5 * (1.0 - 0.005f64).powi(30);
        assert!(
            (node.activation - expected).abs() < 1e-9,
            "expected {expected}, got {}",
            node.activation
        );
        // Decay is not an access.
        assert_eq!(node.access_count, 0);
    }

    #[tokio::test]
    async fn test_decay_skips_fresh_nodes() {
        let fx = fixture();
        fx.store
            .create_node(
                &Node::new(NodeType::Entity, "Acme", start())
                    .with_namespace(ns())
                    .with_activation(0.5),
            )
            .await
            .unwrap();

        fx.clock.advance(chrono::Duration::hours(12));
        assert_eq!(fx.reflection.decay_namespace(&ns()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_decay_does_not_repeat_same_day() {
        let fx = fixture();
        let uid = fx
            .store
            .create_node(
                &Node::new(NodeType::Entity, "Acme", start())
                    .with_namespace(ns())
                    .with_activation(0.5),
            )
            .await
            .unwrap();

        fx.clock.advance(chrono::Duration::days(2));
        fx.reflection.decay_namespace(&ns()).await.unwrap();
        let after_first = fx.store.get_node(&uid).await.unwrap().unwrap().activation;

        // Another tick five minutes later must be a no-op.
        fx.clock.advance(chrono::Duration::minutes(5));
        assert_eq!(fx.reflection.decay_namespace(&ns()).await.unwrap(), 0);
        let after_second = fx.store.get_node(&uid).await.unwrap().unwrap().activation;
        assert!((after_first - after_second).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_contradiction_resolution_keeps_strongest() {
        let fx = fixture();
        let alice = fx
            .store
            .create_node(&Node::new(NodeType::User, "alice", start()).with_namespace(ns()))
            .await
            .unwrap();
        let acme = fx
            .store
            .create_node(
                &Node::new(NodeType::Entity, "Acme", start())
                    .with_namespace(ns())
                    .with_activation(0.2),
            )
            .await
            .unwrap();
        let globex = fx
            .store
            .create_node(
                &Node::new(NodeType::Entity, "Globex", start())
                    .with_namespace(ns())
                    .with_activation(0.8),
            )
            .await
            .unwrap();

        // Two current works_at claims.
        fx.store
            .create_edge(&Edge::new(&alice, &acme, EdgeType::WorksAt))
            .await
            .unwrap();
        fx.store
            .create_edge(&Edge::new(&alice, &globex, EdgeType::WorksAt))
            .await
            .unwrap();

        let resolved = fx.reflection.resolve_contradictions(None).await.unwrap();
        assert_eq!(resolved, 1);

        let edges = fx.store.edges_from(&alice, EdgeType::WorksAt).await.unwrap();
        let current: Vec<_> = edges
            .iter()
            .filter(|e| e.status == EdgeStatus::Current)
            .collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].to, globex);
    }

    #[tokio::test]
    async fn test_synthesis_requires_minimum_batch() {
        let fx = fixture();
        // Nine crystallised facts: below the floor of ten.
        for i in 0..9 {
            fx.store
                .create_node(
                    &Node::new(NodeType::Fact, format!("Batch Summary {i}"), start())
                        .with_namespace(ns())
                        .with_description(format!("summary {i}"))
                        .with_attribute("status", "crystallized"),
                )
                .await
                .unwrap();
        }
        assert_eq!(fx.reflection.synthesize_namespace(&ns()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_creates_insight_once() {
        let fx = fixture();
        for i in 0..12 {
            fx.store
                .create_node(
                    &Node::new(NodeType::Fact, format!("Batch Summary {i}"), start())
                        .with_namespace(ns())
                        .with_description(format!("summary {i}"))
                        .with_attribute("status", "crystallized"),
                )
                .await
                .unwrap();
        }

        assert_eq!(fx.reflection.synthesize_namespace(&ns()).await.unwrap(), 1);
        let insights = fx
            .store
            .nodes_by_type(Some(&ns()), NodeType::Insight, 10)
            .await
            .unwrap();
        assert_eq!(insights.len(), 1);

        // Provenance edges point at the facts.
        let derived = fx
            .store
            .edges_from(&insights[0].uid, EdgeType::DerivedFrom)
            .await
            .unwrap();
        assert_eq!(derived.len(), 12);

        // The same facts are not synthesised again.
        assert_eq!(fx.reflection.synthesize_namespace(&ns()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tick_respects_cancellation() {
        let fx = fixture();
        fx.registry.register(Namespace::parse("user_bob").unwrap());
        let (tx, rx) = watch::channel(true); // already cancelled
        let report = fx.reflection.tick(Some(&rx)).await.unwrap();
        assert_eq!(report.namespaces, 0);
        drop(tx);
    }
}
