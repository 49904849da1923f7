//! Ingestion pipeline.
//!
//! Transcript events buffer until the batch size or flush interval fires,
//! then one Cognifier call extracts entities and relations for the whole
//! batch. Extraction failure drops the batch with an error log — there is
//! deliberately no heuristic fallback extractor. Existing entities are
//! boosted rather than duplicated (reconsolidation); genuinely new ones
//! are created in a single batch mutation, and every entity is linked to
//! the batch's crystallised summary node.

use crate::infer::infer_relations;
use crate::types::{BatchOutcome, NamespaceRegistry, TranscriptEvent};
use parking_lot::Mutex;
use rmk_cognify::{Cognifier, CognifyItem, ExtractedEntity, ExtractedRelation};
use rmk_core::normalize::normalize_name;
use rmk_core::{
    AuditEvent, Clock, Edge, EdgeType, EngineConfig, Namespace, Node, NodeType, Result,
};
use rmk_graph::{EntityResolver, GraphStore, GraphStoreExt, SharedGraphStore};
use rmk_guard::AuditLogger;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

/// Buffering ingestion front door.
pub struct IngestionPipeline {
    store: SharedGraphStore,
    cognifier: Arc<dyn Cognifier>,
    resolver: EntityResolver,
    audit: Arc<AuditLogger>,
    registry: NamespaceRegistry,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    buffer: Mutex<Vec<TranscriptEvent>>,
    /// Bulk loads use the smaller per-access boost.
    bulk: bool,
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(
        store: SharedGraphStore,
        cognifier: Arc<dyn Cognifier>,
        audit: Arc<AuditLogger>,
        registry: NamespaceRegistry,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let resolver = EntityResolver::new(Arc::clone(&store));
        Self {
            store,
            cognifier,
            resolver,
            audit,
            registry,
            clock,
            config,
            buffer: Mutex::new(Vec::new()),
            bulk: false,
        }
    }

    /// Switch to bulk-migration boost tuning.
    #[must_use]
    pub fn bulk_mode(mut self) -> Self {
        self.bulk = true;
        self
    }

    /// Queue an event; flushes inline once the batch size is reached.
    pub async fn enqueue(&self, event: TranscriptEvent) -> Result<()> {
        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.push(event);
            buffer.len() >= self.config.ingestion_batch_size
        };
        if should_flush {
            self.flush().await;
        }
        Ok(())
    }

    /// Number of buffered events. Test hook.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Drain the buffer and process one batch per namespace.
    ///
    /// A failed batch is dropped and logged; other namespaces' batches
    /// still run.
    pub async fn flush(&self) -> Vec<BatchOutcome> {
        let events = std::mem::take(&mut *self.buffer.lock());
        if events.is_empty() {
            return Vec::new();
        }

        let mut by_namespace: HashMap<Namespace, Vec<TranscriptEvent>> = HashMap::new();
        for event in events {
            by_namespace
                .entry(event.namespace.clone())
                .or_default()
                .push(event);
        }

        let mut outcomes = Vec::new();
        for (namespace, batch) in by_namespace {
            match self.process_batch(&namespace, &batch).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    tracing::error!(
                        namespace = %namespace,
                        events = batch.len(),
                        error = %err,
                        "cognify failed, dropping batch without fallback extraction"
                    );
                    self.audit
                        .log(
                            AuditEvent::deny(
                                "INGEST",
                                "system",
                                "INGEST_BATCH",
                                err.to_string(),
                                self.clock.now(),
                            )
                            .with_namespace(namespace.as_str().to_string()),
                        )
                        .await;
                }
            }
        }
        outcomes
    }

    /// Run the interval flusher until shutdown; drains the buffer on exit.
    pub async fn run_flusher(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.ingestion_flush_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.flush().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.flush().await;
                        return;
                    }
                }
            }
        }
    }

    async fn process_batch(
        &self,
        namespace: &Namespace,
        events: &[TranscriptEvent],
    ) -> Result<BatchOutcome> {
        let now = self.clock.now();
        self.registry.register(namespace.clone());

        // One extraction call for the whole batch.
        let items: Vec<CognifyItem> = events
            .iter()
            .enumerate()
            .map(|(idx, event)| CognifyItem {
                source_id: format!("{}#{idx}", event.conversation_id),
                source_table: "transcript_events".to_string(),
                content: format!("User: {}\nAssistant: {}", event.user_query, event.ai_response),
                raw_data: serde_json::Value::Null,
            })
            .collect();
        let results = self.cognifier.cognify_batch(&items).await?;

        // Collapse in-batch duplicates before any store work.
        let entities = dedupe_entities(results.iter().flat_map(|r| r.entities.iter()));
        let mut relations: Vec<ExtractedRelation> = results
            .iter()
            .flat_map(|r| r.relations.iter().cloned())
            .collect();
        relations.extend(infer_relations(&entities));

        let summary_text = results
            .iter()
            .map(|r| r.summary.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        // One pre-fetch of every named node in the namespace; per-entity
        // lookups during the batch would race concurrent creates. The
        // resolver's fuzzy pass also catches homograph and typo variants
        // of existing entities, so those boost instead of duplicating.
        let mut names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        for relation in &relations {
            names.push(relation.from_name.clone());
            names.push(relation.to_name.clone());
        }
        let existing: HashMap<String, Node> = self
            .resolver
            .resolve_against_snapshot(namespace, &names)
            .await?;

        // The summary node exists before anything links to it. A missing
        // embedder is not fatal; the node just carries no vector.
        let embedding = match self.cognifier.embed(&summary_text).await {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::warn!(error = %err, "embed failed, storing summary without vector");
                None
            }
        };
        let mut summary = Node::new(NodeType::Fact, "Batch Summary", now)
            .with_namespace(namespace.clone())
            .with_description(summary_text)
            .with_attribute("status", "crystallized");
        if let Some(event) = events.first() {
            summary = summary.with_source_conversation(event.conversation_id.clone());
        }
        summary.embedding = embedding;
        let summary_uid = self.store.create_node(&summary).await?;

        // Partition: boost what exists, create what does not.
        let boost = if self.bulk {
            self.config.activation.bulk_boost_per_access
        } else {
            self.config.activation.boost_per_access
        };
        let mut uid_by_name: HashMap<String, String> = existing
            .iter()
            .map(|(norm, node)| (norm.clone(), node.uid.clone()))
            .collect();

        let mut boosted = 0usize;
        let mut to_create = Vec::new();
        for entity in &entities {
            let normalized = normalize_name(&entity.name);
            if let Some(node) = existing.get(&normalized) {
                match self
                    .store
                    .boost_activation(&node.uid, &self.config.activation, boost)
                    .await
                {
                    Ok(_) => boosted += 1,
                    Err(err) => {
                        tracing::warn!(uid = %node.uid, error = %err, "activation boost failed");
                    }
                }
                // Enrichment rides along with the boost.
                if !entity.description.is_empty() || !entity.tags.is_empty() {
                    if let Err(err) = self
                        .store
                        .enrich_node(
                            &node.uid,
                            Some(entity.description.as_str()),
                            &entity.tags,
                        )
                        .await
                    {
                        tracing::warn!(uid = %node.uid, error = %err, "enrichment failed");
                    }
                }
            } else {
                to_create.push(self.new_entity_node(namespace, entity, events, now));
            }
        }

        let created = self.store.create_nodes(&to_create).await?;
        if let Some(err) = created.error() {
            tracing::warn!(namespace = %namespace, error = %err, "partial batch create");
        }
        let entities_created = created.uids.len();
        for (name, uid) in &created.uids {
            uid_by_name.insert(normalize_name(name), uid.clone());
        }

        // Nodes precede edges: everything below only references uids that
        // exist by now.
        let edges_written = self
            .write_edges(namespace, &relations, &uid_by_name, &entities, &summary_uid, now)
            .await?;

        self.audit
            .log(
                AuditEvent::allow("INGEST", "system", "INGEST_BATCH", now)
                    .with_namespace(namespace.as_str().to_string())
                    .with_resource("node", summary_uid.clone())
                    .with_metadata("events", serde_json::json!(events.len()))
                    .with_metadata("created", serde_json::json!(entities_created))
                    .with_metadata("boosted", serde_json::json!(boosted)),
            )
            .await;

        Ok(BatchOutcome {
            summary_uid,
            entities_created,
            entities_boosted: boosted,
            edges_written,
        })
    }

    fn new_entity_node(
        &self,
        namespace: &Namespace,
        entity: &ExtractedEntity,
        events: &[TranscriptEvent],
        now: chrono::DateTime<chrono::Utc>,
    ) -> Node {
        let node_type = NodeType::from_str(&entity.entity_type).unwrap_or(NodeType::Entity);
        let mut node = Node::new(node_type, entity.name.clone(), now)
            .with_namespace(namespace.clone())
            .with_description(entity.description.clone())
            .with_tags(entity.tags.clone())
            .with_activation(self.config.activation.initial_activation);
        for (key, value) in &entity.attributes {
            node = node.with_attribute(key.clone(), value.clone());
        }
        if let Some(event) = events.first() {
            node = node.with_source_conversation(event.conversation_id.clone());
        }
        node
    }

    async fn write_edges(
        &self,
        namespace: &Namespace,
        relations: &[ExtractedRelation],
        uid_by_name: &HashMap<String, String>,
        entities: &[ExtractedEntity],
        summary_uid: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<usize> {
        let mut plain = Vec::new();
        let mut written = 0usize;

        for relation in relations {
            let Ok(edge_type) = EdgeType::from_str(&relation.relation_type) else {
                tracing::warn!(
                    relation_type = %relation.relation_type,
                    "unknown relation type skipped"
                );
                continue;
            };
            let (Some(from), Some(to)) = (
                uid_by_name.get(&normalize_name(&relation.from_name)),
                uid_by_name.get(&normalize_name(&relation.to_name)),
            ) else {
                tracing::warn!(
                    namespace = %namespace,
                    from = %relation.from_name,
                    to = %relation.to_name,
                    "relation endpoint unresolved, skipping"
                );
                continue;
            };

            let edge = Edge::new(from, to, edge_type).with_created_at(now);
            if edge_type.is_functional() {
                // Archival happens inside: at most one current edge per
                // (source, predicate) survives.
                self.store
                    .replace_functional_edge(&edge, self.clock.as_ref())
                    .await?;
                written += 1;
            } else {
                plain.push(edge);
            }
        }

        // Every entity in the batch links to the summary that mentioned it.
        for entity in entities {
            if let Some(uid) = uid_by_name.get(&normalize_name(&entity.name)) {
                plain.push(Edge::new(uid, summary_uid, EdgeType::SynthesizedFrom).with_created_at(now));
            }
        }

        written += self.store.create_edges(&plain).await?;
        Ok(written)
    }
}

/// Collapse entities whose normalised names collide; the first occurrence
/// wins, later ones contribute tags it lacked.
fn dedupe_entities<'a>(
    entities: impl Iterator<Item = &'a ExtractedEntity>,
) -> Vec<ExtractedEntity> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, ExtractedEntity> = HashMap::new();
    for entity in entities {
        let key = normalize_name(&entity.name);
        if key.is_empty() {
            continue;
        }
        match merged.get_mut(&key) {
            Some(kept) => {
                for tag in &entity.tags {
                    if !kept.tags.contains(tag) {
                        kept.tags.push(tag.clone());
                    }
                }
                if kept.description.is_empty() {
                    kept.description = entity.description.clone();
                }
            }
            None => {
                order.push(key.clone());
                merged.insert(key, entity.clone());
            }
        }
    }
    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}
