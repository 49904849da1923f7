//! Shared fixture: a fully wired kernel over in-memory backends.

use rmk_cache::InMemoryKv;
use rmk_cognify::testing::ScriptedCognifier;
use rmk_cognify::{Cognifier, CognifyResult, ExtractedEntity, ExtractedRelation};
use rmk_core::{
    Clock, EngineConfig, ManualClock, Namespace, NullBus, SharedKv,
};
use rmk_engine::{Kernel, KernelBuilder, TranscriptEvent};
use rmk_graph::{MemoryGraphStore, SharedGraphStore};
use std::sync::Arc;

pub fn start_time() -> chrono::DateTime<chrono::Utc> {
    "2025-06-01T12:00:00Z".parse().unwrap()
}

pub struct TestKernel {
    pub kernel: Kernel,
    pub store: Arc<MemoryGraphStore>,
    pub cognifier: Arc<ScriptedCognifier>,
    pub clock: ManualClock,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_kernel() -> TestKernel {
    init_tracing();
    // Batch size 1 so every enqueue flushes inline and tests stay
    // deterministic without the background flusher.
    let config = EngineConfig {
        ingestion_batch_size: 1,
        ..Default::default()
    };
    let clock = ManualClock::at(start_time());
    let store = Arc::new(MemoryGraphStore::with_clock(Arc::new(clock.clone())));
    let kv = Arc::new(InMemoryKv::new());
    let cognifier = Arc::new(ScriptedCognifier::new());

    let kernel = KernelBuilder::new(config)
        .with_store(store.clone() as SharedGraphStore)
        .with_kv(kv as Arc<dyn SharedKv>)
        .with_bus(Arc::new(NullBus))
        .with_cognifier(cognifier.clone() as Arc<dyn Cognifier>)
        .with_clock(Arc::new(clock.clone()) as Arc<dyn Clock>)
        .build()
        .expect("kernel builds");

    TestKernel {
        kernel,
        store,
        cognifier,
        clock,
    }
}

pub fn user_ns() -> Namespace {
    Namespace::parse("user_alice").unwrap()
}

pub fn event(query: &str, response: &str) -> TranscriptEvent {
    TranscriptEvent {
        namespace: user_ns(),
        conversation_id: "conv-1".to_string(),
        user_query: query.to_string(),
        ai_response: response.to_string(),
        ts: start_time(),
    }
}

pub fn entity(name: &str) -> ExtractedEntity {
    ExtractedEntity {
        name: name.to_string(),
        entity_type: "Entity".to_string(),
        description: String::new(),
        tags: Vec::new(),
        attributes: Default::default(),
    }
}

pub fn relation(from: &str, to: &str, relation_type: &str) -> ExtractedRelation {
    ExtractedRelation {
        from_name: from.to_string(),
        to_name: to.to_string(),
        relation_type: relation_type.to_string(),
    }
}

pub fn extraction(
    entities: Vec<ExtractedEntity>,
    relations: Vec<ExtractedRelation>,
    summary: &str,
) -> Vec<CognifyResult> {
    vec![CognifyResult {
        source_id: "conv-1#0".to_string(),
        entities,
        relations,
        summary: summary.to_string(),
    }]
}
