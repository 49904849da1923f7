//! Kernel entry-point request/response shapes.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rmk_core::Namespace;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

/// One conversational turn handed to ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub namespace: Namespace,
    pub conversation_id: String,
    pub user_query: String,
    pub ai_response: String,
    pub ts: DateTime<Utc>,
}

/// Outcome of processing one ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Uid of the batch's crystallised summary node; callers feed it to the
    /// external vector index.
    pub summary_uid: String,
    pub entities_created: usize,
    pub entities_boosted: usize,
    pub edges_written: usize,
}

/// A consultation query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationRequest {
    pub namespace: Namespace,
    pub query: String,
    #[serde(default)]
    pub topic_filters: Vec<String>,
}

impl ConsultationRequest {
    /// Cache fingerprint over everything that shapes the answer.
    #[must_use]
    pub fn fingerprint(&self, user_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.namespace.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.query.as_bytes());
        for filter in &self.topic_filters {
            hasher.update([0u8]);
            hasher.update(filter.as_bytes());
        }
        let digest = hasher.finalize();
        let mut key = String::with_capacity(8 + digest.len() * 2);
        key.push_str("consult:");
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(key, "{byte:02x}");
        }
        key
    }
}

/// One ranked memory in a consultation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedFact {
    pub uid: String,
    pub name: String,
    pub description: String,
    pub activation: f64,
    pub final_score: f64,
    pub last_accessed: DateTime<Utc>,
}

/// Ranked synthesis returned to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsultationResponse {
    /// Cognifier-written brief; absent when the Cognifier is unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
    pub facts: Vec<RankedFact>,
    #[serde(default)]
    pub insights: Vec<RankedFact>,
    #[serde(default)]
    pub patterns: Vec<RankedFact>,
    /// Max final score of the included facts.
    pub confidence: f64,
    #[serde(default)]
    pub from_cache: bool,
}

/// Namespaces with recent activity, shared between the ingestion pipeline
/// (producer) and the reflection loop (consumer).
#[derive(Debug, Default, Clone)]
pub struct NamespaceRegistry {
    inner: Arc<Mutex<BTreeSet<Namespace>>>,
}

impl NamespaceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, namespace: Namespace) {
        self.inner.lock().insert(namespace);
    }

    /// Snapshot of active namespaces, in stable order.
    #[must_use]
    pub fn all(&self) -> Vec<Namespace> {
        self.inner.lock().iter().cloned().collect()
    }
}
