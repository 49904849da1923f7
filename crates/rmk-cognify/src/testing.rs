//! Scripted [`Cognifier`] for tests.
//!
//! Queue responses in order; each `cognify_batch` call pops one. The other
//! endpoints return canned values. An unavailability toggle makes every
//! call fail, for exercising the no-fallback ingestion path and the
//! degraded consultation path.

use crate::client::Cognifier;
use crate::types::{
    CognifyItem, CognifyResult, CommunitySummary, CommunitySummaryRequest, GlobalOverview,
    GlobalOverviewRequest,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rmk_core::{Error, Result};
use std::collections::VecDeque;

/// Deterministic Cognifier double.
#[derive(Default)]
pub struct ScriptedCognifier {
    batches: Mutex<VecDeque<Vec<CognifyResult>>>,
    community: Mutex<Option<CommunitySummary>>,
    unavailable: Mutex<bool>,
    calls: Mutex<usize>,
}

impl ScriptedCognifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response for the next `cognify_batch` call.
    pub fn push_batch(&self, results: Vec<CognifyResult>) {
        self.batches.lock().push_back(results);
    }

    /// Set the canned `summarize_community` response.
    pub fn set_community_summary(&self, summary: CommunitySummary) {
        *self.community.lock() = Some(summary);
    }

    /// Make every call fail until toggled back.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    /// How many `cognify_batch` calls were made.
    #[must_use]
    pub fn batch_calls(&self) -> usize {
        *self.calls.lock()
    }

    fn check_up(&self) -> Result<()> {
        if *self.unavailable.lock() {
            Err(Error::CognifierUnavailable("scripted outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Cognifier for ScriptedCognifier {
    async fn cognify_batch(&self, items: &[CognifyItem]) -> Result<Vec<CognifyResult>> {
        *self.calls.lock() += 1;
        self.check_up()?;
        match self.batches.lock().pop_front() {
            Some(results) => Ok(results),
            // With nothing scripted, echo one empty result per item.
            None => Ok(items
                .iter()
                .map(|item| CognifyResult {
                    source_id: item.source_id.clone(),
                    entities: Vec::new(),
                    relations: Vec::new(),
                    summary: String::new(),
                })
                .collect()),
        }
    }

    async fn summarize_community(
        &self,
        request: &CommunitySummaryRequest,
    ) -> Result<CommunitySummary> {
        self.check_up()?;
        Ok(self.community.lock().clone().unwrap_or(CommunitySummary {
            community_name: request.community_name.clone(),
            summary: format!("summary of {} entities", request.entities.len()),
            insight_type: "pattern".to_string(),
            action_suggestion: String::new(),
            confidence: Some(0.8),
        }))
    }

    async fn summarize_global(&self, request: &GlobalOverviewRequest) -> Result<GlobalOverview> {
        self.check_up()?;
        Ok(GlobalOverview {
            namespace: request.namespace.clone(),
            overview: format!(
                "{} entities across {} communities",
                request.total_entities,
                request.community_summaries.len()
            ),
            themes: Vec::new(),
        })
    }

    async fn embed(&self, _text: &str) -> Result<Option<Vec<f32>>> {
        if *self.unavailable.lock() {
            return Ok(None);
        }
        Ok(Some(vec![0.1, 0.2, 0.3]))
    }
}
