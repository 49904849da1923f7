//! Cognifier HTTP client.
//!
//! Failure semantics follow the contract: `cognify-batch` and the two
//! summarise endpoints are fatal per request — the caller decides what a
//! dropped batch means — while `embed` degrades to `None` so ingestion can
//! proceed without a vector.

use crate::types::{
    CognifyItem, CognifyResult, CommunitySummary, CommunitySummaryRequest, EmbedRequest,
    EmbedResponse, GlobalOverview, GlobalOverviewRequest,
};
use async_trait::async_trait;
use rmk_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

/// The extraction/summarisation collaborator.
#[async_trait]
pub trait Cognifier: Send + Sync {
    /// Extract entities, relations, and summaries for a whole batch.
    async fn cognify_batch(&self, items: &[CognifyItem]) -> Result<Vec<CognifyResult>>;

    /// Summarise a set of entities as one community.
    async fn summarize_community(
        &self,
        request: &CommunitySummaryRequest,
    ) -> Result<CommunitySummary>;

    /// Produce a namespace-wide overview from community summaries.
    async fn summarize_global(&self, request: &GlobalOverviewRequest) -> Result<GlobalOverview>;

    /// Embed text. `Ok(None)` when the embedder is unavailable.
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>>;
}

/// Reqwest-backed [`Cognifier`].
pub struct HttpCognifier {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpCognifier {
    /// Client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::CognifierUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        })
    }

    /// Override the default 30 s per-call deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{path}", self.base_url);
        let send = self.client.post(&url).json(body).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                return Err(Error::CognifierUnavailable(err.to_string()));
            }
            Err(_) => {
                return Err(Error::CognifierUnavailable(format!(
                    "{path} exceeded {:?} deadline",
                    self.timeout
                )));
            }
        };
        if !response.status().is_success() {
            return Err(Error::CognifierUnavailable(format!(
                "{path} returned {}",
                response.status()
            )));
        }
        response
            .json::<R>()
            .await
            .map_err(|e| Error::CognifierUnavailable(format!("{path} malformed response: {e}")))
    }
}

#[async_trait]
impl Cognifier for HttpCognifier {
    async fn cognify_batch(&self, items: &[CognifyItem]) -> Result<Vec<CognifyResult>> {
        self.post("/cognify-batch", &json!({ "items": items })).await
    }

    async fn summarize_community(
        &self,
        request: &CommunitySummaryRequest,
    ) -> Result<CommunitySummary> {
        self.post("/summarize-community", request).await
    }

    async fn summarize_global(&self, request: &GlobalOverviewRequest) -> Result<GlobalOverview> {
        self.post("/summarize-global", request).await
    }

    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        match self
            .post::<_, EmbedResponse>("/embed", &EmbedRequest { text })
            .await
        {
            Ok(response) => Ok(Some(response.embedding)),
            Err(err) => {
                tracing::warn!(error = %err, "embedder unavailable, proceeding without vector");
                Ok(None)
            }
        }
    }
}
