//! Engine configuration.
//!
//! Defaults are embedded; deployments overlay a TOML file and/or `RMK_*`
//! environment variables (environment wins). Validation happens once at
//! load; components receive an already-valid config.

use crate::error::{Error, Result};
use crate::schema::ActivationConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reflection loop tick period, seconds.
    pub reflection_interval_secs: u64,
    /// Minimum crystallised summaries per synthesis batch.
    pub min_reflection_batch: usize,
    /// Maximum crystallised summaries per synthesis batch.
    pub max_reflection_batch: usize,

    /// Ingestion buffer flush threshold, events.
    pub ingestion_batch_size: usize,
    /// Ingestion buffer flush interval, seconds.
    pub ingestion_flush_interval_secs: u64,

    /// Graph database endpoint.
    pub graph_address: String,
    /// Shared KV endpoint.
    pub kv_address: String,
    /// Pub/sub bus endpoint.
    pub bus_address: String,
    /// Cognifier service base URL.
    pub cognifier_url: String,

    /// Per-RPC deadline, seconds, applied when a caller has not set one.
    pub response_timeout_secs: u64,

    /// Consultation result cache TTL, seconds.
    pub consult_cache_ttl_secs: u64,

    /// Spreading-activation decay factor per hop, in `(0, 1]`.
    pub traversal_decay_factor: f64,
    /// Maximum traversal depth.
    pub traversal_max_hops: u32,
    /// Activation floor below which traversal stops expanding.
    pub traversal_min_activation: f64,
    /// Result ceiling for traversal and consultation.
    pub traversal_max_results: usize,

    /// Nodes older than this many days are dropped from recency ranking.
    pub recency_cutoff_days: i64,
    /// Blend weight of recency against activation in final ranking.
    pub recency_weight: f64,

    /// Activation tuning.
    pub activation: ActivationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reflection_interval_secs: 300,
            min_reflection_batch: 10,
            max_reflection_batch: 100,
            ingestion_batch_size: 50,
            ingestion_flush_interval_secs: 10,
            graph_address: "http://localhost:8080".to_string(),
            kv_address: "redis://localhost:6379".to_string(),
            bus_address: "redis://localhost:6379".to_string(),
            cognifier_url: "http://localhost:8600".to_string(),
            response_timeout_secs: 10,
            consult_cache_ttl_secs: 300,
            traversal_decay_factor: 0.7,
            traversal_max_hops: 3,
            traversal_min_activation: 0.05,
            traversal_max_results: 50,
            recency_cutoff_days: 365,
            recency_weight: 0.3,
            activation: ActivationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load defaults overlaid with `RMK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then overlay `RMK_*` environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|e| Error::config(format!("invalid config: {e}")))?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("RMK_GRAPH_ADDRESS") {
            self.graph_address = v;
        }
        if let Ok(v) = std::env::var("RMK_KV_ADDRESS") {
            self.kv_address = v;
        }
        if let Ok(v) = std::env::var("RMK_BUS_ADDRESS") {
            self.bus_address = v;
        }
        if let Ok(v) = std::env::var("RMK_COGNIFIER_URL") {
            self.cognifier_url = v;
        }
        if let Ok(v) = std::env::var("RMK_REFLECTION_INTERVAL_SECS") {
            self.reflection_interval_secs = parse_env("RMK_REFLECTION_INTERVAL_SECS", &v)?;
        }
        if let Ok(v) = std::env::var("RMK_INGESTION_BATCH_SIZE") {
            self.ingestion_batch_size = parse_env("RMK_INGESTION_BATCH_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("RMK_INGESTION_FLUSH_INTERVAL_SECS") {
            self.ingestion_flush_interval_secs =
                parse_env("RMK_INGESTION_FLUSH_INTERVAL_SECS", &v)?;
        }
        if let Ok(v) = std::env::var("RMK_RESPONSE_TIMEOUT_SECS") {
            self.response_timeout_secs = parse_env("RMK_RESPONSE_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    /// Check invariants the rest of the engine assumes.
    pub fn validate(&self) -> Result<()> {
        if self.reflection_interval_secs == 0 {
            return Err(Error::config("reflection_interval_secs must be positive"));
        }
        if self.ingestion_batch_size == 0 {
            return Err(Error::config("ingestion_batch_size must be at least 1"));
        }
        if self.min_reflection_batch > self.max_reflection_batch {
            return Err(Error::config(
                "min_reflection_batch exceeds max_reflection_batch",
            ));
        }
        if !(0.0 < self.traversal_decay_factor && self.traversal_decay_factor <= 1.0) {
            return Err(Error::config("traversal_decay_factor must be in (0, 1]"));
        }
        if !(0.0..1.0).contains(&self.activation.decay_rate_per_day) {
            return Err(Error::config("decay_rate_per_day must be in [0, 1)"));
        }
        if !(0.0..=1.0).contains(&self.recency_weight) {
            return Err(Error::config("recency_weight must be in [0, 1]"));
        }
        if self.activation.min_activation >= self.activation.max_activation {
            return Err(Error::config(
                "min_activation must be below max_activation",
            ));
        }
        for (name, value) in [
            ("graph_address", &self.graph_address),
            ("kv_address", &self.kv_address),
            ("bus_address", &self.bus_address),
            ("cognifier_url", &self.cognifier_url),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    /// Reflection tick period.
    #[must_use]
    pub fn reflection_interval(&self) -> Duration {
        Duration::from_secs(self.reflection_interval_secs)
    }

    /// Ingestion flush interval.
    #[must_use]
    pub fn ingestion_flush_interval(&self) -> Duration {
        Duration::from_secs(self.ingestion_flush_interval_secs)
    }

    /// Default per-RPC deadline.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    /// Consultation cache TTL.
    #[must_use]
    pub fn consult_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.consult_cache_ttl_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::config(format!("{name}={raw:?} is not valid")))
}
