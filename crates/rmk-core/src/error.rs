//! Error taxonomy shared by every kernel component.
//!
//! Each variant corresponds to one externally observable failure kind.
//! Internal recoverable conditions (`PreconditionFailed`, `Cache`) are
//! retried or absorbed before they reach a caller; everything else is
//! surfaced with a human-readable reason and, for access-control outcomes,
//! a paired audit event emitted by the policy layer.

use thiserror::Error;

/// Error type for kernel operations
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A node, group, invitation, or share link does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The policy layer denied the operation
    #[error("access denied: {reason}")]
    PolicyDeny {
        /// Human-readable denial reason (e.g. "namespace mismatch")
        reason: String,
    },

    /// A conditional mutation lost its compare-and-set race.
    /// Retried internally; callers only see [`Error::FailedConcurrent`].
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A conditional mutation kept losing after bounded retries
    #[error("concurrent update conflict: {0}")]
    FailedConcurrent(String),

    /// Transient store failure (timeout, connection reset)
    #[error("graph store unavailable: {0}")]
    StoreTransient(String),

    /// Permanent store failure (malformed query, schema violation)
    #[error("graph store error: {0}")]
    Store(String),

    /// The Cognifier collaborator could not be reached or errored
    #[error("cognifier unavailable: {0}")]
    CognifierUnavailable(String),

    /// Cache-layer failure. Never surfaced to callers; the cache always
    /// falls through to the source of truth.
    #[error("cache error: {0}")]
    Cache(String),

    /// Shared KV / pub-sub bus failure
    #[error("shared kv error: {0}")]
    Kv(String),

    /// Per-user quota exhausted for the current window
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the current window rolls over
        retry_after_secs: u64,
    },

    /// The content filter blocked the input
    #[error("content blocked: {reason}")]
    ContentBlocked {
        /// Which filter class fired
        reason: String,
    },

    /// Malformed input: namespace format, length ceiling, null bytes
    #[error("validation failed: {0}")]
    Validation(String),

    /// Invalid engine configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON (de)serialization failure on a wire or persisted shape
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic wrapped error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Construct a [`Error::NotFound`]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Construct a [`Error::PolicyDeny`]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::PolicyDeny {
            reason: reason.into(),
        }
    }

    /// Construct a [`Error::Validation`]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Construct a [`Error::Config`]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Construct a [`Error::Store`]
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store(reason.into())
    }

    /// Construct a [`Error::StoreTransient`]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::StoreTransient(reason.into())
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Cancellation and timeouts map onto [`Error::StoreTransient`], so a
    /// caller on a mutation path must treat a retryable error as "unknown
    /// outcome": the in-flight mutation may or may not have committed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PreconditionFailed(_) | Self::StoreTransient(_) | Self::Cache(_) | Self::Kv(_)
        )
    }

    /// Whether this error must be paired with an `effect=DENY` audit event
    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::PolicyDeny { .. } | Self::RateLimited { .. } | Self::ContentBlocked { .. }
        )
    }
}

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, Error>;
