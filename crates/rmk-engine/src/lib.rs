//! # RMK Engine
//!
//! The memory engine of the Reflective Memory Kernel: the ingestion
//! pipeline that distils conversational turns into graph mutations, the
//! spreading-activation traversal and temporal ranking behind
//! consultation, the reflection loop that decays, reconciles, and
//! synthesises, and the [`Kernel`] facade that composes them behind the
//! policy checkpoint.

pub mod groups;
pub mod infer;
pub mod ingest;
pub mod kernel;
pub mod reflect;
pub mod traverse;
pub mod types;

pub use groups::WorkspaceOps;
pub use ingest::IngestionPipeline;
pub use kernel::{Kernel, KernelBuilder};
pub use reflect::{ReflectionLoop, ReflectionReport};
pub use traverse::{
    community_peers, extract_community, rank_temporal, spread, ActivatedNode, RankParams,
    SpreadParams,
};
pub use types::{
    BatchOutcome, ConsultationRequest, ConsultationResponse, NamespaceRegistry, RankedFact,
    TranscriptEvent,
};
