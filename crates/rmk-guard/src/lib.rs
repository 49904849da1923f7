//! # RMK Guard
//!
//! The access-control layer of the Reflective Memory Kernel: pure policy
//! evaluation (namespace, clearance, explicit rules), the composed
//! [`PolicyManager`] checkpoint, the ring-buffered audit logger, the
//! tier-keyed rate limiter, and the PII/secret content filter.

pub mod audit;
pub mod engine;
pub mod filter;
pub mod manager;
pub mod ratelimit;

pub use audit::{audit_node, AuditLogger};
pub use engine::{evaluate_with, Decision, PolicyEngine};
pub use filter::{
    mask_match, ContentFilter, FilterAction, Finding, InputKind, InputValidator, PatternClass,
    ScanOutcome,
};
pub use manager::PolicyManager;
pub use ratelimit::{RateLimiter, TierQuota};
