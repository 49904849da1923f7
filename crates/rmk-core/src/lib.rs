//! # RMK Core
//!
//! Shared foundation of the Reflective Memory Kernel: the typed graph
//! model (nodes, edges, namespaces, policies, audit events), activation
//! tuning, engine configuration, the error taxonomy, and the small
//! contracts (`SharedKv`, `EventBus`, `Clock`) the other crates plug
//! implementations into.
//!
//! Nothing in this crate talks to the network; it is the vocabulary the
//! rest of the workspace speaks.

pub mod audit;
pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod kv;
pub mod model;
pub mod namespace;
pub mod normalize;
pub mod policy;
pub mod retry;
pub mod schema;

pub use audit::AuditEvent;
pub use bus::{EventBus, NullBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use kv::SharedKv;
pub use model::{Edge, Node};
pub use namespace::Namespace;
pub use policy::{Clearance, Effect, Policy, Tier, UserContext};
pub use retry::{with_retry, RetryPolicy};
pub use schema::{ActivationConfig, EdgeStatus, EdgeType, NodeType};
