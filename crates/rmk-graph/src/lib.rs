//! # RMK Graph
//!
//! Graph persistence for the Reflective Memory Kernel: the typed
//! [`GraphStore`] contract, the Dgraph HTTP adapter that fulfils it in
//! production, the in-memory store that fulfils it in tests and embedded
//! deployments, and the namespace-scoped entity resolver built on top.

pub mod dgraph;
pub mod memory;
pub mod nquad;
pub mod resolver;
pub mod store;

pub use dgraph::DgraphStore;
pub use memory::MemoryGraphStore;
pub use resolver::EntityResolver;
pub use store::{ActivationState, BatchCreated, GraphStore, GraphStoreExt, SharedGraphStore};
