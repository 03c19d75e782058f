// rust/coordinator-core/src/lib.rs

//! Multi-Node Coordination - Core Library
//!
//! This crate provides the coordination service used to line up the nodes
//! of a distributed test job: group rendezvous, barriers, broadcasts and
//! result aggregation, together with configuration, error handling and a
//! polling client.

pub mod config;
pub mod error;
pub mod retry;

// Re-export commonly used types for convenience
pub use config::{ClientConfig, CoordinatorConfig, GroupConfig, ServerConfig};
pub use error::{CoordinatorError, Result};
pub use retry::{with_backoff, Attempt, Backoff};

pub mod coordinator;
pub use coordinator::{
    CoordinatorClient, CoordinatorServer, Dispatcher, GroupRegistry, NodeIdentity, RequestKind,
    Response, ResponseStatus, WireMessage,
};
