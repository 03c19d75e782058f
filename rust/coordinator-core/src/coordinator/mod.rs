//! Multi-node coordination over length-prefixed JSON frames.
//!
//! This module provides:
//!
//! - Frame encoding and decoding
//! - Group registration and role discovery
//! - Named barriers, broadcasts and wait-for-all checks
//! - Result bundle aggregation
//! - The TCP server and a polling client

mod client;
mod dispatch;
pub mod frame;
mod group;
pub mod protocol;
mod registry;
mod server;

// Re-exports
pub use client::{CoordinatorClient, NodeIdentity};
pub use dispatch::Dispatcher;
pub use frame::{decode_frame, encode_frame, FrameCodec, FrameError};
pub use group::{Arrival, GroupSnapshot, GroupState};
pub use protocol::{RequestKind, Response, ResponseStatus, WireMessage};
pub use registry::{GroupRegistry, SharedGroup};
pub use server::{handle_connection, CoordinatorServer};
