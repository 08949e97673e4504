//! # Sessions
//!
//! Per-connection state and the registry of live connections.
//!
//! - **Connection**: identity, remote endpoint, permission level and session key, plus
//!   a close event that fires exactly once
//! - **Registry**: id-indexed table with automatic removal on close

pub mod connection;
pub mod registry;

pub use connection::{
    Connection, ConnectionId, PeerLink, PermissionLevel, SessionKey, SubscriptionId,
};
pub use registry::ConnectionRegistry;
