//! # Protocol Layer
//!
//! What happens to a packet after it has been framed.
//!
//! - **Handshake**: ephemeral x25519 exchange that publishes a per-connection session key
//! - **Pipeline**: field-level compression and authenticated encryption of credentials
//! - **Dispatcher**: opcode-based routing of decoded packets to handlers
//!
//! All of it is synchronous; nothing here awaits.

pub mod dispatcher;
pub mod handshake;
pub mod pipeline;
