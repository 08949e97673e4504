//! # session-shield
//!
//! Server-side session core for login services: an ephemeral x25519 handshake that
//! gives each connection its own key, pooled binary packet framing, field-level
//! credential encryption and compression, a registry of live connections and a
//! credential policy.
//!
//! ## Layers
//! - [`core`]: wire header, typed packets, the packet pool and the stream codec
//! - [`protocol`]: handshake, credential pipeline and opcode dispatch
//! - [`session`]: connections, session keys and the connection registry
//! - [`policy`]: username and password rules
//! - [`service`]: the [`Gateway`](service::Gateway) and its Tokio stream driver
//! - [`utils`]: ciphers, compression, logging and metrics
//!
//! ## Example
//! ```rust
//! use session_shield::core::packet::{Frame, Packet};
//! use session_shield::protocol::handshake::{client_complete_handshake, client_handshake_init};
//! use session_shield::core::packet::{CredentialIntent, Credentials};
//! use session_shield::service::{AccountHandler, AccountOutcome, Gateway};
//! use session_shield::session::{Connection, PeerLink};
//! use session_shield::config::SessionConfig;
//!
//! struct Discard;
//! impl PeerLink for Discard {
//!     fn send(&self, _: &[u8]) -> session_shield::Result<()> { Ok(()) }
//!     fn disconnect(&self, _: &str) {}
//! }
//!
//! struct Welcome;
//! impl AccountHandler for Welcome {
//!     fn handle(&self, _: &Connection, _: CredentialIntent, _: &Credentials) -> AccountOutcome {
//!         AccountOutcome::Granted("welcome".into())
//!     }
//! }
//!
//! let gateway = Gateway::new(SessionConfig::default(), Welcome).unwrap();
//! let connection = Connection::new("127.0.0.1:9000".parse().unwrap(), Discard);
//!
//! let (state, request) = client_handshake_init();
//! let reply = gateway.handle_frame(&connection, &request.serialize().unwrap());
//! if let Packet::Handshake(reply) = Packet::deserialize(&reply).unwrap() {
//!     let key = client_complete_handshake(state, &reply).unwrap();
//!     assert_eq!(connection.session_key(), Some(&key));
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod policy;
pub mod protocol;
pub mod service;
pub mod session;
pub mod utils;

pub use error::{ProtocolError, ReplyCode, Result};
