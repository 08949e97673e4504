//! # Service Layer
//!
//! - **Gateway**: admission, per-frame processing and shutdown for one server
//! - **Stream**: Tokio driver that runs a gateway over any byte stream or TCP listener

pub mod gateway;
pub mod stream;

pub use gateway::{AccountHandler, AccountOutcome, Gateway};
pub use stream::{serve_listener, serve_stream, ChannelLink, LinkCommand};
