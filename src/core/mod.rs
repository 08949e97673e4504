//! # Core Protocol Components
//!
//! Packet framing, typed (de)serialization and packet pooling.
//!
//! ## Components
//! - **Header**: fixed 11-byte header, opcodes and feature flags
//! - **Packet**: the `Frame` contract and the closed `Packet` sum type
//! - **Codec**: Tokio codec that splits byte streams into frames
//! - **Pool**: per-kind free lists with wipe-on-return
//!
//! ## Wire Format
//! ```text
//! [Magic(4)] [OpCode(2)] [Flags(1)] [Priority(1)] [Transport(1)] [Length(2)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Magic number and declared length are validated before any payload byte is read
//! - Length is computed at encode time and never supplied by callers
//! - Packets returned to the pool have their secret fields zeroized

pub mod codec;
pub mod header;
pub mod packet;
pub mod pool;
