//! # Utility Modules
//!
//! Supporting primitives consumed by the handshake and credential pipeline.
//!
//! ## Components
//! - **Crypto**: ChaCha20-Poly1305 / XChaCha20-Poly1305 AEAD with random nonces
//! - **Compression**: LZ4 and Zstd with decompression-bomb limits
//! - **Logging**: tracing-subscriber initialisation
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Bounded decompression output
//! - Memory zeroing for sensitive data (zeroize crate) happens in the callers

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
