//! # Error Types
//!
//! Error handling for the session core.
//!
//! Every failure the handshake, framing layer and credential pipeline can produce is a
//! variant of [`ProtocolError`]. Errors never travel to the peer verbatim: the gateway
//! maps each one onto a [`ReplyCode`] and answers with that code's fixed text (or, for
//! a few protocol errors, the error's own diagnostic message).
//!
//! ## Error Categories
//! - **Protocol Errors**: wrong packet type, bad magic number, malformed length, bad key size
//! - **State Errors**: handshake replay, missing credentials, unauthenticated access
//! - **Cryptographic Errors**: encoding, decryption, compression failures (one opaque code)
//! - **Local Errors**: serialization limits, undersized buffers, I/O, configuration
//!
//! Policy violations (rejected usernames/passwords) are *not* errors; see
//! [`crate::policy::Verdict`].
//!
//! ## Example Usage
//! ```rust
//! use session_shield::error::{ProtocolError, ReplyCode};
//!
//! let err = ProtocolError::InvalidKeyLength { expected: 32, actual: 31 };
//! assert_eq!(err.reply_code(), ReplyCode::InvalidKeyLength);
//! assert_eq!(err.to_string(), "invalid key length, expected 32, got 31");
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher lock errors
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";

    /// Framing errors
    pub const ERR_TRUNCATED_FIELD: &str = "payload field truncated";
    pub const ERR_TRAILING_BYTES: &str = "trailing bytes after payload";
    pub const ERR_INVALID_METADATA: &str = "credential metadata is malformed";
    pub const ERR_INVALID_UTF8: &str = "payload text is not valid UTF-8";
    pub const ERR_INVALID_PRESENCE: &str = "invalid presence marker";
    pub const ERR_UNKNOWN_INTENT: &str = "unknown credential intent";
    pub const ERR_UNKNOWN_REPLY_CODE: &str = "unknown reply code";
    pub const ERR_UNKNOWN_PRIORITY: &str = "unknown priority";
    pub const ERR_UNKNOWN_TRANSPORT: &str = "unknown transport hint";
    pub const ERR_PACKET_TOO_LARGE: &str = "packet exceeds maximum encodable length";

    /// Transport errors
    pub const ERR_LINK_CLOSED: &str = "peer link closed";

    /// Fixed reply texts, one per client-visible code
    pub const REPLY_OK: &str = "ok";
    pub const REPLY_WRONG_PACKET_TYPE: &str = "wrong packet type";
    pub const REPLY_HANDSHAKE_COMPLETED: &str = "handshake already completed";
    pub const REPLY_NULL_PAYLOAD: &str = "handshake payload missing";
    pub const REPLY_INVALID_KEY_LENGTH: &str = "invalid key length";
    pub const REPLY_HANDSHAKE_FAILED: &str = "handshake processing failed";
    pub const REPLY_PROTOCOL_MISMATCH: &str = "protocol mismatch";
    pub const REPLY_MALFORMED: &str = "malformed packet";
    pub const REPLY_UNKNOWN_OPCODE: &str = "unknown opcode";
    pub const REPLY_NULL_CREDENTIALS: &str = "credentials missing";
    pub const REPLY_NOT_AUTHENTICATED: &str = "handshake required";
    pub const REPLY_CRYPTO_FAILURE: &str = "credential payload rejected";
    pub const REPLY_POLICY_REJECTED: &str = "credentials rejected by policy";
    pub const REPLY_ACCOUNT_DENIED: &str = "account request denied";
    pub const REPLY_INTERNAL: &str = "internal error";
}

/// ProtocolError is the primary error type for all session operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Bincode(#[from] bincode::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("buffer too small: needed {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("protocol mismatch: unknown magic number {0:#010x}")]
    ProtocolMismatch(u32),

    #[error("malformed packet: declared length {declared}, actual {actual}")]
    MalformedPacket { declared: usize, actual: usize },

    #[error("malformed packet: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    MalformedPayload(&'static str),

    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u16),

    #[error("wrong packet type")]
    WrongPacketType,

    #[error("handshake already completed")]
    HandshakeAlreadyCompleted,

    #[error("handshake payload missing")]
    NullPayload,

    #[error("invalid key length, expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("handshake processing failed")]
    HandshakeProcessingFailed,

    #[error("credentials missing")]
    NullCredentials,

    #[error("connection is not authenticated")]
    NotAuthenticated,

    #[error("invalid field encoding")]
    InvalidEncoding,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Compression failed")]
    CompressionFailed,

    #[error("connection limit of {0} reached")]
    ConnectionLimit(usize),

    #[error("connection {0} already registered")]
    DuplicateConnection(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Client-visible status codes carried by Reply packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ReplyCode {
    Ok = 0x0000,
    WrongPacketType = 0x0101,
    HandshakeAlreadyCompleted = 0x0102,
    NullPayload = 0x0103,
    InvalidKeyLength = 0x0104,
    HandshakeProcessingFailed = 0x0105,
    ProtocolMismatch = 0x0201,
    MalformedPacket = 0x0202,
    UnknownOpcode = 0x0203,
    NullCredentials = 0x0301,
    NotAuthenticated = 0x0302,
    CryptoFailure = 0x0401,
    PolicyRejected = 0x0501,
    AccountDenied = 0x0502,
    Internal = 0xFFFF,
}

impl ReplyCode {
    /// Wire value
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value; unknown codes are reported as `None`
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x0000 => ReplyCode::Ok,
            0x0101 => ReplyCode::WrongPacketType,
            0x0102 => ReplyCode::HandshakeAlreadyCompleted,
            0x0103 => ReplyCode::NullPayload,
            0x0104 => ReplyCode::InvalidKeyLength,
            0x0105 => ReplyCode::HandshakeProcessingFailed,
            0x0201 => ReplyCode::ProtocolMismatch,
            0x0202 => ReplyCode::MalformedPacket,
            0x0203 => ReplyCode::UnknownOpcode,
            0x0301 => ReplyCode::NullCredentials,
            0x0302 => ReplyCode::NotAuthenticated,
            0x0401 => ReplyCode::CryptoFailure,
            0x0501 => ReplyCode::PolicyRejected,
            0x0502 => ReplyCode::AccountDenied,
            0xFFFF => ReplyCode::Internal,
            _ => return None,
        })
    }

    /// Fixed text sent to the peer for this code
    pub fn default_message(self) -> &'static str {
        match self {
            ReplyCode::Ok => constants::REPLY_OK,
            ReplyCode::WrongPacketType => constants::REPLY_WRONG_PACKET_TYPE,
            ReplyCode::HandshakeAlreadyCompleted => constants::REPLY_HANDSHAKE_COMPLETED,
            ReplyCode::NullPayload => constants::REPLY_NULL_PAYLOAD,
            ReplyCode::InvalidKeyLength => constants::REPLY_INVALID_KEY_LENGTH,
            ReplyCode::HandshakeProcessingFailed => constants::REPLY_HANDSHAKE_FAILED,
            ReplyCode::ProtocolMismatch => constants::REPLY_PROTOCOL_MISMATCH,
            ReplyCode::MalformedPacket => constants::REPLY_MALFORMED,
            ReplyCode::UnknownOpcode => constants::REPLY_UNKNOWN_OPCODE,
            ReplyCode::NullCredentials => constants::REPLY_NULL_CREDENTIALS,
            ReplyCode::NotAuthenticated => constants::REPLY_NOT_AUTHENTICATED,
            ReplyCode::CryptoFailure => constants::REPLY_CRYPTO_FAILURE,
            ReplyCode::PolicyRejected => constants::REPLY_POLICY_REJECTED,
            ReplyCode::AccountDenied => constants::REPLY_ACCOUNT_DENIED,
            ReplyCode::Internal => constants::REPLY_INTERNAL,
        }
    }

    pub fn is_success(self) -> bool {
        self == ReplyCode::Ok
    }
}

/// Coarse error classes, used for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Protocol,
    State,
    Crypto,
    Local,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::State => "state",
            ErrorCategory::Crypto => "crypto",
            ErrorCategory::Local => "local",
        }
    }
}

impl ProtocolError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProtocolError::WrongPacketType
            | ProtocolError::ProtocolMismatch(_)
            | ProtocolError::MalformedPacket { .. }
            | ProtocolError::MalformedPayload(_)
            | ProtocolError::UnknownOpcode(_)
            | ProtocolError::NullPayload
            | ProtocolError::InvalidKeyLength { .. } => ErrorCategory::Protocol,
            ProtocolError::HandshakeAlreadyCompleted
            | ProtocolError::NullCredentials
            | ProtocolError::NotAuthenticated
            | ProtocolError::ConnectionLimit(_)
            | ProtocolError::DuplicateConnection(_) => ErrorCategory::State,
            ProtocolError::InvalidEncoding
            | ProtocolError::DecryptionFailed
            | ProtocolError::EncryptionFailed
            | ProtocolError::CompressionFailed
            | ProtocolError::HandshakeProcessingFailed => ErrorCategory::Crypto,
            _ => ErrorCategory::Local,
        }
    }

    /// Client-visible code for this error.
    ///
    /// Encoding, cipher and compression failures share a single code so a peer cannot
    /// learn which stage rejected its payload.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            ProtocolError::WrongPacketType => ReplyCode::WrongPacketType,
            ProtocolError::HandshakeAlreadyCompleted => ReplyCode::HandshakeAlreadyCompleted,
            ProtocolError::NullPayload => ReplyCode::NullPayload,
            ProtocolError::InvalidKeyLength { .. } => ReplyCode::InvalidKeyLength,
            ProtocolError::HandshakeProcessingFailed => ReplyCode::HandshakeProcessingFailed,
            ProtocolError::ProtocolMismatch(_) => ReplyCode::ProtocolMismatch,
            ProtocolError::MalformedPacket { .. } | ProtocolError::MalformedPayload(_) => {
                ReplyCode::MalformedPacket
            }
            ProtocolError::UnknownOpcode(_) => ReplyCode::UnknownOpcode,
            ProtocolError::NullCredentials => ReplyCode::NullCredentials,
            ProtocolError::NotAuthenticated => ReplyCode::NotAuthenticated,
            ProtocolError::InvalidEncoding
            | ProtocolError::DecryptionFailed
            | ProtocolError::EncryptionFailed
            | ProtocolError::CompressionFailed => ReplyCode::CryptoFailure,
            _ => ReplyCode::Internal,
        }
    }

    /// Text sent to the peer alongside [`Self::reply_code`].
    ///
    /// Protocol errors echo their diagnostics (they contain no secrets); everything
    /// else uses the fixed text of its code.
    pub fn reply_message(&self) -> String {
        match self {
            ProtocolError::InvalidKeyLength { .. }
            | ProtocolError::MalformedPacket { .. }
            | ProtocolError::MalformedPayload(_)
            | ProtocolError::ProtocolMismatch(_)
            | ProtocolError::UnknownOpcode(_) => self.to_string(),
            other => other.reply_code().default_message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_errors_share_one_code() {
        let codes: Vec<ReplyCode> = [
            ProtocolError::InvalidEncoding,
            ProtocolError::DecryptionFailed,
            ProtocolError::CompressionFailed,
            ProtocolError::EncryptionFailed,
        ]
        .iter()
        .map(ProtocolError::reply_code)
        .collect();
        assert!(codes.iter().all(|c| *c == ReplyCode::CryptoFailure));

        // and the text does not reveal the stage either
        assert_eq!(
            ProtocolError::InvalidEncoding.reply_message(),
            ProtocolError::DecryptionFailed.reply_message()
        );
    }

    #[test]
    fn test_key_length_message_is_diagnostic() {
        let err = ProtocolError::InvalidKeyLength {
            expected: 32,
            actual: 31,
        };
        assert_eq!(
            err.reply_message(),
            "invalid key length, expected 32, got 31"
        );
        assert_eq!(err.category(), ErrorCategory::Protocol);
    }

    #[test]
    fn test_reply_code_roundtrip() {
        for code in [
            ReplyCode::Ok,
            ReplyCode::InvalidKeyLength,
            ReplyCode::CryptoFailure,
            ReplyCode::Internal,
        ] {
            assert_eq!(ReplyCode::from_u16(code.as_u16()), Some(code));
        }
        assert_eq!(ReplyCode::from_u16(0x7777), None);
    }

    #[test]
    fn test_every_code_has_its_own_text() {
        let codes = [
            ReplyCode::Ok,
            ReplyCode::WrongPacketType,
            ReplyCode::HandshakeAlreadyCompleted,
            ReplyCode::NullPayload,
            ReplyCode::InvalidKeyLength,
            ReplyCode::HandshakeProcessingFailed,
            ReplyCode::ProtocolMismatch,
            ReplyCode::MalformedPacket,
            ReplyCode::UnknownOpcode,
            ReplyCode::NullCredentials,
            ReplyCode::NotAuthenticated,
            ReplyCode::CryptoFailure,
            ReplyCode::PolicyRejected,
            ReplyCode::AccountDenied,
            ReplyCode::Internal,
        ];
        let texts: std::collections::HashSet<&str> =
            codes.iter().map(|c| c.default_message()).collect();
        assert_eq!(texts.len(), codes.len());
        assert_eq!(ReplyCode::InvalidKeyLength.default_message(), "invalid key length");
    }
}
