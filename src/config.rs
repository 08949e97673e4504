//! # Configuration Management
//!
//! Wire constants and the runtime configuration tree for the session core.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()` (`SESSION_SHIELD_*`)
//! - Direct instantiation with defaults
//!
//! The transform order for credential fields is deliberately a configuration value: both
//! peers must agree on it out of band, it is never negotiated per packet.

use crate::error::{ProtocolError, Result};
use crate::protocol::pipeline::TransformOrder;
use crate::utils::compression::CompressionKind;
use crate::utils::crypto::CipherAlgorithm;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// Magic number identifying this protocol family/version ("SHLD")
pub const MAGIC_NUMBER: u32 = 0x5348_4C44;

/// Fixed header size: magic(4) + opcode(2) + flags(1) + priority(1) + transport(1) + length(2)
pub const HEADER_SIZE: usize = 11;

/// Largest encodable packet (length field is a u16)
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Size of an x25519 public key
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the derived session key (SHA-256 output)
pub const SESSION_KEY_SIZE: usize = 32;

/// Maximum encoded username field (after transforms)
pub const MAX_USERNAME_FIELD: usize = 512;

/// Maximum encoded password field (after transforms)
pub const MAX_PASSWORD_FIELD: usize = 1024;

/// Maximum encoded metadata blob
pub const MAX_METADATA_FIELD: usize = 512;

/// Maximum reply message length
pub const MAX_REPLY_MESSAGE: usize = 1024;

/// Reason given to peers when the server shuts down
pub const DEFAULT_SHUTDOWN_REASON: &str = "server shutting down";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    /// Server-side connection settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Credential protection pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Packet pool sizing
    #[serde(default)]
    pub pool: PoolConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(limit) = std::env::var("SESSION_SHIELD_MAX_CONNECTIONS") {
            config.server.max_connections = limit.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid SESSION_SHIELD_MAX_CONNECTIONS: {e}"))
            })?;
        }

        if let Ok(reason) = std::env::var("SESSION_SHIELD_SHUTDOWN_REASON") {
            config.server.shutdown_reason = reason;
        }

        if let Ok(cipher) = std::env::var("SESSION_SHIELD_CIPHER") {
            config.pipeline.cipher = match cipher.to_ascii_lowercase().as_str() {
                "chacha20poly1305" => CipherAlgorithm::ChaCha20Poly1305,
                "xchacha20poly1305" => CipherAlgorithm::XChaCha20Poly1305,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "Unknown cipher algorithm: {other}"
                    )))
                }
            };
        }

        if let Ok(level) = std::env::var("SESSION_SHIELD_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level: {level}"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.pipeline.validate());
        errors.extend(self.pool.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-side connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Maximum number of concurrently registered connections
    pub max_connections: usize,

    /// Reason sent to every peer by `Gateway::shutdown`
    pub shutdown_reason: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            shutdown_reason: DEFAULT_SHUTDOWN_REASON.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.shutdown_reason.is_empty() {
            errors.push("Shutdown reason cannot be empty".to_string());
        } else if self.shutdown_reason.len() > MAX_REPLY_MESSAGE {
            errors.push(format!(
                "Shutdown reason too long: {} bytes (maximum: {MAX_REPLY_MESSAGE})",
                self.shutdown_reason.len()
            ));
        }

        errors
    }
}

/// Credential protection pipeline settings
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// AEAD used for credential fields
    pub cipher: CipherAlgorithm,

    /// Compressor used for credential fields
    pub compression: CompressionKind,

    /// Canonical transform order; must match the peer
    pub order: TransformOrder,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cipher: CipherAlgorithm::XChaCha20Poly1305,
            compression: CompressionKind::Lz4,
            order: TransformOrder::CompressThenEncrypt,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.order == TransformOrder::EncryptThenCompress {
            errors.push(
                "WARNING: encrypt-then-compress gains nothing on ciphertext - not recommended"
                    .to_string(),
            );
        }

        errors
    }
}

/// Packet pool sizing
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Instances pre-allocated per packet kind
    pub preallocate: usize,

    /// Upper bound on idle instances kept per packet kind
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            preallocate: 16,
            max_idle: 256,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_idle == 0 {
            errors.push("Pool max_idle must be greater than 0".to_string());
        }
        if self.preallocate > self.max_idle {
            errors.push(format!(
                "Pool preallocate ({}) cannot exceed max_idle ({})",
                self.preallocate, self.max_idle
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("session-shield"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
