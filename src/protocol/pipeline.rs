//! # Credential Pipeline
//!
//! Field-level protection of a [`CredentialsPacket`]. Username and password are
//! transformed independently and stored back into the packet as base64 text, and the
//! matching header flag is set or cleared.
//!
//! Every operation mutates the packet in place and hands back the same `&mut`, so steps
//! chain without copying. Replaced plaintext is zeroized before it is dropped.
//!
//! Both sides agree on a [`TransformOrder`] out of band. The flags describe what has
//! been applied to the packet; they are not consulted to decide the order.

use crate::config::{PipelineConfig, MAX_PASSWORD_FIELD, MAX_USERNAME_FIELD};
use crate::core::header::PacketFlags;
use crate::core::packet::{Credentials, CredentialsPacket};
use crate::error::{ProtocolError, Result};
use crate::session::connection::SessionKey;
use crate::utils::compression::{self, CompressionKind};
use crate::utils::crypto::{CipherAlgorithm, Crypto};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};
use zeroize::{Zeroize, Zeroizing};

/// Order in which compression and encryption are applied on send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOrder {
    /// Compress, then encrypt. Receive path decrypts, then decompresses.
    #[default]
    CompressThenEncrypt,
    /// Encrypt, then compress. Ciphertext barely compresses; kept for legacy peers.
    EncryptThenCompress,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialPipeline {
    cipher: CipherAlgorithm,
    compression: CompressionKind,
    order: TransformOrder,
}

impl CredentialPipeline {
    pub fn new(cipher: CipherAlgorithm, compression: CompressionKind, order: TransformOrder) -> Self {
        Self {
            cipher,
            compression,
            order,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.cipher, config.compression, config.order)
    }

    pub fn order(&self) -> TransformOrder {
        self.order
    }

    /// Encrypt username and password, each under its own fresh nonce.
    ///
    /// # Errors
    /// `NullCredentials` if the packet carries none; `EncryptionFailed` from the cipher.
    #[instrument(skip_all, fields(cipher = self.cipher.name()))]
    pub fn encrypt<'p>(
        &self,
        packet: &'p mut CredentialsPacket,
        key: &SessionKey,
    ) -> Result<&'p mut CredentialsPacket> {
        let crypto = Crypto::new(key.as_bytes(), self.cipher);
        let creds = credentials_mut(packet)?;

        let username = Zeroizing::new(STANDARD.encode(crypto.encrypt(creds.username.as_bytes())?));
        let password = Zeroizing::new(STANDARD.encode(crypto.encrypt(creds.password.as_bytes())?));
        replace_field(&mut creds.username, username);
        replace_field(&mut creds.password, password);

        packet.fields.flags.insert(PacketFlags::ENCRYPTED);
        trace!("Credentials encrypted");
        Ok(packet)
    }

    /// Reverse [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    /// `InvalidEncoding` for text that is not base64. Any cipher failure, including
    /// a truncated field or a plaintext that is not UTF-8, is `DecryptionFailed`.
    #[instrument(skip_all, fields(cipher = self.cipher.name()))]
    pub fn decrypt<'p>(
        &self,
        packet: &'p mut CredentialsPacket,
        key: &SessionKey,
    ) -> Result<&'p mut CredentialsPacket> {
        let crypto = Crypto::new(key.as_bytes(), self.cipher);
        let creds = credentials_mut(packet)?;

        let username = Zeroizing::new(decrypt_field(&crypto, &creds.username)?);
        let password = Zeroizing::new(decrypt_field(&crypto, &creds.password)?);
        replace_field(&mut creds.username, username);
        replace_field(&mut creds.password, password);

        packet.fields.flags.remove(PacketFlags::ENCRYPTED);
        trace!("Credentials decrypted");
        Ok(packet)
    }

    #[instrument(skip_all, fields(compression = ?self.compression))]
    pub fn compress<'p>(&self, packet: &'p mut CredentialsPacket) -> Result<&'p mut CredentialsPacket> {
        let creds = credentials_mut(packet)?;

        let username = self.compress_field(&creds.username)?;
        let password = self.compress_field(&creds.password)?;
        replace_field(&mut creds.username, username);
        replace_field(&mut creds.password, password);

        packet.fields.flags.insert(PacketFlags::COMPRESSED);
        Ok(packet)
    }

    /// Reverse [`compress`](Self::compress).
    ///
    /// # Errors
    /// `InvalidEncoding` for text that is not base64. `CompressionFailed` when the
    /// frame does not verify, the bytes are not exactly what `compress` would have
    /// produced for the decoded text, the result is not UTF-8, or it exceeds the
    /// field limit.
    #[instrument(skip_all, fields(compression = ?self.compression))]
    pub fn decompress<'p>(
        &self,
        packet: &'p mut CredentialsPacket,
    ) -> Result<&'p mut CredentialsPacket> {
        let creds = credentials_mut(packet)?;

        let username = Zeroizing::new(self.decompress_field(&creds.username, MAX_USERNAME_FIELD)?);
        let password = Zeroizing::new(self.decompress_field(&creds.password, MAX_PASSWORD_FIELD)?);
        replace_field(&mut creds.username, username);
        replace_field(&mut creds.password, password);

        packet.fields.flags.remove(PacketFlags::COMPRESSED);
        Ok(packet)
    }

    /// Apply the configured send-side order
    pub fn protect<'p>(
        &self,
        packet: &'p mut CredentialsPacket,
        key: &SessionKey,
    ) -> Result<&'p mut CredentialsPacket> {
        match self.order {
            TransformOrder::CompressThenEncrypt => {
                self.compress(packet)?;
                self.encrypt(packet, key)
            }
            TransformOrder::EncryptThenCompress => {
                self.encrypt(packet, key)?;
                self.compress(packet)
            }
        }
    }

    /// Apply the configured receive-side order, the inverse of [`protect`](Self::protect)
    pub fn unprotect<'p>(
        &self,
        packet: &'p mut CredentialsPacket,
        key: &SessionKey,
    ) -> Result<&'p mut CredentialsPacket> {
        match self.order {
            TransformOrder::CompressThenEncrypt => {
                self.decrypt(packet, key)?;
                self.decompress(packet)
            }
            TransformOrder::EncryptThenCompress => {
                self.decompress(packet)?;
                self.decrypt(packet, key)
            }
        }
    }

    fn compress_field(&self, field: &str) -> Result<Zeroizing<String>> {
        let compressed = Zeroizing::new(compression::compress(field.as_bytes(), &self.compression)?);
        Ok(Zeroizing::new(STANDARD.encode(&*compressed)))
    }

    fn decompress_field(&self, field: &str, limit: usize) -> Result<String> {
        let raw = Zeroizing::new(decode_base64(field)?);
        let mut bytes = Zeroizing::new(compression::decompress(&raw, &self.compression, limit)?);
        // Accept only the encoder's own output for this text
        let canonical = Zeroizing::new(compression::compress(&bytes, &self.compression)?);
        if *canonical != *raw {
            return Err(ProtocolError::CompressionFailed);
        }
        into_utf8(std::mem::take(&mut *bytes), ProtocolError::CompressionFailed)
    }
}

fn credentials_mut(packet: &mut CredentialsPacket) -> Result<&mut Credentials> {
    packet
        .credentials
        .as_mut()
        .ok_or(ProtocolError::NullCredentials)
}

fn decrypt_field(crypto: &Crypto, field: &str) -> Result<String> {
    let raw = decode_base64(field)?;
    let plaintext = crypto.decrypt(&raw)?;
    into_utf8(plaintext, ProtocolError::DecryptionFailed)
}

fn decode_base64(field: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(field)
        .map_err(|_| ProtocolError::InvalidEncoding)
}

fn into_utf8(bytes: Vec<u8>, err: ProtocolError) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        let mut bytes = e.into_bytes();
        bytes.zeroize();
        err
    })
}

fn replace_field(slot: &mut String, mut value: Zeroizing<String>) {
    let mut old = std::mem::replace(slot, std::mem::take(&mut *value));
    old.zeroize();
}
