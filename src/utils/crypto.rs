//! # Symmetric Cipher
//!
//! AEAD encryption for credential fields, keyed by the per-connection session key.
//!
//! Two algorithms from the `chacha20poly1305` crate are supported. Every call draws a
//! fresh random nonce from the OS (`getrandom`) and prepends it to the ciphertext, so the
//! output is self-contained: `nonce || ciphertext || tag`.
//!
//! Any decryption problem (short input, wrong key, tampering) is reported as the single
//! `ProtocolError::DecryptionFailed`.

use crate::error::{ProtocolError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};

/// Poly1305 tag length
pub const TAG_SIZE: usize = 16;

/// Cipher selector for the credential pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherAlgorithm {
    /// IETF ChaCha20-Poly1305, 96-bit nonce
    ChaCha20Poly1305,
    /// XChaCha20-Poly1305, 192-bit nonce (safe for random nonces)
    #[default]
    XChaCha20Poly1305,
}

impl CipherAlgorithm {
    pub fn nonce_size(self) -> usize {
        match self {
            CipherAlgorithm::ChaCha20Poly1305 => 12,
            CipherAlgorithm::XChaCha20Poly1305 => 24,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherAlgorithm::ChaCha20Poly1305 => "ChaCha20-Poly1305",
            CipherAlgorithm::XChaCha20Poly1305 => "XChaCha20-Poly1305",
        }
    }
}

enum CipherImpl {
    Ietf(ChaCha20Poly1305),
    Extended(XChaCha20Poly1305),
}

/// A keyed cipher instance
pub struct Crypto {
    cipher: CipherImpl,
    algorithm: CipherAlgorithm,
}

impl Crypto {
    pub fn new(key: &[u8; 32], algorithm: CipherAlgorithm) -> Self {
        let key = Key::from_slice(key);
        let cipher = match algorithm {
            CipherAlgorithm::ChaCha20Poly1305 => CipherImpl::Ietf(ChaCha20Poly1305::new(key)),
            CipherAlgorithm::XChaCha20Poly1305 => {
                CipherImpl::Extended(XChaCha20Poly1305::new(key))
            }
        };
        Self { cipher, algorithm }
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// Fill a nonce buffer from the OS RNG
    fn generate_nonce(buf: &mut [u8]) -> Result<()> {
        getrandom::fill(buf).map_err(|_| ProtocolError::EncryptionFailed)
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce_size = self.algorithm.nonce_size();
        let mut nonce = [0u8; 24];
        Self::generate_nonce(&mut nonce[..nonce_size])?;

        let ciphertext = match &self.cipher {
            CipherImpl::Ietf(c) => c.encrypt(Nonce::from_slice(&nonce[..nonce_size]), plaintext),
            CipherImpl::Extended(c) => c.encrypt(XNonce::from_slice(&nonce), plaintext),
        }
        .map_err(|_| ProtocolError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(nonce_size + ciphertext.len());
        out.extend_from_slice(&nonce[..nonce_size]);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce || ciphertext` produced by [`Crypto::encrypt`]
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let nonce_size = self.algorithm.nonce_size();
        if data.len() < nonce_size + TAG_SIZE {
            return Err(ProtocolError::DecryptionFailed);
        }

        let (nonce, ciphertext) = data.split_at(nonce_size);
        match &self.cipher {
            CipherImpl::Ietf(c) => c.decrypt(Nonce::from_slice(nonce), ciphertext),
            CipherImpl::Extended(c) => c.decrypt(XNonce::from_slice(nonce), ciphertext),
        }
        .map_err(|_| ProtocolError::DecryptionFailed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn test_roundtrip_both_algorithms() {
        for algorithm in [
            CipherAlgorithm::ChaCha20Poly1305,
            CipherAlgorithm::XChaCha20Poly1305,
        ] {
            let crypto = Crypto::new(&KEY, algorithm);
            let sealed = crypto.encrypt(b"hunter2").unwrap();
            assert_eq!(sealed.len(), algorithm.nonce_size() + 7 + TAG_SIZE);
            assert_eq!(crypto.decrypt(&sealed).unwrap(), b"hunter2");
        }
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let crypto = Crypto::new(&KEY, CipherAlgorithm::XChaCha20Poly1305);
        let a = crypto.encrypt(b"same").unwrap();
        let b = crypto.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_and_tamper_are_indistinguishable() {
        let crypto = Crypto::new(&KEY, CipherAlgorithm::XChaCha20Poly1305);
        let other = Crypto::new(&[8u8; 32], CipherAlgorithm::XChaCha20Poly1305);
        let mut sealed = crypto.encrypt(b"secret").unwrap();

        assert!(matches!(
            other.decrypt(&sealed),
            Err(ProtocolError::DecryptionFailed)
        ));

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            crypto.decrypt(&sealed),
            Err(ProtocolError::DecryptionFailed)
        ));

        assert!(matches!(
            crypto.decrypt(&[0u8; 5]),
            Err(ProtocolError::DecryptionFailed)
        ));
    }
}
