//! Payload encryption
//!
//! AES-256-GCM with a fresh random 96-bit nonce per call. The wire form is
//! `base64(nonce || ciphertext || tag)`, so every payload is
//! self-contained and tampering is detected on decrypt.

use std::fmt;

use aes_gcm::Aes256Gcm;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use rand::RngExt;
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid cipher key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: {0}")]
    Decrypt(String),
}

pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadCipher([REDACTED])")
    }
}

impl PayloadCipher {
    /// Build from raw key bytes; the key must be exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(key)),
        })
    }

    /// Build from a base64-encoded key as read from env or key file.
    pub fn from_base64_key(key: &Secret<String>) -> Result<Self, CipherError> {
        let bytes = Secret::new(
            STANDARD
                .decode(key.expose().trim())
                .map_err(|e| CipherError::InvalidKey(format!("not valid base64: {e}")))?,
        );
        Self::new(bytes.expose())
    }

    /// Encrypt `plaintext` into an opaque base64 token.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    /// Reverse of `encrypt`. Fails on bad base64, truncation or a wrong key.
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, CipherError> {
        let data = STANDARD
            .decode(token)
            .map_err(|e| CipherError::Decrypt(format!("not valid base64: {e}")))?;
        if data.len() < NONCE_LEN {
            return Err(CipherError::Decrypt("payload too short".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt("authentication failed".into()))
    }
}
