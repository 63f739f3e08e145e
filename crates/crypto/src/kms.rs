//! Key wrapping seam.
//!
//! Revision keys are stored wrapped by an external key management service.
//! The pipeline only needs `wrap`/`unwrap` of a single symmetric key, so that
//! is the whole trait. [`LocalKeyWrapper`] backs development and tests with a
//! locally held AES-256-GCM master key.

use crate::error::KmsError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

const NONCE_LENGTH: usize = 12;

/// Wraps and unwraps revision key material.
pub trait KeyWrapper: Send + Sync {
    /// Encrypts `plaintext` under the wrapping key.
    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Decrypts previously wrapped material.
    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, KmsError>;
}

/// A process-local wrapping key.
///
/// The configured wrapping-key id is folded in as AAD so material wrapped
/// under one id cannot be unwrapped under another.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct LocalKeyWrapper {
    master: [u8; 32],
    #[zeroize(skip)]
    key_id: String,
}

impl LocalKeyWrapper {
    /// Creates a wrapper from raw master key bytes.
    pub fn new(master: [u8; 32], key_id: impl Into<String>) -> Self {
        Self {
            master,
            key_id: key_id.into(),
        }
    }

    /// Creates a wrapper from a base64 encoded 32-byte master key.
    pub fn from_base64(encoded: &str, key_id: impl Into<String>) -> Result<Self, KmsError> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| KmsError::InvalidKey(e.to_string()))?;
        let master: [u8; 32] = raw
            .try_into()
            .map_err(|v: Vec<u8>| KmsError::InvalidKey(format!("{} bytes, want 32", v.len())))?;
        Ok(Self::new(master, key_id))
    }

    /// Creates a wrapper with a random master key. Material wrapped by it is
    /// lost when the process exits; development only.
    pub fn generate(key_id: impl Into<String>) -> Self {
        let mut master = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut master);
        Self::new(master, key_id)
    }

    /// The configured wrapping-key id.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.master))
    }
}

impl KeyWrapper for LocalKeyWrapper {
    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: self.key_id.as_bytes(),
                },
            )
            .map_err(|_| KmsError::Operation("encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, KmsError> {
        if wrapped.len() <= NONCE_LENGTH {
            return Err(KmsError::Operation("wrapped material too short".into()));
        }
        let (nonce, ciphertext) = wrapped.split_at(NONCE_LENGTH);
        self.cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: self.key_id.as_bytes(),
                },
            )
            .map_err(|_| KmsError::Operation("decryption failed".into()))
    }
}
