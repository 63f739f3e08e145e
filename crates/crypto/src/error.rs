//! Crypto error types.

use thiserror::Error;

/// Errors from the key wrapping seam.
#[derive(Debug, Error)]
pub enum KmsError {
    /// The wrapping key material is unusable.
    #[error("invalid wrapping key: {0}")]
    InvalidKey(String),

    /// Wrap or unwrap failed.
    #[error("key wrapping operation failed: {0}")]
    Operation(String),
}

/// Errors from the revision key ring.
#[derive(Debug, Error)]
pub enum KeyRingError {
    /// The wrapped key source could not be read.
    #[error("unable to load revision keys: {0}")]
    Source(String),

    /// A wrapped key failed to unwrap.
    #[error("unable to unwrap revision key {key_id}: {reason}")]
    Unwrap {
        /// Failing key id.
        key_id: i64,
        /// Failure detail.
        reason: String,
    },

    /// Unwrapped material has the wrong length.
    #[error("revision key {key_id} has invalid length {len}, want 32")]
    InvalidKeyLength {
        /// Failing key id.
        key_id: i64,
        /// Observed length.
        len: usize,
    },

    /// The ring holds no usable encryption key.
    #[error("no active revision key")]
    NoActiveKey,
}

/// Errors from the revision token codec.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token names a key this server does not know.
    #[error("token encrypted with unknown key {0}")]
    UnknownToken(i64),

    /// The token failed to parse or decrypt.
    #[error("invalid revision token: {0}")]
    InvalidToken(String),

    /// Token encryption failed.
    #[error("unable to encrypt revision token")]
    Encrypt,

    /// The ring could not supply keys.
    #[error(transparent)]
    KeyRing(#[from] KeyRingError),
}
