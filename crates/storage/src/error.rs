//! Storage error types.

use tekserver_domain::revise::ReviseError;
use thiserror::Error;

/// Errors raised by the stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Driver-level failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Keys already exist in storage and the policy requires a token.
    #[error("revision token required but not supplied")]
    NoRevisionToken,

    /// A locked existing key is not covered by the presented token.
    #[error("existing key {key} not present in revision token")]
    ExistingKeyNotInToken {
        /// Base64 of the uncovered key.
        key: String,
    },

    /// The token's interval metadata disagrees with the stored row.
    #[error("revision token metadata mismatch for key {key}")]
    TokenMetadataMismatch {
        /// Base64 of the mismatched key.
        key: String,
    },

    /// The upload's interval metadata disagrees with the stored row.
    #[error("incoming interval metadata does not match stored key {key}")]
    IncomingMetadataMismatch {
        /// Base64 of the mismatched key.
        key: String,
    },

    /// Merge-level failure (provenance, finality, transitions).
    #[error(transparent)]
    Revise(#[from] ReviseError),

    /// An update that had to revise exactly one row revised none; the row was
    /// revised concurrently. The transaction is rolled back.
    #[error("revision of key {key} affected no rows")]
    InvalidKeyRevisionRequest {
        /// Base64 of the contested key.
        key: String,
    },

    /// A scan cursor could not be decoded.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// Filesystem-level failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else.
    #[error("storage error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
