//! Verification error types.

use thiserror::Error;

/// Errors from the authorized app catalog.
#[derive(Debug, Error)]
pub enum AppsError {
    /// The backing catalog could not be reached.
    #[error("authorized app catalog unavailable: {0}")]
    Unavailable(String),
}

/// Errors from diagnosis certificate verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The request carried no certificate.
    #[error("missing verification payload")]
    MissingPayload,

    /// The JWT could not be parsed at all.
    #[error("unparseable verification certificate: {0}")]
    Malformed(String),

    /// The certificate uses an algorithm other than ES256.
    #[error("unsupported algorithm {0}, must be ES256")]
    WrongAlgorithm(String),

    /// The certificate names no key id.
    #[error("verification certificate has no kid header")]
    MissingKeyId,

    /// No registered health authority key matches the kid.
    #[error("no health authority key matches kid {0}")]
    UnknownKeyId(String),

    /// Signature, issuer, audience or time window validation failed.
    #[error("certificate validation failed: {0}")]
    Invalid(String),

    /// The HMAC in the certificate does not cover the uploaded keys.
    #[error("exposure key HMAC mismatch")]
    HmacMismatch,

    /// The request's HMAC salt is unusable.
    #[error("invalid hmac key: {0}")]
    InvalidHmacKey(String),
}
