//! Publish error taxonomy.
//!
//! Every failure mode of the publish pipeline maps to exactly one kind with a
//! stable wire code and an HTTP status. Translation to the wire happens once,
//! at the HTTP boundary.

use thiserror::Error;

/// Stable wire codes returned in the `code` field of a publish response.
pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const UNKNOWN_HEALTH_AUTHORITY_ID: &str = "unknown_health_authority_id";
    pub const UNABLE_TO_LOAD_HEALTH_AUTHORITY: &str = "unable_to_load_health_authority";
    pub const HEALTH_AUTHORITY_MISSING_REGION_CONFIG: &str =
        "health_authority_missing_region_configuration";
    pub const VERIFICATION_CERTIFICATE_INVALID: &str = "verification_certificate_invalid";
    pub const MISSING_REVISION_TOKEN: &str = "missing_revision_token";
    pub const INVALID_REVISION_TOKEN: &str = "invalid_revision_token";
    pub const KEY_ALREADY_REVISED: &str = "key_already_revised";
    pub const INVALID_REPORT_TYPE_TRANSITION: &str = "invalid_report_type_transition";
    pub const PARTIAL_FAILURE: &str = "partial_failure";
}

/// Failure kinds of the publish pipeline.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The request body could not be decoded.
    #[error("unable to decode request: {0}")]
    BadJson(String),

    /// No authorized app is registered under the supplied health authority id.
    #[error("unknown health authority: {0}")]
    UnknownHealthAuthority(String),

    /// The authorized app catalog could not be reached.
    #[error("unable to load health authority {0}: {1}")]
    HealthAuthorityUnavailable(String, String),

    /// A legacy request named a region the app is not authorized for.
    #[error("region {0} is not authorized for this app")]
    RegionNotAuthorized(String),

    /// No regions could be resolved for the upload.
    #[error("health authority has no region configuration")]
    MissingRegionConfiguration,

    /// The diagnosis verification certificate failed validation.
    #[error("verification certificate invalid: {0}")]
    CertificateInvalid(String),

    /// The publish payload failed batch-level validation.
    #[error("invalid publish request: {0}")]
    BadRequest(String),

    /// Keys already exist in storage but no revision token was supplied.
    #[error("revision token required but not supplied")]
    MissingRevisionToken,

    /// The revision token was present but unusable, or did not cover the
    /// existing keys it needs to.
    #[error("invalid revision token: {0}")]
    InvalidRevisionToken(String),

    /// A key that has already been revised cannot be revised again.
    #[error("key has already been revised")]
    KeyAlreadyRevised,

    /// The requested report type transition is not allowed.
    #[error("invalid report type transition: {from} -> {to}")]
    InvalidReportTypeTransition { from: String, to: String },

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PublishError {
    /// Stable wire code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            PublishError::BadJson(_) => codes::BAD_REQUEST,
            PublishError::UnknownHealthAuthority(_) => codes::UNKNOWN_HEALTH_AUTHORITY_ID,
            PublishError::HealthAuthorityUnavailable(_, _) => {
                codes::UNABLE_TO_LOAD_HEALTH_AUTHORITY
            }
            PublishError::RegionNotAuthorized(_) => codes::BAD_REQUEST,
            PublishError::MissingRegionConfiguration => {
                codes::HEALTH_AUTHORITY_MISSING_REGION_CONFIG
            }
            PublishError::CertificateInvalid(_) => codes::VERIFICATION_CERTIFICATE_INVALID,
            PublishError::BadRequest(_) => codes::BAD_REQUEST,
            PublishError::MissingRevisionToken => codes::MISSING_REVISION_TOKEN,
            PublishError::InvalidRevisionToken(_) => codes::INVALID_REVISION_TOKEN,
            PublishError::KeyAlreadyRevised => codes::KEY_ALREADY_REVISED,
            PublishError::InvalidReportTypeTransition { .. } => {
                codes::INVALID_REPORT_TYPE_TRANSITION
            }
            PublishError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// HTTP status the kind surfaces as.
    pub fn http_status(&self) -> u16 {
        match self {
            PublishError::BadJson(_)
            | PublishError::MissingRegionConfiguration
            | PublishError::BadRequest(_)
            | PublishError::MissingRevisionToken
            | PublishError::InvalidRevisionToken(_)
            | PublishError::KeyAlreadyRevised
            | PublishError::InvalidReportTypeTransition { .. } => 400,
            PublishError::UnknownHealthAuthority(_)
            | PublishError::RegionNotAuthorized(_)
            | PublishError::CertificateInvalid(_) => 401,
            PublishError::HealthAuthorityUnavailable(_, _) => 404,
            PublishError::Internal(_) => 500,
        }
    }
}
