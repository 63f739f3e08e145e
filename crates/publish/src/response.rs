//! Publish response assembly.
//!
//! The wire shape of a publish response, plus the helpers that pad every
//! response (success, failure and chaff alike) so body sizes do not leak
//! what happened.

use crate::processor::PublishOutcome;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tekserver_core::base64util;
use tekserver_core::error::{codes, PublishError};

/// JSON body of every publish response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Token covering this session's keys; empty on failure.
    #[serde(rename = "revisionToken", default, skip_serializing_if = "String::is_empty")]
    pub revision_token: String,
    /// Rows written by this request.
    #[serde(rename = "insertedExposures", default)]
    pub inserted_exposures: u64,
    /// Random padding, always present.
    #[serde(default)]
    pub padding: String,
    /// Stable error or partial-failure code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-key warnings on a partial failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PublishResponse {
    /// Builds the success response for an outcome. Partial per-key failures
    /// still return 200, flagged with the partial-failure code.
    pub fn success(outcome: PublishOutcome) -> (Self, u16) {
        let code = if outcome.warnings.is_empty() {
            None
        } else {
            Some(codes::PARTIAL_FAILURE.to_string())
        };
        (
            Self {
                revision_token: outcome.revision_token,
                inserted_exposures: outcome.inserted,
                padding: String::new(),
                code,
                error: None,
                warnings: outcome.warnings,
            },
            200,
        )
    }

    /// Builds the failure response for an error kind.
    pub fn failure(err: &PublishError) -> (Self, u16) {
        (
            Self {
                revision_token: String::new(),
                inserted_exposures: 0,
                padding: String::new(),
                code: Some(err.code().to_string()),
                error: Some(err.to_string()),
                warnings: Vec::new(),
            },
            err.http_status(),
        )
    }

    /// Builds a plausible dummy response for chaff requests. No state is
    /// read or written; the body just has to look like a success.
    pub fn chaff() -> Self {
        let mut rng = rand::thread_rng();
        let mut fake_token = vec![0u8; 120];
        rng.fill_bytes(&mut fake_token);
        Self {
            revision_token: base64util::encode(&fake_token),
            inserted_exposures: u64::from(rng.next_u32() % 14) + 1,
            padding: String::new(),
            code: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    /// Applies response padding in place.
    pub fn with_padding(mut self, min_bytes: usize, range: usize) -> Self {
        self.padding = random_padding(min_bytes, range);
        self
    }
}

/// Base64 of `min_bytes + rand(0..range)` random bytes.
pub fn random_padding(min_bytes: usize, range: usize) -> String {
    let mut rng = rand::thread_rng();
    let extra = if range > 0 {
        (rng.next_u32() as usize) % range
    } else {
        0
    };
    let mut padding = vec![0u8; min_bytes + extra];
    rng.fill_bytes(&mut padding);
    base64util::encode(&padding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(warnings: Vec<String>) -> PublishOutcome {
        PublishOutcome {
            inserted: 2,
            revised: 0,
            dropped: 0,
            revision_token: "dG9rZW4=".into(),
            warnings,
        }
    }

    #[test]
    fn test_success_response() {
        let (resp, status) = PublishResponse::success(outcome(vec![]));
        assert_eq!(status, 200);
        assert_eq!(resp.inserted_exposures, 2);
        assert!(resp.code.is_none());
    }

    #[test]
    fn test_partial_failure_still_200() {
        let (resp, status) = PublishResponse::success(outcome(vec!["key 1: bad".into()]));
        assert_eq!(status, 200);
        assert_eq!(resp.code.as_deref(), Some("partial_failure"));
        assert_eq!(resp.warnings.len(), 1);
    }

    #[test]
    fn test_failure_response_carries_code_and_status() {
        let (resp, status) = PublishResponse::failure(&PublishError::MissingRevisionToken);
        assert_eq!(status, 400);
        assert_eq!(resp.code.as_deref(), Some("missing_revision_token"));
        assert!(resp.revision_token.is_empty());
    }

    #[test]
    fn test_padding_respects_minimum() {
        let padding = random_padding(64, 16);
        let raw = base64util::decode_flexible(&padding).unwrap();
        assert!(raw.len() >= 64 && raw.len() < 64 + 16);
    }

    #[test]
    fn test_chaff_looks_like_success() {
        let resp = PublishResponse::chaff().with_padding(32, 8);
        assert!(!resp.revision_token.is_empty());
        assert!(!resp.padding.is_empty());
        assert!(resp.code.is_none());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("revisionToken"));
        assert!(!json.contains("\"error\""));
    }
}
