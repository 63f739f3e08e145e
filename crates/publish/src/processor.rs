//! Publish orchestration.
//!
//! One request, one pass: resolve the app policy, resolve regions, verify
//! the diagnosis certificate, open the revision token, transform, persist in
//! a single transaction, mint the next token. Every failure maps to exactly
//! one [`PublishError`] kind; translation to the wire happens at the HTTP
//! boundary.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tekserver_core::base64util;
use tekserver_core::error::PublishError;
use tekserver_core::interval::interval_number;
use tekserver_crypto::token::{
    build_revision_token_data, RevisableKey, RevisionTokenData, RevisionTokenManager,
};
use tekserver_domain::model::{Exposure, Publish};
use tekserver_domain::revise::ReviseError;
use tekserver_domain::transform::Transformer;
use tekserver_storage::error::StoreError;
use tekserver_storage::exposure::{ExposureStore, InsertAndReviseRequest};
use tekserver_verify::apps::{AuthorizedApp, AuthorizedAppProvider};
use tekserver_verify::verifier::{VerificationOutcome, Verifier};
use tracing::{info, warn};

/// Processor tunables.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Region applied when neither the request nor the policy names any.
    pub default_region: String,
    /// Drop (rather than reject) revisions the token does not cover.
    pub allow_partial_revisions: bool,
    /// How long previously uploaded keys stay bound to a revision token.
    pub max_interval_age: chrono::Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            default_region: String::new(),
            allow_partial_revisions: false,
            max_interval_age: chrono::Duration::hours(360),
        }
    }
}

/// Successful publish result.
#[derive(Debug)]
pub struct PublishOutcome {
    /// Fresh rows written.
    pub inserted: u64,
    /// Existing rows revised.
    pub revised: u64,
    /// Incoming records that produced no write.
    pub dropped: u64,
    /// Base64 revision token covering this session's keys.
    pub revision_token: String,
    /// Per-key transform failures, empty on a clean batch.
    pub warnings: Vec<String>,
}

/// The publish pipeline.
pub struct PublishProcessor {
    apps: Arc<dyn AuthorizedAppProvider>,
    verifier: Verifier,
    transformer: Transformer,
    tokens: Arc<RevisionTokenManager>,
    store: Arc<Mutex<ExposureStore>>,
    config: ProcessorConfig,
}

impl PublishProcessor {
    /// Assembles the pipeline.
    pub fn new(
        apps: Arc<dyn AuthorizedAppProvider>,
        verifier: Verifier,
        transformer: Transformer,
        tokens: Arc<RevisionTokenManager>,
        store: Arc<Mutex<ExposureStore>>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            apps,
            verifier,
            transformer,
            tokens,
            store,
            config,
        }
    }

    /// Runs one publish request to completion.
    pub fn process(
        &self,
        publish: &Publish,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, PublishError> {
        let policy = self.lookup_policy(&publish.health_authority_id)?;
        let regions = self.resolve_regions(publish, &policy)?;

        let claims = match self
            .verifier
            .verify(publish, &policy)
            .map_err(|e| PublishError::CertificateInvalid(e.to_string()))?
        {
            VerificationOutcome::Verified(claims) => Some(claims),
            VerificationOutcome::Bypassed => None,
        };

        // A token that fails to open is treated as absent unless the store
        // turns out to need it; then the failure surfaces as invalid.
        let (token, token_failure) = self.open_token(publish);

        let transformed = self
            .transformer
            .transform(
                publish,
                &policy.app_package_name,
                &regions,
                claims.as_ref(),
                now,
            )
            .map_err(|e| PublishError::BadRequest(e.to_string()))?;

        let result = {
            let mut store = self
                .store
                .lock()
                .map_err(|_| PublishError::Internal("exposure store lock poisoned".into()))?;
            store
                .insert_and_revise(InsertAndReviseRequest {
                    incoming: transformed.exposures,
                    token: token.as_ref(),
                    require_token: !policy.bypass_revision_token,
                    allow_partial_revisions: self.config.allow_partial_revisions,
                })
                .map_err(|e| map_store_error(e, token_failure.as_deref()))?
        };

        let revision_token = self.mint_token(token.as_ref(), &result.exposures, now)?;

        info!(
            health_authority = %publish.health_authority_id,
            inserted = result.inserted,
            revised = result.revised,
            dropped = result.dropped,
            warnings = transformed.warnings.len(),
            "publish processed"
        );
        Ok(PublishOutcome {
            inserted: result.inserted,
            revised: result.revised,
            dropped: result.dropped,
            revision_token,
            warnings: transformed.warnings,
        })
    }

    fn lookup_policy(&self, name: &str) -> Result<Arc<AuthorizedApp>, PublishError> {
        if name.is_empty() {
            return Err(PublishError::UnknownHealthAuthority("(empty)".into()));
        }
        match self.apps.lookup(name) {
            Ok(Some(policy)) => Ok(policy),
            Ok(None) => Err(PublishError::UnknownHealthAuthority(name.to_string())),
            Err(e) => Err(PublishError::HealthAuthorityUnavailable(
                name.to_string(),
                e.to_string(),
            )),
        }
    }

    /// Regions come from the legacy request field (validated against the
    /// policy), else the policy's allowed set, else the server default.
    fn resolve_regions(
        &self,
        publish: &Publish,
        policy: &AuthorizedApp,
    ) -> Result<Vec<String>, PublishError> {
        if !publish.regions.is_empty() {
            for region in &publish.regions {
                if !policy.is_allowed_region(region) {
                    return Err(PublishError::RegionNotAuthorized(region.clone()));
                }
            }
            return Ok(publish.regions.clone());
        }
        if !policy.allowed_regions.is_empty() {
            return Ok(policy.allowed_regions.clone());
        }
        if !self.config.default_region.is_empty() {
            return Ok(vec![self.config.default_region.clone()]);
        }
        Err(PublishError::MissingRegionConfiguration)
    }

    fn open_token(&self, publish: &Publish) -> (Option<RevisionTokenData>, Option<String>) {
        if publish.revision_token.is_empty() {
            return (None, None);
        }
        let raw = match base64util::decode_flexible(&publish.revision_token) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "revision token is not base64, treating as absent");
                return (None, Some(format!("undecodable token: {e}")));
            }
        };
        match self.tokens.open(&raw) {
            Ok(data) => (Some(data), None),
            Err(e) => {
                warn!(error = %e, "unable to open revision token, treating as absent");
                (None, Some(e.to_string()))
            }
        }
    }

    fn mint_token(
        &self,
        prior: Option<&RevisionTokenData>,
        just_stored: &[Exposure],
        now: DateTime<Utc>,
    ) -> Result<String, PublishError> {
        let empty = RevisionTokenData::default();
        let prior = prior.unwrap_or(&empty);
        let stored: Vec<RevisableKey> = just_stored
            .iter()
            .map(|e| RevisableKey {
                temporary_exposure_key: e.exposure_key.clone(),
                interval_number: e.interval_number,
                interval_count: e.interval_count,
            })
            .collect();
        let min_interval = interval_number(now - self.config.max_interval_age);
        let data = build_revision_token_data(prior, &stored, min_interval);
        let token = self
            .tokens
            .mint(&data)
            .map_err(|e| PublishError::Internal(format!("unable to mint revision token: {e}")))?;
        Ok(base64util::encode(&token))
    }
}

fn map_store_error(err: StoreError, token_failure: Option<&str>) -> PublishError {
    match err {
        StoreError::NoRevisionToken => match token_failure {
            // The client did present a token; it just never opened.
            Some(reason) => PublishError::InvalidRevisionToken(reason.to_string()),
            None => PublishError::MissingRevisionToken,
        },
        StoreError::ExistingKeyNotInToken { key } => {
            PublishError::InvalidRevisionToken(format!("token does not cover key {key}"))
        }
        StoreError::TokenMetadataMismatch { key } => {
            PublishError::InvalidRevisionToken(format!("token metadata mismatch for key {key}"))
        }
        StoreError::IncomingMetadataMismatch { key } => {
            PublishError::InvalidRevisionToken(format!("interval metadata mismatch for key {key}"))
        }
        StoreError::Revise(ReviseError::KeyAlreadyRevised { .. }) => {
            PublishError::KeyAlreadyRevised
        }
        StoreError::Revise(ReviseError::InvalidTransition { from, to, .. }) => {
            PublishError::InvalidReportTypeTransition { from, to }
        }
        StoreError::Revise(ReviseError::NonLocalProvenance { key }) => {
            PublishError::BadRequest(format!("key {key} was not uploaded to this server"))
        }
        StoreError::InvalidKeyRevisionRequest { .. } => PublishError::KeyAlreadyRevised,
        other => PublishError::Internal(other.to_string()),
    }
}
