//! Service configuration, environment-variable driven.
//!
//! Durations are plain integer seconds. `REVISION_TOKEN_AAD` is required and
//! must be non-empty; everything else has a production-shaped default.

use tekserver_core::envconfig;
use tekserver_domain::transform::TransformerConfig;
use tekserver_publish::processor::ProcessorConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    /// Deployment-scoped AAD folded into every revision token.
    pub revision_token_aad: Vec<u8>,
    /// KMS wrapping-key id revision keys are wrapped under.
    pub revision_token_key_id: String,
    pub revision_token_min_length: usize,
    /// Base64 master key for the local wrapper; absent means ephemeral.
    pub kms_master_key: Option<String>,
    pub max_keys_on_publish: usize,
    pub max_same_start_interval_keys: usize,
    pub max_interval_age: chrono::Duration,
    pub truncate_window: chrono::Duration,
    pub max_symptom_onset_days: u32,
    pub debug_release_same_day_keys: bool,
    pub response_padding_min_bytes: usize,
    pub response_padding_range: usize,
    pub allow_partial_revisions: bool,
    pub default_region: String,
    pub revision_key_cache_ttl_secs: u64,
    pub authorized_app_cache_ttl_secs: u64,
    /// Optional JSON file seeding authorized apps and health authorities.
    pub seed_file: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Config {
            port: envconfig::parse_var("PORT", 8080),
            db_path: envconfig::string_var("DB_PATH", "tekserver.db"),
            revision_token_aad: envconfig::required_var("REVISION_TOKEN_AAD")?.into_bytes(),
            revision_token_key_id: envconfig::string_var("REVISION_TOKEN_KEY_ID", "revision-tokens"),
            revision_token_min_length: envconfig::parse_var("REVISION_TOKEN_MIN_LENGTH", 28),
            kms_master_key: std::env::var("LOCAL_KMS_KEY").ok().filter(|v| !v.is_empty()),
            max_keys_on_publish: envconfig::parse_var("MAX_KEYS_ON_PUBLISH", 30),
            max_same_start_interval_keys: envconfig::parse_var("MAX_SAME_START_INTERVAL_KEYS", 3),
            // 15 days: the outer bound of epidemiological relevance.
            max_interval_age: envconfig::duration_secs_var("MAX_INTERVAL_AGE_ON_PUBLISH", 360 * 3600),
            truncate_window: envconfig::duration_secs_var("TRUNCATE_WINDOW", 3600),
            max_symptom_onset_days: envconfig::parse_var("MAX_SYMPTOM_ONSET_DAYS", 14),
            debug_release_same_day_keys: envconfig::bool_var("DEBUG_RELEASE_SAME_DAY_KEYS", false),
            response_padding_min_bytes: envconfig::parse_var("RESPONSE_PADDING_MIN_BYTES", 1024),
            response_padding_range: envconfig::parse_var("RESPONSE_PADDING_RANGE", 1024),
            allow_partial_revisions: envconfig::bool_var("ALLOW_PARTIAL_REVISIONS", false),
            default_region: envconfig::string_var("DEFAULT_REGION", ""),
            revision_key_cache_ttl_secs: envconfig::parse_var("REVISION_KEY_CACHE_TTL", 300),
            authorized_app_cache_ttl_secs: envconfig::parse_var("AUTHORIZED_APP_CACHE_TTL", 300),
            seed_file: std::env::var("AUTHORIZED_APPS_FILE").ok().filter(|v| !v.is_empty()),
        })
    }

    pub fn transformer_config(&self) -> TransformerConfig {
        TransformerConfig {
            max_exposure_keys: self.max_keys_on_publish,
            max_same_day_keys: self.max_same_start_interval_keys,
            max_interval_start_age: self.max_interval_age,
            truncate_window: self.truncate_window,
            max_symptom_onset_days: self.max_symptom_onset_days,
            debug_release_same_day_keys: self.debug_release_same_day_keys,
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            default_region: self.default_region.clone(),
            allow_partial_revisions: self.allow_partial_revisions,
            max_interval_age: self.max_interval_age,
        }
    }
}
