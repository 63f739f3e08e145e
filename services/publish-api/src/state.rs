//! Shared service state: the assembled pipeline plus request counters.

use crate::config::Config;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tekserver_crypto::keyring::KeyRing;
use tekserver_crypto::kms::LocalKeyWrapper;
use tekserver_crypto::token::{RevisionTokenConfig, RevisionTokenManager};
use tekserver_domain::transform::Transformer;
use tekserver_publish::processor::PublishProcessor;
use tekserver_storage::exposure::ExposureStore;
use tekserver_storage::revision_keys::RevisionKeyStore;
use tekserver_verify::apps::{AuthorizedApp, AuthorizedAppProvider, CachingAppProvider, MemoryAppProvider};
use tekserver_verify::authority::{HealthAuthority, MemoryAuthorityRegistry};
use tekserver_verify::verifier::Verifier;
use tracing::{info, warn};

/// Request counters, exposed via structured shutdown logs.
#[derive(Default)]
pub struct Metrics {
    pub published: AtomicU64,
    pub rejected: AtomicU64,
    pub chaff: AtomicU64,
}

pub struct AppState {
    pub config: Config,
    pub processor: Arc<PublishProcessor>,
    pub metrics: Metrics,
}

/// Seed file shape: authorized apps plus health authorities, JSON.
#[derive(Deserialize, Default)]
struct Seed {
    #[serde(default)]
    apps: Vec<AuthorizedApp>,
    #[serde(default)]
    authorities: Vec<HealthAuthority>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let wrapper = Arc::new(match &config.kms_master_key {
            Some(encoded) => {
                LocalKeyWrapper::from_base64(encoded, config.revision_token_key_id.clone())
                    .context("LOCAL_KMS_KEY is not a valid base64 256-bit key")?
            }
            None => {
                warn!("LOCAL_KMS_KEY not set, using an ephemeral wrapping key; revision keys will not survive restart");
                LocalKeyWrapper::generate(config.revision_token_key_id.clone())
            }
        });

        let key_store = Arc::new(
            RevisionKeyStore::open(&config.db_path).context("unable to open revision key store")?,
        );
        if key_store
            .allowed_revision_keys()
            .context("unable to list revision keys")?
            .is_empty()
        {
            let created = key_store
                .create_revision_key(wrapper.as_ref(), chrono::Utc::now())
                .context("unable to create initial revision key")?;
            info!(key_id = created.key_id, "bootstrapped initial revision key");
        }

        let keyring = Arc::new(KeyRing::new(
            key_store,
            wrapper,
            Duration::from_secs(config.revision_key_cache_ttl_secs),
        ));
        let tokens = Arc::new(RevisionTokenManager::new(
            keyring,
            RevisionTokenConfig {
                aad: config.revision_token_aad.clone(),
                min_token_length: config.revision_token_min_length,
            },
        ));

        let authorities = Arc::new(MemoryAuthorityRegistry::new());
        let apps = MemoryAppProvider::new();
        if let Some(path) = &config.seed_file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read seed file {path}"))?;
            let seed: Seed = serde_json::from_str(&raw)
                .with_context(|| format!("unable to parse seed file {path}"))?;
            for authority in seed.authorities {
                info!(id = authority.id, name = %authority.name, "registered health authority");
                authorities.add(authority);
            }
            for app in seed.apps {
                info!(app = %app.app_package_name, "registered authorized app");
                apps.add(app)
                    .map_err(|e| anyhow::anyhow!("unable to seed app: {e}"))?;
            }
        }
        let apps: Arc<dyn AuthorizedAppProvider> = Arc::new(CachingAppProvider::new(
            apps,
            Duration::from_secs(config.authorized_app_cache_ttl_secs),
        ));

        let store = Arc::new(Mutex::new(
            ExposureStore::open(&config.db_path).context("unable to open exposure store")?,
        ));

        let processor = Arc::new(PublishProcessor::new(
            apps,
            Verifier::new(authorities),
            Transformer::new(config.transformer_config()),
            tokens,
            store,
            config.processor_config(),
        ));

        Ok(AppState {
            config,
            processor,
            metrics: Metrics::default(),
        })
    }
}
