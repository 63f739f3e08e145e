//! Authorized app policy catalog.
//!
//! An upload names a health authority id, which resolves to the policy record
//! for the mobile app the authority operates. The pipeline only needs
//! `lookup`; `add` exists for setup tooling. Lookups go through a TTL cache
//! that also serves stale entries across transient catalog failures.

use crate::error::AppsError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::warn;

/// Policy record for one authorized uploading app.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AuthorizedApp {
    /// Lowercased package / health authority name the app uploads under.
    pub app_package_name: String,
    /// Regions this app may publish keys for.
    #[serde(default)]
    pub allowed_regions: Vec<String>,
    /// Health authorities whose certificates this app may present.
    #[serde(default)]
    pub allowed_health_authority_ids: Vec<i64>,
    /// Accept uploads without a valid certificate. Test deployments only.
    #[serde(default)]
    pub bypass_health_authority_verification: bool,
    /// Accept revisions without a revision token. Test deployments only.
    #[serde(default)]
    pub bypass_revision_token: bool,
}

impl AuthorizedApp {
    /// Whether the app may publish for `region` (case-insensitive).
    pub fn is_allowed_region(&self, region: &str) -> bool {
        let want = region.to_ascii_uppercase();
        self.allowed_regions
            .iter()
            .any(|r| r.to_ascii_uppercase() == want)
    }
}

/// Read-mostly catalog of authorized apps.
pub trait AuthorizedAppProvider: Send + Sync {
    /// Resolves a policy by app package name. `Ok(None)` means unknown app.
    fn lookup(&self, name: &str) -> Result<Option<Arc<AuthorizedApp>>, AppsError>;

    /// Registers an app. Used by setup tools and tests.
    fn add(&self, app: AuthorizedApp) -> Result<(), AppsError>;
}

/// In-memory catalog. Writes replace the whole map, reads clone an `Arc`.
#[derive(Default)]
pub struct MemoryAppProvider {
    apps: RwLock<Arc<HashMap<String, Arc<AuthorizedApp>>>>,
}

impl MemoryAppProvider {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthorizedAppProvider for MemoryAppProvider {
    fn lookup(&self, name: &str) -> Result<Option<Arc<AuthorizedApp>>, AppsError> {
        let snapshot = self
            .apps
            .read()
            .map_err(|_| AppsError::Unavailable("catalog lock poisoned".into()))?
            .clone();
        Ok(snapshot.get(&name.to_ascii_lowercase()).cloned())
    }

    fn add(&self, mut app: AuthorizedApp) -> Result<(), AppsError> {
        app.app_package_name = app.app_package_name.to_ascii_lowercase();
        let mut guard = self
            .apps
            .write()
            .map_err(|_| AppsError::Unavailable("catalog lock poisoned".into()))?;
        let mut next = (**guard).clone();
        next.insert(app.app_package_name.clone(), Arc::new(app));
        *guard = Arc::new(next);
        Ok(())
    }
}

struct CacheEntry {
    app: Option<Arc<AuthorizedApp>>,
    fetched_at: Instant,
}

/// TTL cache over another provider.
///
/// Hits inside the TTL never touch the inner provider. When the inner
/// provider fails and a stale entry exists, the stale entry is served, which
/// rides out short catalog outages.
pub struct CachingAppProvider<P> {
    inner: P,
    ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl<P: AuthorizedAppProvider> CachingAppProvider<P> {
    /// Wraps `inner` with a cache of the given TTL.
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl<P: AuthorizedAppProvider> AuthorizedAppProvider for CachingAppProvider<P> {
    fn lookup(&self, name: &str) -> Result<Option<Arc<AuthorizedApp>>, AppsError> {
        let key = name.to_ascii_lowercase();
        if let Ok(cache) = self.cache.read() {
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.app.clone());
                }
            }
        }

        match self.inner.lookup(&key) {
            Ok(app) => {
                if let Ok(mut cache) = self.cache.write() {
                    cache.insert(
                        key,
                        CacheEntry {
                            app: app.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                }
                Ok(app)
            }
            Err(e) => {
                if let Ok(cache) = self.cache.read() {
                    if let Some(entry) = cache.get(&key) {
                        warn!(app = %key, error = %e, "app catalog lookup failed, serving stale entry");
                        return Ok(entry.app.clone());
                    }
                }
                Err(e)
            }
        }
    }

    fn add(&self, app: AuthorizedApp) -> Result<(), AppsError> {
        self.inner.add(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn app(name: &str) -> AuthorizedApp {
        AuthorizedApp {
            app_package_name: name.into(),
            allowed_regions: vec!["US".into(), "CA".into()],
            allowed_health_authority_ids: vec![1],
            bypass_health_authority_verification: false,
            bypass_revision_token: false,
        }
    }

    #[test]
    fn test_memory_provider_lookup_is_case_insensitive() {
        let provider = MemoryAppProvider::new();
        provider.add(app("Gov.Example.App")).unwrap();
        let found = provider.lookup("gov.example.APP").unwrap().unwrap();
        assert_eq!(found.app_package_name, "gov.example.app");
        assert!(provider.lookup("gov.other.app").unwrap().is_none());
    }

    #[test]
    fn test_is_allowed_region() {
        let a = app("x");
        assert!(a.is_allowed_region("us"));
        assert!(a.is_allowed_region("US"));
        assert!(!a.is_allowed_region("DE"));
    }

    struct CountingProvider {
        inner: MemoryAppProvider,
        lookups: AtomicUsize,
        fail: AtomicBool,
    }

    impl AuthorizedAppProvider for CountingProvider {
        fn lookup(&self, name: &str) -> Result<Option<Arc<AuthorizedApp>>, AppsError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppsError::Unavailable("down".into()));
            }
            self.inner.lookup(name)
        }

        fn add(&self, app: AuthorizedApp) -> Result<(), AppsError> {
            self.inner.add(app)
        }
    }

    #[test]
    fn test_cache_absorbs_repeat_lookups() {
        let counting = CountingProvider {
            inner: MemoryAppProvider::new(),
            lookups: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        };
        counting.add(app("gov.example.app")).unwrap();
        let cached = CachingAppProvider::new(counting, Duration::from_secs(300));

        for _ in 0..5 {
            assert!(cached.lookup("gov.example.app").unwrap().is_some());
        }
        assert_eq!(cached.inner.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_serves_stale_on_failure() {
        let counting = CountingProvider {
            inner: MemoryAppProvider::new(),
            lookups: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        };
        counting.add(app("gov.example.app")).unwrap();
        let cached = CachingAppProvider::new(counting, Duration::from_millis(0));

        assert!(cached.lookup("gov.example.app").unwrap().is_some());
        cached.inner.fail.store(true, Ordering::SeqCst);
        // TTL of zero forces a refetch; the failure falls back to the stale entry.
        assert!(cached.lookup("gov.example.app").unwrap().is_some());
        // A name never cached propagates the failure.
        assert!(cached.lookup("gov.unknown.app").is_err());
    }
}
