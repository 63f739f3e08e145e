//! Health authority registry.
//!
//! Each health authority registers an issuer, an audience and one or more
//! ES256 public keys (by kid) that sign its diagnosis certificates.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One registered certificate signing key.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuthorityKey {
    /// Key id carried in the JWT header.
    pub kid: String,
    /// PEM encoded P-256 public key.
    pub public_key_pem: String,
}

/// A registered health authority.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthAuthority {
    /// Numeric id referenced by app policies and stored exposures.
    pub id: i64,
    /// Human-readable name, for logs.
    pub name: String,
    /// Required `iss` claim value.
    pub issuer: String,
    /// Required `aud` claim value.
    pub audience: String,
    /// Keys allowed to sign this authority's certificates.
    pub keys: Vec<AuthorityKey>,
}

impl HealthAuthority {
    /// Finds a signing key by kid.
    pub fn key(&self, kid: &str) -> Option<&AuthorityKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// In-memory registry of health authorities by id.
///
/// Writes replace the whole map; readers clone an `Arc` snapshot.
#[derive(Default)]
pub struct MemoryAuthorityRegistry {
    authorities: RwLock<Arc<HashMap<i64, Arc<HealthAuthority>>>>,
}

impl MemoryAuthorityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces an authority.
    pub fn add(&self, authority: HealthAuthority) {
        if let Ok(mut guard) = self.authorities.write() {
            let mut next = (**guard).clone();
            next.insert(authority.id, Arc::new(authority));
            *guard = Arc::new(next);
        }
    }

    /// Looks up an authority by id.
    pub fn by_id(&self, id: i64) -> Option<Arc<HealthAuthority>> {
        self.authorities.read().ok()?.get(&id).cloned()
    }
}
