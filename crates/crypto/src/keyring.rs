//! Revision key ring.
//!
//! Holds the unwrapped revision keys used to encrypt and decrypt revision
//! tokens. Keys come from a [`WrappedKeySource`] (the durable store) and are
//! unwrapped through the [`KeyWrapper`](crate::kms::KeyWrapper) seam on
//! refresh. The ring caches a whole snapshot and replaces it atomically, so
//! rotation never tears for readers.

use crate::error::KeyRingError;
use crate::kms::KeyWrapper;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A revision key as stored: wrapped, identified by a small integer.
#[derive(Debug, Clone)]
pub struct WrappedRevisionKey {
    /// Storage-assigned key id; embedded in token ciphertexts.
    pub key_id: i64,
    /// Key material, wrapped by the KMS wrapping key.
    pub wrapped: Vec<u8>,
}

/// Supplies the currently allowed (not revoked) wrapped keys.
pub trait WrappedKeySource: Send + Sync {
    /// All keys that may be used for decryption. The newest is the active
    /// encryption key.
    fn allowed_keys(&self) -> Result<Vec<WrappedRevisionKey>, KeyRingError>;
}

/// An unwrapped 256-bit revision key. Zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct UnwrappedKey([u8; 32]);

impl UnwrappedKey {
    /// Wraps raw key bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

struct RingSnapshot {
    keys: HashMap<i64, Arc<UnwrappedKey>>,
    active: Option<i64>,
    refreshed_at: Instant,
}

/// Cache of unwrapped revision keys with TTL-based lazy refresh.
pub struct KeyRing {
    source: Arc<dyn WrappedKeySource>,
    wrapper: Arc<dyn KeyWrapper>,
    ttl: Duration,
    state: RwLock<Option<Arc<RingSnapshot>>>,
}

impl KeyRing {
    /// Creates a ring over `source`, unwrapping through `wrapper`, refreshing
    /// snapshots no more often than `ttl`.
    pub fn new(
        source: Arc<dyn WrappedKeySource>,
        wrapper: Arc<dyn KeyWrapper>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            wrapper,
            ttl,
            state: RwLock::new(None),
        }
    }

    /// The active encryption key and its id.
    pub fn active_key(&self) -> Result<(i64, Arc<UnwrappedKey>), KeyRingError> {
        let snap = self.snapshot()?;
        let id = snap.active.ok_or(KeyRingError::NoActiveKey)?;
        let key = snap.keys.get(&id).cloned().ok_or(KeyRingError::NoActiveKey)?;
        Ok((id, key))
    }

    /// Looks up a decryption key by id.
    ///
    /// A miss forces one refresh before giving up, so tokens minted right
    /// after a rotation stay decryptable without waiting out the TTL.
    pub fn key(&self, key_id: i64) -> Result<Option<Arc<UnwrappedKey>>, KeyRingError> {
        let snap = self.snapshot()?;
        if let Some(key) = snap.keys.get(&key_id) {
            return Ok(Some(key.clone()));
        }
        let snap = self.reload()?;
        Ok(snap.keys.get(&key_id).cloned())
    }

    /// Forces a reload from the source, replacing the snapshot atomically.
    pub fn refresh(&self) -> Result<(), KeyRingError> {
        self.reload().map(|_| ())
    }

    fn reload(&self) -> Result<Arc<RingSnapshot>, KeyRingError> {
        let wrapped = self.source.allowed_keys()?;
        let mut keys = HashMap::with_capacity(wrapped.len());
        let mut active = None;
        for wk in wrapped {
            let raw = self.wrapper.unwrap_key(&wk.wrapped).map_err(|e| {
                KeyRingError::Unwrap {
                    key_id: wk.key_id,
                    reason: e.to_string(),
                }
            })?;
            let material: [u8; 32] =
                raw.try_into()
                    .map_err(|v: Vec<u8>| KeyRingError::InvalidKeyLength {
                        key_id: wk.key_id,
                        len: v.len(),
                    })?;
            keys.insert(wk.key_id, Arc::new(UnwrappedKey::new(material)));
            active = Some(active.map_or(wk.key_id, |a: i64| a.max(wk.key_id)));
        }
        debug!(keys = keys.len(), active = ?active, "revision key ring refreshed");

        let snap = Arc::new(RingSnapshot {
            keys,
            active,
            refreshed_at: Instant::now(),
        });
        match self.state.write() {
            Ok(mut state) => *state = Some(snap.clone()),
            Err(_) => warn!("revision key ring lock poisoned, serving fresh snapshot"),
        }
        Ok(snap)
    }

    fn snapshot(&self) -> Result<Arc<RingSnapshot>, KeyRingError> {
        if let Ok(state) = self.state.read() {
            if let Some(snap) = state.as_ref() {
                if snap.refreshed_at.elapsed() < self.ttl {
                    return Ok(snap.clone());
                }
            }
        }
        self.reload()
    }
}
