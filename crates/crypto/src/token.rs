//! Revision token codec.
//!
//! A revision token binds an upload session to the keys it stored, so a later
//! diagnosis upgrade can prove it comes from the same device. The payload is
//! a protobuf-serialized key list, AEAD-encrypted under the active revision
//! key. The ciphertext carries the encrypting key id so tokens survive key
//! rotation and server restarts:
//!
//! ```text
//! [uvarint key_id][12-byte nonce][AES-256-GCM ciphertext || tag]
//! ```
//!
//! The AAD is an operator-configured byte string; tokens never replay across
//! deployments.

use crate::error::TokenError;
use crate::keyring::KeyRing;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use prost::encoding::{decode_varint, encode_varint};
use prost::Message;
use rand::RngCore;
use std::sync::Arc;

const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

/// One revisable key entry: identity plus frozen interval metadata.
#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct RevisableKey {
    /// Raw 16-byte temporary exposure key.
    #[prost(bytes = "vec", tag = "1")]
    pub temporary_exposure_key: Vec<u8>,
    /// First active interval, as stored.
    #[prost(int32, tag = "2")]
    pub interval_number: i32,
    /// Active interval count, as stored.
    #[prost(int32, tag = "3")]
    pub interval_count: i32,
}

/// The plaintext payload of a revision token.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RevisionTokenData {
    /// Keys this token may revise.
    #[prost(message, repeated, tag = "1")]
    pub revisable_keys: Vec<RevisableKey>,
    /// Random filler so short tokens meet the configured minimum length.
    #[prost(bytes = "vec", tag = "2")]
    pub padding: Vec<u8>,
}

impl RevisionTokenData {
    /// Finds an entry by raw TEK bytes.
    pub fn find(&self, tek: &[u8]) -> Option<&RevisableKey> {
        self.revisable_keys
            .iter()
            .find(|k| k.temporary_exposure_key == tek)
    }
}

/// Codec tunables.
#[derive(Clone)]
pub struct RevisionTokenConfig {
    /// Deployment-scoped additional authenticated data. Must be non-empty.
    pub aad: Vec<u8>,
    /// Tokens shorter than this are padded up, so token length does not leak
    /// session size.
    pub min_token_length: usize,
}

/// Encrypts and decrypts revision tokens against the key ring.
pub struct RevisionTokenManager {
    keyring: Arc<KeyRing>,
    config: RevisionTokenConfig,
}

impl RevisionTokenManager {
    /// Creates a manager over `keyring`.
    pub fn new(keyring: Arc<KeyRing>, config: RevisionTokenConfig) -> Self {
        Self { keyring, config }
    }

    /// Encrypts `data` under the active revision key.
    pub fn mint(&self, data: &RevisionTokenData) -> Result<Vec<u8>, TokenError> {
        let (key_id, key) = self.keyring.active_key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

        let mut out = Vec::with_capacity(self.config.min_token_length.max(64));
        encode_varint(key_id as u64, &mut out);
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);
        out.extend_from_slice(&nonce);

        let mut payload = data.clone();
        payload.padding.clear();
        let unpadded_total = out.len() + payload.encoded_len() + TAG_LENGTH;
        if unpadded_total < self.config.min_token_length {
            let mut pad = vec![0u8; self.config.min_token_length - unpadded_total];
            rand::thread_rng().fill_bytes(&mut pad);
            payload.padding = pad;
        }

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &payload.encode_to_vec(),
                    aad: &self.config.aad,
                },
            )
            .map_err(|_| TokenError::Encrypt)?;
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a token, resolving its key through the ring.
    pub fn open(&self, token: &[u8]) -> Result<RevisionTokenData, TokenError> {
        let mut buf = token;
        let key_id = decode_varint(&mut buf)
            .map_err(|e| TokenError::InvalidToken(format!("unreadable key id: {e}")))?
            as i64;
        if buf.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(TokenError::InvalidToken("token too short".into()));
        }
        let key = self
            .keyring
            .key(key_id)?
            .ok_or(TokenError::UnknownToken(key_id))?;

        let (nonce, ciphertext) = buf.split_at(NONCE_LENGTH);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &self.config.aad,
                },
            )
            .map_err(|_| TokenError::InvalidToken("decryption failed".into()))?;

        let mut data = RevisionTokenData::decode(plaintext.as_slice())
            .map_err(|e| TokenError::InvalidToken(format!("unreadable payload: {e}")))?;
        data.padding.clear();
        Ok(data)
    }
}

/// Builds the payload for a freshly minted token.
///
/// Keys retained from the prior token are kept only while their validity
/// window could still matter (`interval_number + interval_count >=
/// min_interval`); just-stored keys always make it in and win duplicates.
pub fn build_revision_token_data(
    prior: &RevisionTokenData,
    just_stored: &[RevisableKey],
    min_interval: i32,
) -> RevisionTokenData {
    let mut keys: Vec<RevisableKey> = Vec::with_capacity(prior.revisable_keys.len() + just_stored.len());
    for key in &prior.revisable_keys {
        if key.interval_number + key.interval_count >= min_interval {
            keys.push(key.clone());
        }
    }
    for key in just_stored {
        match keys
            .iter_mut()
            .find(|k| k.temporary_exposure_key == key.temporary_exposure_key)
        {
            Some(slot) => *slot = key.clone(),
            None => keys.push(key.clone()),
        }
    }
    RevisionTokenData {
        revisable_keys: keys,
        padding: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::{WrappedKeySource, WrappedRevisionKey};
    use crate::kms::{KeyWrapper, LocalKeyWrapper};
    use crate::KeyRingError;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MemorySource {
        keys: Mutex<Vec<WrappedRevisionKey>>,
    }

    impl WrappedKeySource for MemorySource {
        fn allowed_keys(&self) -> Result<Vec<WrappedRevisionKey>, KeyRingError> {
            Ok(self.keys.lock().unwrap().clone())
        }
    }

    fn manager_with_aad(aad: &[u8]) -> RevisionTokenManager {
        let wrapper = Arc::new(LocalKeyWrapper::new([0x42; 32], "wrap"));
        let source = Arc::new(MemorySource {
            keys: Mutex::new(vec![WrappedRevisionKey {
                key_id: 1,
                wrapped: wrapper.wrap(&[0x11; 32]).unwrap(),
            }]),
        });
        let ring = Arc::new(KeyRing::new(source, wrapper, Duration::from_secs(60)));
        RevisionTokenManager::new(
            ring,
            RevisionTokenConfig {
                aad: aad.to_vec(),
                min_token_length: 128,
            },
        )
    }

    fn revisable(byte: u8, interval_number: i32) -> RevisableKey {
        RevisableKey {
            temporary_exposure_key: vec![byte; 16],
            interval_number,
            interval_count: 144,
        }
    }

    fn sample_data() -> RevisionTokenData {
        RevisionTokenData {
            revisable_keys: vec![revisable(1, 2_650_000), revisable(2, 2_650_144)],
            padding: Vec::new(),
        }
    }

    #[test]
    fn test_mint_open_round_trip() {
        let manager = manager_with_aad(b"deployment-aad");
        let data = sample_data();
        let token = manager.mint(&data).unwrap();
        let opened = manager.open(&token).unwrap();
        assert_eq!(opened.revisable_keys, data.revisable_keys);
        assert!(opened.padding.is_empty());
    }

    #[test]
    fn test_open_with_different_aad_fails() {
        let mint = manager_with_aad(b"deployment-a");
        let open = manager_with_aad(b"deployment-b");
        let token = mint.mint(&sample_data()).unwrap();
        assert!(matches!(
            open.open(&token),
            Err(TokenError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_min_token_length_is_met() {
        let manager = manager_with_aad(b"aad");
        let token = manager
            .mint(&RevisionTokenData::default())
            .unwrap();
        assert!(token.len() >= 128, "token length {} below minimum", token.len());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let manager = manager_with_aad(b"aad");
        let mut token = manager.mint(&sample_data()).unwrap();
        let last = token.len() - 1;
        token[last] ^= 0x01;
        assert!(matches!(
            manager.open(&token),
            Err(TokenError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_unknown_key_id() {
        let manager = manager_with_aad(b"aad");
        let token = manager.mint(&sample_data()).unwrap();
        // Re-point the token at a key id the ring does not have. Key id 1
        // encodes as a single varint byte at the front.
        let mut forged = token.clone();
        forged[0] = 0x7f;
        assert!(matches!(
            manager.open(&forged),
            Err(TokenError::UnknownToken(127))
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let manager = manager_with_aad(b"aad");
        assert!(manager.open(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_build_data_filters_expired_prior_keys() {
        let prior = RevisionTokenData {
            revisable_keys: vec![revisable(1, 1000), revisable(2, 5000)],
            padding: Vec::new(),
        };
        // Only keys still ending at or after interval 5000 survive.
        let data = build_revision_token_data(&prior, &[], 5000);
        assert_eq!(data.revisable_keys.len(), 1);
        assert_eq!(data.revisable_keys[0].temporary_exposure_key, vec![2u8; 16]);
    }

    #[test]
    fn test_build_data_just_stored_wins_duplicates() {
        let prior = RevisionTokenData {
            revisable_keys: vec![revisable(1, 5000)],
            padding: Vec::new(),
        };
        let mut updated = revisable(1, 5000);
        updated.interval_count = 100;
        let data = build_revision_token_data(&prior, &[updated.clone(), revisable(3, 6000)], 0);
        assert_eq!(data.revisable_keys.len(), 2);
        assert_eq!(data.revisable_keys[0], updated);
    }
}
