//! HMAC binding between a certificate and the uploaded key set.
//!
//! The client computes HMAC-SHA256 over a canonical serialization of its
//! keys, salted with a random 32-byte secret it sends alongside, and the
//! health authority signs that digest into the certificate. The server
//! recomputes the digest from the submitted keys; a mismatch means the keys
//! were swapped after verification.

use crate::error::VerifyError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tekserver_core::base64util;
use tekserver_domain::model::ExposureKey;

type HmacSha256 = Hmac<Sha256>;

/// Canonical message the HMAC covers: keys sorted by their base64 encoding,
/// each rendered `key.intervalNumber.intervalCount.transmissionRisk`, joined
/// with commas.
pub fn canonical_message(keys: &[ExposureKey]) -> String {
    let mut sorted: Vec<&ExposureKey> = keys.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));
    sorted
        .iter()
        .map(|k| {
            format!(
                "{}.{}.{}.{}",
                k.key, k.interval_number, k.interval_count, k.transmission_risk
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Computes the key-set HMAC under `secret`.
pub fn exposure_key_hmac(keys: &[ExposureKey], secret: &[u8]) -> Result<Vec<u8>, VerifyError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| VerifyError::InvalidHmacKey(e.to_string()))?;
    mac.update(canonical_message(keys).as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verifies `expected_b64` (the certificate's `tekmac` claim) against the
/// submitted keys in constant time.
pub fn verify_exposure_key_hmac(
    keys: &[ExposureKey],
    secret_b64: &str,
    expected_b64: &str,
) -> Result<(), VerifyError> {
    let secret = base64util::decode_flexible(secret_b64)
        .map_err(|e| VerifyError::InvalidHmacKey(e.to_string()))?;
    if secret.is_empty() {
        return Err(VerifyError::InvalidHmacKey("empty hmac key".into()));
    }
    let expected = base64util::decode_flexible(expected_b64)
        .map_err(|_| VerifyError::HmacMismatch)?;

    let mut mac = HmacSha256::new_from_slice(&secret)
        .map_err(|e| VerifyError::InvalidHmacKey(e.to_string()))?;
    mac.update(canonical_message(keys).as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| VerifyError::HmacMismatch)
}
