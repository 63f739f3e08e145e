//! Base64 helpers for exposure key payloads.
//!
//! Clients encode TEKs with either the standard or the URL-safe alphabet,
//! with or without padding. The server accepts all four forms on input and
//! always emits standard padded base64.

use base64::engine::general_purpose::{
    STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD,
};
use base64::{DecodeError, Engine};

/// Encodes bytes with the standard padded alphabet.
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes a string that may use the standard or URL-safe alphabet, padded or
/// not.
pub fn decode_flexible(s: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(s)
        .or_else(|_| URL_SAFE.decode(s))
        .or_else(|_| STANDARD_NO_PAD.decode(s))
        .or_else(|_| URL_SAFE_NO_PAD.decode(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_standard() {
        let data = vec![0xde, 0xad, 0xbe, 0xef, 0x01];
        let encoded = encode(&data);
        assert_eq!(decode_flexible(&encoded).unwrap(), data);
    }

    #[test]
    fn test_decode_url_safe() {
        // 0xfb 0xef 0xff encodes to "++//" standard, "--__" url-safe.
        let data = vec![0xfb, 0xef, 0xbf, 0xff];
        let url = URL_SAFE.encode(&data);
        assert!(url.contains('-') || url.contains('_'));
        assert_eq!(decode_flexible(&url).unwrap(), data);
    }

    #[test]
    fn test_decode_unpadded() {
        let data = vec![1u8; 16];
        let padded = STANDARD.encode(&data);
        let unpadded = padded.trim_end_matches('=');
        assert_ne!(padded, unpadded);
        assert_eq!(decode_flexible(unpadded).unwrap(), data);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_flexible("not base64!!!").is_err());
    }
}
