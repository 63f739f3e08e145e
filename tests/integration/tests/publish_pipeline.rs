//! End-to-end publish pipeline scenarios.

use tekserver_core::base64util;
use tekserver_core::error::PublishError;
use tekserver_crypto::TokenError;
use tekserver_domain::model::{ExposureKey, ReportType};
use tekserver_integration_tests::{fresh_keys, publish_for, Harness};
use tekserver_publish::response::PublishResponse;

#[test]
fn fresh_clinical_upload_without_verification() {
    let harness = Harness::new(true);
    let publish = publish_for(fresh_keys());

    let outcome = harness.publish(&publish).unwrap();
    assert_eq!(outcome.inserted, 2);
    assert_eq!(outcome.revised, 0);
    assert!(!outcome.revision_token.is_empty());
    assert!(outcome.warnings.is_empty());

    let (response, status) = PublishResponse::success(outcome);
    assert_eq!(status, 200);
    assert!(response.code.is_none());

    let stored = harness.read_stored(&publish.keys);
    assert_eq!(stored.len(), 2);
    for row in stored.values() {
        assert_eq!(row.regions, vec!["US".to_string()]);
        assert!(row.local_provenance);
        assert!(row.revised_at.is_none());
    }
}

#[test]
fn revision_clinical_to_confirmed_with_valid_token() {
    let harness = Harness::new(true);
    let first = publish_for(fresh_keys());
    let outcome = harness.publish(&first).unwrap();

    let mut second = publish_for(first.keys.clone());
    second.revision_token = outcome.revision_token;
    second.verification_payload = harness.mint_certificate(&second, "confirmed");

    let revised = harness.publish(&second).unwrap();
    assert_eq!(revised.inserted, 0);
    assert_eq!(revised.revised, 2);
    assert!(!revised.revision_token.is_empty());

    let stored = harness.read_stored(&first.keys);
    for row in stored.values() {
        assert_eq!(row.revised_report_type, Some(ReportType::Confirmed));
        assert_eq!(row.revised_transmission_risk, Some(2));
        assert_eq!(row.regions, vec!["US".to_string()]);
        assert!(row.created_at <= row.revised_at.unwrap());
    }
}

#[test]
fn revision_without_token_rejected() {
    let harness = Harness::new(true);
    let first = publish_for(fresh_keys());
    harness.publish(&first).unwrap();

    let mut second = publish_for(first.keys.clone());
    second.revision_token = String::new();
    second.verification_payload = harness.mint_certificate(&second, "confirmed");

    let err = harness.publish(&second).unwrap_err();
    assert!(matches!(err, PublishError::MissingRevisionToken));
    let (response, status) = PublishResponse::failure(&err);
    assert_eq!(status, 400);
    assert_eq!(response.code.as_deref(), Some("missing_revision_token"));

    // Store unchanged.
    let stored = harness.read_stored(&first.keys);
    for row in stored.values() {
        assert!(row.revised_at.is_none());
    }
}

#[test]
fn forbidden_transition_rejected() {
    let harness = Harness::new(true);
    let first = publish_for(fresh_keys());
    let outcome = harness.publish(&first).unwrap();

    let mut second = publish_for(first.keys.clone());
    second.revision_token = outcome.revision_token;
    second.verification_payload = harness.mint_certificate(&second, "likely");

    let err = harness.publish(&second).unwrap_err();
    assert!(matches!(err, PublishError::InvalidReportTypeTransition { .. }));
    let (response, status) = PublishResponse::failure(&err);
    assert_eq!(status, 400);
    assert_eq!(
        response.code.as_deref(),
        Some("invalid_report_type_transition")
    );
}

#[test]
fn partial_failure_keeps_valid_keys() {
    let harness = Harness::new(true);
    let mut keys = fresh_keys();
    keys.truncate(1);
    let current = keys[0].interval_number + 144;

    // 18-byte key material.
    keys.push(ExposureKey {
        key: base64util::encode(&[2u8; 18]),
        interval_number: current - 144,
        interval_count: 144,
        transmission_risk: 0,
    });
    // Older than the accepted window.
    keys.push(ExposureKey {
        key: base64util::encode(&[3u8; 16]),
        interval_number: current - 144 * 100,
        interval_count: 144,
        transmission_risk: 0,
    });
    // Interval count out of range.
    keys.push(ExposureKey {
        key: base64util::encode(&[4u8; 16]),
        interval_number: current - 288,
        interval_count: 200,
        transmission_risk: 0,
    });
    // Start interval far in the future.
    keys.push(ExposureKey {
        key: base64util::encode(&[5u8; 16]),
        interval_number: current + 100_000,
        interval_count: 144,
        transmission_risk: 0,
    });

    let publish = publish_for(keys);
    let outcome = harness.publish(&publish).unwrap();
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.warnings.len(), 4);

    let (response, status) = PublishResponse::success(outcome);
    assert_eq!(status, 200);
    assert_eq!(response.code.as_deref(), Some("partial_failure"));
    assert_eq!(response.warnings.len(), 4);
}

#[test]
fn token_metadata_mismatch_rejected() {
    let harness = Harness::new(true);
    let first = publish_for(fresh_keys());
    let outcome = harness.publish(&first).unwrap();

    // Re-encrypt a token whose interval metadata is off by one.
    let raw = base64util::decode_flexible(&outcome.revision_token).unwrap();
    let mut data = harness.tokens.open(&raw).unwrap();
    for entry in &mut data.revisable_keys {
        entry.interval_number += 1;
    }
    let forged = harness.tokens.mint(&data).unwrap();

    let mut second = publish_for(first.keys.clone());
    second.revision_token = base64util::encode(&forged);
    second.verification_payload = harness.mint_certificate(&second, "confirmed");

    let err = harness.publish(&second).unwrap_err();
    assert!(matches!(err, PublishError::InvalidRevisionToken(_)));
    let (response, status) = PublishResponse::failure(&err);
    assert_eq!(status, 400);
    assert_eq!(response.code.as_deref(), Some("invalid_revision_token"));
}

#[test]
fn token_from_other_deployment_rejected() {
    let minting = Harness::new(true);
    let receiving = Harness::new(true);

    let publish = publish_for(fresh_keys());
    let outcome = minting.publish(&publish).unwrap();
    let raw = base64util::decode_flexible(&outcome.revision_token).unwrap();

    // Different harness, different wrapping key and ring: the token cannot
    // open there.
    assert!(matches!(
        receiving.tokens.open(&raw),
        Err(TokenError::InvalidToken(_)) | Err(TokenError::UnknownToken(_))
    ));
}

#[test]
fn duplicate_upload_is_idempotent() {
    let harness = Harness::new(true);
    let first = publish_for(fresh_keys());
    let outcome = harness.publish(&first).unwrap();

    let mut again = publish_for(first.keys.clone());
    again.revision_token = outcome.revision_token;
    let second = harness.publish(&again).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.revised, 0);
    assert_eq!(second.dropped, 2);

    let stored = harness.read_stored(&first.keys);
    assert_eq!(stored.len(), 2);
}

#[test]
fn verified_upload_applies_claims() {
    let harness = Harness::new(false);
    let mut publish = publish_for(fresh_keys());
    publish.verification_payload = harness.mint_certificate(&publish, "likely");

    let outcome = harness.publish(&publish).unwrap();
    assert_eq!(outcome.inserted, 2);

    let stored = harness.read_stored(&publish.keys);
    for row in stored.values() {
        assert_eq!(row.report_type, Some(ReportType::Likely));
        assert_eq!(row.transmission_risk, 4);
        assert_eq!(row.health_authority_id, Some(1));
    }
}

#[test]
fn unverified_upload_rejected_without_bypass() {
    let harness = Harness::new(false);
    let publish = publish_for(fresh_keys());

    let err = harness.publish(&publish).unwrap_err();
    assert!(matches!(err, PublishError::CertificateInvalid(_)));
    let (response, status) = PublishResponse::failure(&err);
    assert_eq!(status, 401);
    assert_eq!(
        response.code.as_deref(),
        Some("verification_certificate_invalid")
    );
}
