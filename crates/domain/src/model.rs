//! Publish domain model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tekserver_core::base64util;

/// Length of a temporary exposure key in raw bytes.
pub const TEK_LENGTH: usize = 16;

/// Lowest accepted transmission risk value.
pub const MIN_TRANSMISSION_RISK: i32 = 0;

/// Highest accepted transmission risk value.
pub const MAX_TRANSMISSION_RISK: i32 = 8;

/// Epidemiological classification of a diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportType {
    /// Lab-confirmed diagnosis.
    Confirmed,
    /// Clinical diagnosis, not yet lab-confirmed.
    Likely,
    /// Negative test result.
    Negative,
}

impl ReportType {
    /// The stable wire string for this report type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Confirmed => "confirmed",
            ReportType::Likely => "likely",
            ReportType::Negative => "negative",
        }
    }

    /// Parses a wire string; unknown or empty strings yield `None`.
    pub fn parse(s: &str) -> Option<ReportType> {
        match s {
            "confirmed" => Some(ReportType::Confirmed),
            "likely" => Some(ReportType::Likely),
            "negative" => Some(ReportType::Negative),
            _ => None,
        }
    }

    /// Default transmission risk assigned when the uploader did not set one.
    pub fn default_transmission_risk(report_type: Option<ReportType>) -> i32 {
        match report_type {
            Some(ReportType::Confirmed) => 2,
            Some(ReportType::Likely) => 4,
            Some(ReportType::Negative) => 6,
            None => 0,
        }
    }
}

impl std::fmt::Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single uploaded exposure key as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureKey {
    /// Base64 of the 16 raw key bytes.
    pub key: String,
    /// First 10-minute interval the key was active.
    #[serde(rename = "intervalNumber")]
    pub interval_number: i32,
    /// Number of intervals the key was active, 1..=144.
    #[serde(rename = "intervalCount")]
    pub interval_count: i32,
    /// Client-assigned transmission risk, 0..=8.
    #[serde(rename = "transmissionRisk", default)]
    pub transmission_risk: i32,
}

/// An exposure key upload request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Publish {
    /// The uploaded keys, at most a configured batch size.
    #[serde(default)]
    pub keys: Vec<ExposureKey>,
    /// Identifies the uploading app / health authority pairing.
    #[serde(rename = "healthAuthorityID", default)]
    pub health_authority_id: String,
    /// Compact JWT diagnosis certificate.
    #[serde(rename = "verificationPayload", default)]
    pub verification_payload: String,
    /// Base64 of the client's random 32-byte HMAC salt.
    #[serde(rename = "hmacKey", default)]
    pub hmac_key: String,
    /// Interval of symptom onset, when the certificate does not carry one.
    #[serde(rename = "symptomOnsetInterval", default)]
    pub symptom_onset_interval: u32,
    /// Set when the uploader has travelled out of their home region.
    #[serde(default)]
    pub traveler: bool,
    /// Base64 revision token from a previous upload, if any.
    #[serde(rename = "revisionToken", default)]
    pub revision_token: String,
    /// Request padding, ignored.
    #[serde(default)]
    pub padding: String,
    /// Legacy region list; must be a subset of the app's allowed regions.
    #[serde(default)]
    pub regions: Vec<String>,
}

/// Claims extracted from a validated diagnosis certificate.
#[derive(Debug, Clone, Default)]
pub struct VerifiedClaims {
    /// Report type asserted by the health authority.
    pub report_type: Option<ReportType>,
    /// Symptom onset interval asserted by the health authority, 0 if absent.
    pub symptom_onset_interval: u32,
    /// Numeric id of the verifying health authority, 0 if unknown.
    pub health_authority_id: i64,
}

/// A stored exposure record.
///
/// Identity is the raw TEK bytes; interval metadata is frozen at first
/// insert. The `revised_*` fields stay unset until the record is revised,
/// which can happen at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    /// Raw 16-byte temporary exposure key.
    pub exposure_key: Vec<u8>,
    /// Transmission risk, 0..=8.
    pub transmission_risk: i32,
    /// Uploading app package name, lowercased.
    pub app_package_name: String,
    /// Regions the key applies to, uppercased, unique.
    pub regions: Vec<String>,
    /// Whether the uploader identified as a traveler.
    pub traveler: bool,
    /// First active interval.
    pub interval_number: i32,
    /// Number of active intervals.
    pub interval_count: i32,
    /// Server receipt time, truncated to the configured window.
    pub created_at: DateTime<Utc>,
    /// True when uploaded directly to this server, false when federated in.
    pub local_provenance: bool,
    /// Federation sync id for federated-in records.
    pub federation_sync_id: Option<i64>,
    /// Verifying health authority id.
    pub health_authority_id: Option<i64>,
    /// Report type at initial upload; absent when verification was bypassed.
    pub report_type: Option<ReportType>,
    /// Days between symptom onset and the key's start, when computable.
    pub days_since_symptom_onset: Option<i32>,
    /// Report type after revision.
    pub revised_report_type: Option<ReportType>,
    /// When the record was revised.
    pub revised_at: Option<DateTime<Utc>>,
    /// Days-since-onset carried by the revision.
    pub revised_days_since_symptom_onset: Option<i32>,
    /// Transmission risk carried by the revision.
    pub revised_transmission_risk: Option<i32>,
}

impl Exposure {
    /// The storage identity of this record.
    pub fn exposure_key_base64(&self) -> String {
        base64util::encode(&self.exposure_key)
    }

    /// True once the record has been revised; revised records are final.
    pub fn has_been_revised(&self) -> bool {
        self.revised_at.is_some()
    }

    /// Adds any regions not already present, preserving order.
    pub fn add_missing_regions(&mut self, regions: &[String]) {
        for r in regions {
            if !self.regions.iter().any(|have| have == r) {
                self.regions.push(r.clone());
            }
        }
    }

    /// Interval at which this key stops being valid (exclusive).
    pub fn expiry_interval(&self) -> i32 {
        self.interval_number + self.interval_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_exposure() -> Exposure {
        Exposure {
            exposure_key: vec![7u8; TEK_LENGTH],
            transmission_risk: 4,
            app_package_name: "gov.example.app".into(),
            regions: vec!["US".into()],
            traveler: false,
            interval_number: 2_650_000,
            interval_count: 144,
            created_at: Utc.with_ymd_and_hms(2021, 3, 1, 10, 0, 0).single().unwrap(),
            local_provenance: true,
            federation_sync_id: None,
            health_authority_id: Some(1),
            report_type: Some(ReportType::Likely),
            days_since_symptom_onset: Some(0),
            revised_report_type: None,
            revised_at: None,
            revised_days_since_symptom_onset: None,
            revised_transmission_risk: None,
        }
    }

    #[test]
    fn test_report_type_round_trip() {
        for rt in [ReportType::Confirmed, ReportType::Likely, ReportType::Negative] {
            assert_eq!(ReportType::parse(rt.as_str()), Some(rt));
        }
        assert_eq!(ReportType::parse(""), None);
        assert_eq!(ReportType::parse("selfReported"), None);
    }

    #[test]
    fn test_default_transmission_risk() {
        assert_eq!(ReportType::default_transmission_risk(Some(ReportType::Confirmed)), 2);
        assert_eq!(ReportType::default_transmission_risk(Some(ReportType::Likely)), 4);
        assert_eq!(ReportType::default_transmission_risk(Some(ReportType::Negative)), 6);
        assert_eq!(ReportType::default_transmission_risk(None), 0);
    }

    #[test]
    fn test_add_missing_regions() {
        let mut e = sample_exposure();
        e.add_missing_regions(&["US".into(), "CA".into(), "US".into()]);
        assert_eq!(e.regions, vec!["US".to_string(), "CA".to_string()]);
    }

    #[test]
    fn test_publish_deserializes_wire_names() {
        let body = r#"{
            "keys": [{"key": "AAECAwQFBgcICQoLDA0ODw==", "intervalNumber": 2650000, "intervalCount": 144, "transmissionRisk": 3}],
            "healthAuthorityID": "gov.example.app",
            "verificationPayload": "a.b.c",
            "hmacKey": "c2FsdA==",
            "symptomOnsetInterval": 2649856,
            "traveler": true,
            "revisionToken": "",
            "padding": "xyz"
        }"#;
        let p: Publish = serde_json::from_str(body).unwrap();
        assert_eq!(p.keys.len(), 1);
        assert_eq!(p.keys[0].interval_count, 144);
        assert_eq!(p.health_authority_id, "gov.example.app");
        assert!(p.traveler);
        assert!(p.regions.is_empty());
    }

    #[test]
    fn test_expiry_interval() {
        let e = sample_exposure();
        assert_eq!(e.expiry_interval(), 2_650_144);
    }
}
