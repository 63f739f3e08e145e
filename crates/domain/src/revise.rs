//! Merge rules for incoming keys against already-stored exposures.
//!
//! `revise_keys` is pure: it decides, for each incoming record, whether it is
//! a fresh insert, a revision of a locked existing row, or a drop. The caller
//! owns locking and persistence.

use crate::model::{Exposure, ReportType};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while merging an incoming key into an existing record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReviseError {
    /// Only locally uploaded keys can be revised.
    #[error("key {key} was not uploaded to this server and cannot be revised")]
    NonLocalProvenance {
        /// Base64 of the offending key.
        key: String,
    },

    /// A key can be revised at most once.
    #[error("key {key} has already been revised")]
    KeyAlreadyRevised {
        /// Base64 of the offending key.
        key: String,
    },

    /// The requested report type transition is not allowed.
    #[error("key {key}: invalid report type transition {from} -> {to}")]
    InvalidTransition {
        /// Base64 of the offending key.
        key: String,
        /// Effective report type currently stored.
        from: String,
        /// Report type the upload asked for.
        to: String,
    },
}

/// A single write the store must perform.
#[derive(Debug, Clone)]
pub enum KeyWrite {
    /// Brand new row.
    Insert(Exposure),
    /// Existing row, mutated copy to persist.
    Revise(Exposure),
}

impl KeyWrite {
    /// The record being written.
    pub fn exposure(&self) -> &Exposure {
        match self {
            KeyWrite::Insert(e) | KeyWrite::Revise(e) => e,
        }
    }
}

/// Result of merging a batch.
#[derive(Debug, Default)]
pub struct ReviseOutcome {
    /// Writes to perform, in incoming order.
    pub writes: Vec<KeyWrite>,
    /// Incoming records that produced no write.
    pub dropped: usize,
}

fn report_type_name(rt: Option<ReportType>) -> String {
    rt.map(|r| r.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Attempts to revise `existing` with the data in `incoming`.
///
/// Returns `Ok(None)` when the upload carries nothing new. A record whose
/// report type was never set is treated as a clinical (`likely`) diagnosis
/// for transition checking.
pub fn revise(existing: &Exposure, incoming: &Exposure) -> Result<Option<Exposure>, ReviseError> {
    if existing.report_type == incoming.report_type {
        return Ok(None);
    }
    let key = existing.exposure_key_base64();
    if !existing.local_provenance {
        return Err(ReviseError::NonLocalProvenance { key });
    }
    if existing.has_been_revised() {
        return Err(ReviseError::KeyAlreadyRevised { key });
    }

    let effective_from = existing.report_type.unwrap_or(ReportType::Likely);
    let allowed = effective_from == ReportType::Likely
        && matches!(
            incoming.report_type,
            Some(ReportType::Confirmed) | Some(ReportType::Negative)
        );
    if !allowed {
        return Err(ReviseError::InvalidTransition {
            key,
            from: report_type_name(existing.report_type),
            to: report_type_name(incoming.report_type),
        });
    }

    let mut revised = existing.clone();
    revised.health_authority_id = incoming.health_authority_id;
    revised.add_missing_regions(&incoming.regions);
    revised.revised_report_type = incoming.report_type;
    revised.revised_at = Some(incoming.created_at);
    revised.revised_days_since_symptom_onset = incoming.days_since_symptom_onset;
    revised.revised_transmission_risk = Some(incoming.transmission_risk);
    Ok(Some(revised))
}

/// Merges `incoming` against the locked `existing` set, keyed by base64 TEK.
///
/// Incoming negative reports for keys the store has never seen are dropped
/// without error; they carry no exposure signal worth persisting.
pub fn revise_keys(
    existing: &HashMap<String, Exposure>,
    incoming: &[Exposure],
) -> Result<ReviseOutcome, ReviseError> {
    let mut outcome = ReviseOutcome::default();
    for inc in incoming {
        match existing.get(&inc.exposure_key_base64()) {
            None => {
                if inc.report_type == Some(ReportType::Negative) {
                    outcome.dropped += 1;
                } else {
                    outcome.writes.push(KeyWrite::Insert(inc.clone()));
                }
            }
            Some(have) => match revise(have, inc)? {
                Some(revised) => outcome.writes.push(KeyWrite::Revise(revised)),
                None => outcome.dropped += 1,
            },
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TEK_LENGTH;
    use chrono::{TimeZone, Utc};

    fn exposure(byte: u8, report_type: Option<ReportType>) -> Exposure {
        Exposure {
            exposure_key: vec![byte; TEK_LENGTH],
            transmission_risk: 0,
            app_package_name: "gov.example.app".into(),
            regions: vec!["US".into()],
            traveler: false,
            interval_number: 2_650_000,
            interval_count: 144,
            created_at: Utc.with_ymd_and_hms(2021, 3, 1, 10, 0, 0).single().unwrap(),
            local_provenance: true,
            federation_sync_id: None,
            health_authority_id: Some(1),
            report_type,
            days_since_symptom_onset: Some(0),
            revised_report_type: None,
            revised_at: None,
            revised_days_since_symptom_onset: None,
            revised_transmission_risk: None,
        }
    }

    #[test]
    fn test_insert_when_absent() {
        let existing = HashMap::new();
        let incoming = vec![exposure(1, Some(ReportType::Likely))];
        let out = revise_keys(&existing, &incoming).unwrap();
        assert_eq!(out.writes.len(), 1);
        assert_eq!(out.dropped, 0);
        assert!(matches!(out.writes[0], KeyWrite::Insert(_)));
    }

    #[test]
    fn test_negative_new_key_dropped() {
        let existing = HashMap::new();
        let incoming = vec![exposure(1, Some(ReportType::Negative))];
        let out = revise_keys(&existing, &incoming).unwrap();
        assert!(out.writes.is_empty());
        assert_eq!(out.dropped, 1);
    }

    #[test]
    fn test_same_report_type_is_noop() {
        let have = exposure(1, Some(ReportType::Likely));
        let mut existing = HashMap::new();
        existing.insert(have.exposure_key_base64(), have);
        let incoming = vec![exposure(1, Some(ReportType::Likely))];
        let out = revise_keys(&existing, &incoming).unwrap();
        assert!(out.writes.is_empty());
        assert_eq!(out.dropped, 1);
    }

    #[test]
    fn test_likely_to_confirmed() {
        let have = exposure(1, Some(ReportType::Likely));
        let mut existing = HashMap::new();
        existing.insert(have.exposure_key_base64(), have);

        let mut inc = exposure(1, Some(ReportType::Confirmed));
        inc.transmission_risk = 2;
        inc.created_at = Utc.with_ymd_and_hms(2021, 3, 2, 10, 0, 0).single().unwrap();
        inc.regions = vec!["US".into(), "CA".into()];

        let out = revise_keys(&existing, &[inc]).unwrap();
        assert_eq!(out.writes.len(), 1);
        let revised = out.writes[0].exposure();
        assert_eq!(revised.revised_report_type, Some(ReportType::Confirmed));
        assert_eq!(revised.revised_transmission_risk, Some(2));
        assert_eq!(revised.regions, vec!["US".to_string(), "CA".to_string()]);
        assert!(revised.revised_at.is_some());
        assert!(revised.created_at <= revised.revised_at.unwrap());
        // Initial fields frozen.
        assert_eq!(revised.report_type, Some(ReportType::Likely));
        assert_eq!(revised.interval_count, 144);
    }

    #[test]
    fn test_unset_report_type_treated_as_likely() {
        let have = exposure(1, None);
        let mut existing = HashMap::new();
        existing.insert(have.exposure_key_base64(), have);

        let inc = exposure(1, Some(ReportType::Confirmed));
        let out = revise_keys(&existing, &[inc]).unwrap();
        assert_eq!(out.writes.len(), 1);

        // But an upgrade to likely from unset is not a transition.
        let have = exposure(1, None);
        let mut existing = HashMap::new();
        existing.insert(have.exposure_key_base64(), have);
        let inc = exposure(1, Some(ReportType::Likely));
        let err = revise_keys(&existing, &[inc]).unwrap_err();
        assert!(matches!(err, ReviseError::InvalidTransition { .. }));
    }

    #[test]
    fn test_confirmed_cannot_transition() {
        let have = exposure(1, Some(ReportType::Confirmed));
        let mut existing = HashMap::new();
        existing.insert(have.exposure_key_base64(), have);
        let inc = exposure(1, Some(ReportType::Likely));
        let err = revise_keys(&existing, &[inc]).unwrap_err();
        assert!(matches!(err, ReviseError::InvalidTransition { .. }));
    }

    #[test]
    fn test_already_revised_is_final() {
        let mut have = exposure(1, Some(ReportType::Likely));
        have.revised_at = Some(have.created_at);
        have.revised_report_type = Some(ReportType::Confirmed);
        let mut existing = HashMap::new();
        existing.insert(have.exposure_key_base64(), have);

        let inc = exposure(1, Some(ReportType::Negative));
        let err = revise_keys(&existing, &[inc]).unwrap_err();
        assert!(matches!(err, ReviseError::KeyAlreadyRevised { .. }));
    }

    #[test]
    fn test_revision_is_monotone() {
        // A successful revision, re-applied, must fail with KeyAlreadyRevised.
        let have = exposure(1, Some(ReportType::Likely));
        let inc = exposure(1, Some(ReportType::Confirmed));
        let revised = revise(&have, &inc).unwrap().unwrap();
        let err = revise(&revised, &inc).unwrap_err();
        assert!(matches!(err, ReviseError::KeyAlreadyRevised { .. }));
    }

    #[test]
    fn test_non_local_provenance_rejected() {
        let mut have = exposure(1, Some(ReportType::Likely));
        have.local_provenance = false;
        let mut existing = HashMap::new();
        existing.insert(have.exposure_key_base64(), have);
        let inc = exposure(1, Some(ReportType::Confirmed));
        let err = revise_keys(&existing, &[inc]).unwrap_err();
        assert!(matches!(err, ReviseError::NonLocalProvenance { .. }));
    }
}
