//! Publish transformer.
//!
//! Validates and normalizes an uploaded key batch into storable [`Exposure`]
//! records. Batch-level violations fail the whole upload; per-key violations
//! are collected as warnings and the batch succeeds as long as at least one
//! key survives.

use crate::model::{
    Exposure, ExposureKey, Publish, ReportType, VerifiedClaims, MAX_TRANSMISSION_RISK,
    MIN_TRANSMISSION_RISK, TEK_LENGTH,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tekserver_core::base64util;
use tekserver_core::interval::{
    days_from_symptom_onset, interval_number, time_for_interval, truncate_window,
    MAX_INTERVAL_COUNT,
};
use thiserror::Error;
use tracing::debug;

/// Tunables for the transformer.
#[derive(Debug, Clone)]
pub struct TransformerConfig {
    /// Maximum keys per upload.
    pub max_exposure_keys: usize,
    /// Maximum keys sharing the same start interval.
    pub max_same_day_keys: usize,
    /// Oldest acceptable key start, measured back from the batch time.
    pub max_interval_start_age: Duration,
    /// Window `created_at` is truncated to.
    pub truncate_window: Duration,
    /// Largest |days| accepted for days-since-symptom-onset.
    pub max_symptom_onset_days: u32,
    /// Disables the same-day embargo. Debug builds only.
    pub debug_release_same_day_keys: bool,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            max_exposure_keys: 30,
            max_same_day_keys: 3,
            max_interval_start_age: Duration::hours(360),
            truncate_window: Duration::hours(1),
            max_symptom_onset_days: 14,
            debug_release_same_day_keys: false,
        }
    }
}

/// Batch-fatal validation failures.
#[derive(Debug, Error)]
pub enum TransformError {
    /// An upload must carry at least one key.
    #[error("no exposure keys in publish request")]
    NoKeys,

    /// Too many keys in one upload.
    #[error("too many exposure keys in publish: {got}, max of {max}")]
    TooManyKeys {
        /// Keys in the request.
        got: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The same TEK appeared more than once in the batch.
    #[error("duplicate exposure key in batch: {key}")]
    DuplicateKey {
        /// Base64 of the duplicated key.
        key: String,
    },

    /// Two keys overlap without sharing a start interval.
    #[error("exposure keys have non-aligned overlapping intervals: {earlier_end} > {later_start}")]
    OverlappingIntervals {
        /// Exclusive end of the earlier key.
        earlier_end: i32,
        /// Start of the later key.
        later_start: i32,
    },

    /// Too many keys share a start interval.
    #[error("too many keys at interval {interval}, max of {max}")]
    TooManySameDayKeys {
        /// The shared start interval.
        interval: i32,
        /// Configured maximum.
        max: usize,
    },

    /// Every key in the batch failed per-key validation.
    #[error("no valid keys in publish request")]
    NoValidKeys {
        /// Per-key failure messages.
        warnings: Vec<String>,
    },
}

/// Successful transform output.
#[derive(Debug)]
pub struct TransformResult {
    /// Validated, normalized records, sorted by interval.
    pub exposures: Vec<Exposure>,
    /// Per-key failures for keys that were skipped.
    pub warnings: Vec<String>,
}

/// Turns uploads into storable exposure records.
#[derive(Debug, Clone)]
pub struct Transformer {
    config: TransformerConfig,
}

impl Transformer {
    /// Creates a transformer with the given tunables.
    pub fn new(config: TransformerConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Validates and normalizes one publish request.
    ///
    /// `regions` is the already-resolved region set for the upload;
    /// `claims` is present when a diagnosis certificate was verified.
    pub fn transform(
        &self,
        publish: &Publish,
        app_package_name: &str,
        regions: &[String],
        claims: Option<&VerifiedClaims>,
        batch_time: DateTime<Utc>,
    ) -> Result<TransformResult, TransformError> {
        if publish.keys.is_empty() {
            return Err(TransformError::NoKeys);
        }
        if publish.keys.len() > self.config.max_exposure_keys {
            return Err(TransformError::TooManyKeys {
                got: publish.keys.len(),
                max: self.config.max_exposure_keys,
            });
        }

        let regions = normalize_regions(regions);
        let app_package_name = app_package_name.to_ascii_lowercase();
        let min_interval = interval_number(batch_time - self.config.max_interval_start_age);
        let max_interval = interval_number(batch_time);

        let mut seen: HashSet<Vec<u8>> = HashSet::with_capacity(publish.keys.len());
        let mut exposures = Vec::with_capacity(publish.keys.len());
        let mut warnings = Vec::new();

        for (i, key) in publish.keys.iter().enumerate() {
            match self.transform_key(
                key,
                &app_package_name,
                &regions,
                publish,
                claims,
                batch_time,
                min_interval,
                max_interval,
            ) {
                Ok(exposure) => {
                    if !seen.insert(exposure.exposure_key.clone()) {
                        return Err(TransformError::DuplicateKey {
                            key: exposure.exposure_key_base64(),
                        });
                    }
                    exposures.push(exposure);
                }
                Err(reason) => {
                    debug!(index = i, reason = %reason, "dropping invalid exposure key");
                    warnings.push(format!("key {i}: {reason}"));
                }
            }
        }

        if exposures.is_empty() {
            return Err(TransformError::NoValidKeys { warnings });
        }

        exposures.sort_by_key(|e| (e.interval_number, e.interval_count));
        self.check_interval_alignment(&exposures)?;

        Ok(TransformResult { exposures, warnings })
    }

    /// Validates and normalizes a single key.
    #[allow(clippy::too_many_arguments)]
    fn transform_key(
        &self,
        key: &ExposureKey,
        app_package_name: &str,
        regions: &[String],
        publish: &Publish,
        claims: Option<&VerifiedClaims>,
        batch_time: DateTime<Utc>,
        min_interval: i32,
        max_interval: i32,
    ) -> Result<Exposure, String> {
        let tek = base64util::decode_flexible(&key.key)
            .map_err(|e| format!("unable to decode key: {e}"))?;
        if tek.len() != TEK_LENGTH {
            return Err(format!(
                "invalid key length, {} bytes, must be {TEK_LENGTH}",
                tek.len()
            ));
        }
        if !(1..=MAX_INTERVAL_COUNT).contains(&key.interval_count) {
            return Err(format!(
                "invalid interval count, {} must be in [1, {MAX_INTERVAL_COUNT}]",
                key.interval_count
            ));
        }
        if key.interval_number < min_interval {
            return Err(format!(
                "interval number {} is too old, must be >= {min_interval}",
                key.interval_number
            ));
        }
        if key.interval_number > max_interval {
            return Err(format!(
                "interval number {} is in the future, must be <= {max_interval}",
                key.interval_number
            ));
        }
        if !(MIN_TRANSMISSION_RISK..=MAX_TRANSMISSION_RISK).contains(&key.transmission_risk) {
            return Err(format!(
                "invalid transmission risk, {} must be in [{MIN_TRANSMISSION_RISK}, {MAX_TRANSMISSION_RISK}]",
                key.transmission_risk
            ));
        }

        let mut created_at = truncate_window(batch_time, self.config.truncate_window);
        // Keys whose valid window has not yet closed are embargoed until it
        // has, so the key cannot be matched while still in use.
        if key.interval_number + key.interval_count > max_interval
            && !self.config.debug_release_same_day_keys
        {
            created_at = truncate_window(
                time_for_interval(key.interval_number + key.interval_count),
                self.config.truncate_window,
            );
        }

        let mut exposure = Exposure {
            exposure_key: tek,
            transmission_risk: key.transmission_risk,
            app_package_name: app_package_name.to_string(),
            regions: regions.to_vec(),
            traveler: publish.traveler,
            interval_number: key.interval_number,
            interval_count: key.interval_count,
            created_at,
            local_provenance: true,
            federation_sync_id: None,
            health_authority_id: None,
            report_type: None,
            days_since_symptom_onset: None,
            revised_report_type: None,
            revised_at: None,
            revised_days_since_symptom_onset: None,
            revised_transmission_risk: None,
        };

        if let Some(claims) = claims {
            self.apply_claims(&mut exposure, key, publish, claims);
        }
        Ok(exposure)
    }

    /// Folds verified certificate claims into a validated key.
    fn apply_claims(
        &self,
        exposure: &mut Exposure,
        key: &ExposureKey,
        publish: &Publish,
        claims: &VerifiedClaims,
    ) {
        exposure.report_type = claims.report_type;
        exposure.transmission_risk = if key.transmission_risk != 0 {
            key.transmission_risk
        } else {
            ReportType::default_transmission_risk(claims.report_type)
        };
        if claims.health_authority_id > 0 {
            exposure.health_authority_id = Some(claims.health_authority_id);
        }

        let onset_interval = if claims.symptom_onset_interval > 0 {
            claims.symptom_onset_interval
        } else {
            publish.symptom_onset_interval
        };
        if onset_interval > 0 && onset_interval <= i32::MAX as u32 {
            let days = days_from_symptom_onset(onset_interval as i32, key.interval_number);
            if days.unsigned_abs() <= self.config.max_symptom_onset_days {
                exposure.days_since_symptom_onset = Some(days);
            }
        }
    }

    /// Enforces the cross-key interval rules on a sorted batch.
    ///
    /// Keys sharing a start interval are a same-day release, legal up to the
    /// configured limit. Any other overlap is fatal.
    fn check_interval_alignment(&self, sorted: &[Exposure]) -> Result<(), TransformError> {
        let mut same_day: HashMap<i32, usize> = HashMap::new();
        for (i, cur) in sorted.iter().enumerate() {
            let count = same_day.entry(cur.interval_number).or_insert(0);
            *count += 1;
            if *count > self.config.max_same_day_keys {
                return Err(TransformError::TooManySameDayKeys {
                    interval: cur.interval_number,
                    max: self.config.max_same_day_keys,
                });
            }
            if i > 0 {
                let prev = &sorted[i - 1];
                if cur.interval_number != prev.interval_number
                    && cur.interval_number < prev.expiry_interval()
                {
                    return Err(TransformError::OverlappingIntervals {
                        earlier_end: prev.expiry_interval(),
                        later_start: cur.interval_number,
                    });
                }
            }
        }
        Ok(())
    }
}

fn normalize_regions(regions: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(regions.len());
    for r in regions {
        let upper = r.to_ascii_uppercase();
        if !out.contains(&upper) {
            out.push(upper);
        }
    }
    out
}
