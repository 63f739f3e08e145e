//! Exposure store.
//!
//! Durable home of published exposure records, keyed by the base64 TEK. The
//! publish pipeline runs exactly one transaction here: lock the incoming
//! identities, enforce revision-token preconditions, merge via the domain
//! rules, then execute batched insert and revise statements.
//!
//! SQLite serializes writers, so an immediate transaction is the equivalent
//! of the row-level read-for-update: the second of two concurrent uploads of
//! the same TEK observes the first one's committed row.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, TransactionBehavior};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::Path;
use tekserver_core::base64util;
use tekserver_crypto::token::RevisionTokenData;
use tekserver_domain::model::{Exposure, ReportType};
use tekserver_domain::revise::{revise_keys, KeyWrite};
use tracing::{debug, info};

const COLUMNS: &str = "exposure_key, transmission_risk, app_package_name, regions, traveler, \
     interval_number, interval_count, created_at, local_provenance, sync_id, \
     health_authority_id, report_type, days_since_symptom_onset, revised_report_type, \
     revised_at, revised_days_since_symptom_onset, revised_transmission_risk";

/// One publish batch to persist.
pub struct InsertAndReviseRequest<'a> {
    /// Transformed incoming records.
    pub incoming: Vec<Exposure>,
    /// Opened revision token, when the client presented one.
    pub token: Option<&'a RevisionTokenData>,
    /// Whether revisions of existing keys must be covered by a token.
    pub require_token: bool,
    /// Drop (rather than reject) existing keys the token does not cover.
    pub allow_partial_revisions: bool,
}

/// Outcome of one persisted batch.
#[derive(Debug, Default)]
pub struct InsertAndReviseResult {
    /// Fresh rows written.
    pub inserted: u64,
    /// Existing rows revised.
    pub revised: u64,
    /// Incoming records that produced no write.
    pub dropped: u64,
    /// The records as written, inserts and revisions both.
    pub exposures: Vec<Exposure>,
}

/// Filters for [`ExposureStore::iterate_exposures`].
#[derive(Debug, Default, Clone)]
pub struct IterateCriteria {
    /// Keep only records intersecting these regions. Empty keeps all.
    pub include_regions: Vec<String>,
    /// Drop records intersecting these regions.
    pub exclude_regions: Vec<String>,
    /// Keep only traveler records.
    pub only_travelers: bool,
    /// Keep only locally uploaded records.
    pub only_local_provenance: bool,
    /// Lower time bound (inclusive) on the ordering column.
    pub since: Option<DateTime<Utc>>,
    /// Upper time bound (exclusive) on the ordering column.
    pub until: Option<DateTime<Utc>>,
    /// Scan revised records, ordered by revision time.
    pub only_revised: bool,
    /// Cursor from a previous, interrupted scan.
    pub last_cursor: Option<String>,
}

/// SQLite-backed exposure store.
pub struct ExposureStore {
    conn: Connection,
}

impl ExposureStore {
    /// Creates or opens a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&conn)?;
        info!(path = %path.display(), "exposure store opened");
        Ok(Self { conn })
    }

    /// Opens a private in-memory store. Tests only.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS exposure (
                exposure_key TEXT PRIMARY KEY,
                transmission_risk INTEGER NOT NULL,
                app_package_name TEXT NOT NULL,
                regions TEXT NOT NULL,
                traveler INTEGER NOT NULL,
                interval_number INTEGER NOT NULL,
                interval_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                local_provenance INTEGER NOT NULL,
                sync_id INTEGER,
                health_authority_id INTEGER,
                report_type TEXT,
                days_since_symptom_onset INTEGER,
                revised_report_type TEXT,
                revised_at INTEGER,
                revised_days_since_symptom_onset INTEGER,
                revised_transmission_risk INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_exposure_created_at ON exposure(created_at);
            CREATE INDEX IF NOT EXISTS idx_exposure_revised_at ON exposure(revised_at)
                WHERE revised_at IS NOT NULL;
            "#,
        )?;
        Ok(())
    }

    /// Reads records by base64 TEK. Missing keys are simply absent.
    pub fn read_exposures(&mut self, keys: &[String]) -> Result<HashMap<String, Exposure>> {
        Self::read_exposures_on(&self.conn, keys)
    }

    fn read_exposures_on(
        conn: &Connection,
        keys: &[String],
    ) -> Result<HashMap<String, Exposure>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql =
            format!("SELECT {COLUMNS} FROM exposure WHERE exposure_key IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(keys.iter()), row_to_exposure)?;

        let mut out = HashMap::with_capacity(keys.len());
        for row in rows {
            let exposure = row?;
            out.insert(exposure.exposure_key_base64(), exposure);
        }
        Ok(out)
    }

    /// Persists one publish batch in a single immediate transaction.
    ///
    /// Steps: lock overlapping rows, enforce the revision-token
    /// preconditions, merge with [`revise_keys`], then run the batched
    /// insert (`ON CONFLICT DO NOTHING`) and revise (`revised_at IS NULL`
    /// guarded) statements. A revise that affects no row means the row was
    /// revised concurrently; the whole transaction aborts.
    pub fn insert_and_revise(
        &mut self,
        req: InsertAndReviseRequest<'_>,
    ) -> Result<InsertAndReviseResult> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let identities: Vec<String> =
            req.incoming.iter().map(|e| e.exposure_key_base64()).collect();
        let existing = Self::read_exposures_on(&tx, &identities)?;

        let (incoming, dropped_by_token) = check_revision_preconditions(
            &existing,
            req.incoming,
            req.token,
            req.require_token,
            req.allow_partial_revisions,
        )?;

        let outcome = revise_keys(&existing, &incoming)?;

        let mut result = InsertAndReviseResult {
            dropped: outcome.dropped as u64 + dropped_by_token,
            ..Default::default()
        };

        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO exposure ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
                 ON CONFLICT(exposure_key) DO NOTHING"
            ))?;
            let mut revise = tx.prepare(
                "UPDATE exposure SET regions = ?1, health_authority_id = ?2, \
                 revised_report_type = ?3, revised_at = ?4, \
                 revised_days_since_symptom_onset = ?5, revised_transmission_risk = ?6 \
                 WHERE exposure_key = ?7 AND revised_at IS NULL",
            )?;

            for write in &outcome.writes {
                match write {
                    KeyWrite::Insert(e) => {
                        let rows = insert.execute(params![
                            e.exposure_key_base64(),
                            e.transmission_risk,
                            e.app_package_name,
                            regions_json(&e.regions)?,
                            e.traveler,
                            e.interval_number,
                            e.interval_count,
                            e.created_at.timestamp(),
                            e.local_provenance,
                            e.federation_sync_id,
                            e.health_authority_id,
                            e.report_type.map(|r| r.as_str()),
                            e.days_since_symptom_onset,
                            e.revised_report_type.map(|r| r.as_str()),
                            e.revised_at.map(|t| t.timestamp()),
                            e.revised_days_since_symptom_onset,
                            e.revised_transmission_risk,
                        ])?;
                        result.inserted += rows as u64;
                        if rows == 0 {
                            result.dropped += 1;
                        }
                    }
                    KeyWrite::Revise(e) => {
                        let rows = revise.execute(params![
                            regions_json(&e.regions)?,
                            e.health_authority_id,
                            e.revised_report_type.map(|r| r.as_str()),
                            e.revised_at.map(|t| t.timestamp()),
                            e.revised_days_since_symptom_onset,
                            e.revised_transmission_risk,
                            e.exposure_key_base64(),
                        ])?;
                        if rows != 1 {
                            return Err(StoreError::InvalidKeyRevisionRequest {
                                key: e.exposure_key_base64(),
                            });
                        }
                        result.revised += 1;
                    }
                }
            }
        }
        tx.commit()?;

        result.exposures = outcome
            .writes
            .into_iter()
            .map(|w| match w {
                KeyWrite::Insert(e) | KeyWrite::Revise(e) => e,
            })
            .collect();
        debug!(
            inserted = result.inserted,
            revised = result.revised,
            dropped = result.dropped,
            "publish batch persisted"
        );
        Ok(result)
    }

    /// Scans records matching `criteria`, ordered by `created_at` (or
    /// `revised_at` for revised-only scans), feeding each to `f`.
    ///
    /// When `f` breaks, the scan position is returned as an opaque cursor;
    /// passing it back in `criteria.last_cursor` resumes after the record
    /// the scan broke on. A completed scan returns `None`.
    pub fn iterate_exposures<F>(
        &self,
        criteria: &IterateCriteria,
        mut f: F,
    ) -> Result<Option<String>>
    where
        F: FnMut(&Exposure) -> ControlFlow<()>,
    {
        let offset = decode_cursor(criteria.last_cursor.as_deref())?;
        let time_column = if criteria.only_revised {
            "revised_at"
        } else {
            "created_at"
        };

        let mut clauses: Vec<String> = Vec::new();
        let mut time_params: Vec<i64> = Vec::new();
        if criteria.only_revised {
            clauses.push("revised_at IS NOT NULL".into());
        }
        if criteria.only_local_provenance {
            clauses.push("local_provenance = 1".into());
        }
        if criteria.only_travelers {
            clauses.push("traveler = 1".into());
        }
        if let Some(since) = criteria.since {
            time_params.push(since.timestamp());
            clauses.push(format!("{time_column} >= ?{}", time_params.len()));
        }
        if let Some(until) = criteria.until {
            time_params.push(until.timestamp());
            clauses.push(format!("{time_column} < ?{}", time_params.len()));
        }

        let mut sql = format!("SELECT {COLUMNS} FROM exposure");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY {time_column} ASC, exposure_key ASC LIMIT -1 OFFSET {offset}"
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(time_params.iter()), row_to_exposure)?;

        let mut scanned: u64 = 0;
        for row in rows {
            let exposure = row?;
            scanned += 1;
            if !region_match(&exposure, criteria) {
                continue;
            }
            if let ControlFlow::Break(()) = f(&exposure) {
                return Ok(Some(encode_cursor(offset + scanned)));
            }
        }
        Ok(None)
    }

    /// Deletes records created strictly before `before`. Returns the count.
    pub fn delete_exposures_before(&mut self, before: DateTime<Utc>) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM exposure WHERE created_at < ?1",
            params![before.timestamp()],
        )?;
        info!(deleted, before = %before, "expired exposures deleted");
        Ok(deleted)
    }
}

fn check_revision_preconditions(
    existing: &HashMap<String, Exposure>,
    incoming: Vec<Exposure>,
    token: Option<&RevisionTokenData>,
    require_token: bool,
    allow_partial_revisions: bool,
) -> Result<(Vec<Exposure>, u64)> {
    // Token preconditions come first: policy errors dominate content errors.
    let mut kept = incoming;
    let mut dropped: u64 = 0;
    let any_existing = kept
        .iter()
        .any(|e| existing.contains_key(&e.exposure_key_base64()));

    if any_existing && require_token {
        let token = token.ok_or(StoreError::NoRevisionToken)?;
        let mut allowed = Vec::with_capacity(kept.len());
        for inc in kept {
            let identity = inc.exposure_key_base64();
            if let Some(have) = existing.get(&identity) {
                match token.find(&inc.exposure_key) {
                    None => {
                        if allow_partial_revisions {
                            dropped += 1;
                            continue;
                        }
                        return Err(StoreError::ExistingKeyNotInToken { key: identity });
                    }
                    Some(entry) => {
                        if entry.interval_number != have.interval_number
                            || entry.interval_count != have.interval_count
                        {
                            return Err(StoreError::TokenMetadataMismatch { key: identity });
                        }
                    }
                }
            }
            allowed.push(inc);
        }
        kept = allowed;
    }

    // Interval metadata is frozen at first insert; an upload that disagrees
    // with the stored row is rejected outright.
    for inc in &kept {
        if let Some(have) = existing.get(&inc.exposure_key_base64()) {
            if inc.interval_number != have.interval_number
                || inc.interval_count != have.interval_count
            {
                return Err(StoreError::IncomingMetadataMismatch {
                    key: inc.exposure_key_base64(),
                });
            }
        }
    }

    Ok((kept, dropped))
}

fn region_match(exposure: &Exposure, criteria: &IterateCriteria) -> bool {
    if !criteria.include_regions.is_empty()
        && !exposure
            .regions
            .iter()
            .any(|r| criteria.include_regions.contains(r))
    {
        return false;
    }
    if exposure
        .regions
        .iter()
        .any(|r| criteria.exclude_regions.contains(r))
    {
        return false;
    }
    true
}

fn regions_json(regions: &[String]) -> Result<String> {
    serde_json::to_string(regions)
        .map_err(|e| StoreError::Database(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))
}

fn encode_cursor(offset: u64) -> String {
    base64util::encode(format!("offset:{offset}").as_bytes())
}

fn decode_cursor(cursor: Option<&str>) -> Result<u64> {
    let Some(cursor) = cursor else {
        return Ok(0);
    };
    let raw = base64util::decode_flexible(cursor)
        .map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
    let text =
        String::from_utf8(raw).map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
    text.strip_prefix("offset:")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| StoreError::InvalidCursor(text.clone()))
}

fn row_to_exposure(row: &rusqlite::Row<'_>) -> rusqlite::Result<Exposure> {
    let key_b64: String = row.get(0)?;
    let exposure_key = base64util::decode_flexible(&key_b64).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let regions_raw: String = row.get(3)?;
    let regions: Vec<String> = serde_json::from_str(&regions_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let report_type: Option<String> = row.get(11)?;
    let revised_report_type: Option<String> = row.get(13)?;

    Ok(Exposure {
        exposure_key,
        transmission_risk: row.get(1)?,
        app_package_name: row.get(2)?,
        regions,
        traveler: row.get(4)?,
        interval_number: row.get(5)?,
        interval_count: row.get(6)?,
        created_at: timestamp(row.get(7)?),
        local_provenance: row.get(8)?,
        federation_sync_id: row.get(9)?,
        health_authority_id: row.get(10)?,
        report_type: report_type.as_deref().and_then(ReportType::parse),
        days_since_symptom_onset: row.get(12)?,
        revised_report_type: revised_report_type.as_deref().and_then(ReportType::parse),
        revised_at: row.get::<_, Option<i64>>(14)?.map(timestamp),
        revised_days_since_symptom_onset: row.get(15)?,
        revised_transmission_risk: row.get(16)?,
    })
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
