//! Revision key store.
//!
//! Wrapped AEAD keys for the revision token codec. Key material never lands
//! on disk unwrapped: creation generates fresh random bytes, wraps them
//! through the [`KeyWrapper`] seam and stores only the wrapped blob. The
//! store is the ring's [`WrappedKeySource`]; retiring a key removes it from
//! the allowed set on the ring's next refresh.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use rand::RngCore;
use std::path::Path;
use std::sync::Mutex;
use tekserver_crypto::keyring::{WrappedKeySource, WrappedRevisionKey};
use tekserver_crypto::kms::KeyWrapper;
use tekserver_crypto::KeyRingError;
use tracing::info;
use zeroize::Zeroize;

/// SQLite-backed store of wrapped revision keys.
pub struct RevisionKeyStore {
    conn: Mutex<Connection>,
}

impl RevisionKeyStore {
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
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory store. Tests only.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS revision_key (
                key_id INTEGER PRIMARY KEY AUTOINCREMENT,
                wrapped BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                retired_at INTEGER
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Internal("revision key store lock poisoned".into()))
    }

    /// Generates, wraps and stores a new 256-bit revision key.
    ///
    /// The newest stored key becomes the active encryption key, so this is
    /// both "create first key" and "rotate".
    pub fn create_revision_key(
        &self,
        wrapper: &dyn KeyWrapper,
        now: DateTime<Utc>,
    ) -> Result<WrappedRevisionKey> {
        let mut material = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut material);
        let wrapped = wrapper
            .wrap(&material)
            .map_err(|e| StoreError::Internal(format!("unable to wrap revision key: {e}")))?;
        material.zeroize();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO revision_key (wrapped, created_at) VALUES (?1, ?2)",
            params![wrapped, now.timestamp()],
        )?;
        let key_id = conn.last_insert_rowid();
        info!(key_id, "revision key created");
        Ok(WrappedRevisionKey { key_id, wrapped })
    }

    /// Removes a key from the allowed set. Tokens minted under it stop
    /// opening once the ring refreshes. Returns false when the key does not
    /// exist or was already retired.
    pub fn retire_revision_key(&self, key_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE revision_key SET retired_at = ?1 WHERE key_id = ?2 AND retired_at IS NULL",
            params![now.timestamp(), key_id],
        )?;
        if rows > 0 {
            info!(key_id, "revision key retired");
        }
        Ok(rows > 0)
    }

    /// All keys usable for decryption, oldest first.
    pub fn allowed_revision_keys(&self) -> Result<Vec<WrappedRevisionKey>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key_id, wrapped FROM revision_key WHERE retired_at IS NULL ORDER BY key_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(WrappedRevisionKey {
                key_id: row.get(0)?,
                wrapped: row.get(1)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl WrappedKeySource for RevisionKeyStore {
    fn allowed_keys(&self) -> std::result::Result<Vec<WrappedRevisionKey>, KeyRingError> {
        self.allowed_revision_keys()
            .map_err(|e| KeyRingError::Source(e.to_string()))
    }
}
