//! Persistent track-feature cache.
//!
//! Records are keyed by absolute path and validated against the file's
//! (size, mtime) fingerprint plus the store schema version; any mismatch is
//! a miss. The store is a SQLite database in WAL mode: the write-ahead log
//! provides crash recovery for interrupted writes, and SQLite's advisory
//! file locking plus a bounded busy timeout provides the cross-process
//! locking discipline. Workers open their own connections; a connection
//! never crosses threads.

use crate::model::TrackFeatures;
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

/// Store schema version. Bumping it invalidates every existing entry.
pub const SCHEMA_VERSION: i64 = 4;

/// Bounded wait for the store lock. Readers that time out behave as a miss;
/// writers discard the put.
const LOCK_WAIT_MS: u64 = 2_000;

const DB_FILE: &str = "features.db";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// File identity snapshot used for staleness detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub size_bytes: u64,
    pub mtime_ns: i64,
}

impl Fingerprint {
    /// Stat `path` and capture its fingerprint.
    pub fn stat(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
            .unwrap_or(0);
        Ok(Self {
            size_bytes: meta.len(),
            mtime_ns,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub entries: u64,
    pub db_bytes: u64,
}

pub struct TrackCache {
    pub conn: Connection,
    db_bytes_hint: u64,
}

impl TrackCache {
    /// Open (or create) the store under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).ok();
        let db_path = dir.join(DB_FILE);
        let conn = Connection::open(&db_path)?;
        let cache = Self {
            conn,
            db_bytes_hint: std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0),
        };
        cache.init()?;
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn,
            db_bytes_hint: 0,
        };
        cache.init()?;
        Ok(cache)
    }

    fn init(&self) -> Result<()> {
        // WAL keeps interrupted writes recoverable and lets readers proceed
        // under a writer.
        self.conn.pragma_update(None, "journal_mode", "WAL").ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn
            .busy_timeout(std::time::Duration::from_millis(LOCK_WAIT_MS))?;

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tracks (
                path            TEXT PRIMARY KEY,
                size_bytes      INTEGER NOT NULL,
                mtime_ns        INTEGER NOT NULL,
                schema_version  INTEGER NOT NULL,
                record          TEXT NOT NULL,
                stored_at       TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;

        let found: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);
        if found != SCHEMA_VERSION {
            self.migrate_schema(found, SCHEMA_VERSION)?;
        }
        Ok(())
    }

    /// Invalidate every entry of the old schema and stamp the new version.
    /// Records are not portable across schema versions, so migration is
    /// invalidation.
    pub fn migrate_schema(&self, old: i64, new: i64) -> Result<()> {
        if old != 0 {
            log::warn!("cache schema {old} -> {new}: invalidating all entries");
        }
        self.conn.execute("DELETE FROM tracks", [])?;
        self.conn.pragma_update(None, "user_version", new)?;
        Ok(())
    }

    /// Look up the record for `path`.
    ///
    /// Returns `None` on any mismatch: file missing, fingerprint changed,
    /// schema version changed, lock wait exceeded, or corrupted record. A
    /// second stat+lookup pass guards against the file changing between the
    /// first stat and the row read.
    pub fn get(&self, path: &Path) -> Option<TrackFeatures> {
        let first = Fingerprint::stat(path).ok()?;
        let row = self.lookup(path)?;
        if !row.matches(first) {
            return None;
        }

        // Double-check after the read: re-stat and re-read, and only trust
        // the entry when the second pass still agrees.
        let second = Fingerprint::stat(path).ok()?;
        let row = self.lookup(path)?;
        if !row.matches(second) {
            return None;
        }

        match serde_json::from_str(&row.record) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!(
                    "corrupted cache record for {}: {e}; discarding",
                    path.display()
                );
                self.conn
                    .execute(
                        "DELETE FROM tracks WHERE path = ?1",
                        [path.to_string_lossy()],
                    )
                    .ok();
                None
            }
        }
    }

    /// Store a record for `path` under its current fingerprint.
    ///
    /// The file is re-stat'ed at write time; if it disappeared the write is
    /// discarded silently. A lock-wait timeout also discards the write;
    /// the cache is an accelerator, never a correctness dependency.
    pub fn put(&self, path: &Path, record: &TrackFeatures) -> Result<()> {
        let fingerprint = match Fingerprint::stat(path) {
            Ok(f) => f,
            Err(_) => {
                log::debug!("{} vanished before cache write", path.display());
                return Ok(());
            }
        };

        let json = serde_json::to_string(record).expect("feature record serializes");
        let result = self.conn.execute(
            "INSERT OR REPLACE INTO tracks
                (path, size_bytes, mtime_ns, schema_version, record, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            rusqlite::params![
                path.to_string_lossy(),
                fingerprint.size_bytes as i64,
                fingerprint.mtime_ns,
                SCHEMA_VERSION,
                json,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_busy(&e) => {
                log::warn!("cache lock wait exceeded; discarding write for {}", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM tracks", [])?)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let entries: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(CacheStats {
            entries: entries as u64,
            db_bytes: self.db_bytes_hint,
        })
    }

    fn lookup(&self, path: &Path) -> Option<StoredRow> {
        let result = self.conn.query_row(
            "SELECT size_bytes, mtime_ns, schema_version, record
             FROM tracks WHERE path = ?1",
            [path.to_string_lossy()],
            |row| {
                Ok(StoredRow {
                    size_bytes: row.get::<_, i64>(0)? as u64,
                    mtime_ns: row.get(1)?,
                    schema_version: row.get(2)?,
                    record: row.get(3)?,
                })
            },
        );
        match result {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                if is_busy(&e) {
                    log::debug!("cache lock wait exceeded reading {}", path.display());
                } else {
                    log::warn!("cache read error for {}: {e}", path.display());
                }
                None
            }
        }
    }
}

struct StoredRow {
    size_bytes: u64,
    mtime_ns: i64,
    schema_version: i64,
    record: String,
}

impl StoredRow {
    fn matches(&self, fingerprint: Fingerprint) -> bool {
        self.schema_version == SCHEMA_VERSION
            && self.size_bytes == fingerprint.size_bytes
            && self.mtime_ns == fingerprint.mtime_ns
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ffi::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ffi::ErrorCode::DatabaseLocked
    )
}
