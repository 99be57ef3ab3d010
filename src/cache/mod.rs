//! Result cache for cohort sets.
//!
//! Finished identifier sets are stored under the node's isolated SQL, which
//! carries its parameter declarations, so a changed parameter value is a
//! different entry. The identifier column's name and SQL type are stored
//! explicitly; nothing else records how the column was typed.
//!
//! The default store is `~/.sieve/results.db`.
//!
//! # Design
//!
//! - Keyed by the SHA-256 of the identity SQL; the SQL itself is kept for
//!   inspection
//! - No TTL: entries live until cleared
//! - Versioned: a schema version mismatch empties the store

mod hash;
pub use hash::compute_hash;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::results::{IdentifierColumn, IdentifierSet};

/// Bump when the table layout changes.
const CACHE_VERSION: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to determine cache directory")]
    NoCacheDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache connection lock poisoned")]
    Poisoned,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// A stored identifier set.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResults {
    pub column: IdentifierColumn,
    pub identifiers: IdentifierSet,
    /// Seconds since the Unix epoch.
    pub committed_at: i64,
}

/// Where finished cohort sets are kept between runs.
pub trait ResultCache: Send + Sync {
    /// Store `rows` under `identity_sql`, replacing any earlier entry.
    fn commit_results(
        &self,
        identity_sql: &str,
        column: &IdentifierColumn,
        rows: &IdentifierSet,
    ) -> CacheResult<()>;

    fn has_cached_results(&self, identity_sql: &str) -> CacheResult<bool>;

    fn cached_results(&self, identity_sql: &str) -> CacheResult<Option<CachedResults>>;

    /// Returns whether an entry was removed.
    fn clear_results_for(&self, identity_sql: &str) -> CacheResult<bool>;
}

/// Summary of the cache contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub identifier_count: usize,
    /// Size of the stored identifier lists in bytes.
    pub total_size_bytes: usize,
}

/// SQLite-backed [`ResultCache`].
pub struct SqliteResultCache {
    conn: Mutex<Connection>,
}

impl SqliteResultCache {
    /// Open (creating if needed) the cache at the default location.
    pub fn open_default() -> CacheResult<Self> {
        Self::open(Self::default_path()?)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let cache = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        cache.init()?;
        debug!(path = %path.display(), "opened result cache");
        Ok(cache)
    }

    pub fn open_in_memory() -> CacheResult<Self> {
        let cache = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        cache.init()?;
        Ok(cache)
    }

    pub fn default_path() -> CacheResult<PathBuf> {
        let base = dirs::home_dir().ok_or(CacheError::NoCacheDir)?;
        Ok(base.join(".sieve").join("results.db"))
    }

    fn conn(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    fn init(&self) -> CacheResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS results (
                identity_hash TEXT PRIMARY KEY,
                identity_sql TEXT NOT NULL,
                column_name TEXT NOT NULL,
                column_type TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                rows_json TEXT NOT NULL,
                committed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        match stored_version {
            Some(v) if v == CACHE_VERSION => {}
            Some(v) => {
                debug!(found = v, expected = CACHE_VERSION, "result cache version changed, clearing");
                conn.execute("DELETE FROM results", [])?;
                set_version(&conn)?;
            }
            None => set_version(&conn)?,
        }
        Ok(())
    }

    /// Remove every stored result.
    pub fn clear_all(&self) -> CacheResult<usize> {
        Ok(self.conn()?.execute("DELETE FROM results", [])?)
    }

    pub fn stats(&self) -> CacheResult<CacheStats> {
        let conn = self.conn()?;
        let (entries, identifiers, size): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(row_count), 0), COALESCE(SUM(LENGTH(rows_json)), 0)
             FROM results",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(CacheStats {
            entry_count: entries as usize,
            identifier_count: identifiers as usize,
            total_size_bytes: size as usize,
        })
    }
}

fn set_version(conn: &Connection) -> CacheResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?1)",
        params![CACHE_VERSION.to_string()],
    )?;
    Ok(())
}

fn identity_hash(identity_sql: &str) -> CacheResult<String> {
    Ok(compute_hash(&identity_sql)?)
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl ResultCache for SqliteResultCache {
    fn commit_results(
        &self,
        identity_sql: &str,
        column: &IdentifierColumn,
        rows: &IdentifierSet,
    ) -> CacheResult<()> {
        let hash = identity_hash(identity_sql)?;
        let rows_json = serde_json::to_string(rows)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO results
             (identity_hash, identity_sql, column_name, column_type, row_count, rows_json, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                hash,
                identity_sql,
                column.name,
                column.data_type,
                rows.len() as i64,
                rows_json,
                now_secs()
            ],
        )?;
        debug!(hash = %hash, rows = rows.len(), "committed cohort results");
        Ok(())
    }

    fn has_cached_results(&self, identity_sql: &str) -> CacheResult<bool> {
        let hash = identity_hash(identity_sql)?;
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM results WHERE identity_hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn cached_results(&self, identity_sql: &str) -> CacheResult<Option<CachedResults>> {
        let hash = identity_hash(identity_sql)?;
        let row: Option<(String, String, String, i64)> = self
            .conn()?
            .query_row(
                "SELECT column_name, column_type, rows_json, committed_at
                 FROM results WHERE identity_hash = ?1",
                params![hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        match row {
            Some((name, data_type, rows_json, committed_at)) => Ok(Some(CachedResults {
                column: IdentifierColumn::new(name, data_type),
                identifiers: serde_json::from_str(&rows_json)?,
                committed_at,
            })),
            None => Ok(None),
        }
    }

    fn clear_results_for(&self, identity_sql: &str) -> CacheResult<bool> {
        let hash = identity_hash(identity_sql)?;
        let removed = self
            .conn()?
            .execute("DELETE FROM results WHERE identity_hash = ?1", params![hash])?;
        Ok(removed > 0)
    }
}
