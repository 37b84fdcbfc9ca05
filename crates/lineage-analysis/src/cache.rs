//! Append-only SQLite cache of analysis results.
//!
//! Every `put` adds a row with the next version number for its key; rows
//! are never updated. Old versions go away only through the explicit
//! `prune`, `cleanup_old_versions`, and `clear` calls.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use lineage_core::{CacheConfig, LineageError};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{AnalysisMode, AnalysisResult, CacheKey, CacheRow};

/// Cache statistics.
///
/// # Examples
///
/// ```
/// use lineage_analysis::cache::AnalysisCache;
///
/// let cache = AnalysisCache::in_memory().unwrap();
/// let stats = cache.stats().unwrap();
/// assert_eq!(stats.total_rows, 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Rows across all keys and versions.
    pub total_rows: usize,
    /// Distinct `(subject, mode)` keys.
    pub distinct_keys: usize,
    /// Rows per mode.
    pub rows_by_mode: BTreeMap<AnalysisMode, usize>,
}

/// Versioned store of [`AnalysisResult`]s keyed by [`CacheKey`].
///
/// The connection sits behind a mutex so one cache can be shared through an
/// `Arc` by callers and queue workers.
///
/// # Examples
///
/// ```
/// use lineage_analysis::cache::AnalysisCache;
/// use lineage_analysis::types::{AnalysisMode, AnalysisResult, CacheKey};
///
/// let cache = AnalysisCache::in_memory().unwrap();
/// let key = CacheKey::new("region-1", AnalysisMode::Brief);
/// assert_eq!(cache.put(&key, &AnalysisResult::new("first", "test")).unwrap(), 1);
/// assert_eq!(cache.put(&key, &AnalysisResult::new("second", "test")).unwrap(), 2);
/// assert_eq!(cache.get(&key).unwrap().unwrap().payload.summary, "second");
/// ```
pub struct AnalysisCache {
    conn: Mutex<Connection>,
    keep_versions: usize,
}

impl AnalysisCache {
    /// Open or create a cache database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, LineageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LineageError::Database(format!("failed to create cache directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| LineageError::Database(format!("failed to open database: {e}")))?;
        Self::with_connection(conn, CacheConfig::default().keep_versions)
    }

    /// Open the cache described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] if the database cannot be opened.
    pub fn from_config(config: &CacheConfig) -> Result<Self, LineageError> {
        let mut cache = Self::open(&config.path)?;
        cache.keep_versions = config.keep_versions;
        Ok(cache)
    }

    /// Create an in-memory cache (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, LineageError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            LineageError::Database(format!("failed to create in-memory database: {e}"))
        })?;
        Self::with_connection(conn, CacheConfig::default().keep_versions)
    }

    fn with_connection(conn: Connection, keep_versions: usize) -> Result<Self, LineageError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS analyses (
                subject TEXT NOT NULL,
                mode TEXT NOT NULL,
                version INTEGER NOT NULL,
                provider TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (subject, mode, version)
            );
            ",
        )
        .map_err(|e| LineageError::Database(format!("failed to create schema: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            keep_versions,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest row for `key`.
    ///
    /// A row whose payload cannot be decoded counts as a miss.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on query failure.
    pub fn get(&self, key: &CacheKey) -> Result<Option<CacheRow>, LineageError> {
        let conn = self.lock();
        let raw = conn
            .query_row(
                "SELECT version, payload, created_at FROM analyses
                 WHERE subject = ?1 AND mode = ?2
                 ORDER BY version DESC LIMIT 1",
                params![key.subject, key.mode.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()
            .map_err(|e| LineageError::Database(format!("failed to read cache: {e}")))?;

        Ok(raw.and_then(|(version, payload, created_at)| {
            decode_row(key, version, &payload, &created_at)
        }))
    }

    /// Insert `result` as the next version for `key` and return that version.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on write failure or
    /// [`LineageError::Serialization`] if the result cannot be encoded.
    pub fn put(&self, key: &CacheKey, result: &AnalysisResult) -> Result<i64, LineageError> {
        let payload = serde_json::to_string(result)?;
        let conn = self.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| LineageError::Database(format!("failed to begin transaction: {e}")))?;

        let version: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM analyses
                 WHERE subject = ?1 AND mode = ?2",
                params![key.subject, key.mode.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| LineageError::Database(format!("failed to compute version: {e}")))?;

        tx.execute(
            "INSERT INTO analyses (subject, mode, version, provider, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.subject,
                key.mode.as_str(),
                version,
                result.provider,
                payload,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| LineageError::Database(format!("failed to insert analysis: {e}")))?;

        tx.commit()
            .map_err(|e| LineageError::Database(format!("failed to commit: {e}")))?;

        debug!(key = %key, version, "cached analysis");
        Ok(version)
    }

    /// All readable rows for `key`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on query failure.
    pub fn list_versions(&self, key: &CacheKey) -> Result<Vec<CacheRow>, LineageError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT version, payload, created_at FROM analyses
                 WHERE subject = ?1 AND mode = ?2
                 ORDER BY version DESC",
            )
            .map_err(|e| LineageError::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![key.subject, key.mode.as_str()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .map_err(|e| LineageError::Database(format!("failed to list versions: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (version, payload, created_at) =
                row.map_err(|e| LineageError::Database(format!("bad cache row: {e}")))?;
            if let Some(decoded) = decode_row(key, version, &payload, &created_at) {
                out.push(decoded);
            }
        }
        Ok(out)
    }

    /// Keep only the newest `keep_last` versions of `key`. Returns rows deleted.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on delete failure.
    pub fn prune(&self, key: &CacheKey, keep_last: usize) -> Result<usize, LineageError> {
        let deleted = self
            .lock()
            .execute(
                "DELETE FROM analyses
                 WHERE subject = ?1 AND mode = ?2 AND version NOT IN (
                     SELECT version FROM analyses
                     WHERE subject = ?1 AND mode = ?2
                     ORDER BY version DESC LIMIT ?3
                 )",
                params![key.subject, key.mode.as_str(), keep_last as i64],
            )
            .map_err(|e| LineageError::Database(format!("failed to prune: {e}")))?;
        debug!(key = %key, deleted, "pruned analyses");
        Ok(deleted)
    }

    /// Whether any row exists for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on query failure.
    pub fn has(&self, key: &CacheKey) -> Result<bool, LineageError> {
        self.lock()
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM analyses WHERE subject = ?1 AND mode = ?2)",
                params![key.subject, key.mode.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| LineageError::Database(format!("failed to query cache: {e}")))
    }

    /// Delete rows, optionally limited to one mode and/or subject.
    /// Returns rows deleted.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on delete failure.
    pub fn clear(
        &self,
        mode: Option<AnalysisMode>,
        subject: Option<&str>,
    ) -> Result<usize, LineageError> {
        self.lock()
            .execute(
                "DELETE FROM analyses
                 WHERE (?1 IS NULL OR mode = ?1) AND (?2 IS NULL OR subject = ?2)",
                params![mode.map(AnalysisMode::as_str), subject],
            )
            .map_err(|e| LineageError::Database(format!("failed to clear cache: {e}")))
    }

    /// Keep the newest `keep` versions of every key. Returns rows deleted.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on delete failure.
    pub fn cleanup_old_versions(&self, keep: usize) -> Result<usize, LineageError> {
        let deleted = self
            .lock()
            .execute(
                "DELETE FROM analyses WHERE rowid IN (
                     SELECT rowid FROM (
                         SELECT rowid, ROW_NUMBER() OVER (
                             PARTITION BY subject, mode ORDER BY version DESC
                         ) AS rn
                         FROM analyses
                     ) WHERE rn > ?1
                 )",
                params![keep as i64],
            )
            .map_err(|e| LineageError::Database(format!("failed to clean up: {e}")))?;
        debug!(keep, deleted, "cleaned up old analyses");
        Ok(deleted)
    }

    /// [`cleanup_old_versions`](Self::cleanup_old_versions) with the
    /// configured retention.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on delete failure.
    pub fn apply_retention(&self) -> Result<usize, LineageError> {
        self.cleanup_old_versions(self.keep_versions)
    }

    /// Row counts.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on query failure.
    pub fn stats(&self) -> Result<CacheStats, LineageError> {
        let conn = self.lock();
        let (total_rows, distinct_keys): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), (SELECT COUNT(*) FROM (SELECT DISTINCT subject, mode FROM analyses))
                 FROM analyses",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| LineageError::Database(format!("failed to count rows: {e}")))?;

        let mut stmt = conn
            .prepare("SELECT mode, COUNT(*) FROM analyses GROUP BY mode")
            .map_err(|e| LineageError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| LineageError::Database(format!("failed to count modes: {e}")))?;

        let mut rows_by_mode = BTreeMap::new();
        for row in rows {
            let (mode, count) =
                row.map_err(|e| LineageError::Database(format!("bad stats row: {e}")))?;
            match mode.parse::<AnalysisMode>() {
                Ok(mode) => {
                    rows_by_mode.insert(mode, count as usize);
                }
                Err(e) => warn!(error = %e, "ignoring rows with unknown mode"),
            }
        }

        Ok(CacheStats {
            total_rows: total_rows as usize,
            distinct_keys: distinct_keys as usize,
            rows_by_mode,
        })
    }

    /// Reclaim space after deletions.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] if the vacuum fails.
    pub fn vacuum(&self) -> Result<(), LineageError> {
        self.lock()
            .execute_batch("VACUUM")
            .map_err(|e| LineageError::Database(format!("failed to vacuum: {e}")))
    }
}

fn decode_row(key: &CacheKey, version: i64, payload: &str, created_at: &str) -> Option<CacheRow> {
    let payload: AnalysisResult = match serde_json::from_str(payload) {
        Ok(p) => p,
        Err(e) => {
            warn!(key = %key, version, error = %e, "unreadable cached analysis");
            return None;
        }
    };
    let created_at = match DateTime::parse_from_rfc3339(created_at) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => {
            warn!(key = %key, version, error = %e, "unreadable cache timestamp");
            return None;
        }
    };
    Some(CacheRow {
        key: key.clone(),
        version,
        payload,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(subject: &str) -> CacheKey {
        CacheKey::new(subject, AnalysisMode::Brief)
    }

    fn result(summary: &str) -> AnalysisResult {
        AnalysisResult::new(summary, "test")
    }

    #[test]
    fn get_on_empty_is_none() {
        let cache = AnalysisCache::in_memory().unwrap();
        assert!(cache.get(&key("x")).unwrap().is_none());
        assert!(!cache.has(&key("x")).unwrap());
    }

    #[test]
    fn versions_are_per_key() {
        let cache = AnalysisCache::in_memory().unwrap();
        assert_eq!(cache.put(&key("a"), &result("a1")).unwrap(), 1);
        assert_eq!(cache.put(&key("b"), &result("b1")).unwrap(), 1);
        assert_eq!(cache.put(&key("a"), &result("a2")).unwrap(), 2);
        let deep = CacheKey::new("a", AnalysisMode::Deep);
        assert_eq!(cache.put(&deep, &result("a-deep")).unwrap(), 1);
    }

    #[test]
    fn list_versions_newest_first() {
        let cache = AnalysisCache::in_memory().unwrap();
        for i in 1..=3 {
            cache.put(&key("a"), &result(&format!("v{i}"))).unwrap();
        }
        let versions: Vec<i64> = cache
            .list_versions(&key("a"))
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![3, 2, 1]);
    }

    #[test]
    fn undecodable_row_is_a_miss() {
        let cache = AnalysisCache::in_memory().unwrap();
        cache
            .lock()
            .execute(
                "INSERT INTO analyses VALUES ('s', 'brief', 1, 'p', '{broken', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        assert!(cache.get(&key("s")).unwrap().is_none());
        assert!(cache.list_versions(&key("s")).unwrap().is_empty());
        assert!(cache.has(&key("s")).unwrap());
    }

    #[test]
    fn clear_by_mode_and_subject() {
        let cache = AnalysisCache::in_memory().unwrap();
        cache.put(&key("a"), &result("x")).unwrap();
        cache.put(&key("b"), &result("x")).unwrap();
        cache
            .put(&CacheKey::new("a", AnalysisMode::Deep), &result("x"))
            .unwrap();

        assert_eq!(cache.clear(Some(AnalysisMode::Deep), None).unwrap(), 1);
        assert_eq!(cache.clear(None, Some("a")).unwrap(), 1);
        assert_eq!(cache.clear(None, None).unwrap(), 1);
        assert_eq!(cache.stats().unwrap().total_rows, 0);
    }

    #[test]
    fn cleanup_keeps_newest_per_key() {
        let cache = AnalysisCache::in_memory().unwrap();
        for _ in 0..4 {
            cache.put(&key("a"), &result("x")).unwrap();
        }
        for _ in 0..2 {
            cache.put(&key("b"), &result("x")).unwrap();
        }
        assert_eq!(cache.cleanup_old_versions(2).unwrap(), 2);
        let a: Vec<i64> = cache
            .list_versions(&key("a"))
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(a, vec![4, 3]);
        assert_eq!(cache.list_versions(&key("b")).unwrap().len(), 2);
    }

    #[test]
    fn stats_count_rows_and_keys() {
        let cache = AnalysisCache::in_memory().unwrap();
        cache.put(&key("a"), &result("x")).unwrap();
        cache.put(&key("a"), &result("x")).unwrap();
        cache
            .put(&CacheKey::new("a", AnalysisMode::Pattern), &result("x"))
            .unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_rows, 3);
        assert_eq!(stats.distinct_keys, 2);
        assert_eq!(stats.rows_by_mode.get(&AnalysisMode::Brief), Some(&2));
        cache.vacuum().unwrap();
    }
}
