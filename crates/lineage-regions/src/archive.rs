//! SQLite persistence for the region store.
//!
//! Each region is one row with its history serialized as a JSON blob. The
//! version order and the set of indexed steps are stored alongside so a
//! reloaded store keeps skipping work it has already done.

use std::path::Path;

use lineage_core::LineageError;
use lineage_difflens::identity::RegionId;
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::store::{RegionHistoryEntry, RegionStore, Transition};

/// Serialize a history list to its stored form.
///
/// # Errors
///
/// Returns [`LineageError::Serialization`] if encoding fails.
///
/// # Examples
///
/// ```
/// use lineage_regions::archive::{decode_history, encode_history};
/// use lineage_regions::store::RegionHistoryEntry;
///
/// let history = vec![RegionHistoryEntry::baseline("v1", vec!["hello".into()])];
/// let blob = encode_history(&history).unwrap();
/// assert_eq!(decode_history(&blob).unwrap(), history);
/// ```
pub fn encode_history(history: &[RegionHistoryEntry]) -> Result<String, LineageError> {
    Ok(serde_json::to_string(history)?)
}

/// Parse a stored history blob.
///
/// # Errors
///
/// Returns [`LineageError::Serialization`] if the blob is not a valid history.
pub fn decode_history(blob: &str) -> Result<Vec<RegionHistoryEntry>, LineageError> {
    Ok(serde_json::from_str(blob)?)
}

/// SQLite-backed snapshot of a [`RegionStore`].
///
/// # Examples
///
/// ```
/// use lineage_regions::archive::RegionArchive;
///
/// let archive = RegionArchive::in_memory().unwrap();
/// let store = archive.load().unwrap();
/// assert!(store.is_empty());
/// ```
pub struct RegionArchive {
    conn: Connection,
}

impl RegionArchive {
    /// Open or create an archive at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, LineageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LineageError::Database(format!("failed to create archive directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| LineageError::Database(format!("failed to open database: {e}")))?;

        let archive = Self { conn };
        archive.init_schema()?;
        Ok(archive)
    }

    /// Create an in-memory archive (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, LineageError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            LineageError::Database(format!("failed to create in-memory database: {e}"))
        })?;

        let archive = Self { conn };
        archive.init_schema()?;
        Ok(archive)
    }

    fn init_schema(&self) -> Result<(), LineageError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS versions (
                    id TEXT PRIMARY KEY,
                    ordinal INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS regions (
                    id TEXT PRIMARY KEY,
                    resource TEXT NOT NULL,
                    canonical_snippet TEXT NOT NULL,
                    first_seen TEXT NOT NULL,
                    history_json TEXT NOT NULL
                );

                -- '' stands for a baseline snapshot with no previous version
                CREATE TABLE IF NOT EXISTS transitions (
                    resource TEXT NOT NULL,
                    from_version TEXT NOT NULL,
                    to_version TEXT NOT NULL,
                    PRIMARY KEY (resource, from_version, to_version)
                );
                ",
            )
            .map_err(|e| LineageError::Database(format!("failed to create schema: {e}")))?;

        Ok(())
    }

    /// Write the whole store in one transaction.
    ///
    /// Existing regions get their snippet and history replaced; `first_seen`
    /// is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on write failure or
    /// [`LineageError::Serialization`] if a history cannot be encoded.
    pub fn save(&self, store: &RegionStore) -> Result<(), LineageError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| LineageError::Database(format!("failed to begin transaction: {e}")))?;

        for (ordinal, version) in store.versions().iter().enumerate() {
            tx.execute(
                "INSERT OR REPLACE INTO versions (id, ordinal) VALUES (?1, ?2)",
                params![version, ordinal as i64],
            )
            .map_err(|e| LineageError::Database(format!("failed to save version: {e}")))?;
        }

        for region in store.regions() {
            let history = encode_history(region.history())?;
            tx.execute(
                "INSERT INTO regions (id, resource, canonical_snippet, first_seen, history_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    canonical_snippet = excluded.canonical_snippet,
                    history_json = excluded.history_json",
                params![
                    region.id().as_str(),
                    region.resource(),
                    region.canonical_snippet(),
                    region.first_seen(),
                    history,
                ],
            )
            .map_err(|e| LineageError::Database(format!("failed to save region: {e}")))?;
        }

        for t in store.transitions() {
            tx.execute(
                "INSERT OR IGNORE INTO transitions (resource, from_version, to_version)
                 VALUES (?1, ?2, ?3)",
                params![t.resource, t.from.as_deref().unwrap_or(""), t.to],
            )
            .map_err(|e| LineageError::Database(format!("failed to save transition: {e}")))?;
        }

        tx.commit()
            .map_err(|e| LineageError::Database(format!("failed to commit: {e}")))?;

        debug!(
            regions = store.len(),
            versions = store.version_count(),
            "saved region archive"
        );
        Ok(())
    }

    /// Rebuild a store from the archive.
    ///
    /// A region whose history cannot be decoded or fails ordering checks is
    /// logged and left out; the rest still load.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] on query failure.
    pub fn load(&self) -> Result<RegionStore, LineageError> {
        let mut store = RegionStore::new();

        let mut stmt = self
            .conn
            .prepare("SELECT id FROM versions ORDER BY ordinal")
            .map_err(|e| LineageError::Database(format!("failed to prepare query: {e}")))?;
        let versions = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| LineageError::Database(format!("failed to load versions: {e}")))?;
        for version in versions {
            let version =
                version.map_err(|e| LineageError::Database(format!("bad version row: {e}")))?;
            store.register_version(&version);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT resource, from_version, to_version FROM transitions")
            .map_err(|e| LineageError::Database(format!("failed to prepare query: {e}")))?;
        let transitions = stmt
            .query_map([], |row| {
                let from: String = row.get(1)?;
                Ok(Transition {
                    resource: row.get(0)?,
                    from: (!from.is_empty()).then_some(from),
                    to: row.get(2)?,
                })
            })
            .map_err(|e| LineageError::Database(format!("failed to load transitions: {e}")))?;
        for transition in transitions {
            let transition = transition
                .map_err(|e| LineageError::Database(format!("bad transition row: {e}")))?;
            store.record_transition(transition);
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, resource, canonical_snippet, first_seen, history_json
                 FROM regions ORDER BY id",
            )
            .map_err(|e| LineageError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| LineageError::Database(format!("failed to load regions: {e}")))?;

        for row in rows {
            let (id, resource, snippet, first_seen, blob) =
                row.map_err(|e| LineageError::Database(format!("bad region row: {e}")))?;
            let restored = decode_history(&blob).and_then(|history| {
                store.restore_region(
                    RegionId::from_hex(id.clone()),
                    resource,
                    snippet,
                    first_seen,
                    history,
                )
            });
            if let Err(e) = restored {
                warn!(region = %id, error = %e, "skipping unreadable region");
            }
        }

        debug!(regions = store.len(), "loaded region archive");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Change;
    use lineage_difflens::identity::region_id;

    fn sample_store() -> RegionStore {
        let mut store = RegionStore::new();
        store.register_version("v1");
        store.register_version("v2");
        let id = region_id("doc", &["a"]);
        store
            .insert_region(
                id.clone(),
                "doc",
                "a",
                "v1",
                RegionHistoryEntry::baseline("v1", vec!["a".into()]),
            )
            .unwrap();
        store
            .append(
                &id,
                RegionHistoryEntry::transition("v1", "v2", Change::Modified {
                    removed: vec!["a".into()],
                    added: vec!["b".into()],
                }),
            )
            .unwrap();
        store.record_transition(Transition::new("doc", None, "v1"));
        store.record_transition(Transition::new("doc", Some("v1"), "v2"));
        store
    }

    #[test]
    fn save_then_load_restores_everything() {
        let archive = RegionArchive::in_memory().unwrap();
        let store = sample_store();
        archive.save(&store).unwrap();

        let loaded = archive.load().unwrap();
        assert_eq!(loaded.versions(), store.versions());
        assert_eq!(loaded.len(), 1);
        let id = region_id("doc", &["a"]);
        assert_eq!(loaded.get(&id), store.get(&id));
        assert!(loaded.has_transition(&Transition::new("doc", None, "v1")));
        assert!(loaded.has_transition(&Transition::new("doc", Some("v1"), "v2")));
    }

    #[test]
    fn saving_twice_does_not_duplicate() {
        let archive = RegionArchive::in_memory().unwrap();
        let store = sample_store();
        archive.save(&store).unwrap();
        archive.save(&store).unwrap();
        assert_eq!(archive.load().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_history_is_skipped() {
        let archive = RegionArchive::in_memory().unwrap();
        archive.save(&sample_store()).unwrap();
        archive
            .conn
            .execute(
                "INSERT INTO regions VALUES ('deadbeef', 'doc', 'x', 'v1', 'not json')",
                [],
            )
            .unwrap();
        let loaded = archive.load().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/regions.db");
        let archive = RegionArchive::open(&path).unwrap();
        archive.save(&sample_store()).unwrap();
        assert!(path.exists());
    }
}
