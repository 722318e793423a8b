//! Sqlite-backed inventory store (spec §3, §9).
//!
//! Grounded on `examples/hyqhyq3-dsvn/dsvn-core/src/sqlite_repository.rs`'s
//! WAL-mode pragma set and `Mutex<Connection>` pattern. Unlike the
//! teacher, there is no content-addressed object tree here — everything
//! the diff engine needs lives in three plain tables.

use crate::error::{CoreError, Result};
use crate::model::{ArchiveEntry, ChangeStatus, Revision, VersionedFile};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Turn a unique-constraint violation into a `ValidationError` (a second
/// insert at the same primary key is a programming error, not a silent
/// upsert); propagate every other rusqlite error unchanged.
fn insert_or_validation_error(result: rusqlite::Result<usize>, what: &str) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(CoreError::validation(format!("{what} already has a row for this primary key")))
        }
        Err(e) => Err(CoreError::from(e)),
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "OFF")?;
    conn.pragma_update(None, "cache_size", "-64000")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", "268435456")?;
    conn.pragma_update(None, "page_size", "4096")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS revisions (
            name TEXT PRIMARY KEY,
            observed_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS versioned_files (
            revision TEXT NOT NULL,
            name TEXT NOT NULL,
            crc INTEGER NOT NULL,
            size INTEGER NOT NULL,
            PRIMARY KEY (revision, name)
        );
        CREATE INDEX IF NOT EXISTS versioned_files_by_name ON versioned_files (name);
        CREATE TABLE IF NOT EXISTS archive_entries (
            revision TEXT NOT NULL,
            name TEXT NOT NULL,
            archive_name TEXT NOT NULL,
            file_offset INTEGER NOT NULL,
            crc INTEGER NOT NULL,
            size INTEGER NOT NULL,
            compressed_size INTEGER NOT NULL,
            is_compressed INTEGER NOT NULL,
            PRIMARY KEY (revision, name, archive_name)
        );
        CREATE INDEX IF NOT EXISTS archive_entries_by_archive ON archive_entries (archive_name, name);",
    )?;
    Ok(conn)
}

/// The persisted catalog inventory: revisions, top-level files, and
/// archive entries, keyed by revision.
pub struct InventoryStore {
    conn: Mutex<Connection>,
}

impl InventoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS revisions (name TEXT PRIMARY KEY, observed_at INTEGER NOT NULL);
            CREATE TABLE IF NOT EXISTS versioned_files (revision TEXT NOT NULL, name TEXT NOT NULL, crc INTEGER NOT NULL, size INTEGER NOT NULL, PRIMARY KEY (revision, name));
            CREATE TABLE IF NOT EXISTS archive_entries (revision TEXT NOT NULL, name TEXT NOT NULL, archive_name TEXT NOT NULL, file_offset INTEGER NOT NULL, crc INTEGER NOT NULL, size INTEGER NOT NULL, compressed_size INTEGER NOT NULL, is_compressed INTEGER NOT NULL, PRIMARY KEY (revision, name, archive_name));",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("inventory store mutex poisoned")
    }

    // -------------------- revisions --------------------

    pub fn add_revision(&self, revision: &Revision) -> Result<()> {
        self.conn().execute(
            "INSERT INTO revisions (name, observed_at) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![revision.name, revision.observed_at],
        )?;
        Ok(())
    }

    pub fn delete_revision(&self, name: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM revisions WHERE name = ?1", params![name])?;
        conn.execute("DELETE FROM versioned_files WHERE revision = ?1", params![name])?;
        conn.execute("DELETE FROM archive_entries WHERE revision = ?1", params![name])?;
        Ok(())
    }

    pub fn has_revision(&self, name: &str) -> Result<bool> {
        let exists: Option<i64> = self
            .conn()
            .query_row("SELECT 1 FROM revisions WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?;
        Ok(exists.is_some())
    }

    /// The most recently observed revision, if any.
    pub fn latest_revision(&self) -> Result<Option<Revision>> {
        self.conn()
            .query_row(
                "SELECT name, observed_at FROM revisions ORDER BY observed_at DESC LIMIT 1",
                [],
                |row| {
                    Ok(Revision {
                        name: row.get(0)?,
                        observed_at: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(CoreError::from)
    }

    // -------------------- versioned files --------------------

    pub fn add_versioned_file(&self, file: &VersionedFile) -> Result<()> {
        file.validate()?;
        let result = self.conn().execute(
            "INSERT INTO versioned_files (revision, name, crc, size) VALUES (?1, ?2, ?3, ?4)",
            params![file.revision, file.name, file.crc, file.size as i64],
        );
        insert_or_validation_error(result, "versioned_files")
    }

    pub fn delete_versioned_files_for(&self, revision: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM versioned_files WHERE revision = ?1", params![revision])?;
        Ok(())
    }

    pub fn all_versioned_files_for(&self, revision: &str) -> Result<Vec<VersionedFile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT crc, size, revision, name FROM versioned_files WHERE revision = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![revision], |row| {
            Ok(VersionedFile {
                crc: row.get(0)?,
                size: row.get::<_, i64>(1)? as u64,
                revision: row.get(2)?,
                name: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(CoreError::from)
    }

    /// Classify `(crc, size)` for `name` against the most recent prior
    /// revision that isn't `revision` itself.
    pub fn classify_versioned_file(
        &self,
        prior_revision: &str,
        name: &str,
        crc: u32,
        size: u64,
    ) -> Result<(ChangeStatus, Option<u32>, Option<u64>)> {
        let conn = self.conn();
        let prior: Option<(u32, i64)> = conn
            .query_row(
                "SELECT crc, size FROM versioned_files WHERE revision = ?1 AND name = ?2",
                params![prior_revision, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match prior {
            None => (ChangeStatus::New, None, None),
            Some((old_crc, old_size)) => {
                let old_size = old_size as u64;
                if old_crc == crc && old_size == size {
                    (ChangeStatus::Unchanged, Some(old_crc), Some(old_size))
                } else {
                    (ChangeStatus::Changed, Some(old_crc), Some(old_size))
                }
            }
        })
    }

    // -------------------- archive entries --------------------

    pub fn add_archive_entry(&self, entry: &ArchiveEntry) -> Result<()> {
        entry.validate()?;
        let result = self.conn().execute(
            "INSERT INTO archive_entries
                (revision, name, archive_name, file_offset, crc, size, compressed_size, is_compressed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.revision,
                entry.name,
                entry.archive_name,
                entry.file_offset,
                entry.crc,
                entry.size as i64,
                entry.compressed_size as i64,
                entry.is_compressed,
            ],
        );
        insert_or_validation_error(result, "archive_entries")
    }

    /// Re-tag every entry belonging to `archive_name` at `from_revision`
    /// as belonging to `to_revision`, used when an archive's top-level
    /// container is unchanged across a new revision so its entries carry
    /// forward without being re-parsed.
    ///
    /// Uses a prepared statement rather than a string-concatenated
    /// `IN (...)` clause. Callers bracket a whole diff pass with
    /// [`Self::begin`]/[`Self::commit`], so this does not open its own
    /// nested transaction.
    pub fn retag_archive_entries(&self, archive_name: &str, from_revision: &str, to_revision: &str) -> Result<()> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO archive_entries
                (revision, name, archive_name, file_offset, crc, size, compressed_size, is_compressed)
             SELECT ?1, name, archive_name, file_offset, crc, size, compressed_size, is_compressed
             FROM archive_entries WHERE archive_name = ?2 AND revision = ?3
             ON CONFLICT(revision, name, archive_name) DO NOTHING",
        )?;
        stmt.execute(params![to_revision, archive_name, from_revision])?;
        Ok(())
    }

    /// Open an explicit transaction bracketing one diff pass.
    pub fn begin(&self) -> Result<()> {
        self.conn().execute_batch("BEGIN")?;
        Ok(())
    }

    /// Commit the transaction opened by [`Self::begin`].
    pub fn commit(&self) -> Result<()> {
        self.conn().execute_batch("COMMIT")?;
        Ok(())
    }

    /// Roll back the transaction opened by [`Self::begin`].
    pub fn rollback(&self) -> Result<()> {
        self.conn().execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn delete_archive_entries_for(&self, revision: &str, archive_name: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM archive_entries WHERE revision = ?1 AND archive_name = ?2",
            params![revision, archive_name],
        )?;
        Ok(())
    }

    pub fn all_archive_entries_for(&self, revision: &str, archive_name: &str) -> Result<Vec<ArchiveEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT file_offset, crc, size, compressed_size, is_compressed, revision, name, archive_name
             FROM archive_entries WHERE revision = ?1 AND archive_name = ?2 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![revision, archive_name], |row| {
            Ok(ArchiveEntry {
                file_offset: row.get(0)?,
                crc: row.get(1)?,
                size: row.get::<_, i64>(2)? as u64,
                compressed_size: row.get::<_, i64>(3)? as u64,
                is_compressed: row.get(4)?,
                revision: row.get(5)?,
                name: row.get(6)?,
                archive_name: row.get(7)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(CoreError::from)
    }

    /// Classify one archive entry against the prior revision's copy of
    /// the same `(archive_name, name)` pair.
    pub fn classify_archive_entry(
        &self,
        prior_revision: &str,
        archive_name: &str,
        name: &str,
        crc: u32,
        size: u64,
    ) -> Result<(ChangeStatus, Option<u32>, Option<u64>)> {
        let conn = self.conn();
        let prior: Option<(u32, i64)> = conn
            .query_row(
                "SELECT crc, size FROM archive_entries WHERE revision = ?1 AND archive_name = ?2 AND name = ?3",
                params![prior_revision, archive_name, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match prior {
            None => (ChangeStatus::New, None, None),
            Some((old_crc, old_size)) => {
                let old_size = old_size as u64;
                if old_crc == crc && old_size == size {
                    (ChangeStatus::Unchanged, Some(old_crc), Some(old_size))
                } else {
                    (ChangeStatus::Changed, Some(old_crc), Some(old_size))
                }
            }
        })
    }

    /// Force a WAL checkpoint; useful before a process exit so the
    /// sidecar `-wal` file is merged back into the main database file.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn()
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    pub fn vacuum(&self) -> Result<()> {
        self.conn().execute_batch("VACUUM;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision(name: &str) -> Revision {
        Revision { name: name.to_string(), observed_at: 1000 }
    }

    fn versioned_file(revision: &str, name: &str, crc: u32, size: u64) -> VersionedFile {
        VersionedFile { crc, size, revision: revision.to_string(), name: name.to_string() }
    }

    fn archive_entry(revision: &str, archive_name: &str, name: &str, crc: u32, size: u64) -> ArchiveEntry {
        ArchiveEntry {
            file_offset: 0,
            crc,
            size,
            compressed_size: size,
            is_compressed: false,
            revision: revision.to_string(),
            name: name.to_string(),
            archive_name: archive_name.to_string(),
        }
    }

    #[test]
    fn revision_round_trips() {
        let store = InventoryStore::open_in_memory().unwrap();
        assert!(!store.has_revision("r1").unwrap());
        store.add_revision(&revision("r1")).unwrap();
        assert!(store.has_revision("r1").unwrap());
        assert_eq!(store.latest_revision().unwrap().unwrap().name, "r1");
    }

    #[test]
    fn latest_revision_picks_most_recently_observed() {
        let store = InventoryStore::open_in_memory().unwrap();
        store.add_revision(&Revision { name: "old".into(), observed_at: 10 }).unwrap();
        store.add_revision(&Revision { name: "new".into(), observed_at: 20 }).unwrap();
        assert_eq!(store.latest_revision().unwrap().unwrap().name, "new");
    }

    #[test]
    fn classify_versioned_file_detects_new_unchanged_and_changed() {
        let store = InventoryStore::open_in_memory().unwrap();
        store.add_versioned_file(&versioned_file("r1", "Root.wad", 1, 100)).unwrap();

        let (status, old_crc, old_size) = store.classify_versioned_file("r1", "NewFile.wad", 2, 50).unwrap();
        assert_eq!(status, ChangeStatus::New);
        assert_eq!(old_crc, None);
        assert_eq!(old_size, None);

        let (status, old_crc, old_size) = store.classify_versioned_file("r1", "Root.wad", 1, 100).unwrap();
        assert_eq!(status, ChangeStatus::Unchanged);
        assert_eq!(old_crc, Some(1));
        assert_eq!(old_size, Some(100));

        let (status, ..) = store.classify_versioned_file("r1", "Root.wad", 9, 100).unwrap();
        assert_eq!(status, ChangeStatus::Changed);
    }

    #[test]
    fn deleting_a_revision_cascades_to_child_rows() {
        let store = InventoryStore::open_in_memory().unwrap();
        store.add_revision(&revision("r1")).unwrap();
        store.add_versioned_file(&versioned_file("r1", "a.wad", 1, 1)).unwrap();
        store.add_archive_entry(&archive_entry("r1", "a.wad", "inner.xml", 1, 1)).unwrap();

        store.delete_revision("r1").unwrap();

        assert!(!store.has_revision("r1").unwrap());
        assert!(store.all_versioned_files_for("r1").unwrap().is_empty());
        assert!(store.all_archive_entries_for("r1", "a.wad").unwrap().is_empty());
    }

    #[test]
    fn retag_archive_entries_carries_entries_to_new_revision() {
        let store = InventoryStore::open_in_memory().unwrap();
        store.add_archive_entry(&archive_entry("r1", "a.wad", "inner.xml", 1, 10)).unwrap();
        store.add_archive_entry(&archive_entry("r1", "a.wad", "inner2.xml", 2, 20)).unwrap();

        store.retag_archive_entries("a.wad", "r1", "r2").unwrap();

        let entries = store.all_archive_entries_for("r2", "a.wad").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.name == "inner.xml" && e.revision == "r2"));
    }

    #[test]
    fn classify_archive_entry_detects_new_unchanged_and_changed() {
        let store = InventoryStore::open_in_memory().unwrap();
        store.add_archive_entry(&archive_entry("r1", "a.wad", "inner.xml", 5, 50)).unwrap();

        let (status, ..) = store.classify_archive_entry("r1", "a.wad", "missing.xml", 1, 1).unwrap();
        assert_eq!(status, ChangeStatus::New);

        let (status, ..) = store.classify_archive_entry("r1", "a.wad", "inner.xml", 5, 50).unwrap();
        assert_eq!(status, ChangeStatus::Unchanged);

        let (status, ..) = store.classify_archive_entry("r1", "a.wad", "inner.xml", 6, 50).unwrap();
        assert_eq!(status, ChangeStatus::Changed);
    }

    #[test]
    fn rejects_archive_entry_with_empty_name() {
        let store = InventoryStore::open_in_memory().unwrap();
        let bad = archive_entry("r1", "a.wad", "", 1, 1);
        let err = store.add_archive_entry(&bad).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn duplicate_versioned_file_is_a_validation_error_not_a_silent_upsert() {
        let store = InventoryStore::open_in_memory().unwrap();
        store.add_versioned_file(&versioned_file("r1", "Root.wad", 1, 100)).unwrap();
        let err = store.add_versioned_file(&versioned_file("r1", "Root.wad", 2, 200)).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let (status, old_crc, old_size) = store.classify_versioned_file("r1", "Root.wad", 1, 100).unwrap();
        assert_eq!(status, ChangeStatus::Unchanged);
        assert_eq!(old_crc, Some(1));
        assert_eq!(old_size, Some(100));
    }

    #[test]
    fn duplicate_archive_entry_is_a_validation_error_not_a_silent_upsert() {
        let store = InventoryStore::open_in_memory().unwrap();
        store.add_archive_entry(&archive_entry("r1", "a.wad", "inner.xml", 1, 10)).unwrap();
        let err = store.add_archive_entry(&archive_entry("r1", "a.wad", "inner.xml", 2, 20)).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
