//! The differential engine (spec §4.5).
//!
//! Compares a freshly fetched manifest against the persisted inventory
//! for the prior revision, emits the full delta stream, and leaves the
//! store holding the new revision's complete inventory. Grounded on the
//! sync-orchestration shape of
//! `examples/hyqhyq3-dsvn/dsvnsync-cli/src/protocol.rs`, adapted from a
//! push/pull replication loop to a manifest/archive diff.

use crate::archive::parse_archive_journal;
use crate::delta::{
    ArchiveEntryDelta, ChangedArchive, CreatedArchive, Delta, DeletedArchive, FileChanged,
    FileCreated, FileDeleted,
};
use crate::error::{CoreError, Result};
use crate::http;
use crate::manifest::{self, Tables};
use crate::model::{ArchiveEntry, ChangeStatus, Revision, VersionedFile};
use crate::notifier::Notifier;
use crate::store::InventoryStore;
use std::collections::HashSet;
use std::sync::Arc;

pub struct DiffEngine {
    store: Arc<InventoryStore>,
    client: reqwest::Client,
    notifier: Arc<dyn Notifier>,
}

impl DiffEngine {
    pub fn new(store: Arc<InventoryStore>, client: reqwest::Client, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, client, notifier }
    }

    pub fn store(&self) -> &Arc<InventoryStore> {
        &self.store
    }

    async fn dispatch(&self, delta: &Delta) -> Result<()> {
        self.notifier.notify_any_file(delta).await?;
        if delta.is_archive() {
            self.notifier.notify_archive_file(delta).await?;
        } else if !matches!(delta, Delta::RevisionAnnounced { .. }) {
            self.notifier.notify_plain_file(delta).await?;
        }
        Ok(())
    }

    /// Run one diff pass for a newly discovered `new_revision`, whose
    /// manifest has already been fetched and parsed into `tables`.
    ///
    /// Requires a prior committed revision (§9's open question); callers
    /// must bootstrap via [`crate::store::InventoryStore::add_revision`]
    /// plus a full ingest before the first call.
    pub async fn run_diff_pass(
        &self,
        tables: &Tables,
        asset_base_url: &str,
        new_revision: &str,
        delete_old_revisions: bool,
    ) -> Result<Vec<Delta>> {
        let old_revision = self
            .store
            .latest_revision()?
            .ok_or_else(|| CoreError::state("no prior revision on record; bootstrap before the first diff pass"))?
            .name;

        let mut deltas = Vec::new();

        self.notifier.notify_revision(new_revision).await?;
        deltas.push(Delta::RevisionAnnounced { revision: new_revision.to_string() });

        self.store.begin()?;
        let result = self
            .run_diff_pass_inner(tables, asset_base_url, &old_revision, new_revision, delete_old_revisions, &mut deltas)
            .await;
        match result {
            Ok(()) => {
                self.store.commit()?;
                Ok(deltas)
            }
            Err(e) => {
                let _ = self.store.rollback();
                Err(e)
            }
        }
    }

    async fn run_diff_pass_inner(
        &self,
        tables: &Tables,
        asset_base_url: &str,
        old_revision: &str,
        new_revision: &str,
        delete_old_revisions: bool,
        deltas: &mut Vec<Delta>,
    ) -> Result<()> {
        let records = manifest::file_records(tables)?;
        let mut seen_names = HashSet::with_capacity(records.len());
        let mut unchanged_archives = Vec::new();

        for record in &records {
            seen_names.insert(record.name.clone());
            let file_url = join_url(asset_base_url, &record.name);
            let (status, old_crc, old_size) =
                self.store.classify_versioned_file(old_revision, &record.name, record.crc, record.size)?;

            if record.name.ends_with(".wad") {
                let (created_entries, changed_entries, deleted_entries) = self
                    .archive_diff(&record.name, &file_url, old_revision, new_revision)
                    .await?;

                match status {
                    ChangeStatus::New => {
                        if !changed_entries.is_empty() || !deleted_entries.is_empty() {
                            return Err(CoreError::state(format!(
                                "newly created archive {} reported non-empty changed/deleted entries",
                                record.name
                            )));
                        }
                        let file = FileCreated {
                            name: record.name.clone(),
                            revision: new_revision.to_string(),
                            url: file_url,
                            new_crc: record.crc,
                            new_size: record.size,
                        };
                        let delta = Delta::CreatedArchive(CreatedArchive {
                            file,
                            created_entries,
                            changed_entries,
                            deleted_entries,
                        });
                        self.dispatch(&delta).await?;
                        deltas.push(delta);
                    }
                    ChangeStatus::Changed => {
                        let file = FileChanged {
                            name: record.name.clone(),
                            revision: new_revision.to_string(),
                            url: file_url,
                            new_crc: record.crc,
                            new_size: record.size,
                            old_crc: old_crc.expect("changed status always carries old_crc"),
                            old_size: old_size.expect("changed status always carries old_size"),
                        };
                        let delta = Delta::ChangedArchive(ChangedArchive {
                            file,
                            created_entries,
                            changed_entries,
                            deleted_entries,
                        });
                        self.dispatch(&delta).await?;
                        deltas.push(delta);
                    }
                    ChangeStatus::Unchanged => {
                        unchanged_archives.push(record.name.clone());
                    }
                }
            } else {
                match status {
                    ChangeStatus::New => {
                        let delta = Delta::FileCreated(FileCreated {
                            name: record.name.clone(),
                            revision: new_revision.to_string(),
                            url: file_url,
                            new_crc: record.crc,
                            new_size: record.size,
                        });
                        self.dispatch(&delta).await?;
                        deltas.push(delta);
                    }
                    ChangeStatus::Changed => {
                        let delta = Delta::FileChanged(FileChanged {
                            name: record.name.clone(),
                            revision: new_revision.to_string(),
                            url: file_url,
                            new_crc: record.crc,
                            new_size: record.size,
                            old_crc: old_crc.expect("changed status always carries old_crc"),
                            old_size: old_size.expect("changed status always carries old_size"),
                        });
                        self.dispatch(&delta).await?;
                        deltas.push(delta);
                    }
                    ChangeStatus::Unchanged => {}
                }
            }

            self.store.add_versioned_file(&VersionedFile {
                crc: record.crc,
                size: record.size,
                revision: new_revision.to_string(),
                name: record.name.clone(),
            })?;
        }

        for archive_name in &unchanged_archives {
            self.store.retag_archive_entries(archive_name, old_revision, new_revision)?;
        }

        let old_files = self.store.all_versioned_files_for(old_revision)?;
        for old_file in old_files {
            if seen_names.contains(&old_file.name) {
                continue;
            }
            let file_url = join_url(asset_base_url, &old_file.name);

            if old_file.name.ends_with(".wad") {
                let old_entries = self.store.all_archive_entries_for(old_revision, &old_file.name)?;
                let deleted_entries = old_entries
                    .into_iter()
                    .map(|e| ArchiveEntryDelta {
                        file_offset: e.file_offset,
                        crc: 0,
                        size: 0,
                        compressed_size: e.compressed_size,
                        is_compressed: e.is_compressed,
                        revision: new_revision.to_string(),
                        name: e.name,
                        archive_name: e.archive_name,
                        old_crc: Some(e.crc),
                        old_size: Some(e.size),
                    })
                    .collect();

                let file = FileDeleted {
                    name: old_file.name.clone(),
                    revision: new_revision.to_string(),
                    url: file_url,
                    old_crc: old_file.crc,
                    old_size: old_file.size,
                };
                let delta = Delta::DeletedArchive(DeletedArchive {
                    file,
                    created_entries: Vec::new(),
                    changed_entries: Vec::new(),
                    deleted_entries,
                });
                self.dispatch(&delta).await?;
                deltas.push(delta);
            } else {
                let delta = Delta::FileDeleted(FileDeleted {
                    name: old_file.name.clone(),
                    revision: new_revision.to_string(),
                    url: file_url,
                    old_crc: old_file.crc,
                    old_size: old_file.size,
                });
                self.dispatch(&delta).await?;
                deltas.push(delta);
            }
        }

        self.store.add_revision(&Revision {
            name: new_revision.to_string(),
            observed_at: chrono::Utc::now().timestamp(),
        })?;

        if delete_old_revisions {
            self.store.delete_revision(old_revision)?;
        }

        Ok(())
    }

    /// Download and decode `archive_name`'s journal, classify each inner
    /// entry against `old_revision`, and return `(created, changed,
    /// deleted)` entry-delta lists. Every entry, regardless of
    /// classification, is written to the store under `new_revision`.
    async fn archive_diff(
        &self,
        archive_name: &str,
        archive_url: &str,
        old_revision: &str,
        new_revision: &str,
    ) -> Result<(Vec<ArchiveEntryDelta>, Vec<ArchiveEntryDelta>, Vec<ArchiveEntryDelta>)> {
        let header_url = format!("{archive_url}.hdr.gz");
        let header_bytes = http::fetch_archive_journal_header(&self.client, &header_url).await?;
        let journal = parse_archive_journal(&header_bytes)?;

        let mut created = Vec::new();
        let mut changed = Vec::new();
        let mut seen_inner_names = HashSet::with_capacity(journal.entries.len());

        for entry in &journal.entries {
            seen_inner_names.insert(entry.name.clone());
            let (status, old_crc, old_size) =
                self.store
                    .classify_archive_entry(old_revision, archive_name, &entry.name, entry.crc, entry.size)?;

            self.store.add_archive_entry(&ArchiveEntry {
                file_offset: entry.file_offset,
                crc: entry.crc,
                size: entry.size,
                compressed_size: entry.compressed_size,
                is_compressed: entry.is_compressed,
                revision: new_revision.to_string(),
                name: entry.name.clone(),
                archive_name: archive_name.to_string(),
            })?;

            match status {
                ChangeStatus::New => created.push(ArchiveEntryDelta {
                    file_offset: entry.file_offset,
                    crc: entry.crc,
                    size: entry.size,
                    compressed_size: entry.compressed_size,
                    is_compressed: entry.is_compressed,
                    revision: new_revision.to_string(),
                    name: entry.name.clone(),
                    archive_name: archive_name.to_string(),
                    old_crc: None,
                    old_size: None,
                }),
                ChangeStatus::Changed => changed.push(ArchiveEntryDelta {
                    file_offset: entry.file_offset,
                    crc: entry.crc,
                    size: entry.size,
                    compressed_size: entry.compressed_size,
                    is_compressed: entry.is_compressed,
                    revision: new_revision.to_string(),
                    name: entry.name.clone(),
                    archive_name: archive_name.to_string(),
                    old_crc,
                    old_size,
                }),
                ChangeStatus::Unchanged => {}
            }
        }

        let old_entries = self.store.all_archive_entries_for(old_revision, archive_name)?;
        let deleted = old_entries
            .into_iter()
            .filter(|e| !seen_inner_names.contains(&e.name))
            .map(|e| ArchiveEntryDelta {
                file_offset: e.file_offset,
                crc: 0,
                size: 0,
                compressed_size: e.compressed_size,
                is_compressed: e.is_compressed,
                revision: new_revision.to_string(),
                name: e.name,
                archive_name: e.archive_name,
                old_crc: Some(e.crc),
                old_size: Some(e.size),
            })
            .collect();

        Ok((created, changed, deleted))
    }
}

fn join_url(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::LoggingNotifier;

    fn engine() -> DiffEngine {
        let store = Arc::new(InventoryStore::open_in_memory().unwrap());
        DiffEngine::new(store, reqwest::Client::new(), Arc::new(LoggingNotifier))
    }

    #[test]
    fn join_url_strips_a_trailing_slash_on_the_base() {
        assert_eq!(join_url("https://cdn.example.com/build/", "Root.wad"), "https://cdn.example.com/build/Root.wad");
        assert_eq!(join_url("https://cdn.example.com/build", "Root.wad"), "https://cdn.example.com/build/Root.wad");
    }

    #[tokio::test]
    async fn diff_pass_without_a_prior_revision_is_a_state_error() {
        let engine = engine();
        let tables: Tables = std::collections::HashMap::new();
        let err = engine
            .run_diff_pass(&tables, "https://cdn.example.com/build", "r1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::State(_)));
    }

    #[tokio::test]
    async fn no_op_tick_against_identical_manifest_produces_no_file_deltas() {
        let engine = engine();
        engine
            .store
            .add_revision(&Revision { name: "r1".into(), observed_at: 0 })
            .unwrap();
        engine
            .store
            .add_versioned_file(&VersionedFile { crc: 1, size: 10, revision: "r1".into(), name: "plain.txt".into() })
            .unwrap();

        let mut records = std::collections::HashMap::new();
        let mut rec = std::collections::HashMap::new();
        rec.insert("SrcFileName".to_string(), manifest::Value::Str("plain.txt".into()));
        rec.insert("CRC".to_string(), manifest::Value::U32(1));
        rec.insert("Size".to_string(), manifest::Value::I64(10));
        records.insert("Data".to_string(), vec![rec]);

        let deltas = engine
            .run_diff_pass(&records, "https://cdn.example.com/build", "r2", false)
            .await
            .unwrap();

        assert_eq!(deltas.len(), 1);
        assert!(matches!(deltas[0], Delta::RevisionAnnounced { .. }));
    }

    #[tokio::test]
    async fn a_new_plain_file_emits_file_created() {
        let engine = engine();
        engine
            .store
            .add_revision(&Revision { name: "r1".into(), observed_at: 0 })
            .unwrap();

        let mut records = std::collections::HashMap::new();
        let mut rec = std::collections::HashMap::new();
        rec.insert("SrcFileName".to_string(), manifest::Value::Str("new.txt".into()));
        rec.insert("CRC".to_string(), manifest::Value::U32(7));
        rec.insert("Size".to_string(), manifest::Value::I64(20));
        records.insert("Data".to_string(), vec![rec]);

        let deltas = engine
            .run_diff_pass(&records, "https://cdn.example.com/build", "r2", false)
            .await
            .unwrap();

        assert_eq!(deltas.len(), 2);
        match &deltas[1] {
            Delta::FileCreated(f) => {
                assert_eq!(f.name, "new.txt");
                assert_eq!(f.new_crc, 7);
                assert_eq!(f.url, "https://cdn.example.com/build/new.txt");
            }
            other => panic!("expected FileCreated, got {other:?}"),
        }

        let inventory = engine.store.all_versioned_files_for("r2").unwrap();
        assert_eq!(inventory.len(), 1);
    }

    #[tokio::test]
    async fn a_deleted_plain_file_emits_file_deleted() {
        let engine = engine();
        engine
            .store
            .add_revision(&Revision { name: "r1".into(), observed_at: 0 })
            .unwrap();
        engine
            .store
            .add_versioned_file(&VersionedFile { crc: 1, size: 10, revision: "r1".into(), name: "gone.txt".into() })
            .unwrap();

        let records: Tables = std::collections::HashMap::new();
        let deltas = engine
            .run_diff_pass(&records, "https://cdn.example.com/build", "r2", false)
            .await
            .unwrap();

        assert_eq!(deltas.len(), 2);
        match &deltas[1] {
            Delta::FileDeleted(f) => assert_eq!(f.name, "gone.txt"),
            other => panic!("expected FileDeleted, got {other:?}"),
        }
    }
}
