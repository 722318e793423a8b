//! Typed delta events emitted by the diff engine (spec §3, §9).
//!
//! Modeled as a sealed discriminated union rather than the source's
//! inheritance tree: the archive-bearing variants are distinct structs,
//! not subclasses of the plain-file variants.

use serde::{Deserialize, Serialize};

/// One inner-entry change nested inside an archive delta.
///
/// `old_crc`/`old_size` are both absent for a created entry, both
/// present for a changed or deleted entry; for a deleted entry the new
/// `crc`/`size` are set to zero to signify "no new state".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntryDelta {
    pub file_offset: i64,
    pub crc: u32,
    pub size: u64,
    pub compressed_size: u64,
    pub is_compressed: bool,
    pub revision: String,
    pub name: String,
    pub archive_name: String,
    pub old_crc: Option<u32>,
    pub old_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCreated {
    pub name: String,
    pub revision: String,
    pub url: String,
    pub new_crc: u32,
    pub new_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChanged {
    pub name: String,
    pub revision: String,
    pub url: String,
    pub new_crc: u32,
    pub new_size: u64,
    pub old_crc: u32,
    pub old_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDeleted {
    pub name: String,
    pub revision: String,
    pub url: String,
    pub old_crc: u32,
    pub old_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedArchive {
    pub file: FileCreated,
    pub created_entries: Vec<ArchiveEntryDelta>,
    pub changed_entries: Vec<ArchiveEntryDelta>,
    pub deleted_entries: Vec<ArchiveEntryDelta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedArchive {
    pub file: FileChanged,
    pub created_entries: Vec<ArchiveEntryDelta>,
    pub changed_entries: Vec<ArchiveEntryDelta>,
    pub deleted_entries: Vec<ArchiveEntryDelta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedArchive {
    pub file: FileDeleted,
    pub created_entries: Vec<ArchiveEntryDelta>,
    pub changed_entries: Vec<ArchiveEntryDelta>,
    pub deleted_entries: Vec<ArchiveEntryDelta>,
}

/// A typed description of a detected change, emitted by the diff engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delta {
    RevisionAnnounced { revision: String },
    FileCreated(FileCreated),
    FileChanged(FileChanged),
    FileDeleted(FileDeleted),
    CreatedArchive(CreatedArchive),
    ChangedArchive(ChangedArchive),
    DeletedArchive(DeletedArchive),
}

impl Delta {
    /// True for the three archive-bearing super-variants.
    pub fn is_archive(&self) -> bool {
        matches!(
            self,
            Delta::CreatedArchive(_) | Delta::ChangedArchive(_) | Delta::DeletedArchive(_)
        )
    }

    /// The top-level file name this delta concerns, if any
    /// (`RevisionAnnounced` carries no file name).
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Delta::RevisionAnnounced { .. } => None,
            Delta::FileCreated(f) => Some(&f.name),
            Delta::FileChanged(f) => Some(&f.name),
            Delta::FileDeleted(f) => Some(&f.name),
            Delta::CreatedArchive(a) => Some(&a.file.name),
            Delta::ChangedArchive(a) => Some(&a.file.name),
            Delta::DeletedArchive(a) => Some(&a.file.name),
        }
    }
}
