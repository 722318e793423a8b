//! Persisted data model (spec §3).

use serde::{Deserialize, Serialize};

/// A vendor-assigned opaque tag denoting one published state of the
/// asset catalog. Primary key: `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub name: String,
    /// When this revision was first observed, Unix seconds (UTC).
    pub observed_at: i64,
}

/// Top-level inventory entry. Primary key: `(revision, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedFile {
    pub crc: u32,
    pub size: u64,
    pub revision: String,
    pub name: String,
}

/// Inner entry inside a `.wad` container.
/// Primary key: `(revision, name, archive_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub file_offset: i64,
    pub crc: u32,
    pub size: u64,
    pub compressed_size: u64,
    pub is_compressed: bool,
    pub revision: String,
    pub name: String,
    pub archive_name: String,
}

/// Result of classifying a (crc, size) pair against prior inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    New,
    Unchanged,
    Changed,
}

impl VersionedFile {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.name.is_empty() {
            return Err(crate::error::CoreError::validation("VersionedFile name must not be empty"));
        }
        Ok(())
    }
}

impl ArchiveEntry {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.name.is_empty() {
            return Err(crate::error::CoreError::validation("ArchiveEntry name must not be empty"));
        }
        if self.archive_name.is_empty() {
            return Err(crate::error::CoreError::validation("ArchiveEntry archive_name must not be empty"));
        }
        if self.file_offset < 0 {
            return Err(crate::error::CoreError::validation("ArchiveEntry file_offset must not be negative"));
        }
        Ok(())
    }
}
