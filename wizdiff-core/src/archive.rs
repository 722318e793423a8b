//! KIWAD archive journal decoder (spec §4.3).
//!
//! Decodes only the header/journal section of a `.wad` container — the
//! per-entry metadata table — never the file payload bytes themselves.
//! Pure decode; the HTTP fetch and gzip unwrap live in `http.rs`.

use crate::error::{CoreError, Result};

pub const SIGNATURE: &[u8; 5] = b"KIWAD";

/// One entry in an archive's journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub file_offset: i64,
    pub size: u64,
    pub compressed_size: u64,
    pub is_compressed: bool,
    pub crc: u32,
    pub name: String,
}

/// The decoded journal for one `.wad` archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJournal {
    pub version: u32,
    pub entries: Vec<JournalEntry>,
}

struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn read(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.offset + n;
        if end > self.data.len() {
            return Err(CoreError::protocol("archive journal ended unexpectedly"));
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.read(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8(bytes[..end].to_vec())
            .map_err(|e| CoreError::protocol(format!("entry name is not valid utf-8: {e}")))
    }
}

/// Decode a `.wad` journal header (the signature, version, entry count,
/// and the per-entry metadata table).
///
/// For `version >= 2`, one reserved byte follows the entry count in the
/// header; there is no per-entry reserved byte.
pub fn parse_archive_journal(data: &[u8]) -> Result<ArchiveJournal> {
    let mut reader = ByteReader::new(data);

    let signature = reader.read(5)?;
    if signature != SIGNATURE {
        return Err(CoreError::protocol(format!(
            "bad archive signature {signature:?}, expected {SIGNATURE:?}"
        )));
    }

    let version = reader.read_u32_le()?;
    let file_count = reader.read_u32_le()?;

    if version >= 2 {
        let _reserved = reader.read_u8()?;
    }

    let mut entries = Vec::with_capacity(file_count as usize);
    for _ in 0..file_count {
        let file_offset = reader.read_u32_le()? as i64;
        let size = reader.read_u32_le()? as u64;
        let compressed_size = reader.read_u32_le()? as u64;
        let is_compressed = reader.read_u8()? != 0;
        let crc = reader.read_u32_le()?;
        let name_length = reader.read_u32_le()? as usize;
        let name = reader.read_string(name_length)?;

        entries.push(JournalEntry {
            file_offset,
            size,
            compressed_size,
            is_compressed,
            crc,
            name,
        });
    }

    Ok(ArchiveJournal { version, entries })
}
