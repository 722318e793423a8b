//! Manifest binary/XML decoder (spec §4.2).
//!
//! Decodes the record-oriented manifest into tables of records, each
//! record a mapping of field name to a typed value. Grounded on
//! `examples/original_source/wizdiff/dml_parser.py`.

use crate::error::{CoreError, Result};
use std::collections::HashMap;

pub const META_TABLES: &[&str] = &["_TableList", "About"];

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I64(i64),
    I32(i32),
    U32(u32),
    F32(f32),
    I8(i8),
    U8(u8),
    U16(u16),
    F64(f64),
    Str(String),
    WStr(String),
    I16(i16),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::WStr(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::U32(v) => Some(v),
            Value::I32(v) if v >= 0 => Some(v as u32),
            Value::I64(v) if v >= 0 => Some(v as u32),
            Value::U16(v) => Some(v as u32),
            Value::U8(v) => Some(v as u32),
            _ => None,
        }
    }
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::I64(v) if v >= 0 => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::I32(v) if v >= 0 => Some(v as u64),
            Value::U16(v) => Some(v as u64),
            Value::U8(v) => Some(v as u64),
            _ => None,
        }
    }
}

pub type Record = HashMap<String, Value>;
pub type Tables = HashMap<String, Vec<Record>>;

/// One manifest record reduced to the three fields the diff engine
/// actually consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    pub crc: u32,
    pub size: u64,
}

/// A single template field: declared type index for a named column.
type Template = Vec<(String, u8)>;

struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn is_eof(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn read(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.offset + n;
        if end > self.data.len() {
            return Err(CoreError::protocol("read past end of buffer"));
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.read(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.read(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A u16-length-prefixed UTF-8 string.
    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16_le()? as usize;
        let bytes = self.read(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CoreError::protocol(format!("string is not valid utf-8: {e}")))
    }

    /// A u16-length-prefixed UTF-16LE string.
    fn read_wstring(&mut self) -> Result<String> {
        let len = self.read_u16_le()? as usize;
        let bytes = self.read(len)?;
        if bytes.len() % 2 != 0 {
            return Err(CoreError::protocol("wstring payload has odd byte length"));
        }
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|e| CoreError::protocol(format!("wstring is not valid utf-16: {e}")))
    }

    fn read_typed_value(&mut self, type_index: u8) -> Result<Value> {
        // type_index minus 1 indexes the vendor type table.
        let idx = type_index
            .checked_sub(1)
            .ok_or_else(|| CoreError::protocol("type_index must be >= 1"))?;
        Ok(match idx {
            0 => Value::I64(i64::from_le_bytes(self.read(8)?.try_into().unwrap())),
            1 => Value::I32(i32::from_le_bytes(self.read(4)?.try_into().unwrap())),
            2 => Value::U32(self.read_u32_le()?),
            3 => Value::F32(f32::from_le_bytes(self.read(4)?.try_into().unwrap())),
            4 => Value::I8(self.read_u8()? as i8),
            5 => Value::U8(self.read_u8()?),
            6 => Value::U16(self.read_u16_le()?),
            7 => Value::F64(f64::from_le_bytes(self.read(8)?.try_into().unwrap())),
            8 => Value::Str(self.read_string()?),
            9 => Value::WStr(self.read_wstring()?),
            10 => Value::I16(i16::from_le_bytes(self.read(2)?.try_into().unwrap())),
            other => {
                return Err(CoreError::protocol(format!("unknown type_index {other}")));
            }
        })
    }
}

/// Parse a template payload: `(name, type_index, forty_check)` triples
/// ending with the `_TargetTable` sentinel, followed by 2 reserved
/// bytes and a length-prefixed table name.
fn parse_template(reader: &mut ByteReader) -> Result<(String, Template)> {
    let mut fields = Vec::new();
    loop {
        if reader.is_eof() {
            return Err(CoreError::protocol("template ended without _TargetTable sentinel"));
        }
        let name = reader.read_string()?;
        if name == "_TargetTable" {
            let _reserved = reader.read(2)?;
            let table_name = reader.read_string()?;
            return Ok((table_name, fields));
        }
        let type_index = reader.read_u8()?;
        let forty_check = reader.read_u8()?;
        if forty_check != 0x28 {
            return Err(CoreError::protocol(format!(
                "forty_check was {forty_check:#x}, expected 0x28"
            )));
        }
        fields.push((name, type_index));
    }
}

/// Decode one value record against the most recently seen template.
fn parse_value(reader: &mut ByteReader, template: &Template) -> Result<Record> {
    let mut record = HashMap::with_capacity(template.len());
    for (name, type_index) in template {
        let value = reader.read_typed_value(*type_index)?;
        record.insert(name.clone(), value);
    }
    Ok(record)
}

/// Decode the full binary manifest stream into `table_name -> records`.
pub fn parse_binary_manifest(data: &[u8]) -> Result<Tables> {
    let mut tables: Tables = HashMap::new();
    let mut reader = ByteReader::new(data);
    let mut current: Option<(String, Template)> = None;

    while !reader.is_eof() {
        let record_count = reader.read_u32_le()?;

        for _ in 0..=record_count {
            let marker = reader.read_u8()?;
            if marker != 0x02 {
                return Err(CoreError::protocol(format!(
                    "structure marker was {marker:#x}, expected 0x02"
                )));
            }
            let kind = reader.read_u8()?;
            let payload_len = reader.read_u16_le()? as usize;
            if payload_len < 4 {
                return Err(CoreError::protocol("payload_len shorter than header"));
            }
            let payload = reader.read(payload_len - 4)?;
            let mut payload_reader = ByteReader::new(payload);

            match kind {
                0x01 => {
                    let (table_name, fields) = parse_template(&mut payload_reader)?;
                    tables.entry(table_name.clone()).or_default();
                    current = Some((table_name, fields));
                }
                0x02 => {
                    let (table_name, template) = current
                        .as_ref()
                        .ok_or_else(|| CoreError::state("value record before any template"))?;
                    let record = parse_value(&mut payload_reader, template)?;
                    tables.entry(table_name.clone()).or_default().push(record);
                }
                other => {
                    return Err(CoreError::protocol(format!("unknown structure kind {other}")));
                }
            }
        }
    }

    Ok(tables)
}

/// Decode the XML alternate manifest form (spec §4.2).
///
/// Every child element of the root whose tag is not a meta table
/// contains value records as grandchildren; numeric-looking leaf text
/// is parsed as an integer, otherwise kept as a string. Emitted under a
/// single synthetic table named `records`.
pub fn parse_xml_manifest(data: &[u8]) -> Result<Tables> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut records = Vec::new();
    let mut depth = 0usize;
    let mut skip_child_depth: Option<usize> = None;
    let mut current_record: Option<Record> = None;
    let mut current_field: Option<String> = None;
    let mut current_text = String::new();

    loop {
        buf.clear();
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| CoreError::protocol(format!("xml parse error: {e}")))?
        {
            Event::Start(e) => {
                depth += 1;
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if depth == 2 && META_TABLES.contains(&tag.as_str()) {
                    skip_child_depth = Some(depth);
                } else if depth == 3 && skip_child_depth.is_none() {
                    current_record = Some(HashMap::new());
                } else if depth == 4 && skip_child_depth.is_none() {
                    current_field = Some(tag);
                    current_text.clear();
                }
            }
            Event::Text(t) => {
                if depth == 4 {
                    current_text.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Event::End(_) => {
                if depth == 4 && skip_child_depth.is_none() {
                    if let (Some(field), Some(record)) = (current_field.take(), current_record.as_mut()) {
                        let value = if !current_text.is_empty()
                            && current_text.chars().all(|c| c.is_ascii_digit())
                        {
                            current_text
                                .parse::<i64>()
                                .map(Value::I64)
                                .unwrap_or_else(|_| Value::Str(current_text.clone()))
                        } else {
                            Value::Str(current_text.clone())
                        };
                        record.insert(field, value);
                    }
                }
                if depth == 3 && skip_child_depth.is_none() {
                    if let Some(record) = current_record.take() {
                        records.push(record);
                    }
                }
                if skip_child_depth == Some(depth) {
                    skip_child_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let mut tables = HashMap::new();
    tables.insert("records".to_string(), records);
    Ok(tables)
}

/// Parse either binary or XML manifest bytes, sniffing on the first
/// non-whitespace byte (`<` indicates XML).
pub fn parse_manifest(data: &[u8]) -> Result<Tables> {
    let first_non_ws = data.iter().find(|b| !b.is_ascii_whitespace());
    match first_non_ws {
        Some(b'<') => parse_xml_manifest(data),
        _ => parse_binary_manifest(data),
    }
}

/// Reduce all non-meta tables to the `FileRecord`s the diff engine
/// consumes (`SrcFileName`, `CRC`, `Size`).
pub fn file_records(tables: &Tables) -> Result<Vec<FileRecord>> {
    let mut out = Vec::new();
    for (table_name, records) in tables {
        if META_TABLES.contains(&table_name.as_str()) {
            continue;
        }
        for record in records {
            let name = record
                .get("SrcFileName")
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::protocol("record missing SrcFileName"))?
                .to_string();
            let crc = record
                .get("CRC")
                .and_then(Value::as_u32)
                .ok_or_else(|| CoreError::protocol("record missing CRC"))?;
            let size = record
                .get("Size")
                .and_then(Value::as_u64)
                .ok_or_else(|| CoreError::protocol("record missing Size"))?;
            out.push(FileRecord { name, crc, size });
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a template+values structure for one table with a single
    /// `(SrcFileName: string, CRC: u32, Size: i64)` record, matching
    /// the fields the diff engine consumes.
    fn encode_manifest(table_name: &str, rows: &[(&str, u32, i64)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(rows.len() as u32).to_le_bytes());

        // --- template structure ---
        let mut template_payload = Vec::new();
        push_string(&mut template_payload, "SrcFileName");
        template_payload.push(9); // type_index 9 -> wiz idx 8 -> string
        template_payload.push(0x28);
        push_string(&mut template_payload, "CRC");
        template_payload.push(3); // type_index 3 -> wiz idx 2 -> u32
        template_payload.push(0x28);
        push_string(&mut template_payload, "Size");
        template_payload.push(1); // type_index 1 -> wiz idx 0 -> i64
        template_payload.push(0x28);
        push_string(&mut template_payload, "_TargetTable");
        template_payload.extend_from_slice(&[0u8; 2]);
        push_string(&mut template_payload, table_name);
        push_structure(&mut buf, 0x01, &template_payload);

        // --- value structures ---
        for (name, crc, size) in rows {
            let mut payload = Vec::new();
            push_string(&mut payload, name);
            payload.extend_from_slice(&crc.to_le_bytes());
            payload.extend_from_slice(&size.to_le_bytes());
            push_structure(&mut buf, 0x02, &payload);
        }

        buf
    }

    fn push_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn push_structure(buf: &mut Vec<u8>, kind: u8, payload: &[u8]) {
        buf.push(0x02);
        buf.push(kind);
        buf.extend_from_slice(&((payload.len() + 4) as u16).to_le_bytes());
        buf.extend_from_slice(payload);
    }

    #[test]
    fn round_trips_a_simple_table() {
        let data = encode_manifest("Data", &[("Root.wad", 1, 10), ("other.txt", 2, 20)]);
        let tables = parse_binary_manifest(&data).unwrap();
        let records = file_records(&tables).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Root.wad");
        assert_eq!(records[0].crc, 1);
        assert_eq!(records[0].size, 10);
    }

    #[test]
    fn meta_tables_are_excluded_from_file_records() {
        let data = encode_manifest("_TableList", &[("ignored.wad", 9, 9)]);
        let tables = parse_binary_manifest(&data).unwrap();
        assert!(file_records(&tables).unwrap().is_empty());
    }

    #[test]
    fn bad_forty_check_is_protocol_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        let mut template_payload = Vec::new();
        push_string(&mut template_payload, "Field");
        template_payload.push(3);
        template_payload.push(0x29); // wrong check byte
        push_structure(&mut buf, 0x01, &template_payload);

        let err = parse_binary_manifest(&buf).unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
    }

    #[test]
    fn bad_structure_marker_is_protocol_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(0x03); // wrong marker
        buf.push(0x01);
        buf.extend_from_slice(&4u16.to_le_bytes());
        let err = parse_binary_manifest(&buf).unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
    }

    #[test]
    fn value_before_template_is_state_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        push_structure(&mut buf, 0x02, &[]);
        let err = parse_binary_manifest(&buf).unwrap_err();
        assert!(matches!(err, CoreError::State(_)));
    }

    #[test]
    fn parses_xml_alternate_form() {
        let xml = br#"<Root>
            <_TableList><Row><X>1</X></Row></_TableList>
            <Data>
                <Row>
                    <SrcFileName>Root.wad</SrcFileName>
                    <CRC>5</CRC>
                    <Size>100</Size>
                </Row>
            </Data>
        </Root>"#;
        let tables = parse_xml_manifest(xml).unwrap();
        let records = file_records(&tables).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Root.wad");
        assert_eq!(records[0].crc, 5);
        assert_eq!(records[0].size, 100);
    }

    #[test]
    fn sniffs_xml_vs_binary() {
        let xml = b"  <Root></Root>";
        assert!(matches!(parse_manifest(xml), Ok(_)));
    }

    proptest::proptest! {
        /// Round-trip property from spec §8: encoding a table of
        /// `(name, crc, size)` records and parsing it back yields the
        /// same records bit-for-bit.
        #[test]
        fn round_trips_arbitrary_file_tables(
            rows in proptest::collection::vec(
                (
                    "[A-Za-z0-9_./]{1,24}",
                    proptest::num::u32::ANY,
                    0u64..=1_000_000_000u64,
                ),
                0..16,
            )
        ) {
            let borrowed: Vec<(&str, u32, i64)> =
                rows.iter().map(|(n, c, s)| (n.as_str(), *c, *s as i64)).collect();
            let data = encode_manifest("Data", &borrowed);
            let tables = parse_binary_manifest(&data).unwrap();
            let mut decoded = file_records(&tables).unwrap();
            decoded.sort_by(|a, b| a.name.cmp(&b.name));

            let mut expected: Vec<FileRecord> = rows
                .iter()
                .map(|(name, crc, size)| FileRecord { name: name.clone(), crc: *crc, size: *size })
                .collect();
            expected.sort_by(|a, b| a.name.cmp(&b.name));

            proptest::prop_assert_eq!(decoded, expected);
        }
    }
}
