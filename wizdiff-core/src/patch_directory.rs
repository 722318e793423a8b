//! Patch-discovery protocol client (spec §4.1, §6).
//!
//! Speaks a tiny binary handshake over a raw TCP socket against the
//! vendor's directory endpoint and returns the two HTTPS URLs it
//! advertises: the manifest URL and the asset base URL.

use crate::error::{CoreError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const DEFAULT_HOST: &str = "patch.us.wizard101.com";
pub const DEFAULT_PORT: u16 = 12500;

const PROBE: [u8; 40] = {
    let mut buf = [0u8; 40];
    buf[0] = 0x0D;
    buf[1] = 0xF0;
    buf[2] = 0x24;
    buf[3] = 0x00;
    buf[4] = 0x00;
    buf[5] = 0x00;
    buf[6] = 0x00;
    buf[7] = 0x00;
    buf[8] = 0x08;
    buf[9] = 0x01;
    buf[10] = 0x20;
    buf
};

/// Speaks the binary directory handshake and extracts the two URLs.
pub struct PatchDirectory {
    host: String,
    port: u16,
}

impl PatchDirectory {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn default_directory() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }

    /// Open a TCP connection, perform the handshake, and return
    /// `(manifest_url, asset_base_url)`.
    pub async fn get_patch_urls(&self) -> Result<(String, String)> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| CoreError::transient(format!("connecting to {}:{}: {e}", self.host, self.port)))?;

        stream
            .write_all(&PROBE)
            .await
            .map_err(|e| CoreError::transient(format!("writing probe: {e}")))?;

        // First response frame is a session offer we discard.
        let mut discard = vec![0u8; 4096];
        let _ = stream
            .read(&mut discard)
            .await
            .map_err(|e| CoreError::transient(format!("reading session offer: {e}")))?;

        // Second response frame carries the URL payload.
        let mut buf = vec![0u8; 4096];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| CoreError::transient(format!("reading url frame: {e}")))?;
        buf.truncate(n);

        parse_url_frame(&buf)
    }
}

/// Decode the manifest/asset URLs out of a directory response frame.
///
/// Each URL appears as ASCII `http…` text preceded immediately by a
/// little-endian unsigned 16-bit length prefix. The first occurrence
/// of `http` locates the manifest URL; the last occurrence locates the
/// asset base URL.
pub fn parse_url_frame(data: &[u8]) -> Result<(String, String)> {
    let first = find_bytes(data, b"http").ok_or_else(|| {
        CoreError::protocol("no 'http' marker found in directory response")
    })?;
    let last = rfind_bytes(data, b"http").ok_or_else(|| {
        CoreError::protocol("no 'http' marker found in directory response")
    })?;

    let manifest_url = read_length_prefixed_url(data, first)?;
    let asset_base_url = read_length_prefixed_url(data, last)?;
    Ok((manifest_url, asset_base_url))
}

fn read_length_prefixed_url(data: &[u8], marker_start: usize) -> Result<String> {
    if marker_start < 2 {
        return Err(CoreError::protocol("length prefix would underrun buffer"));
    }
    let len_bytes = &data[marker_start - 2..marker_start];
    let length = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;

    let end = marker_start
        .checked_add(length)
        .ok_or_else(|| CoreError::protocol("url length overflow"))?;
    if end > data.len() {
        return Err(CoreError::protocol("length prefix would overrun buffer"));
    }

    std::str::from_utf8(&data[marker_start..end])
        .map(|s| s.to_string())
        .map_err(|e| CoreError::protocol(format!("url span is not valid utf-8: {e}")))
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
