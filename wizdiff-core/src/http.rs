//! HTTP fetch helpers (spec §4.3, §4.4).
//!
//! Plain GET, ranged GET, and the archive-journal retry policy. Grounded
//! on `examples/hyqhyq3-dsvn/dsvnsync-cli/src/remote.rs`'s client setup
//! and response handling.

use crate::error::{CoreError, Result};
use std::time::Duration;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const ARCHIVE_JOURNAL_RETRY_ATTEMPTS: u32 = 10;
pub const ARCHIVE_JOURNAL_RETRY_BACKOFF: Duration = Duration::from_secs(60);

pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| CoreError::transient(format!("building http client: {e}")))
}

/// Fetch the full body at `url`.
pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| CoreError::transient(format!("GET {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(CoreError::transient(format!(
            "GET {url}: unexpected status {}",
            resp.status()
        )));
    }
    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| CoreError::transient(format!("reading body of {url}: {e}")))
}

/// Fetch `[start, end]` inclusive bytes of `url` via a `Range` header,
/// accepting either a `206 Partial Content` or (when the origin ignores
/// ranges) a full `200 OK` response.
pub async fn fetch_range(client: &reqwest::Client, url: &str, start: u64, end: u64) -> Result<Vec<u8>> {
    let resp = client
        .get(url)
        .header("Range", format!("bytes={start}-{end}"))
        .send()
        .await
        .map_err(|e| CoreError::transient(format!("ranged GET {url}: {e}")))?;

    let status = resp.status();
    if status.as_u16() != 206 && !status.is_success() {
        return Err(CoreError::transient(format!(
            "ranged GET {url}: unexpected status {status}"
        )));
    }

    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| CoreError::transient(format!("reading ranged body of {url}: {e}")))
}

/// Gunzip `data`, tolerating the case where it is already plain (the
/// vendor occasionally serves `.hdr.gz` paths uncompressed).
pub fn maybe_gunzip(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;
    const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
    if data.len() < 2 || data[0..2] != GZIP_MAGIC {
        return Ok(data.to_vec());
    }
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CoreError::protocol(format!("gzip decompression failed: {e}")))?;
    Ok(out)
}

/// Fetch and gunzip the archive journal header at `url`, retrying up to
/// [`ARCHIVE_JOURNAL_RETRY_ATTEMPTS`] times with a fixed
/// [`ARCHIVE_JOURNAL_RETRY_BACKOFF`] between attempts on transient
/// failure. Protocol/validation failures are not retried.
pub async fn fetch_archive_journal_header(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match fetch(client, url).await.and_then(|body| maybe_gunzip(&body)) {
            Ok(data) => return Ok(data),
            Err(CoreError::Transient(msg)) if attempt < ARCHIVE_JOURNAL_RETRY_ATTEMPTS => {
                tracing::warn!(
                    attempt,
                    max = ARCHIVE_JOURNAL_RETRY_ATTEMPTS,
                    url,
                    "fetching archive journal header failed, retrying: {msg}"
                );
                tokio::time::sleep(ARCHIVE_JOURNAL_RETRY_BACKOFF).await;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncompressed_payload_passes_through() {
        let data = b"not gzip at all".to_vec();
        assert_eq!(maybe_gunzip(&data).unwrap(), data);
    }

    #[test]
    fn gzip_payload_is_decompressed() {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello archive journal").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(maybe_gunzip(&compressed).unwrap(), b"hello archive journal");
    }

    #[test]
    fn truncated_gzip_header_is_protocol_error() {
        let data = vec![0x1f, 0x8b, 0x00];
        let err = maybe_gunzip(&data).unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
    }
}
