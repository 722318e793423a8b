//! The poll loop and revision state machine (spec §4.5, §4.6).
//!
//! Grounded on the poll/backoff shape of
//! `examples/hyqhyq3-dsvn/dsvn-core/src/sync.rs`'s `SyncState`, adapted
//! from replication cursor tracking to revision-tag discovery.

use crate::diff::DiffEngine;
use crate::error::{CoreError, Result};
use crate::http;
use crate::manifest;
use crate::patch_directory::PatchDirectory;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

fn revision_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"WizPatcher/([^/]+)").expect("static regex is valid"))
}

/// Extract the revision tag from a manifest URL's path (spec §6).
pub fn extract_revision_tag(manifest_url: &str) -> Result<String> {
    revision_tag_pattern()
        .captures(manifest_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| CoreError::protocol(format!("no WizPatcher/<tag> segment found in {manifest_url}")))
}

/// The outcome of one lifecycle tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// The advertised revision had already been committed; nothing ran.
    NoOp { revision: String },
    /// A diff pass ran and produced the given deltas.
    DiffRan { revision: String, deltas: Vec<crate::delta::Delta> },
}

pub struct Lifecycle {
    directory: PatchDirectory,
    client: reqwest::Client,
    engine: DiffEngine,
    delete_old_revisions: bool,
}

impl Lifecycle {
    pub fn new(
        directory: PatchDirectory,
        client: reqwest::Client,
        engine: DiffEngine,
        delete_old_revisions: bool,
    ) -> Self {
        Self { directory, client, engine, delete_old_revisions }
    }

    /// Run a single tick: resolve the current directory state, and
    /// either no-op or run a diff pass, per §4.5.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let (manifest_url, asset_base_url) = self.directory.get_patch_urls().await?;
        let revision_tag = extract_revision_tag(&manifest_url)?;

        if self.engine.store().has_revision(&revision_tag)? {
            return Ok(TickOutcome::NoOp { revision: revision_tag });
        }

        let manifest_bytes = http::fetch(&self.client, &manifest_url).await?;
        let tables = manifest::parse_manifest(&manifest_bytes)?;

        let deltas = self
            .engine
            .run_diff_pass(&tables, &asset_base_url, &revision_tag, self.delete_old_revisions)
            .await?;

        Ok(TickOutcome::DiffRan { revision: revision_tag, deltas })
    }

    /// Run ticks forever, sleeping `sleep_time` between them regardless
    /// of outcome. Logs and continues on any error rather than exiting
    /// the loop, per §7's propagation rule ("the poll loop logs and
    /// waits `sleep_time` before the next tick").
    pub async fn run_forever(&self, sleep_time: Duration) -> ! {
        loop {
            match self.tick().await {
                Ok(TickOutcome::NoOp { revision }) => {
                    tracing::debug!(revision, "no new revision");
                }
                Ok(TickOutcome::DiffRan { revision, deltas }) => {
                    tracing::info!(revision, delta_count = deltas.len(), "diff pass complete");
                }
                Err(e) => {
                    tracing::error!(error = %e, "tick failed, resuming on next tick");
                }
            }
            tokio::time::sleep(sleep_time).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tag_from_a_realistic_manifest_url() {
        let url = "https://cdn.example.com/WizPatcher/V_r777.Wizard_1_640/LatestFileList.bin";
        assert_eq!(extract_revision_tag(url).unwrap(), "V_r777.Wizard_1_640");
    }

    #[test]
    fn missing_tag_is_a_protocol_error() {
        let url = "https://cdn.example.com/NotTheRightPath/LatestFileList.bin";
        let err = extract_revision_tag(url).unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
    }

    #[test]
    fn stops_at_the_first_following_slash() {
        let url = "https://cdn.example.com/WizPatcher/V_r1/extra/LatestFileList.bin";
        assert_eq!(extract_revision_tag(url).unwrap(), "V_r1");
    }
}
