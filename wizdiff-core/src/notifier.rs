//! The notification sink trait (spec §4.6, §9).
//!
//! Grounded on `examples/original_source/wizdiff/update_notifier.py`'s
//! `UpdateNotifier` base class, whose four overridable hooks become one
//! async trait with default no-op bodies so implementors only need to
//! override the events they care about.

use crate::delta::Delta;
use crate::error::Result;
use async_trait::async_trait;

/// Receives the events the diff engine emits for one revision pass.
///
/// All methods default to doing nothing, mirroring the Python base
/// class's pass-bodied hooks; a concrete notifier overrides only the
/// ones it cares about.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called once per pass, before any file-level events, whenever a
    /// new revision is discovered.
    async fn notify_revision(&self, revision: &str) -> Result<()> {
        let _ = revision;
        Ok(())
    }

    /// Called for every delta, regardless of kind, in emission order.
    /// Runs before the kind-specific hook below.
    async fn notify_any_file(&self, delta: &Delta) -> Result<()> {
        let _ = delta;
        Ok(())
    }

    /// Called for top-level file deltas (`FileCreated`/`FileChanged`/
    /// `FileDeleted`) that are not archives.
    async fn notify_plain_file(&self, delta: &Delta) -> Result<()> {
        let _ = delta;
        Ok(())
    }

    /// Called for archive deltas (`CreatedArchive`/`ChangedArchive`/
    /// `DeletedArchive`).
    async fn notify_archive_file(&self, delta: &Delta) -> Result<()> {
        let _ = delta;
        Ok(())
    }
}

/// A notifier that logs every event via `tracing` and otherwise does
/// nothing; useful as a default and in tests.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify_revision(&self, revision: &str) -> Result<()> {
        tracing::info!(revision, "new revision discovered");
        Ok(())
    }

    async fn notify_any_file(&self, delta: &Delta) -> Result<()> {
        tracing::debug!(?delta, "delta observed");
        Ok(())
    }
}
