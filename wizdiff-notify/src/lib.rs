//! Discord-style webhook notifier.
//!
//! Grounded on `examples/original_source/wizdiff/update_notifier.py`'s
//! `WebhookUpdateNotifier`: one human-readable message per delta, posted
//! as `{"content": ...}` JSON, optionally scoped to a thread via a query
//! parameter.

use async_trait::async_trait;
use wizdiff_core::{CoreError, Delta, Notifier, Result};

/// Posts one human-readable message per event to a Discord-compatible
/// webhook URL.
pub struct WebhookNotifier {
    webhook_url: String,
    thread_id: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            thread_id,
            client: reqwest::Client::new(),
        }
    }

    async fn send(&self, content: String) -> Result<()> {
        let mut request = self.client.post(&self.webhook_url).json(&serde_json::json!({ "content": content }));
        if let Some(thread_id) = &self.thread_id {
            request = request.query(&[("thread_id", thread_id.as_str())]);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| CoreError::transient(format!("posting to webhook: {e}")))?;
        if !resp.status().is_success() {
            return Err(CoreError::transient(format!(
                "webhook returned unexpected status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

fn archive_summary(label: &str, created: usize, changed: usize, deleted: usize) -> String {
    format!("{label} ({created} created, {changed} changed, {deleted} deleted entries)")
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_revision(&self, revision: &str) -> Result<()> {
        self.send(format!("New revision {revision} found")).await
    }

    async fn notify_plain_file(&self, delta: &Delta) -> Result<()> {
        let message = match delta {
            Delta::FileCreated(f) => format!("New file {} found; download at: {}", f.name, f.url),
            Delta::FileChanged(f) => {
                let size_note = if f.old_size > f.new_size {
                    format!("{} bytes smaller", f.old_size - f.new_size)
                } else if f.old_size < f.new_size {
                    format!("{} bytes larger", f.new_size - f.old_size)
                } else {
                    "size unchanged (new crc)".to_string()
                };
                format!("Changed file {} found; {}; download at {}", f.name, size_note, f.url)
            }
            Delta::FileDeleted(f) => format!("File {} was deleted", f.name),
            other => return Err(CoreError::state(format!("notify_plain_file called with archive delta {other:?}"))),
        };
        self.send(message).await
    }

    async fn notify_archive_file(&self, delta: &Delta) -> Result<()> {
        let message = match delta {
            Delta::CreatedArchive(a) => format!(
                "New archive {} found; download at: {}; {}",
                a.file.name,
                a.file.url,
                archive_summary("contents", a.created_entries.len(), a.changed_entries.len(), a.deleted_entries.len())
            ),
            Delta::ChangedArchive(a) => format!(
                "Changed archive {} found; download at {}; {}",
                a.file.name,
                a.file.url,
                archive_summary("contents", a.created_entries.len(), a.changed_entries.len(), a.deleted_entries.len())
            ),
            Delta::DeletedArchive(a) => format!(
                "Archive {} was deleted; {}",
                a.file.name,
                archive_summary("it carried", a.created_entries.len(), a.changed_entries.len(), a.deleted_entries.len())
            ),
            other => return Err(CoreError::state(format!("notify_archive_file called with non-archive delta {other:?}"))),
        };
        self.send(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wizdiff_core::{FileChanged, FileCreated, FileDeleted};

    #[test]
    fn archive_summary_formats_counts() {
        assert_eq!(archive_summary("contents", 1, 2, 3), "contents (1 created, 2 changed, 3 deleted entries)");
    }

    #[tokio::test]
    async fn notify_plain_file_rejects_archive_deltas() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:0/webhook", None);
        let delta = Delta::CreatedArchive(wizdiff_core::CreatedArchive {
            file: FileCreated { name: "a.wad".into(), revision: "r1".into(), url: "u".into(), new_crc: 1, new_size: 1 },
            created_entries: vec![],
            changed_entries: vec![],
            deleted_entries: vec![],
        });
        let err = notifier.notify_plain_file(&delta).await.unwrap_err();
        assert!(matches!(err, CoreError::State(_)));
    }

    #[test]
    fn file_changed_and_deleted_variants_construct() {
        let _ = FileChanged {
            name: "a".into(),
            revision: "r".into(),
            url: "u".into(),
            new_crc: 1,
            new_size: 2,
            old_crc: 3,
            old_size: 4,
        };
        let _ = FileDeleted { name: "a".into(), revision: "r".into(), url: "u".into(), old_crc: 1, old_size: 2 };
    }
}
