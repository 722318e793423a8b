//! Runtime configuration (spec §5, §9).
//!
//! A small serde struct with a documented `Default`, loadable from and
//! saveable to a JSON sidecar file. Grounded on the `SyncConfig` struct
//! in `examples/hyqhyq3-dsvn/dsvn-core/src/sync.rs`.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_sleep_time() -> u64 {
    3600
}

fn default_db_path() -> String {
    "wizdiff.db".to_string()
}

fn default_host() -> String {
    crate::patch_directory::DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    crate::patch_directory::DEFAULT_PORT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Seconds to sleep between lifecycle ticks when no new revision
    /// is found.
    #[serde(default = "default_sleep_time")]
    pub sleep_time: u64,

    /// Path to the sqlite inventory database, relative to the current
    /// working directory unless absolute.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Whether to delete inventory rows for revisions superseded by a
    /// newer commit, rather than retaining full history.
    #[serde(default)]
    pub delete_old_revisions: bool,

    #[serde(default = "default_host")]
    pub patch_directory_host: String,

    #[serde(default = "default_port")]
    pub patch_directory_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sleep_time: default_sleep_time(),
            db_path: default_db_path(),
            delete_old_revisions: false,
            patch_directory_host: default_host(),
            patch_directory_port: default_port(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| CoreError::validation(format!("parsing config at {path:?}: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::validation(format!("serializing config: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.sleep_time, 3600);
        assert_eq!(cfg.db_path, "wizdiff.db");
        assert!(!cfg.delete_old_revisions);
    }

    #[test]
    fn round_trips_through_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = Config::default();
        cfg.sleep_time = 60;
        cfg.delete_old_revisions = true;
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn load_or_default_falls_back_when_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");
        let cfg = Config::load_or_default(&path).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sleep_time": 30}"#).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.sleep_time, 30);
        assert_eq!(cfg.db_path, "wizdiff.db");
    }
}
