use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::retry::RetryPolicy;

/// Installation log file name inside the content root
pub const LOG_FILE_NAME: &str = "install.log";

/// Recoverable-trash directory name inside the content root
pub const RECYCLE_DIR_NAME: &str = ".recycle";

/// Grace window for distinguishing user-edited files from just-extracted
/// ones. Extraction and filesystem timestamp jitter stay well under this;
/// the exact value is a tunable with no deeper rationale.
pub const EDIT_GRACE_SECS: i64 = 60;

/// Engine configuration, owned per instance.
///
/// One value of this type fully describes an installation target: where the
/// content lives, how archive entries map onto it, which files must always be
/// physically replaced, and the retry/cache tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallerConfig {
    /// Root directory all installed content lives under.
    pub content_root: PathBuf,
    /// Archive entry prefix: full-stage archives root their payload at
    /// `<artifact_name>/<payload_subtree>/...`.
    pub artifact_name: String,
    pub payload_subtree: String,
    /// Root-level archive entry whose presence marks the minimal
    /// forced-replacement archive shape.
    pub sentinel_entry: String,
    /// Companion directory extracted alongside the sentinel in the minimal shape.
    pub companion_dir: String,
    /// Relative paths that must be physically replaced unconditionally
    /// (e.g. the currently loaded core binary). Primary stage only.
    pub forced_paths: Vec<String>,
    /// Relative paths soft-recycled when the installation log is found
    /// untrustworthy and a full reinstall is forced.
    pub reset_paths: Vec<String>,
    /// Remote manifest URL.
    pub manifest_url: String,
    /// Payload URL templates; `{version}` is replaced with the version string.
    pub payload_url: String,
    pub chunk_payload_url: String,
    /// Stale-change grace window in seconds (see [`EDIT_GRACE_SECS`]).
    pub edit_grace_secs: i64,
    /// Transient IO write retry budget.
    pub io_retry_attempts: u32,
    pub io_retry_backoff_ms: u64,
    /// Forced-file delete retry budget.
    pub delete_retry_attempts: u32,
    pub delete_retry_backoff_ms: u64,
    /// TTL for the remote byte cache.
    pub fetch_ttl_secs: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::new(),
            artifact_name: "addon".to_string(),
            payload_subtree: "content".to_string(),
            sentinel_entry: "addon.bin".to_string(),
            companion_dir: "runtime".to_string(),
            forced_paths: Vec::new(),
            reset_paths: Vec::new(),
            manifest_url: String::new(),
            payload_url: String::new(),
            chunk_payload_url: String::new(),
            edit_grace_secs: EDIT_GRACE_SECS,
            io_retry_attempts: 4,
            io_retry_backoff_ms: 250,
            delete_retry_attempts: 5,
            delete_retry_backoff_ms: 500,
            fetch_ttl_secs: 300,
        }
    }
}

impl InstallerConfig {
    pub fn new(content_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
            ..Self::default()
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.content_root.join(LOG_FILE_NAME)
    }

    pub fn recycle_root(&self) -> PathBuf {
        self.content_root.join(RECYCLE_DIR_NAME)
    }

    /// Prefix full-stage archive entries must carry, with trailing slash.
    pub fn entry_prefix(&self) -> String {
        format!("{}/{}/", self.artifact_name, self.payload_subtree)
    }

    /// Prefix of the sentinel's companion subtree, with trailing slash.
    pub fn companion_prefix(&self) -> String {
        format!("{}/", self.companion_dir.trim_end_matches('/'))
    }

    pub fn io_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.io_retry_attempts,
            Duration::from_millis(self.io_retry_backoff_ms),
        )
    }

    pub fn delete_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.delete_retry_attempts,
            Duration::from_millis(self.delete_retry_backoff_ms),
        )
    }

    pub fn payload_url_for(&self, version: &str) -> String {
        self.payload_url.replace("{version}", version)
    }

    pub fn chunk_payload_url_for(&self, version: &str) -> String {
        self.chunk_payload_url.replace("{version}", version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_prefix_layout() {
        let config = InstallerConfig::new("/tmp/root");
        assert_eq!(config.entry_prefix(), "addon/content/");
        assert_eq!(config.companion_prefix(), "runtime/");
    }

    #[test]
    fn test_payload_url_substitution() {
        let mut config = InstallerConfig::new("/tmp/root");
        config.payload_url = "https://cdn.example.com/builds/{version}.zip".to_string();
        assert_eq!(
            config.payload_url_for("1.2.3"),
            "https://cdn.example.com/builds/1.2.3.zip"
        );
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = InstallerConfig::new("/tmp/root");
        let json = serde_json::to_string(&config).unwrap();
        let back: InstallerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content_root, config.content_root);
        assert_eq!(back.edit_grace_secs, EDIT_GRACE_SECS);
    }
}
