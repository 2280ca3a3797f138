use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Auto-update policy driving version selection per check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoUpdatePolicy {
    Disabled,
    TestedOnly,
    Recommended,
    Latest,
}

/// Manifest tag marking a build as recommended for general use
pub const TAG_RECOMMENDED: &str = "recommended";
/// Manifest tag marking a build as having passed testing
pub const TAG_TESTED: &str = "tested";

/// One available version as described by the remote manifest.
///
/// Ephemeral: re-fetched on every check. `build` is the stable identity key;
/// `version` is a dotted-numeric string ordered by the dedicated comparer in
/// [`crate::services::manifest`], not lexicographically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionRecord {
    pub build: i64,
    pub version: String,
    pub chunk_version: Option<String>,
    pub size: u64,
    pub chunk_size: u64,
    pub tags: BTreeSet<String>,
    pub changelog: String,
    pub is_custom_build: bool,
}

impl Default for VersionRecord {
    fn default() -> Self {
        Self {
            build: 0,
            version: String::new(),
            chunk_version: None,
            size: 0,
            chunk_size: 0,
            tags: BTreeSet::new(),
            changelog: String::new(),
            is_custom_build: false,
        }
    }
}

impl VersionRecord {
    /// Placeholder for a build the manifest no longer lists (manually
    /// installed or withdrawn). Keeps version selection total.
    pub fn placeholder(build: i64) -> Self {
        Self {
            build,
            version: "unknown".to_string(),
            is_custom_build: true,
            ..Self::default()
        }
    }

    pub fn is_recommended(&self) -> bool {
        self.tags.contains(TAG_RECOMMENDED)
    }

    pub fn is_tested(&self) -> bool {
        self.tags.contains(TAG_TESTED)
    }
}

/// Progress event reported while an operation runs.
///
/// `fraction` is the overall completion in `0.0..=1.0`, composed from
/// per-phase weights rather than nested callbacks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: String,
    pub completed: u64,
    pub total: u64,
    pub fraction: f64,
    pub current_file: Option<String>,
    pub message: Option<String>,
}

pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Per-stage mutation summary.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    /// Files written with fresh bytes.
    pub written: usize,
    /// Files left untouched because their checksum matched.
    pub preserved: usize,
    /// Files moved to the recoverable trash.
    pub recycled: usize,
    /// Archive entries skipped (outside the prefix or unsafe paths).
    pub skipped: usize,
    /// Previously logged directories removed because they became empty.
    pub directories_removed: usize,
}

/// Final summary of a successful install.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub build: i64,
    pub version: String,
    pub chunk_version: Option<String>,
    pub artifact: StageReport,
    pub chunk: StageReport,
}

/// Outcome of a check-and-install cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum CheckOutcome {
    /// No candidate, or the candidate matches the installed build.
    UpToDate { installed_build: i64 },
    /// A new build was installed.
    Installed(InstallReport),
}
