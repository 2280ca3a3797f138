//! Prior-state loading with a trust check.
//!
//! The installation log inside the content root and the build number recorded
//! by the host's settings are written by the same successful install, so they
//! must agree. When they do not (manual file swaps, a restored backup, a
//! half-migrated copy), diffing against the log would preserve wrong bytes;
//! instead the records are discarded and the next stage run rewrites
//! everything.

use crate::config::InstallerConfig;
use crate::error::Result;
use crate::install::log::InstallLog;
use crate::install::recycle::Recycler;

/// Prior installation state as the stage processors will consume it.
pub struct InstallContext {
    pub log: InstallLog,
    /// False when the log was discarded by the build cross-check; the
    /// operation then behaves like a fresh install.
    pub trusted: bool,
}

impl InstallContext {
    /// Load the installation log and cross-check it against the build number
    /// the host recorded (`None` when nothing was ever recorded).
    ///
    /// On mismatch the configured reset paths are recycled so stale content
    /// the empty records would otherwise orphan still leaves the root.
    pub fn load(
        config: &InstallerConfig,
        recorded_build: Option<i64>,
        recycler: &mut Recycler,
    ) -> Result<Self> {
        let Some(log) = InstallLog::load(&config.log_path())? else {
            // Fresh target: empty records make the stage write everything.
            return Ok(Self {
                log: InstallLog::default(),
                trusted: true,
            });
        };

        if recorded_build == Some(log.build) {
            return Ok(Self { log, trusted: true });
        }

        tracing::warn!(
            logged_build = log.build,
            recorded_build,
            "installation log disagrees with recorded build; forcing full reinstall"
        );
        for rel in &config.reset_paths {
            recycler.recycle(&config.content_root, rel)?;
        }
        Ok(Self {
            log: InstallLog::default(),
            trusted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::log::{FileRecord, StageRecord};
    use std::fs;

    fn seeded_config(root: &std::path::Path) -> InstallerConfig {
        let mut config = InstallerConfig::new(root);
        config.reset_paths = vec!["cache".to_string()];
        config
    }

    fn write_log(config: &InstallerConfig, build: i64) {
        let log = InstallLog {
            version: "1.0.0".to_string(),
            build,
            chunk_version: None,
            primary: StageRecord {
                files: vec![FileRecord {
                    relative_path: "a.txt".to_string(),
                    checksum: "aa".to_string(),
                    byte_length: 1,
                    last_write_secs: 10,
                }],
                directories: Vec::new(),
            },
            chunk: StageRecord::default(),
        };
        log.store(&config.log_path()).unwrap();
    }

    #[test]
    fn test_fresh_target_is_trusted_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = seeded_config(dir.path());
        let mut recycler = Recycler::new(&config.recycle_root());

        let ctx = InstallContext::load(&config, None, &mut recycler).unwrap();
        assert!(ctx.trusted);
        assert!(ctx.log.primary.is_empty());
    }

    #[test]
    fn test_matching_build_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = seeded_config(dir.path());
        write_log(&config, 100);
        let mut recycler = Recycler::new(&config.recycle_root());

        let ctx = InstallContext::load(&config, Some(100), &mut recycler).unwrap();
        assert!(ctx.trusted);
        assert_eq!(ctx.log.build, 100);
        assert_eq!(ctx.log.primary.files.len(), 1);
    }

    #[test]
    fn test_mismatch_discards_records_and_recycles_reset_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = seeded_config(dir.path());
        write_log(&config, 100);
        fs::create_dir_all(dir.path().join("cache")).unwrap();
        fs::write(dir.path().join("cache/blob"), b"stale").unwrap();
        let mut recycler = Recycler::new(&config.recycle_root());

        let ctx = InstallContext::load(&config, Some(97), &mut recycler).unwrap();
        assert!(!ctx.trusted);
        assert!(ctx.log.primary.is_empty());
        assert!(!dir.path().join("cache").exists());
        assert_eq!(recycler.moved(), 1);
    }

    #[test]
    fn test_log_without_recorded_build_is_distrusted() {
        let dir = tempfile::tempdir().unwrap();
        let config = seeded_config(dir.path());
        write_log(&config, 100);
        let mut recycler = Recycler::new(&config.recycle_root());

        let ctx = InstallContext::load(&config, None, &mut recycler).unwrap();
        assert!(!ctx.trusted);
        assert!(ctx.log.primary.is_empty());
    }
}
