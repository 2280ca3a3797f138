//! Stage processor: diffs one stage's logged state against a freshly
//! downloaded archive and applies the minimal set of filesystem mutations.
//!
//! Four phases, each separated by a cancellation checkpoint:
//! 1. stale-change recycling (user-edited files move to the trash),
//! 2. archive application (sentinel or full-stage shape, forced files first),
//! 3. obsolete-file recycling,
//! 4. empty-directory cleanup.
//!
//! Unchanged files (matching checksum) are never rewritten, which is what
//! makes installing the same build twice a no-op on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use zip::read::ZipFile;
use zip::ZipArchive;

use crate::config::InstallerConfig;
use crate::core::checksum;
use crate::core::path_utils;
use crate::core::task_control::TaskControl;
use crate::error::{Error, Result};
use crate::install::log::{FileRecord, StageRecord, FIELD_DELIMITER};
use crate::install::progress::{ProgressContext, StagePhase};
use crate::install::recycle::Recycler;
use crate::models::StageReport;

/// Maximum allowed uncompressed size for one stage archive (20 GB)
pub const MAX_EXTRACTION_SIZE: u64 = 20 * 1024 * 1024 * 1024;

/// Maximum compression ratio before an archive is treated as a zip bomb (100:1)
pub const MAX_COMPRESSION_RATIO: u64 = 100;

type InMemoryZip<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Applies one stage (primary artifact or supplementary data) to disk.
pub struct StageProcessor<'a> {
    config: &'a InstallerConfig,
    control: &'a TaskControl,
    progress: ProgressContext,
    stage_name: &'static str,
}

impl<'a> StageProcessor<'a> {
    pub fn new(
        config: &'a InstallerConfig,
        control: &'a TaskControl,
        progress: ProgressContext,
        stage_name: &'static str,
    ) -> Self {
        Self {
            config,
            control,
            progress,
            stage_name,
        }
    }

    /// Diff `prior` against `archive` and mutate the content root.
    ///
    /// A zero-length archive means "apply removals only": every logged file
    /// that survives the stale scan is recycled. `forced` paths are replaced
    /// unconditionally and are expected to be nonempty only for the primary
    /// stage.
    pub fn apply(
        &self,
        prior: &StageRecord,
        forced: &[String],
        archive: &[u8],
        recycler: &mut Recycler,
    ) -> Result<(StageRecord, StageReport)> {
        self.control.checkpoint(self.stage_name)?;
        let root = &self.config.content_root;
        fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;

        let mut report = StageReport::default();
        let mut pending: BTreeMap<String, FileRecord> = prior
            .files
            .iter()
            .map(|f| (path_utils::normalize_key(&f.relative_path), f.clone()))
            .collect();
        let mut pending_dirs: BTreeSet<String> = prior
            .directories
            .iter()
            .map(|d| path_utils::normalize_key(d))
            .collect();

        self.recycle_stale_edits(&mut pending, recycler, &mut report)?;
        self.control.checkpoint(self.stage_name)?;

        let mut next = StageRecord::default();
        if !archive.is_empty() {
            let mut zip = ZipArchive::new(Cursor::new(archive))
                .map_err(|e| Error::ArchiveRejected(e.to_string()))?;
            self.preflight(&mut zip, archive.len() as u64)?;

            let sentinel = path_utils::normalize_key(&self.config.sentinel_entry);
            let minimal = zip
                .file_names()
                .any(|n| path_utils::normalize_key(n) == sentinel);
            if minimal {
                self.extract_minimal(
                    &mut zip,
                    &mut pending,
                    &mut pending_dirs,
                    &mut next,
                    recycler,
                    &mut report,
                )?;
            } else {
                self.extract_full(
                    &mut zip,
                    forced,
                    &mut pending,
                    &mut pending_dirs,
                    &mut next,
                    recycler,
                    &mut report,
                )?;
            }
        }

        self.control.checkpoint(self.stage_name)?;
        self.recycle_obsolete(&pending, recycler, &mut report)?;
        self.control.checkpoint(self.stage_name)?;
        self.cleanup_directories(&pending_dirs, &mut report);

        tracing::info!(
            stage = self.stage_name,
            written = report.written,
            preserved = report.preserved,
            recycled = report.recycled,
            "stage applied"
        );
        Ok((next, report))
    }

    /// Phase 1: files whose on-disk write time drifted past the grace window
    /// were edited by the user; move them to the trash and forget them.
    fn recycle_stale_edits(
        &self,
        pending: &mut BTreeMap<String, FileRecord>,
        recycler: &mut Recycler,
        report: &mut StageReport,
    ) -> Result<()> {
        let total = pending.len() as u64;
        let keys: Vec<String> = pending.keys().cloned().collect();
        for (i, key) in keys.iter().enumerate() {
            let record = &pending[key];
            if let Some(dest) = path_utils::resolve_under(&self.config.content_root, key) {
                if let Some(mtime) = file_mtime_secs(&dest) {
                    if (mtime - record.last_write_secs).abs() > self.config.edit_grace_secs {
                        tracing::info!(path = key.as_str(), "recycling user-edited file");
                        if recycler.recycle(&self.config.content_root, key)? {
                            report.recycled += 1;
                        }
                        pending.remove(key);
                    }
                }
            }
            self.progress
                .phase(StagePhase::StaleScan, (i + 1) as u64, total, Some(key.as_str()));
        }
        Ok(())
    }

    /// Archive safety preflight: declared size cap, compression ratio, and
    /// free space on the content root volume.
    fn preflight(&self, zip: &mut InMemoryZip<'_>, compressed_len: u64) -> Result<()> {
        let mut total: u64 = 0;
        for i in 0..zip.len() {
            let entry = zip
                .by_index(i)
                .map_err(|e| Error::ArchiveRejected(e.to_string()))?;
            total = total.saturating_add(entry.size());
        }

        if total > MAX_EXTRACTION_SIZE {
            return Err(Error::ArchiveRejected(format!(
                "declared uncompressed size {} exceeds the {} byte limit",
                total, MAX_EXTRACTION_SIZE
            )));
        }
        if compressed_len > 0 && total / compressed_len.max(1) > MAX_COMPRESSION_RATIO {
            return Err(Error::ArchiveRejected(format!(
                "compression ratio {}:1 exceeds {}:1",
                total / compressed_len.max(1),
                MAX_COMPRESSION_RATIO
            )));
        }

        if let Ok(available) = fs2::available_space(&self.config.content_root) {
            if available < total {
                return Err(Error::InsufficientSpace {
                    required: total,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Full-stage shape: forced replacements first, then every entry under
    /// `<artifact>/<subtree>/` with the prefix stripped.
    #[allow(clippy::too_many_arguments)]
    fn extract_full(
        &self,
        zip: &mut InMemoryZip<'_>,
        forced: &[String],
        pending: &mut BTreeMap<String, FileRecord>,
        pending_dirs: &mut BTreeSet<String>,
        next: &mut StageRecord,
        recycler: &mut Recycler,
        report: &mut StageReport,
    ) -> Result<()> {
        let prefix = self.config.entry_prefix();
        let mut processed: BTreeSet<String> = BTreeSet::new();

        // Resolve the complete forced plan first. A missing forced entry is
        // fatal and must abort before anything on disk has been touched.
        let mut forced_plan: Vec<(String, String, PathBuf)> = Vec::with_capacity(forced.len());
        for rel in forced {
            let key = path_utils::normalize_key(rel);
            let entry_name = zip
                .file_names()
                .find(|n| dest_key(n, &prefix).as_deref() == Some(key.as_str()))
                .map(|n| n.to_string())
                .ok_or_else(|| Error::ArchiveIntegrity(rel.clone()))?;
            let dest = path_utils::resolve_under(&self.config.content_root, &key)
                .ok_or_else(|| Error::ArchiveRejected(format!("forced path '{}' is unsafe", rel)))?;
            forced_plan.push((key, entry_name, dest));
        }

        for (key, entry_name, dest) in forced_plan {
            self.control.checkpoint("forced replacement")?;
            self.delete_forced(&dest)?;
            let mut entry = zip
                .by_name(&entry_name)
                .map_err(|e| Error::ArchiveRejected(e.to_string()))?;
            // Forced files never take the checksum shortcut.
            let record = self.write_entry(&mut entry, &key, &dest)?;
            next.files.push(record);
            report.written += 1;
            pending.remove(&key);
            processed.insert(key);
        }

        let total = zip.len() as u64;
        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| Error::ArchiveRejected(e.to_string()))?;
            let Some(key) = dest_key(entry.name(), &prefix) else {
                continue; // Entries outside the expected subtree are ignored
            };
            if processed.contains(&key) {
                continue;
            }
            let Some(dest) = path_utils::resolve_under(&self.config.content_root, &key) else {
                tracing::warn!(entry = entry.name(), "rejected path-traversal entry");
                report.skipped += 1;
                continue;
            };
            self.apply_entry(&mut entry, &key, &dest, pending, pending_dirs, next, recycler, report)?;
            self.progress
                .phase(StagePhase::Extract, (i + 1) as u64, total, Some(key.as_str()));
        }
        Ok(())
    }

    /// Minimal forced-replacement shape: the sentinel is replaced
    /// unconditionally and its companion subtree is extracted with its paths
    /// taken verbatim, bypassing the artifact prefix logic.
    fn extract_minimal(
        &self,
        zip: &mut InMemoryZip<'_>,
        pending: &mut BTreeMap<String, FileRecord>,
        pending_dirs: &mut BTreeSet<String>,
        next: &mut StageRecord,
        recycler: &mut Recycler,
        report: &mut StageReport,
    ) -> Result<()> {
        self.control.checkpoint("forced replacement")?;
        let sentinel = path_utils::normalize_key(&self.config.sentinel_entry);
        let companion_prefix = self.config.companion_prefix();
        let companion_root = companion_prefix.trim_end_matches('/').to_string();

        let total = zip.len() as u64;
        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| Error::ArchiveRejected(e.to_string()))?;
            let key = path_utils::normalize_key(entry.name());
            if key.is_empty() {
                continue;
            }

            if key == sentinel {
                let dest = path_utils::resolve_under(&self.config.content_root, &key)
                    .ok_or_else(|| {
                        Error::ArchiveRejected(format!("sentinel path '{}' is unsafe", key))
                    })?;
                self.delete_forced(&dest)?;
                let record = self.write_entry(&mut entry, &key, &dest)?;
                next.files.push(record);
                report.written += 1;
                pending.remove(&key);
            } else if key == companion_root || key.starts_with(&companion_prefix) {
                let Some(dest) = path_utils::resolve_under(&self.config.content_root, &key) else {
                    tracing::warn!(entry = entry.name(), "rejected path-traversal entry");
                    report.skipped += 1;
                    continue;
                };
                self.apply_entry(&mut entry, &key, &dest, pending, pending_dirs, next, recycler, report)?;
            }
            self.progress
                .phase(StagePhase::Extract, (i + 1) as u64, total, Some(key.as_str()));
        }
        Ok(())
    }

    /// Apply one archive entry: directories are created and recorded; files
    /// with a matching prior checksum are preserved untouched; everything
    /// else has its old bytes recycled and the new bytes written.
    #[allow(clippy::too_many_arguments)]
    fn apply_entry(
        &self,
        entry: &mut ZipFile<'_>,
        key: &str,
        dest: &Path,
        pending: &mut BTreeMap<String, FileRecord>,
        pending_dirs: &mut BTreeSet<String>,
        next: &mut StageRecord,
        recycler: &mut Recycler,
        report: &mut StageReport,
    ) -> Result<()> {
        // A path with the log field delimiter could never be recorded; skip
        // it up front so one odd entry cannot poison the commit.
        if key.contains(FIELD_DELIMITER) {
            tracing::warn!(entry = key, "rejected entry whose path contains ':'");
            report.skipped += 1;
            return Ok(());
        }
        if entry.is_dir() {
            fs::create_dir_all(dest).map_err(|e| Error::io(dest, e))?;
            next.directories.push(key.to_string());
            pending_dirs.remove(key);
            return Ok(());
        }

        let new_checksum = checksum::format_crc(entry.crc32());
        if let Some(old) = pending.get(key) {
            if old.checksum == new_checksum && dest.is_file() {
                // Unchanged content: keep the on-disk file and its log line.
                next.files.push(old.clone());
                pending.remove(key);
                report.preserved += 1;
                return Ok(());
            }
        }

        if dest.exists() {
            if recycler.recycle(&self.config.content_root, key)? {
                report.recycled += 1;
            }
        }
        let record = self.write_entry(entry, key, dest)?;
        next.files.push(record);
        report.written += 1;
        pending.remove(key);
        Ok(())
    }

    /// Phase 3: anything still pending was neither preserved nor recycled.
    fn recycle_obsolete(
        &self,
        pending: &BTreeMap<String, FileRecord>,
        recycler: &mut Recycler,
        report: &mut StageReport,
    ) -> Result<()> {
        let total = pending.len() as u64;
        for (i, key) in pending.keys().enumerate() {
            if recycler.recycle(&self.config.content_root, key)? {
                report.recycled += 1;
            }
            self.progress
                .phase(StagePhase::ObsoleteSweep, (i + 1) as u64, total, Some(key.as_str()));
        }
        Ok(())
    }

    /// Phase 4: logged directories that are now empty are removed, deepest
    /// first so nested chains collapse in one pass.
    fn cleanup_directories(&self, pending_dirs: &BTreeSet<String>, report: &mut StageReport) {
        let mut dirs: Vec<&String> = pending_dirs.iter().collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.split('/').count()));

        let total = dirs.len() as u64;
        for (i, key) in dirs.iter().enumerate() {
            if let Some(dir) = path_utils::resolve_under(&self.config.content_root, key) {
                let empty = fs::read_dir(&dir)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false);
                if empty && fs::remove_dir(&dir).is_ok() {
                    report.directories_removed += 1;
                }
            }
            self.progress
                .phase(StagePhase::DirCleanup, (i + 1) as u64, total, Some(key.as_str()));
        }
    }

    /// Delete a forced-replacement target with the bounded delete retry.
    /// Exhausting the budget means the file is held open by the host
    /// application, which is fatal for the whole operation.
    fn delete_forced(&self, dest: &Path) -> Result<()> {
        if !dest.exists() {
            return Ok(());
        }
        self.remove_with_retry(dest, |p| {
            if p.is_dir() {
                fs::remove_dir_all(p)
            } else {
                fs::remove_file(p)
            }
        })
    }

    fn remove_with_retry(
        &self,
        dest: &Path,
        mut remove: impl FnMut(&Path) -> std::io::Result<()>,
    ) -> Result<()> {
        self.config
            .delete_retry()
            .run(|| remove(dest))
            .map_err(|e| Error::TargetInUse {
                path: dest.to_path_buf(),
                source: e,
            })
    }

    /// Write an entry's bytes to `dest` with the transient-IO retry and
    /// return its fresh log record.
    fn write_entry(
        &self,
        entry: &mut ZipFile<'_>,
        key: &str,
        dest: &Path,
    ) -> Result<FileRecord> {
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| Error::ArchiveRejected(format!("failed to read entry '{}': {}", key, e)))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        self.config
            .io_retry()
            .run(|| fs::write(dest, &data))
            .map_err(|e| Error::io(dest, e))?;

        Ok(FileRecord {
            relative_path: key.to_string(),
            checksum: checksum::digest_bytes(&data),
            byte_length: data.len() as u64,
            last_write_secs: file_mtime_secs(dest).unwrap_or_else(now_secs),
        })
    }
}

/// Map a full-stage archive entry name to its content-root-relative key, or
/// `None` when the entry lies outside the expected prefix.
fn dest_key(name: &str, prefix: &str) -> Option<String> {
    let normalized = name.replace('\\', "/");
    let stripped = normalized.strip_prefix(prefix)?;
    let key = path_utils::normalize_key(stripped);
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn file_mtime_secs(path: &Path) -> Option<i64> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    meta.modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs() as i64)
}
