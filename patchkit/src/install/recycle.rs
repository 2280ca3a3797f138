//! Recoverable trash.
//!
//! The engine never hard-deletes user-visible files: obsolete and user-edited
//! files are moved into a timestamped batch directory under the recycle root,
//! preserving their relative layout so a user can restore them by hand.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::path_utils;
use crate::error::{Error, Result};

/// Moves files out of the content root into a per-operation batch directory.
pub struct Recycler {
    batch_dir: PathBuf,
    moved: usize,
}

impl Recycler {
    /// Create a recycler rooted at `recycle_root`. The batch directory is
    /// only created once something actually gets recycled.
    pub fn new(recycle_root: &Path) -> Self {
        let batch = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        Self {
            batch_dir: recycle_root.join(batch),
            moved: 0,
        }
    }

    /// Number of files moved so far.
    pub fn moved(&self) -> usize {
        self.moved
    }

    /// Move `content_root/<rel>` into the batch directory, keeping `rel`'s
    /// layout. Returns `false` if the source does not exist or `rel` is
    /// unsafe. Never deletes.
    pub fn recycle(&mut self, content_root: &Path, rel: &str) -> Result<bool> {
        let Some(source) = path_utils::resolve_under(content_root, rel) else {
            tracing::warn!(rel, "refusing to recycle unsafe path");
            return Ok(false);
        };
        if !source.exists() {
            return Ok(false);
        }

        // Safe: resolve_under already vetted `rel`.
        let target = unique_target(&self.batch_dir.join(
            path_utils::sanitize_rel_path(rel).unwrap_or_else(|| PathBuf::from(rel)),
        ));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        match fs::rename(&source, &target) {
            Ok(()) => {}
            Err(_) => {
                // Rename can fail across volumes; fall back to copy + remove.
                Self::copy_recursive(&source, &target)?;
                if source.is_dir() {
                    fs::remove_dir_all(&source).map_err(|e| Error::io(&source, e))?;
                } else {
                    fs::remove_file(&source).map_err(|e| Error::io(&source, e))?;
                }
            }
        }

        tracing::debug!(from = %source.display(), to = %target.display(), "recycled");
        self.moved += 1;
        Ok(true)
    }

    fn copy_recursive(source: &Path, target: &Path) -> Result<()> {
        if source.is_dir() {
            for entry in walkdir::WalkDir::new(source).follow_links(false) {
                let entry = entry.map_err(|e| {
                    Error::io(source, std::io::Error::other(e.to_string()))
                })?;
                let rel = entry
                    .path()
                    .strip_prefix(source)
                    .unwrap_or_else(|_| Path::new(""));
                let dest = target.join(rel);
                if entry.file_type().is_dir() {
                    fs::create_dir_all(&dest).map_err(|e| Error::io(&dest, e))?;
                } else {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
                    }
                    fs::copy(entry.path(), &dest).map_err(|e| Error::io(&dest, e))?;
                }
            }
        } else {
            fs::copy(source, target).map_err(|e| Error::io(target, e))?;
        }
        Ok(())
    }
}

/// Avoid clobbering when the same relative path is recycled twice in one
/// batch (e.g. stale scan, then re-extraction of replacement bytes).
fn unique_target(candidate: &Path) -> PathBuf {
    if !candidate.exists() {
        return candidate.to_path_buf();
    }
    let mut n = 1u32;
    loop {
        let name = format!(
            "{}.{}",
            candidate
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "recycled".to_string()),
            n
        );
        let next = candidate.with_file_name(name);
        if !next.exists() {
            return next;
        }
        n += 1;
    }
}
