//! Shared path validation utilities
//!
//! Provides helpers for preventing path traversal attacks when mapping
//! archive entry names and logged relative paths onto the content root.

use std::path::{Component, Path, PathBuf};

/// Sanitize a relative path taken from an archive entry or log line.
///
/// Backslashes are normalized to the platform separator and the result is
/// rebuilt component by component. Returns `None` if the path is absolute,
/// empty, or contains a `..` segment.
pub fn sanitize_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    let mut result = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(c) => result.push(c),
            Component::CurDir => {}              // Skip "."
            Component::ParentDir => return None, // Reject ".."
            Component::Prefix(_) | Component::RootDir => return None, // Reject absolute paths
        }
    }
    if result.as_os_str().is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Resolve a relative path under `root`, rejecting anything that would
/// escape it. Returns the joined absolute path on success.
pub fn resolve_under(root: &Path, rel: &str) -> Option<PathBuf> {
    sanitize_rel_path(rel).map(|safe| root.join(safe))
}

/// Normalize a relative path to forward slashes for use as a log/map key.
pub fn normalize_key(rel: &str) -> String {
    rel.replace('\\', "/")
        .trim_matches('/')
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}
