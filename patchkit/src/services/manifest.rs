//! Remote manifest parsing and version selection.
//!
//! The manifest is a JSON array of version records, re-fetched on every check
//! and treated as ephemeral. Version strings are dotted-numeric and ordered
//! by a dedicated comparer; lexicographic ordering would put "1.10" before
//! "1.9".

use std::cmp::Ordering;

use anyhow::Context;

use crate::error::{Error, Result};
use crate::models::{AutoUpdatePolicy, VersionRecord};

/// Parse manifest bytes into version records sorted newest first.
pub fn parse_manifest(bytes: &[u8]) -> Result<Vec<VersionRecord>> {
    let mut versions: Vec<VersionRecord> = serde_json::from_slice(bytes)
        .context("Failed to parse the version manifest")
        .map_err(Error::Network)?;
    if versions.is_empty() {
        return Err(Error::EmptyManifest);
    }
    sort_newest_first(&mut versions);
    Ok(versions)
}

/// Order records newest first: by version string, then by build number so
/// rebuilds of the same version still have a stable order.
pub fn sort_newest_first(versions: &mut [VersionRecord]) {
    versions.sort_by(|a, b| {
        compare_version_strings(&b.version, &a.version).then(b.build.cmp(&a.build))
    });
}

/// Compare two dotted version strings segment by segment. Numeric segments
/// compare as integers; a missing segment counts as zero; segments that do
/// not parse fall back to string order.
pub fn compare_version_strings(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => {
                let l = l.unwrap_or("0").trim();
                let r = r.unwrap_or("0").trim();
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Pick the install candidate for `policy` from a newest-first list.
///
/// `Latest` takes the head; `Recommended` and `TestedOnly` take the newest
/// record carrying the respective tag and select nothing when no record
/// qualifies; `Disabled` never selects.
pub fn select_candidate(
    versions: &[VersionRecord],
    policy: AutoUpdatePolicy,
) -> Option<&VersionRecord> {
    match policy {
        AutoUpdatePolicy::Disabled => None,
        AutoUpdatePolicy::Latest => versions.first(),
        AutoUpdatePolicy::Recommended => versions.iter().find(|v| v.is_recommended()),
        AutoUpdatePolicy::TestedOnly => versions.iter().find(|v| v.is_tested()),
    }
}

/// Resolve the installed build to its manifest record, or synthesize a
/// placeholder when the manifest no longer lists it.
pub fn installed_record(versions: &[VersionRecord], installed_build: i64) -> VersionRecord {
    versions
        .iter()
        .find(|v| v.build == installed_build)
        .cloned()
        .unwrap_or_else(|| VersionRecord::placeholder(installed_build))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn record(build: i64, version: &str, tags: &[&str]) -> VersionRecord {
        VersionRecord {
            build,
            version: version.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            ..VersionRecord::default()
        }
    }

    #[test]
    fn test_numeric_segments_beat_lexicographic_order() {
        assert_eq!(
            compare_version_strings("1.10.0", "1.9.0"),
            Ordering::Greater
        );
        assert_eq!(compare_version_strings("2.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_version_strings("1.2.3", "1.2.4"), Ordering::Less);
    }

    #[test]
    fn test_parse_sorts_newest_first() {
        let json = r#"[
            {"build": 99, "version": "2.9.0"},
            {"build": 101, "version": "2.14.0", "tags": ["tested"]},
            {"build": 100, "version": "2.10.0", "tags": ["recommended", "tested"]}
        ]"#;
        let versions = parse_manifest(json.as_bytes()).unwrap();
        assert_eq!(
            versions.iter().map(|v| v.build).collect::<Vec<_>>(),
            vec![101, 100, 99]
        );
    }

    #[test]
    fn test_empty_manifest_is_an_error() {
        assert!(matches!(
            parse_manifest(b"[]").unwrap_err(),
            Error::EmptyManifest
        ));
    }

    #[test]
    fn test_garbage_manifest_is_a_network_error() {
        assert!(matches!(
            parse_manifest(b"{oops").unwrap_err(),
            Error::Network(_)
        ));
    }

    #[test]
    fn test_policy_selection() {
        let versions = vec![
            record(101, "2.14.0", &["tested"]),
            record(100, "2.10.0", &["recommended", "tested"]),
            record(99, "2.9.0", &[]),
        ];

        assert_eq!(
            select_candidate(&versions, AutoUpdatePolicy::Latest).map(|v| v.build),
            Some(101)
        );
        assert_eq!(
            select_candidate(&versions, AutoUpdatePolicy::Recommended).map(|v| v.build),
            Some(100)
        );
        assert_eq!(
            select_candidate(&versions, AutoUpdatePolicy::TestedOnly).map(|v| v.build),
            Some(101)
        );
        assert!(select_candidate(&versions, AutoUpdatePolicy::Disabled).is_none());
    }

    #[test]
    fn test_no_tagged_record_selects_nothing() {
        let versions = vec![record(101, "2.14.0", &[])];
        assert!(select_candidate(&versions, AutoUpdatePolicy::Recommended).is_none());
    }

    #[test]
    fn test_installed_record_falls_back_to_placeholder() {
        let versions = vec![record(101, "2.14.0", &[])];
        assert_eq!(installed_record(&versions, 101).version, "2.14.0");
        let ghost = installed_record(&versions, 55);
        assert_eq!(ghost.build, 55);
        assert!(ghost.is_custom_build);
    }
}
