//! Installation log: the persisted record of what is currently installed.
//!
//! UTF-8 text; two leading free-form comment lines, then `key: value` lines.
//! Recognized keys are `version`, `build`, `chunk`, `directory` and `file`;
//! unknown keys are ignored for forward compatibility. Lines before the
//! `chunk:` key describe the primary stage, lines from `chunk:` onward the
//! supplementary stage. A `file` value carries four colon-delimited fields:
//! `relativePath:checksum:byteLength:lastWriteUnixSeconds`.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};

/// Delimiter between `file` value fields; logged paths must never contain it.
pub const FIELD_DELIMITER: char = ':';

/// One installed file as recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the content root, forward slashes.
    pub relative_path: String,
    /// Content digest from [`crate::core::checksum`].
    pub checksum: String,
    pub byte_length: u64,
    pub last_write_secs: i64,
}

impl FileRecord {
    /// Parse the four-field `file` value. Fields are split from the right so
    /// a malformed path cannot shift the numeric columns.
    pub fn parse(value: &str) -> Option<Self> {
        let mut fields = value.rsplitn(4, FIELD_DELIMITER);
        let last_write_secs = fields.next()?.trim().parse::<i64>().ok()?;
        let byte_length = fields.next()?.trim().parse::<u64>().ok()?;
        let checksum = fields.next()?.trim().to_string();
        let relative_path = fields.next()?.trim().to_string();
        if relative_path.is_empty() || checksum.is_empty() {
            return None;
        }
        Some(Self {
            relative_path,
            checksum,
            byte_length,
            last_write_secs,
        })
    }

    fn serialize(&self) -> Result<String> {
        if self.relative_path.contains(FIELD_DELIMITER) {
            return Err(Error::LogFormat(format!(
                "path '{}' contains the field delimiter",
                self.relative_path
            )));
        }
        Ok(format!(
            "{}{d}{}{d}{}{d}{}",
            self.relative_path,
            self.checksum,
            self.byte_length,
            self.last_write_secs,
            d = FIELD_DELIMITER
        ))
    }
}

/// Files and directories of one stage, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageRecord {
    pub files: Vec<FileRecord>,
    /// Directories expected to become empty (and be removed) when the stage
    /// is uninstalled or its contents move elsewhere.
    pub directories: Vec<String>,
}

impl StageRecord {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }
}

/// The full installation log document: header plus both stage records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallLog {
    pub version: String,
    pub build: i64,
    pub chunk_version: Option<String>,
    pub primary: StageRecord,
    pub chunk: StageRecord,
}

impl InstallLog {
    /// Parse log text. Lenient: the first two lines are skipped as comments,
    /// `#` lines and unknown keys are ignored, malformed `file` values are
    /// dropped with a warning. Corruption therefore degrades to an empty or
    /// partial document, which the build cross-check in
    /// [`crate::install::context`] turns into a full-reinstall fallback.
    pub fn parse(text: &str) -> Self {
        let mut log = InstallLog::default();
        let mut in_chunk = false;

        for line in text.lines().skip(2) {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(FIELD_DELIMITER) else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "version" => log.version = value.to_string(),
                "build" => log.build = value.parse().unwrap_or(0),
                "chunk" => {
                    in_chunk = true;
                    if !value.is_empty() {
                        log.chunk_version = Some(value.to_string());
                    }
                }
                "directory" => {
                    let stage = if in_chunk {
                        &mut log.chunk
                    } else {
                        &mut log.primary
                    };
                    stage.directories.push(value.to_string());
                }
                "file" => match FileRecord::parse(value) {
                    Some(record) => {
                        let stage = if in_chunk {
                            &mut log.chunk
                        } else {
                            &mut log.primary
                        };
                        stage.files.push(record);
                    }
                    None => {
                        tracing::warn!(line = value, "skipped malformed file record in log");
                    }
                },
                _ => {} // Unknown keys are ignored
            }
        }

        log
    }

    /// Serialize to log text. Primary stage lines precede the `chunk:` key so
    /// a round trip reassigns every record to its original stage.
    pub fn to_text(&self) -> Result<String> {
        let mut out = String::new();
        out.push_str("# installation log - do not edit\n");
        out.push_str(&format!(
            "# written {}\n",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
        ));
        out.push_str(&format!("version: {}\n", self.version));
        out.push_str(&format!("build: {}\n", self.build));

        Self::write_stage(&mut out, &self.primary)?;

        if self.chunk_version.is_some() || !self.chunk.is_empty() {
            out.push_str(&format!(
                "chunk: {}\n",
                self.chunk_version.as_deref().unwrap_or_default()
            ));
            Self::write_stage(&mut out, &self.chunk)?;
        }

        Ok(out)
    }

    fn write_stage(out: &mut String, stage: &StageRecord) -> Result<()> {
        for dir in &stage.directories {
            out.push_str(&format!("directory: {}\n", dir));
        }
        for file in &stage.files {
            out.push_str(&format!("file: {}\n", file.serialize()?));
        }
        Ok(())
    }

    /// Load from disk; `Ok(None)` if no log exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(Some(Self::parse(&text)))
    }

    /// Write the full document atomically: build in memory, write to a
    /// sibling temp file, then rename over the destination. A crash
    /// mid-install leaves the previous log intact.
    pub fn store(&self, path: &Path) -> Result<()> {
        let text = self.to_text()?;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
        temp.write_all(text.as_bytes())
            .map_err(|e| Error::io(path, e))?;
        temp.persist(path)
            .map_err(|e| Error::io(path, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> InstallLog {
        InstallLog {
            version: "2.14.0".to_string(),
            build: 101,
            chunk_version: Some("2.14.0-data".to_string()),
            primary: StageRecord {
                files: vec![
                    FileRecord {
                        relative_path: "addon.bin".to_string(),
                        checksum: "deadbeef".to_string(),
                        byte_length: 1024,
                        last_write_secs: 1_700_000_000,
                    },
                    FileRecord {
                        relative_path: "config/a.ini".to_string(),
                        checksum: "0000cafe".to_string(),
                        byte_length: 37,
                        last_write_secs: 1_700_000_060,
                    },
                ],
                directories: vec!["config".to_string()],
            },
            chunk: StageRecord {
                files: vec![FileRecord {
                    relative_path: "data/pack0".to_string(),
                    checksum: "12345678".to_string(),
                    byte_length: 9000,
                    last_write_secs: 1_700_000_100,
                }],
                directories: vec!["data".to_string()],
            },
        }
    }

    #[test]
    fn test_round_trip_preserves_records() {
        let log = sample_log();
        let text = log.to_text().unwrap();
        let parsed = InstallLog::parse(&text);
        assert_eq!(parsed, log);
    }

    #[test]
    fn test_chunk_key_splits_stages() {
        let text = "# a\n# b\nversion: 1.0\nbuild: 5\nfile: one.txt:aa:1:10\nchunk: 1.0-d\nfile: two.txt:bb:2:20\n";
        let log = InstallLog::parse(text);
        assert_eq!(log.primary.files.len(), 1);
        assert_eq!(log.chunk.files.len(), 1);
        assert_eq!(log.primary.files[0].relative_path, "one.txt");
        assert_eq!(log.chunk.files[0].relative_path, "two.txt");
        assert_eq!(log.chunk_version.as_deref(), Some("1.0-d"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let text = "# a\n# b\nversion: 1.0\nbuild: 5\nfancy_future_key: whatever\nfile: one.txt:aa:1:10\n";
        let log = InstallLog::parse(text);
        assert_eq!(log.build, 5);
        assert_eq!(log.primary.files.len(), 1);
    }

    #[test]
    fn test_malformed_file_lines_skipped() {
        let text = "# a\n# b\nbuild: 5\nfile: broken-line\nfile: ok.txt:aa:12:99\n";
        let log = InstallLog::parse(text);
        assert_eq!(log.primary.files.len(), 1);
        assert_eq!(log.primary.files[0].byte_length, 12);
    }

    #[test]
    fn test_delimiter_in_path_rejected_on_serialize() {
        let mut log = sample_log();
        log.primary.files[0].relative_path = "weird:name.txt".to_string();
        assert!(matches!(log.to_text(), Err(Error::LogFormat(_))));
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("install.log");
        let log = sample_log();
        log.store(&path).unwrap();

        let loaded = InstallLog::load(&path).unwrap().unwrap();
        assert_eq!(loaded, log);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InstallLog::load(&dir.path().join("nope.log"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_no_chunk_line_when_stage_absent() {
        let mut log = sample_log();
        log.chunk_version = None;
        log.chunk = StageRecord::default();
        let text = log.to_text().unwrap();
        assert!(!text.contains("chunk:"));
    }
}
