use std::path::PathBuf;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tagged error type for the installer engine.
///
/// Cancellation is carried as its own variant so callers can tell an aborted
/// run from a genuine fault, and every fatal variant maps to a categorized
/// user-facing message via [`Error::user_message`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another install or removal already holds the busy flag.
    #[error("another install or removal is already in progress")]
    Busy,

    /// Cooperative cancellation observed at a phase boundary.
    #[error("operation cancelled during {0}")]
    Cancelled(String),

    /// Manifest or payload could not be fetched from the remote source.
    #[error("network fetch failed: {0}")]
    Network(#[source] anyhow::Error),

    /// The archive is missing an entry the stage requires (sentinel, forced file).
    #[error("archive is missing expected entry '{0}'")]
    ArchiveIntegrity(String),

    /// The archive could not be opened or failed the safety preflight.
    #[error("archive rejected: {0}")]
    ArchiveRejected(String),

    /// A forced replacement target could not be deleted after all retries.
    #[error("cannot replace '{path}': file is in use")]
    TargetInUse {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not enough free space on the content root volume for the extraction.
    #[error("insufficient disk space: need {required} bytes, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    /// An IO operation failed after exhausting its transient retry budget.
    #[error("io failure at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The installation log violates a serialization invariant.
    #[error("installation log error: {0}")]
    LogFormat(String),

    /// The remote manifest contained no usable version records.
    #[error("remote manifest contains no versions")]
    EmptyManifest,
}

impl Error {
    /// Wrap an IO failure with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Categorized message suitable for direct display to the user.
    pub fn user_message(&self) -> String {
        match self {
            Error::Busy => "Another update is already running. Wait for it to finish.".to_string(),
            Error::Cancelled(_) => "The update was cancelled.".to_string(),
            Error::Network(_) | Error::EmptyManifest => {
                "The update could not be downloaded. Check your internet connection and try again."
                    .to_string()
            }
            Error::ArchiveIntegrity(_) | Error::ArchiveRejected(_) => {
                "The downloaded package is damaged or incomplete. Try the update again.".to_string()
            }
            Error::TargetInUse { path, .. } => format!(
                "'{}' could not be replaced because it is in use. Is the application still running?",
                path.display()
            ),
            Error::InsufficientSpace {
                required,
                available,
            } => format!(
                "Not enough free disk space: {} bytes needed, {} available.",
                required, available
            ),
            Error::Io { path, .. } => format!(
                "A file operation on '{}' kept failing. Close programs that may be using the folder and try again.",
                path.display()
            ),
            Error::LogFormat(_) => {
                "The installation record is damaged. A full reinstall will be performed.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_detection() {
        assert!(Error::Cancelled("install".to_string()).is_cancelled());
        assert!(!Error::Busy.is_cancelled());
    }

    #[test]
    fn test_target_in_use_message_names_path() {
        let err = Error::TargetInUse {
            path: PathBuf::from("addon.bin"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
        };
        let msg = err.user_message();
        assert!(msg.contains("addon.bin"));
        assert!(msg.contains("in use"));
    }

    #[test]
    fn test_network_message_mentions_connection() {
        let err = Error::Network(anyhow::anyhow!("connection reset"));
        assert!(err.user_message().contains("internet connection"));
    }
}
