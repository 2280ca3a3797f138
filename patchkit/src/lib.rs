//! Differential installer engine for zip-packaged content.
//!
//! The engine keeps an installation log (one line per installed file with a
//! CRC32 checksum) inside the content root and diffs it against freshly
//! downloaded archives, so an update only writes what actually changed.
//! Replaced, obsolete and user-edited files are never deleted; they move into
//! a timestamped batch under a recoverable trash directory.
//!
//! [`services::updater::Updater`] is the front door: give it an
//! [`config::InstallerConfig`] describing the target, a
//! [`fetch::RemoteSource`] for bytes and a
//! [`services::updater::BuildStore`] for the recorded build number, then run
//! `check_and_install`.

pub mod config;
pub mod core;
pub mod error;
pub mod fetch;
pub mod install;
pub mod models;
pub mod services;

pub use config::InstallerConfig;
pub use error::{Error, Result};
pub use fetch::{FetchCache, HttpSource, RemoteSource};
pub use models::{
    AutoUpdatePolicy, CheckOutcome, InstallReport, ProgressEvent, ProgressSink, StageReport,
    VersionRecord,
};
pub use services::updater::{BuildStore, FileBuildStore, Updater};
