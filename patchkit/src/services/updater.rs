//! Update orchestrator: version check, payload fetch and staged installation.
//!
//! One [`Updater`] instance owns one installation target. Install and removal
//! are single-flight, guarded by an atomic busy flag; the network side runs on
//! the async runtime while all disk mutation happens on the blocking pool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::config::InstallerConfig;
use crate::core::task_control::TaskControl;
use crate::error::{Error, Result};
use crate::fetch::{FetchCache, RemoteSource};
use crate::install::context::InstallContext;
use crate::install::log::InstallLog;
use crate::install::progress::ProgressContext;
use crate::install::recycle::Recycler;
use crate::install::stage::StageProcessor;
use crate::models::{
    AutoUpdatePolicy, CheckOutcome, InstallReport, ProgressSink, StageReport, VersionRecord,
};
use crate::services::manifest;

/// Overall fraction reserved for fetching before disk work starts.
const FETCH_SPAN: f64 = 0.05;

/// Persisted record of which build is installed, kept by the host application
/// separately from the installation log. The two are cross-checked in
/// [`InstallContext::load`].
pub trait BuildStore: Send + Sync {
    fn installed_build(&self) -> Option<i64>;
    fn set_installed_build(&self, build: Option<i64>) -> std::io::Result<()>;
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct BuildStoreDocument {
    installed_build: Option<i64>,
}

/// JSON-file-backed [`BuildStore`].
pub struct FileBuildStore {
    path: PathBuf,
}

impl FileBuildStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BuildStore for FileBuildStore {
    fn installed_build(&self) -> Option<i64> {
        let text = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<BuildStoreDocument>(&text) {
            Ok(doc) => doc.installed_build,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "unreadable build store");
                None
            }
        }
    }

    fn set_installed_build(&self, build: Option<i64>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = BuildStoreDocument {
            installed_build: build,
        };
        let text = serde_json::to_string_pretty(&doc)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        fs::write(&self.path, text)
    }
}

/// Releases the busy flag when the operation ends, success or failure.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The engine's front door. Owns the config, the remote byte cache, the
/// cancellation handle and the busy flag for one installation target.
pub struct Updater<S> {
    config: InstallerConfig,
    store: Arc<dyn BuildStore>,
    cache: FetchCache<S>,
    control: TaskControl,
    busy: AtomicBool,
    current: Mutex<Option<VersionRecord>>,
    sink: Option<ProgressSink>,
}

impl<S: RemoteSource + 'static> Updater<S> {
    pub fn new(config: InstallerConfig, source: S, store: Arc<dyn BuildStore>) -> Self {
        let ttl = Duration::from_secs(config.fetch_ttl_secs);
        Self {
            config,
            store,
            cache: FetchCache::new(source, ttl),
            control: TaskControl::new(),
            busy: AtomicBool::new(false),
            current: Mutex::new(None),
            sink: None,
        }
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Cancellation handle for the in-flight operation. Callers reset it
    /// before starting a fresh operation.
    pub fn control(&self) -> TaskControl {
        self.control.clone()
    }

    pub fn installed_build(&self) -> Option<i64> {
        self.store.installed_build()
    }

    /// The version record of the most recent install attempt, if any.
    pub fn current(&self) -> Option<VersionRecord> {
        self.current.lock().ok().and_then(|guard| guard.clone())
    }

    /// Fetch and parse the remote manifest; newest first. Read-only, so it
    /// does not take the busy flag.
    pub async fn check_versions(&self) -> Result<Vec<VersionRecord>> {
        self.fetch_versions().await
    }

    /// Run one full check-and-install cycle under `policy`.
    ///
    /// `force` permits a downgrade and a reinstall of the currently installed
    /// build; without it both report [`CheckOutcome::UpToDate`].
    pub async fn check_and_install(
        &self,
        policy: AutoUpdatePolicy,
        force: bool,
    ) -> Result<CheckOutcome> {
        let _guard = self.acquire_busy()?;
        let installed = self.store.installed_build();
        let up_to_date = CheckOutcome::UpToDate {
            installed_build: installed.unwrap_or(0),
        };

        if policy == AutoUpdatePolicy::Disabled {
            return Ok(up_to_date);
        }

        let versions = self.fetch_versions().await?;
        let Some(candidate) = manifest::select_candidate(&versions, policy) else {
            tracing::info!(?policy, "no version qualifies under the current policy");
            return Ok(up_to_date);
        };

        if let Some(installed_build) = installed {
            if candidate.build == installed_build && !force {
                return Ok(up_to_date);
            }
            let here = manifest::installed_record(&versions, installed_build);
            let is_downgrade = !here.is_custom_build
                && manifest::compare_version_strings(&candidate.version, &here.version).is_lt();
            if is_downgrade && !force {
                tracing::info!(
                    candidate = candidate.version,
                    installed = here.version,
                    "skipping downgrade without force"
                );
                return Ok(up_to_date);
            }
        }

        let report = self.install_inner(candidate.clone()).await?;
        Ok(CheckOutcome::Installed(report))
    }

    /// Install a specific version record, bypassing policy selection.
    pub async fn install(&self, record: &VersionRecord) -> Result<InstallReport> {
        let _guard = self.acquire_busy()?;
        self.install_inner(record.clone()).await
    }

    /// Remove the installed content: every logged file is moved to the
    /// recoverable trash, the log is deleted and the recorded build cleared.
    pub async fn remove(&self) -> Result<(StageReport, StageReport)> {
        let _guard = self.acquire_busy()?;
        self.control.checkpoint("removal")?;

        let config = self.config.clone();
        let control = self.control.clone();
        let store = Arc::clone(&self.store);
        let reports = tokio::task::spawn_blocking(move || {
            remove_on_disk(&config, &control, store.as_ref())
        })
        .await
        .map_err(|e| join_failure(&self.config.content_root, e))??;

        self.swap_current(None);
        Ok(reports)
    }

    fn acquire_busy(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::Busy)?;
        Ok(BusyGuard(&self.busy))
    }

    async fn fetch_versions(&self) -> Result<Vec<VersionRecord>> {
        self.control.checkpoint("manifest fetch")?;
        let bytes = self
            .cache
            .fetch(&self.config.manifest_url)
            .await
            .map_err(Error::Network)?
            .ok_or_else(|| {
                Error::Network(anyhow!(
                    "version manifest not found at '{}'",
                    self.config.manifest_url
                ))
            })?;
        manifest::parse_manifest(&bytes)
    }

    async fn install_inner(&self, record: VersionRecord) -> Result<InstallReport> {
        let previous = self.swap_current(Some(record.clone()));
        match self.run_install(&record).await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.swap_current(previous);
                Err(e)
            }
        }
    }

    async fn run_install(&self, record: &VersionRecord) -> Result<InstallReport> {
        let overall = ProgressContext::new(self.sink.clone(), 0.0, 1.0);
        overall.milestone("fetch", 0.0, &format!("downloading {}", record.version));

        self.control.checkpoint("payload fetch")?;
        let artifact = self
            .fetch_payload(&self.config.payload_url_for(&record.version))
            .await?;
        let chunk = match &record.chunk_version {
            Some(chunk_version) => Some(
                self.fetch_payload(&self.config.chunk_payload_url_for(chunk_version))
                    .await?,
            ),
            None => None,
        };
        overall.milestone("fetch", FETCH_SPAN, "download complete");

        let config = self.config.clone();
        let control = self.control.clone();
        let store = Arc::clone(&self.store);
        let sink = self.sink.clone();
        let record = record.clone();
        let report = tokio::task::spawn_blocking(move || {
            install_on_disk(
                &config,
                &control,
                sink,
                store.as_ref(),
                &record,
                &artifact,
                chunk.as_deref().map(|v| v.as_slice()),
            )
        })
        .await
        .map_err(|e| join_failure(&self.config.content_root, e))??;

        overall.milestone("commit", 1.0, "installed");
        Ok(report)
    }

    async fn fetch_payload(&self, url: &str) -> Result<Arc<Vec<u8>>> {
        self.cache
            .fetch(url)
            .await
            .map_err(Error::Network)?
            .ok_or_else(|| Error::Network(anyhow!("payload not found at '{}'", url)))
    }

    fn swap_current(&self, value: Option<VersionRecord>) -> Option<VersionRecord> {
        match self.current.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, value),
            Err(_) => None,
        }
    }
}

fn join_failure(root: &Path, e: tokio::task::JoinError) -> Error {
    Error::io(
        root,
        std::io::Error::other(format!("install task failed: {e}")),
    )
}

/// Blocking half of an install: diff both stages against the prior log,
/// mutate the content root, then commit the new log and recorded build.
fn install_on_disk(
    config: &InstallerConfig,
    control: &TaskControl,
    sink: Option<ProgressSink>,
    store: &dyn BuildStore,
    record: &VersionRecord,
    artifact: &[u8],
    chunk: Option<&[u8]>,
) -> Result<InstallReport> {
    let mut recycler = Recycler::new(&config.recycle_root());
    let ctx = InstallContext::load(config, store.installed_build(), &mut recycler)?;

    let disk_span = 1.0 - FETCH_SPAN - 0.03;
    let (artifact_span, chunk_span) = if chunk.is_some() {
        (disk_span * 0.6, disk_span * 0.4)
    } else {
        (disk_span, 0.0)
    };

    let artifact_progress = ProgressContext::new(sink.clone(), FETCH_SPAN, artifact_span);
    let processor = StageProcessor::new(config, control, artifact_progress, "artifact");
    let (primary, artifact_report) =
        processor.apply(&ctx.log.primary, &config.forced_paths, artifact, &mut recycler)?;

    let chunk_progress =
        ProgressContext::new(sink.clone(), FETCH_SPAN + artifact_span, chunk_span);
    let processor = StageProcessor::new(config, control, chunk_progress, "chunk");
    let (chunk_record, chunk_report) = processor.apply(
        &ctx.log.chunk,
        &[],
        chunk.unwrap_or_default(),
        &mut recycler,
    )?;

    // Commit point: log first, then the recorded build. A crash between the
    // two leaves a mismatch the next run resolves as a full reinstall.
    let log = InstallLog {
        version: record.version.clone(),
        build: record.build,
        chunk_version: record.chunk_version.clone(),
        primary,
        chunk: chunk_record,
    };
    log.store(&config.log_path())?;
    store
        .set_installed_build(Some(record.build))
        .map_err(|e| Error::io(&config.content_root, e))?;

    tracing::info!(
        build = record.build,
        version = record.version,
        trusted_prior = ctx.trusted,
        "install committed"
    );
    Ok(InstallReport {
        build: record.build,
        version: record.version.clone(),
        chunk_version: record.chunk_version.clone(),
        artifact: artifact_report,
        chunk: chunk_report,
    })
}

/// Blocking half of a removal: empty-archive stage runs recycle everything
/// both stages logged, then the log and recorded build are cleared.
fn remove_on_disk(
    config: &InstallerConfig,
    control: &TaskControl,
    store: &dyn BuildStore,
) -> Result<(StageReport, StageReport)> {
    let mut recycler = Recycler::new(&config.recycle_root());
    let Some(log) = InstallLog::load(&config.log_path())? else {
        store
            .set_installed_build(None)
            .map_err(|e| Error::io(&config.content_root, e))?;
        return Ok((StageReport::default(), StageReport::default()));
    };

    let processor =
        StageProcessor::new(config, control, ProgressContext::new(None, 0.0, 0.5), "artifact");
    let (_, artifact_report) = processor.apply(&log.primary, &[], &[], &mut recycler)?;

    let processor =
        StageProcessor::new(config, control, ProgressContext::new(None, 0.5, 0.5), "chunk");
    let (_, chunk_report) = processor.apply(&log.chunk, &[], &[], &mut recycler)?;

    let log_path = config.log_path();
    if log_path.exists() {
        fs::remove_file(&log_path).map_err(|e| Error::io(&log_path, e))?;
    }
    store
        .set_installed_build(None)
        .map_err(|e| Error::io(&config.content_root, e))?;

    tracing::info!(recycled = recycler.moved(), "removal complete");
    Ok((artifact_report, chunk_report))
}
