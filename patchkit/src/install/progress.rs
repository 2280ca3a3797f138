//! Phase-weighted progress reporting.
//!
//! Each stage owns a slice `[base, base + span]` of the overall fraction and
//! splits it across its phases by fixed weights (stale scan 1%, extraction up
//! to 90%, obsolete sweep 3%, directory cleanup 3%, remainder for commit).
//! Composition happens through explicit weights instead of nested fractional
//! callbacks.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::{ProgressEvent, ProgressSink};

/// Minimum interval between mid-phase emits
const EMIT_INTERVAL: Duration = Duration::from_millis(120);

/// The four on-disk phases of a stage application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    StaleScan,
    Extract,
    ObsoleteSweep,
    DirCleanup,
}

impl StagePhase {
    pub fn name(self) -> &'static str {
        match self {
            StagePhase::StaleScan => "stale_scan",
            StagePhase::Extract => "extract",
            StagePhase::ObsoleteSweep => "obsolete_sweep",
            StagePhase::DirCleanup => "dir_cleanup",
        }
    }

    /// Offset of this phase within the stage's span.
    fn base(self) -> f64 {
        match self {
            StagePhase::StaleScan => 0.0,
            StagePhase::Extract => 0.01,
            StagePhase::ObsoleteSweep => 0.91,
            StagePhase::DirCleanup => 0.94,
        }
    }

    /// Share of the stage's span this phase may consume.
    fn weight(self) -> f64 {
        match self {
            StagePhase::StaleScan => 0.01,
            StagePhase::Extract => 0.90,
            StagePhase::ObsoleteSweep => 0.03,
            StagePhase::DirCleanup => 0.03,
        }
    }
}

/// Progress reporter for one slice of the overall operation.
pub struct ProgressContext {
    sink: Option<ProgressSink>,
    base: f64,
    span: f64,
    last_emit: Mutex<Instant>,
}

impl ProgressContext {
    pub fn new(sink: Option<ProgressSink>, base: f64, span: f64) -> Self {
        Self {
            sink,
            base,
            span,
            last_emit: Mutex::new(Instant::now() - EMIT_INTERVAL),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, 0.0, 1.0)
    }

    /// Report phase progress; mid-phase events are rate limited so tight
    /// extraction loops do not flood the sink.
    pub fn phase(&self, phase: StagePhase, completed: u64, total: u64, current_file: Option<&str>) {
        let terminal = completed == 0 || completed >= total;
        if !terminal && !self.should_emit() {
            return;
        }
        let ratio = if total > 0 {
            (completed as f64 / total as f64).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let fraction = self.base + self.span * (phase.base() + phase.weight() * ratio);
        self.emit(ProgressEvent {
            phase: phase.name().to_string(),
            completed,
            total,
            fraction: fraction.clamp(0.0, 1.0),
            current_file: current_file.map(|s| s.to_string()),
            message: None,
        });
    }

    /// Unthrottled milestone event at an absolute overall fraction.
    pub fn milestone(&self, phase: &str, fraction: f64, message: &str) {
        self.emit(ProgressEvent {
            phase: phase.to_string(),
            completed: 0,
            total: 0,
            fraction: fraction.clamp(0.0, 1.0),
            current_file: None,
            message: Some(message.to_string()),
        });
    }

    fn should_emit(&self) -> bool {
        let Ok(mut guard) = self.last_emit.lock() else {
            return true;
        };
        if guard.elapsed() < EMIT_INTERVAL {
            return false;
        }
        *guard = Instant::now();
        true
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = self.sink.as_ref() {
            sink(event);
        }
    }
}
