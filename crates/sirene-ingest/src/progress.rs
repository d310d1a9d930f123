//! Progress reporting
//!
//! Purely diagnostic: pipelines report the running count of written rows and
//! a sink decides how to surface it.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::models::RecordKind;
use crate::pipeline::PipelineStats;

/// Receives running counts from the pipelines
pub trait ProgressSink: Send + Sync {
    fn started(&self, _kind: RecordKind) {}

    /// Called after every committed batch with the cumulative row count
    fn advanced(&self, kind: RecordKind, rows_written: u64);

    fn finished(&self, _kind: RecordKind, _stats: &PipelineStats) {}

    /// Called instead of `finished` when a fatal error ends the pipeline
    fn aborted(&self, _kind: RecordKind) {}
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn advanced(&self, _kind: RecordKind, _rows_written: u64) {}
}

/// Terminal spinner with the running row count
pub struct ConsoleProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}: {human_pos} rows written ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn started(&self, kind: RecordKind) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(Self::style());
        bar.set_message(kind.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));

        if let Ok(mut slot) = self.bar.lock() {
            if let Some(previous) = slot.replace(bar) {
                previous.abandon();
            }
        }
    }

    fn advanced(&self, _kind: RecordKind, rows_written: u64) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.set_position(rows_written);
            }
        }
    }

    fn finished(&self, kind: RecordKind, stats: &PipelineStats) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.set_position(stats.batches.rows_committed);
                bar.finish_with_message(format!("{} done", kind));
            }
        }
    }

    fn aborted(&self, kind: RecordKind) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.abandon_with_message(format!("{} aborted", kind));
            }
        }
    }
}

/// Reports progress through `tracing`, for non-interactive runs
#[derive(Debug)]
pub struct LogProgress {
    every: u64,
    last_logged: Mutex<u64>,
}

impl LogProgress {
    /// Log at most once per `every` written rows
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            last_logged: Mutex::new(0),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl ProgressSink for LogProgress {
    fn started(&self, kind: RecordKind) {
        if let Ok(mut last) = self.last_logged.lock() {
            *last = 0;
        }
        info!(kind = %kind, "Pipeline started");
    }

    fn advanced(&self, kind: RecordKind, rows_written: u64) {
        if let Ok(mut last) = self.last_logged.lock() {
            if rows_written / self.every > *last / self.every {
                *last = rows_written;
                info!(kind = %kind, rows_written, "Progress");
            }
        }
    }

    fn finished(&self, kind: RecordKind, stats: &PipelineStats) {
        info!(
            kind = %kind,
            rows_written = stats.batches.rows_committed,
            "Pipeline finished"
        );
    }

    fn aborted(&self, kind: RecordKind) {
        warn!(kind = %kind, "Pipeline aborted");
    }
}
