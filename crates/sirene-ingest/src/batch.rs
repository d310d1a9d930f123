//! Batch accumulation with backpressure
//!
//! The accumulator owns the only buffer of accepted records. When the buffer
//! reaches capacity, [`BatchAccumulator::push`] hands it to the writer and
//! does not return until the write has finished, so the caller cannot pull
//! more input while a batch is in flight. Resident records therefore never
//! exceed one batch.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error};

use crate::error::{IngestError, Result};
use crate::models::{RecordKind, SireneRecord};
use crate::progress::ProgressSink;
use crate::storage::{BatchWriter, WriteOutcome};

/// Batch-level counters of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub batches_dispatched: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    /// Records in committed batches
    pub rows_committed: u64,
    /// Records discarded with a dropped or rolled back batch
    pub rows_lost: u64,
    /// Largest number of records buffered at once
    pub peak_buffered: usize,
}

/// Buffers records and writes them one batch at a time
pub struct BatchAccumulator<W: BatchWriter> {
    writer: W,
    capacity: usize,
    buffer: Vec<W::Record>,
    stats: BatchStats,
    progress: Arc<dyn ProgressSink>,
}

impl<W: BatchWriter> BatchAccumulator<W> {
    pub fn new(writer: W, capacity: usize, progress: Arc<dyn ProgressSink>) -> Result<Self> {
        if capacity == 0 {
            return Err(IngestError::Config(format!(
                "{} batch capacity must be greater than 0",
                Self::kind()
            )));
        }

        Ok(Self {
            writer,
            capacity,
            buffer: Vec::with_capacity(capacity),
            stats: BatchStats::default(),
            progress,
        })
    }

    fn kind() -> RecordKind {
        W::Record::KIND
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records waiting for the next write
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Append an accepted record, writing the batch once it is full
    pub async fn push(&mut self, record: W::Record) {
        self.buffer.push(record);
        self.stats.peak_buffered = self.stats.peak_buffered.max(self.buffer.len());

        if self.buffer.len() >= self.capacity {
            self.flush().await;
        }
    }

    /// Write the trailing partial batch and return the final counters
    pub async fn finish(mut self) -> BatchStats {
        self.flush().await;
        self.stats
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let index = self.stats.batches_dispatched;
        let size = self.buffer.len();
        self.stats.batches_dispatched += 1;

        match self.writer.write_batch(&self.buffer).await {
            WriteOutcome::Committed { rows } => {
                self.stats.batches_committed += 1;
                self.stats.rows_committed += rows as u64;
                debug!(kind = %Self::kind(), batch = index, size, "Batch committed");
                self.progress.advanced(Self::kind(), self.stats.rows_committed);
            },
            WriteOutcome::Failed { policy, cause } => {
                self.stats.batches_failed += 1;
                self.stats.rows_lost += size as u64;
                error!(
                    kind = %Self::kind(),
                    batch = index,
                    size,
                    policy = %policy,
                    error = %cause,
                    "Batch write failed, continuing with next batch"
                );
            },
        }

        self.buffer.clear();
    }
}
