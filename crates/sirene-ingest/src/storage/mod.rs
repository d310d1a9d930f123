//! Batch writers
//!
//! A [`BatchWriter`] applies one batch of records to the store and reports a
//! [`WriteOutcome`]. Write failures never propagate as errors: each writer has
//! a named [`FailurePolicy`] describing what happened to a batch that could
//! not be written, and the pipeline carries on with the next batch.
//!
//! - [`PgUpsertWriter`]: establishments, one multi-row upsert per batch,
//!   failed batches are dropped
//! - [`PgUpdateWriter`]: legal units, one transaction per batch, failed
//!   batches are rolled back

pub mod update;
pub mod upsert;

pub use update::PgUpdateWriter;
pub use upsert::PgUpsertWriter;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::SireneRecord;

/// Opaque cause of a failed batch write
pub type WriteError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a writer does with a batch it failed to write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The statement failed and the batch is discarded, nothing is retried
    DropBatch,
    /// The batch transaction is rolled back, none of its rows persist
    RollbackBatch,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::DropBatch => "drop_batch",
            FailurePolicy::RollbackBatch => "rollback_batch",
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of writing one batch
#[derive(Debug)]
pub enum WriteOutcome {
    Committed { rows: usize },
    Failed { policy: FailurePolicy, cause: WriteError },
}

impl WriteOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed { .. })
    }
}

/// Applies batches of one record type to the store
#[async_trait]
pub trait BatchWriter: Send {
    type Record: SireneRecord;

    /// Policy applied when `write_batch` fails
    fn failure_policy(&self) -> FailurePolicy;

    /// Write one batch; errors are reported in the outcome, never raised
    async fn write_batch(&mut self, batch: &[Self::Record]) -> WriteOutcome;
}

/// Keep only the last occurrence of each key, preserving order
///
/// A single Postgres `INSERT .. ON CONFLICT DO UPDATE` cannot touch the same
/// row twice, so duplicates inside one batch are collapsed up front. The
/// survivor is the record that would have been written last.
pub fn collapse_duplicate_keys<T: SireneRecord>(batch: &[T]) -> Vec<&T> {
    let mut last_seen: HashMap<&str, usize> = HashMap::with_capacity(batch.len());
    for (i, record) in batch.iter().enumerate() {
        last_seen.insert(record.key(), i);
    }

    if last_seen.len() == batch.len() {
        return batch.iter().collect();
    }

    batch
        .iter()
        .enumerate()
        .filter(|(i, record)| last_seen.get(record.key()) == Some(i))
        .map(|(_, record)| record)
        .collect()
}
