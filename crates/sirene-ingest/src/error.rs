//! Error types for SIRENE ingestion
//!
//! Only failures that end a run live here. Batch write failures are contained
//! by the writers and reported through [`crate::storage::WriteOutcome`].

use std::path::PathBuf;

use crate::models::RecordKind;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Fatal ingestion errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to open {kind} input {path}: {source}")]
    Open {
        kind: RecordKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} input is missing required columns: {}", missing.join(", "))]
    MissingColumns {
        kind: RecordKind,
        missing: Vec<String>,
    },

    #[error("Failed to read {kind} input at line {line}: {source}")]
    Read {
        kind: RecordKind,
        line: u64,
        #[source]
        source: csv_async::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IngestError {
    /// Pipeline stage that failed, for the single user-facing error line
    pub fn stage(&self) -> &'static str {
        match self {
            IngestError::Open { .. } => "open",
            IngestError::MissingColumns { .. } => "header",
            IngestError::Read { .. } => "read",
            IngestError::Config(_) => "config",
            IngestError::Database(_) => "connect",
        }
    }

    /// Record kind of the pipeline that failed, if any
    pub fn kind(&self) -> Option<RecordKind> {
        match self {
            IngestError::Open { kind, .. }
            | IngestError::MissingColumns { kind, .. }
            | IngestError::Read { kind, .. } => Some(*kind),
            IngestError::Config(_) | IngestError::Database(_) => None,
        }
    }
}
