//! SIRENE Ingest Library
//!
//! Streams the INSEE SIRENE stock extracts into a PostgreSQL table.
//!
//! # Pipelines
//!
//! - **Establishments** (`StockEtablissement`): active rows with a SIRET are
//!   upserted in batches of 5000 with one multi-row statement; a failed batch
//!   is logged and dropped
//! - **Legal units** (`StockUniteLegale`): active rows with at least one name
//!   update the name columns of every row with the same SIREN, one
//!   transaction per batch of 1000; a failed batch is rolled back
//!
//! Each pipeline pulls one CSV row at a time and holds at most one batch of
//! accepted records in memory. The source is not read while a batch is being
//! written.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sirene_ingest::{Config, IngestSession, progress::LogProgress};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let session = IngestSession::connect(
//!         &config.database,
//!         config.pipeline.clone(),
//!         Arc::new(LogProgress::default()),
//!     )
//!     .await?;
//!
//!     let summary = session.run(&config.inputs).await?;
//!     println!("{} establishments written", summary.establishments.batches.rows_committed);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batch;
pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod storage;

pub use batch::{BatchAccumulator, BatchStats};
pub use config::{Config, ConfigOverrides, PipelineSettings, TableName};
pub use error::{IngestError, Result};
pub use models::{EstablishmentRecord, LegalUnitRecord, RecordKind, SireneRecord};
pub use parser::CsvRecordSource;
pub use pipeline::{run_pipeline, IngestSession, PipelineStats, RunSummary};
pub use storage::{BatchWriter, FailurePolicy, WriteOutcome};
