//! Pipeline orchestration
//!
//! Source -> filter/project -> accumulator -> writer, one record type per
//! run. [`IngestSession`] carries everything the pipelines share (store pool,
//! settings, progress sink) and runs the establishment and legal unit
//! pipelines one after the other.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::io::AsyncRead;
use tracing::{info, info_span, Instrument};

use crate::batch::{BatchAccumulator, BatchStats};
use crate::config::{DatabaseConfig, InputFiles, PipelineSettings};
use crate::error::Result;
use crate::models::{EstablishmentRecord, LegalUnitRecord, RecordKind, SireneRecord};
use crate::parser::CsvRecordSource;
use crate::progress::ProgressSink;
use crate::storage::{BatchWriter, PgUpdateWriter, PgUpsertWriter};

/// Counters of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub kind: RecordKind,
    /// Data rows read from the source
    pub rows_read: u64,
    /// Rows that passed the predicate
    pub rows_accepted: u64,
    /// Rows excluded by the predicate
    pub rows_rejected: u64,
    pub batches: BatchStats,
}

impl PipelineStats {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            rows_read: 0,
            rows_accepted: 0,
            rows_rejected: 0,
            batches: BatchStats::default(),
        }
    }
}

/// Result of a full run over both extracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub establishments: PipelineStats,
    pub legal_units: PipelineStats,
}

/// Drain `source` through `accumulator`
///
/// Rows are pulled only when the previous record has been handled, so while
/// the accumulator is writing a batch the source is not read. A read error
/// ends the run; write failures are absorbed by the accumulator.
pub async fn run_pipeline<R, W>(
    mut source: CsvRecordSource<R>,
    mut accumulator: BatchAccumulator<W>,
    progress: &dyn ProgressSink,
) -> Result<PipelineStats>
where
    R: AsyncRead + Unpin + Send,
    W: BatchWriter,
{
    let kind = W::Record::KIND;
    let span = info_span!("pipeline", kind = %kind, batch_capacity = accumulator.capacity());

    async move {
        progress.started(kind);
        let mut stats = PipelineStats::new(kind);

        if let Err(e) = drain(&mut source, &mut accumulator, &mut stats).await {
            progress.aborted(kind);
            return Err(e);
        }

        stats.rows_read = source.rows_read();
        stats.batches = accumulator.finish().await;

        info!(
            rows_read = stats.rows_read,
            rows_accepted = stats.rows_accepted,
            rows_written = stats.batches.rows_committed,
            batches_failed = stats.batches.batches_failed,
            "Pipeline complete"
        );
        progress.finished(kind, &stats);

        Ok(stats)
    }
    .instrument(span)
    .await
}

/// Filter every row into the accumulator until the source is exhausted
async fn drain<R, W>(
    source: &mut CsvRecordSource<R>,
    accumulator: &mut BatchAccumulator<W>,
    stats: &mut PipelineStats,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: BatchWriter,
{
    while let Some(row) = source.next_row().await? {
        match W::Record::from_row(&row) {
            Some(record) => {
                stats.rows_accepted += 1;
                accumulator.push(record).await;
            },
            None => stats.rows_rejected += 1,
        }
    }
    Ok(())
}

/// Shared context of one ingestion run
pub struct IngestSession {
    db: PgPool,
    settings: PipelineSettings,
    progress: Arc<dyn ProgressSink>,
}

impl IngestSession {
    pub fn new(db: PgPool, settings: PipelineSettings, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            db,
            settings,
            progress,
        }
    }

    /// Open the store pool described by `database`
    pub async fn connect(
        database: &DatabaseConfig,
        settings: PipelineSettings,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        settings.validate()?;

        let db = PgPoolOptions::new()
            .max_connections(database.max_connections)
            .acquire_timeout(Duration::from_secs(database.connect_timeout_secs))
            .connect(&database.url)
            .await?;

        info!(table = %settings.table, "Connected to store");

        Ok(Self::new(db, settings, progress))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Upsert active establishments from `reader`
    pub async fn ingest_establishments<R>(&self, reader: R) -> Result<PipelineStats>
    where
        R: AsyncRead + Unpin + Send,
    {
        let source =
            CsvRecordSource::for_record::<EstablishmentRecord>(reader, self.settings.delimiter)
                .await?;
        self.run_establishments(source).await
    }

    /// Update names of active legal units from `reader`
    pub async fn ingest_legal_units<R>(&self, reader: R) -> Result<PipelineStats>
    where
        R: AsyncRead + Unpin + Send,
    {
        let source =
            CsvRecordSource::for_record::<LegalUnitRecord>(reader, self.settings.delimiter).await?;
        self.run_legal_units(source).await
    }

    pub async fn ingest_establishments_file(&self, path: &Path) -> Result<PipelineStats> {
        info!(path = %path.display(), "Reading establishment extract");
        let source =
            CsvRecordSource::from_path::<EstablishmentRecord>(path, self.settings.delimiter).await?;
        self.run_establishments(source).await
    }

    pub async fn ingest_legal_units_file(&self, path: &Path) -> Result<PipelineStats> {
        info!(path = %path.display(), "Reading legal unit extract");
        let source =
            CsvRecordSource::from_path::<LegalUnitRecord>(path, self.settings.delimiter).await?;
        self.run_legal_units(source).await
    }

    /// Establishments first, then legal units
    ///
    /// The legal unit extract is not opened unless the establishment pipeline
    /// completed.
    pub async fn run(&self, inputs: &InputFiles) -> Result<RunSummary> {
        let establishments = self.ingest_establishments_file(&inputs.establishments).await?;
        let legal_units = self.ingest_legal_units_file(&inputs.legal_units).await?;

        Ok(RunSummary {
            establishments,
            legal_units,
        })
    }

    /// Release the store pool
    pub async fn close(self) {
        self.db.close().await;
    }

    async fn run_establishments<R>(&self, source: CsvRecordSource<R>) -> Result<PipelineStats>
    where
        R: AsyncRead + Unpin + Send,
    {
        let writer = PgUpsertWriter::new(self.db.clone(), self.settings.table.clone());
        let accumulator = BatchAccumulator::new(
            writer,
            self.settings.establishment_batch_size,
            self.progress.clone(),
        )?;
        run_pipeline(source, accumulator, self.progress.as_ref()).await
    }

    async fn run_legal_units<R>(&self, source: CsvRecordSource<R>) -> Result<PipelineStats>
    where
        R: AsyncRead + Unpin + Send,
    {
        let writer = PgUpdateWriter::new(self.db.clone(), self.settings.table.clone());
        let accumulator = BatchAccumulator::new(
            writer,
            self.settings.legal_unit_batch_size,
            self.progress.clone(),
        )?;
        run_pipeline(source, accumulator, self.progress.as_ref()).await
    }
}
