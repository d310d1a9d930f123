//! Streaming CSV record source
//!
//! Wraps a `csv_async` reader over any `AsyncRead`. The header row is checked
//! once against the columns a record type needs; after that rows are pulled
//! one at a time with [`CsvRecordSource::next_row`], reusing a single record
//! buffer. Nothing is read ahead of the consumer, so a consumer that is busy
//! writing a batch holds the source still.
//!
//! Header names are trimmed; field values are passed on exactly as read.

use std::path::Path;

use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord, Trim};
use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::models::{RecordKind, SireneRecord};

/// Internal read buffer of the CSV reader
const READ_BUFFER_CAPACITY: usize = 1 << 20;

/// Positions of the required columns inside the header
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    names: &'static [&'static str],
    positions: Vec<usize>,
}

impl ColumnIndex {
    /// Locate every required column in `header`
    ///
    /// Extra columns are ignored. All absent columns are reported together.
    pub fn resolve(
        kind: RecordKind,
        header: &StringRecord,
        required: &'static [&'static str],
    ) -> Result<Self> {
        let mut positions = Vec::with_capacity(required.len());
        let mut missing = Vec::new();

        for name in required {
            match header.iter().position(|h| h == *name) {
                Some(pos) => positions.push(pos),
                None => missing.push((*name).to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(IngestError::MissingColumns { kind, missing });
        }

        Ok(Self {
            names: required,
            positions,
        })
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|n| *n == name)
            .map(|i| self.positions[i])
    }
}

/// One raw CSV row, addressed by header name
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a ColumnIndex,
    record: &'a StringRecord,
    line: u64,
}

impl<'a> Row<'a> {
    pub fn new(columns: &'a ColumnIndex, record: &'a StringRecord, line: u64) -> Self {
        Self {
            columns,
            record,
            line,
        }
    }

    /// Raw value of a required column, empty if the column is unknown
    pub fn get(&self, name: &str) -> &'a str {
        debug_assert!(
            self.columns.position(name).is_some(),
            "column {name} was not declared as required"
        );
        self.columns
            .position(name)
            .and_then(|pos| self.record.get(pos))
            .unwrap_or("")
    }

    /// Line of the input where the row starts
    pub fn line(&self) -> u64 {
        self.line
    }
}

/// Lazy, non-restartable sequence of rows from one CSV stream
pub struct CsvRecordSource<R> {
    kind: RecordKind,
    reader: AsyncReader<R>,
    columns: ColumnIndex,
    record: StringRecord,
    rows_read: u64,
}

impl<R> CsvRecordSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Read and validate the header of `reader`
    pub async fn open(
        reader: R,
        kind: RecordKind,
        required: &'static [&'static str],
        delimiter: u8,
    ) -> Result<Self> {
        let mut reader = AsyncReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .trim(Trim::Headers)
            .flexible(false)
            .buffer_capacity(READ_BUFFER_CAPACITY)
            .create_reader(reader);

        let header = reader
            .headers()
            .await
            .map_err(|source| IngestError::Read {
                kind,
                line: 1,
                source,
            })?
            .clone();
        let columns = ColumnIndex::resolve(kind, &header, required)?;

        debug!(
            kind = %kind,
            header_columns = header.len(),
            "Validated input header"
        );

        Ok(Self {
            kind,
            reader,
            columns,
            record: StringRecord::new(),
            rows_read: 0,
        })
    }

    /// Open a source shaped for record type `T`
    pub async fn for_record<T: SireneRecord>(reader: R, delimiter: u8) -> Result<Self> {
        Self::open(reader, T::KIND, T::REQUIRED_COLUMNS, delimiter).await
    }

    /// Pull the next row, `Ok(None)` once the stream is exhausted
    ///
    /// Any read failure (malformed row, invalid UTF-8, I/O) is fatal for the
    /// stream.
    pub async fn next_row(&mut self) -> Result<Option<Row<'_>>> {
        let has_row = self
            .reader
            .read_record(&mut self.record)
            .await
            .map_err(|source| IngestError::Read {
                kind: self.kind,
                line: self.reader.position().line(),
                source,
            })?;

        if !has_row {
            return Ok(None);
        }

        self.rows_read += 1;
        let line = self
            .record
            .position()
            .map(|p| p.line())
            .unwrap_or(self.rows_read + 1);

        Ok(Some(Row::new(&self.columns, &self.record, line)))
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Data rows returned so far (header excluded)
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

impl CsvRecordSource<tokio::fs::File> {
    /// Open a local extract for record type `T`
    pub async fn from_path<T: SireneRecord>(path: &Path, delimiter: u8) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| IngestError::Open {
                kind: T::KIND,
                path: path.to_path_buf(),
                source,
            })?;
        Self::for_record::<T>(file, delimiter).await
    }
}
