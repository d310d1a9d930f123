//! Configuration management
//!
//! Values come from the environment (a `.env` file is honoured) with the
//! defaults below; the CLI can override individual fields before
//! [`Config::validate`] runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::storage::upsert::BINDS_PER_ROW;

// ============================================================================
// Defaults
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/sirene";

/// One connection: only the active writer talks to the store.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default target table.
pub const DEFAULT_TABLE: &str = "etablissements";

/// Default upsert batch capacity for establishments.
pub const DEFAULT_ESTABLISHMENT_BATCH_SIZE: usize = 5000;

/// Default update batch capacity for legal units.
pub const DEFAULT_LEGAL_UNIT_BATCH_SIZE: usize = 1000;

/// Default establishment extract location.
pub const DEFAULT_ESTABLISHMENT_FILE: &str = "./files/StockEtablissement_utf8.csv";

/// Default legal unit extract location.
pub const DEFAULT_LEGAL_UNIT_FILE: &str = "./files/StockUniteLegale_utf8.csv";

/// Default field delimiter.
pub const DEFAULT_DELIMITER: u8 = b',';

/// Bind parameters Postgres accepts in one statement.
pub const POSTGRES_MAX_BINDS: usize = u16::MAX as usize;

/// Validated, optionally schema-qualified SQL table name
///
/// Table names are spliced into statements, so only plain identifiers are
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        let mut parts = name.split('.');
        let valid = match (parts.next(), parts.next(), parts.next()) {
            (Some(table), None, None) => is_identifier(table),
            (Some(schema), Some(table), None) => is_identifier(schema) && is_identifier(table),
            _ => false,
        };

        if !valid {
            return Err(IngestError::Config(format!("Invalid table name: {:?}", name)));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TableName {
    type Error = IngestError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub pipeline: PipelineSettings,
    pub inputs: InputFiles,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Parameters the pipelines consume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub table: TableName,
    pub establishment_batch_size: usize,
    pub legal_unit_batch_size: usize,
    pub delimiter: u8,
}

/// Local extract paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFiles {
    pub establishments: PathBuf,
    pub legal_units: PathBuf,
}

/// Values given on the command line, applied over the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub table: Option<String>,
    pub establishment_file: Option<PathBuf>,
    pub legal_unit_file: Option<PathBuf>,
    pub establishment_batch_size: Option<usize>,
    pub legal_unit_batch_size: Option<usize>,
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        Self::load_with(ConfigOverrides::default())
    }

    /// Like [`Config::load`], with `overrides` taking precedence over the
    /// environment. Validation runs once everything is merged.
    pub fn load_with(overrides: ConfigOverrides) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_sources(env_var, overrides)
    }

    /// Build and validate a configuration from a variable lookup and overrides
    pub fn from_sources<F>(lookup: F, overrides: ConfigOverrides) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let table = overrides
            .table
            .or_else(|| lookup("SIRENE_TABLE"))
            .or_else(|| lookup("DB_TABLE"))
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());

        let delimiter = match lookup("SIRENE_DELIMITER") {
            Some(value) => parse_delimiter(&value)?,
            None => DEFAULT_DELIMITER,
        };

        let config = Config {
            database: DatabaseConfig {
                url: overrides
                    .database_url
                    .or_else(|| lookup("DATABASE_URL"))
                    .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                connect_timeout_secs: parsed(&lookup, "DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            pipeline: PipelineSettings {
                table: TableName::parse(&table)?,
                establishment_batch_size: overrides
                    .establishment_batch_size
                    .or_else(|| parsed(&lookup, "SIRENE_ESTABLISHMENT_BATCH_SIZE"))
                    .unwrap_or(DEFAULT_ESTABLISHMENT_BATCH_SIZE),
                legal_unit_batch_size: overrides
                    .legal_unit_batch_size
                    .or_else(|| parsed(&lookup, "SIRENE_LEGAL_UNIT_BATCH_SIZE"))
                    .unwrap_or(DEFAULT_LEGAL_UNIT_BATCH_SIZE),
                delimiter,
            },
            inputs: InputFiles {
                establishments: overrides
                    .establishment_file
                    .or_else(|| lookup("SIRENE_ESTABLISHMENT_FILE").map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_ESTABLISHMENT_FILE)),
                legal_units: overrides
                    .legal_unit_file
                    .or_else(|| lookup("SIRENE_LEGAL_UNIT_FILE").map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LEGAL_UNIT_FILE)),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(IngestError::Config("Database URL cannot be empty".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        self.pipeline.validate()
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.establishment_batch_size == 0 || self.legal_unit_batch_size == 0 {
            return Err(IngestError::Config("Batch sizes must be greater than 0".to_string()));
        }

        let max_rows = POSTGRES_MAX_BINDS / BINDS_PER_ROW;
        if self.establishment_batch_size > max_rows {
            return Err(IngestError::Config(format!(
                "Establishment batch size {} exceeds {} rows ({} bind parameters per statement)",
                self.establishment_batch_size, max_rows, POSTGRES_MAX_BINDS
            )));
        }

        if !self.delimiter.is_ascii() {
            return Err(IngestError::Config("Delimiter must be an ASCII character".to_string()));
        }

        Ok(())
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            table: TableName(DEFAULT_TABLE.to_string()),
            establishment_batch_size: DEFAULT_ESTABLISHMENT_BATCH_SIZE,
            legal_unit_batch_size: DEFAULT_LEGAL_UNIT_BATCH_SIZE,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            pipeline: PipelineSettings::default(),
            inputs: InputFiles {
                establishments: PathBuf::from(DEFAULT_ESTABLISHMENT_FILE),
                legal_units: PathBuf::from(DEFAULT_LEGAL_UNIT_FILE),
            },
        }
    }
}

/// Parse a delimiter given as a single character or as `\t` / `tab`
pub fn parse_delimiter(value: &str) -> Result<u8> {
    match value {
        "\\t" | "tab" => Ok(b'\t'),
        v if v.len() == 1 && v.is_ascii() => Ok(v.as_bytes()[0]),
        v => Err(IngestError::Config(format!(
            "Delimiter must be a single ASCII character, got {:?}",
            v
        ))),
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|s| s.trim().parse().ok())
}
