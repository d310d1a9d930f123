//! SIRENE Ingest - loads SIRENE stock extracts into PostgreSQL

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sirene_common::logging::{init_logging, LogConfig, LogLevel};
use sirene_ingest::progress::{ConsoleProgress, LogProgress, ProgressSink};
use sirene_ingest::{Config, ConfigOverrides, IngestSession, PipelineStats};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sirene-ingest")]
#[command(author, version, about = "SIRENE stock extract ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Target table (overrides SIRENE_TABLE)
    #[arg(long, global = true)]
    table: Option<String>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Log progress lines instead of drawing a spinner
    #[arg(long, global = true)]
    no_progress: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upsert establishments, then update legal unit names
    Run {
        /// StockEtablissement CSV
        #[arg(long)]
        establishments: Option<PathBuf>,

        /// StockUniteLegale CSV
        #[arg(long)]
        legal_units: Option<PathBuf>,
    },

    /// Upsert establishments only
    Establishments {
        /// StockEtablissement CSV
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Records per upsert statement
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Update legal unit names only
    LegalUnits {
        /// StockUniteLegale CSV
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Records per transaction
        #[arg(short, long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::default()
        .with_level(log_level)
        .with_file_prefix("sirene-ingest")
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    match execute(cli).await {
        Ok(()) => {
            info!("Ingestion complete");
            Ok(ExitCode::SUCCESS)
        },
        Err(e) => {
            error!(
                stage = e.stage(),
                kind = e.kind().map(|k| k.as_str()).unwrap_or("-"),
                error = %e,
                "Ingestion failed"
            );
            Ok(ExitCode::FAILURE)
        },
    }
}

/// Command-line values that take precedence over the environment
fn overrides(cli: &Cli) -> ConfigOverrides {
    let mut overrides = ConfigOverrides {
        database_url: cli.database_url.clone(),
        table: cli.table.clone(),
        ..ConfigOverrides::default()
    };

    match &cli.command {
        Command::Run {
            establishments,
            legal_units,
        } => {
            overrides.establishment_file = establishments.clone();
            overrides.legal_unit_file = legal_units.clone();
        },
        Command::Establishments { file, batch_size } => {
            overrides.establishment_file = file.clone();
            overrides.establishment_batch_size = *batch_size;
        },
        Command::LegalUnits { file, batch_size } => {
            overrides.legal_unit_file = file.clone();
            overrides.legal_unit_batch_size = *batch_size;
        },
    }

    overrides
}

async fn execute(cli: Cli) -> sirene_ingest::Result<()> {
    let config = Config::load_with(overrides(&cli))?;

    let progress: Arc<dyn ProgressSink> = if cli.no_progress || !std::io::stderr().is_terminal() {
        Arc::new(LogProgress::default())
    } else {
        Arc::new(ConsoleProgress::new())
    };

    let session =
        IngestSession::connect(&config.database, config.pipeline.clone(), progress).await?;

    let result = match cli.command {
        Command::Run { .. } => session.run(&config.inputs).await.map(|summary| {
            report(&summary.establishments);
            report(&summary.legal_units);
        }),
        Command::Establishments { .. } => session
            .ingest_establishments_file(&config.inputs.establishments)
            .await
            .map(|stats| report(&stats)),
        Command::LegalUnits { .. } => session
            .ingest_legal_units_file(&config.inputs.legal_units)
            .await
            .map(|stats| report(&stats)),
    };

    session.close().await;
    result
}

fn report(stats: &PipelineStats) {
    info!(
        kind = %stats.kind,
        rows_read = stats.rows_read,
        rows_written = stats.batches.rows_committed,
        "Records written: {}",
        stats.batches.rows_committed
    );
}
