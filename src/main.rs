//! tabularium: moves stale rows from live PostgreSQL tables into parallel
//! archive tables, in bounded batches, per a declarative configuration.

use clap::Parser;

mod config;
mod db;
mod engine;
mod observability;
mod secrets;

use crate::{
    config::EnvSettings,
    db::PgArchiveStore,
    engine::{RunOptions, RunReport, TracingSink},
    observability::LogFormat,
};

/// Move stale rows from live tables into parallel archive tables.
#[derive(Parser, Debug)]
#[command(name = "tabularium", version, about)]
struct Cli {
    /// Path to the JSON file listing the tables to archive.
    #[arg(long, default_value = "config.json")]
    config: std::path::PathBuf,

    /// Report eligible row counts without creating tables or moving rows.
    #[arg(long)]
    dry_run: bool,

    /// Abort if one table needs more than this many batches (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    max_batches: u32,

    /// Console log format.
    #[arg(long, value_enum, default_value = "compact")]
    log_format: LogFormat,
}

/// Anything that can end the invocation without a report.
#[derive(Debug, thiserror::Error)]
enum FatalError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Secret(#[from] secrets::SecretError),

    #[error(transparent)]
    Db(#[from] db::DbError),

    #[error(transparent)]
    Engine(#[from] engine::EngineError),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    observability::init_tracing(cli.log_format);

    match run(&cli).await {
        Ok(report) => {
            tracing::info!(
                status_code = report.status_code,
                tables = report.tables.len(),
                rows_archived = report.total_rows_copied(),
                "{}",
                report.message
            );
        }
        Err(err) => {
            tracing::error!(error = %err, "Archiving run failed");
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<RunReport, FatalError> {
    let settings = EnvSettings::from_env()?;

    let specs = config::load_specs(&cli.config)?;
    tracing::info!(
        config = %cli.config.display(),
        tables = specs.len(),
        "Loaded table configuration"
    );

    let credentials = secrets::resolve(&settings).await?;
    let conn = db::connect(&credentials).await?;
    let mut store = PgArchiveStore::new(conn);

    let options = RunOptions {
        dry_run: cli.dry_run,
        max_batches: cli.max_batches,
    };

    let report = engine::run(&mut store, &TracingSink, &specs, &options).await?;
    Ok(report)
}
