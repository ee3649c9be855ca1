// ABOUTME: CLI entry point: `run` executes every configured backup job, `validate` checks the config
// ABOUTME: Exit status is non-zero only when start-up (logging, config) fails

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use mysql_s3_archiver::dump::ProcessDumpExecutor;
use mysql_s3_archiver::purge::MySqlConnector;
use mysql_s3_archiver::storage::S3Store;
use mysql_s3_archiver::{config, logging, orchestrator, preflight, ConnectionRegistry, Pipeline};

#[derive(Parser)]
#[command(
    name = "mysql-s3-archiver",
    version,
    about = "Dump MySQL tables to S3, verify the upload, and purge archived rows"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory for the dated log file
    #[arg(long, default_value = ".", global = true)]
    log_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Also write logs to stderr
    #[arg(long, global = true)]
    console: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every backup job in the config once
    Run {
        /// Path to the YAML or TOML config file
        #[arg(short, long, default_value = "config.yml")]
        config: PathBuf,
    },
    /// Check the config, connection names and required tools without running anything
    Validate {
        /// Path to the YAML or TOML config file
        #[arg(short, long, default_value = "config.yml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_path = logging::init(&cli.log_level, &cli.log_dir, cli.console)?;
    tracing::debug!(path = %log_path.display(), "Logging initialized");

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Validate { config } => validate(config),
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %format!("{:#}", err), "Failed to load config");
            return Err(err);
        }
    };
    tracing::info!(
        path = %config_path.display(),
        connections = config.connections.len(),
        jobs = config.jobs.len(),
        "Config loaded"
    );

    for problem in preflight::check(&config) {
        tracing::warn!("Preflight: {}", problem);
    }

    let store = S3Store::from_settings(&config.storage).await;
    let pipeline = Arc::new(Pipeline::new(
        ConnectionRegistry::new(config.connections),
        Arc::new(ProcessDumpExecutor::default()),
        Arc::new(store),
        Arc::new(MySqlConnector),
    ));

    orchestrator::run(pipeline, config.jobs).await;
    Ok(())
}

fn validate(config_path: PathBuf) -> Result<()> {
    let config = config::load_config(&config_path)?;
    let problems = preflight::check(&config);

    if problems.is_empty() {
        println!(
            "✓ {} is valid: {} connection(s), {} job(s)",
            config_path.display(),
            config.connections.len(),
            config.jobs.len()
        );
        return Ok(());
    }

    for problem in &problems {
        println!("✗ {}", problem);
    }
    bail!("{} problem(s) found in {}", problems.len(), config_path.display())
}
