//! PrefRank - prefecture population change ranking
//!
//! Reads a comma-separated population file, aggregates the 2010 and 2015
//! counts per prefecture and prints the prefectures ordered by change rate.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (unreadable input, malformed row under --on-malformed fail, bad config)

mod analysis;
mod cli;
mod config;
mod error;
mod input;
mod models;
mod report;

use anyhow::{Context, Result};
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use std::path::Path;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("PrefRank v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(&args) {
        eprintln!("{}", failure_message(&e));
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .prefrank.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!("{} already exists. Remove it first or edit it manually.", DEFAULT_CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    eprintln!("Created {} with default settings.", DEFAULT_CONFIG_FILE);
    Ok(())
}

/// One-line description of a failed run, with its context chain.
fn failure_message(e: &anyhow::Error) -> String {
    format!("Error: {:#}", e)
}

/// Initialize logging from verbosity flags and `RUST_LOG`.
///
/// Logs go to stderr so stdout carries only the report.
fn init_logging(args: &Args) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = args.log_directive(rust_log.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("Ignoring invalid log filter {:?}: {}", directive, e);
        EnvFilter::new("info")
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Read the input, rank it and emit the report once.
fn run(args: &Args) -> Result<()> {
    let mut config = load_config(args)?;
    config.merge_with_args(args);

    let path = config.input.path.as_path();
    info!("Reading {}", path.display());

    let reader = input::open_input(path)?;
    let (ranking, stats) = analysis::aggregate_reader(reader, config.input.on_malformed)
        .with_context(|| format!("Failed to aggregate {}", path.display()))?;

    info!("Ranked {} prefectures", ranking.len());

    let output = report::generate_report(
        &ranking,
        config.report.format,
        &config.report.label,
        path,
        stats,
    )?;
    report::write_report(&output, args.output.as_deref())?;

    if let Some(ref out) = args.output {
        info!("Report saved to {}", out.display());
    }

    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}
