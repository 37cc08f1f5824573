//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// PrefRank - rank prefectures by population change
///
/// Reads a comma-separated population file, sums the 2010 and 2015
/// counts per prefecture and prints prefectures ordered by
/// 2015/2010 change rate, highest first.
///
/// Examples:
///   prefrank
///   prefrank data/popu-pref.csv
///   prefrank data/popu-pref.csv --format json -o ranking.json
///   prefrank --on-malformed fail --label 変化率
///   prefrank --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// CSV file to read
    ///
    /// Defaults to the configured input path (./popu-pref.csv).
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// Output format (lines, array, json)
    #[arg(long, value_name = "FORMAT", env = "PREFRANK_FORMAT")]
    pub format: Option<OutputFormat>,

    /// What to do with rows whose year or population does not parse
    #[arg(long, value_name = "POLICY")]
    pub on_malformed: Option<MalformedPolicy>,

    /// Label printed before each change rate
    #[arg(long, value_name = "TEXT")]
    pub label: Option<String>,

    /// Write the report to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .prefrank.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .prefrank.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the ranking.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One entry per line (default)
    #[default]
    Lines,
    /// A single bracketed list of quoted entries
    Array,
    /// JSON with metadata
    Json,
}

/// Handling of rows with an unparseable year or population.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Skip the row and count it
    #[default]
    Skip,
    /// Abort the run at the first malformed row
    Fail,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref label) = self.label {
            if label.trim().is_empty() {
                return Err("Label must not be empty".to_string());
            }
        }

        if let Some(ref input) = self.input {
            if input.is_dir() {
                return Err(format!("Input path is a directory: {}", input.display()));
            }
        }

        Ok(())
    }

    /// Returns the tracing filter directive.
    ///
    /// `-v` and `-q` always win. Otherwise a non-empty `RUST_LOG` value is
    /// used, falling back to `info`.
    pub fn log_directive(&self, rust_log: Option<&str>) -> String {
        if !self.verbose && !self.quiet {
            if let Some(directive) = rust_log.map(str::trim).filter(|d| !d.is_empty()) {
                return directive.to_string();
            }
        }
        self.log_level().to_string().to_lowercase()
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
