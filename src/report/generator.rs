//! Ranking report generation.
//!
//! This module renders a finalized ranking as plain lines, as a single
//! bracketed list, or as a JSON document with metadata.

use crate::analysis::Ranking;
use crate::cli::OutputFormat;
use crate::models::{IngestStats, Report, ReportEntry, ReportMetadata};
use anyhow::{Context, Result};
use chrono::Utc;
use std::io::Write;
use std::path::Path;

/// Render the ranking in the requested format.
pub fn generate_report(
    ranking: &Ranking,
    format: OutputFormat,
    label: &str,
    input: &Path,
    stats: IngestStats,
) -> Result<String> {
    match format {
        OutputFormat::Lines => Ok(generate_lines_report(ranking, label)),
        OutputFormat::Array => Ok(generate_array_report(ranking, label)),
        OutputFormat::Json => {
            let report = build_report(ranking, label, input, stats);
            generate_json_report(&report)
        }
    }
}

/// One rendered entry per line.
pub fn generate_lines_report(ranking: &Ranking, label: &str) -> String {
    let mut output = String::new();

    for line in ranking.render_lines(label) {
        output.push_str(&line);
        output.push('\n');
    }

    output
}

/// All entries in one bracketed list of single-quoted strings.
pub fn generate_array_report(ranking: &Ranking, label: &str) -> String {
    let lines = ranking.render_lines(label);

    if lines.is_empty() {
        return "[]\n".to_string();
    }

    let quoted: Vec<String> = lines
        .iter()
        .map(|line| format!("'{}'", line.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect();

    format!("[ {} ]\n", quoted.join(", "))
}

/// Assemble the serializable report.
pub fn build_report(ranking: &Ranking, label: &str, input: &Path, stats: IngestStats) -> Report {
    let entries = ranking
        .entries()
        .iter()
        .enumerate()
        .map(|(i, entry)| ReportEntry {
            rank: i + 1,
            prefecture: entry.prefecture.clone(),
            population_2010: entry.population_2010,
            population_2015: entry.population_2015,
            ratio: entry.ratio.is_finite().then_some(entry.ratio),
            line: entry.render(label),
        })
        .collect();

    Report {
        metadata: ReportMetadata {
            input: input.display().to_string(),
            generated_at: Utc::now(),
            label: label.to_string(),
            stats,
        },
        entries,
    }
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    Ok(json)
}

/// Write the rendered report to a file, or to stdout when no path is given.
pub fn write_report(content: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            file.write_all(content.as_bytes())
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(content.as_bytes())?;
            handle.flush()?;
        }
    }

    Ok(())
}
