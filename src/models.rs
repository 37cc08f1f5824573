//! Data models for the population ranking.
//!
//! This module contains the core data structures used throughout
//! the application for representing input records, per-prefecture
//! aggregates, ranked entries and the serialized report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Year whose population is the denominator of the change rate.
pub const BASE_YEAR: i32 = 2010;

/// Year whose population is the numerator of the change rate.
pub const TARGET_YEAR: i32 = 2015;

/// Column holding the year.
pub const YEAR_COLUMN: usize = 0;

/// Column holding the prefecture name.
pub const PREFECTURE_COLUMN: usize = 2;

/// Column holding the population count.
pub const POPULATION_COLUMN: usize = 7;

/// A single qualifying input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Year of the count, either [`BASE_YEAR`] or [`TARGET_YEAR`].
    pub year: i32,
    /// Prefecture name, used verbatim as the aggregation key.
    pub prefecture: String,
    /// Population count for this row.
    pub population: u64,
}

/// Running totals for one prefecture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Sum of populations over all 2010 rows.
    pub population_2010: u64,
    /// Sum of populations over all 2015 rows.
    pub population_2015: u64,
    /// Change rate, set once when the table is finalized.
    pub ratio: Option<f64>,
}

impl Aggregate {
    /// Adds a population count to the total for its year.
    ///
    /// Years other than 2010 and 2015 leave the aggregate untouched. On
    /// overflow the totals are left unchanged and `None` is returned.
    pub fn add(&mut self, year: i32, population: u64) -> Option<()> {
        if year == BASE_YEAR {
            self.population_2010 = self.population_2010.checked_add(population)?;
        }
        if year == TARGET_YEAR {
            self.population_2015 = self.population_2015.checked_add(population)?;
        }
        Some(())
    }

    /// Computes and stores `population_2015 / population_2010`.
    ///
    /// No guard against a zero denominator: `x / 0` yields positive
    /// infinity and `0 / 0` yields NaN.
    pub fn compute_ratio(&mut self) -> f64 {
        let ratio = self.population_2015 as f64 / self.population_2010 as f64;
        self.ratio = Some(ratio);
        ratio
    }
}

/// A prefecture and its frozen totals, in ranking order.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub prefecture: String,
    pub population_2010: u64,
    pub population_2015: u64,
    pub ratio: f64,
}

impl RankedEntry {
    /// Renders `<prefecture>: <2010>=><2015> <label>:<ratio>`.
    pub fn render(&self, label: &str) -> String {
        format!(
            "{}: {}=>{} {}:{}",
            self.prefecture,
            self.population_2010,
            self.population_2015,
            label,
            format_ratio(self.ratio)
        )
    }
}

/// Formats a ratio as the shortest round-trip decimal.
///
/// Integral values print without a fraction (`2`). Magnitudes of `1e21` and
/// above or below `1e-6` switch to exponent form (`1e-7`, `1.5e+21`).
/// Non-finite values print as `Infinity`, `-Infinity` or `NaN`.
pub fn format_ratio(ratio: f64) -> String {
    if ratio.is_nan() {
        return "NaN".to_string();
    }
    if ratio.is_infinite() {
        return if ratio > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let magnitude = ratio.abs();
    if magnitude != 0.0 && !(1e-6..1e21).contains(&magnitude) {
        let exp = format!("{:e}", ratio);
        match exp.split_once('e') {
            Some((mantissa, power)) if !power.starts_with('-') => {
                format!("{}e+{}", mantissa, power)
            }
            _ => exp,
        }
    } else {
        ratio.to_string()
    }
}

/// Counters collected while reading the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Lines read from the input, including blank ones.
    pub lines_read: usize,
    /// Rows that contributed to an aggregate.
    pub aggregated: usize,
    /// Rows for other years, and blank lines.
    pub ignored: usize,
    /// Rows skipped because a required field did not parse.
    pub malformed: usize,
}

impl fmt::Display for IngestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines read, {} aggregated, {} ignored, {} malformed",
            self.lines_read, self.aggregated, self.ignored, self.malformed
        )
    }
}

/// One ranked prefecture in the JSON report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    /// 1-based position in the ranking.
    pub rank: usize,
    pub prefecture: String,
    pub population_2010: u64,
    pub population_2015: u64,
    /// `None` when the ratio is not finite.
    pub ratio: Option<f64>,
    /// The rendered text line.
    pub line: String,
}

/// Metadata about the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Path of the CSV that was read.
    pub input: String,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Label printed before each ratio.
    pub label: String,
    /// Ingest counters.
    pub stats: IngestStats,
}

/// The complete ranking report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub entries: Vec<ReportEntry>,
}
