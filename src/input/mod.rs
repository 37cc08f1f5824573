//! Input reading and row parsing.
//!
//! Rows are plain comma-separated lines. No quoting or escaping is
//! understood: a comma always separates fields.

use crate::error::RowError;
use crate::models::{
    Record, BASE_YEAR, POPULATION_COLUMN, PREFECTURE_COLUMN, TARGET_YEAR, YEAR_COLUMN,
};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Result of parsing one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// A 2010 or 2015 row.
    Record(Record),
    /// A row for another year, or a blank line.
    Ignored,
}

/// Open the input file for line-by-line reading.
///
/// Failing to open the file is fatal for the whole run.
pub fn open_input(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;
    debug!("Opened {}", path.display());
    Ok(BufReader::new(file))
}

/// Parse a single line into a record.
///
/// The year is checked first, so rows for other years are ignored even if
/// their remaining fields are missing or unparseable.
pub fn parse_line(line: &str) -> Result<ParsedLine, RowError> {
    if line.trim().is_empty() {
        return Ok(ParsedLine::Ignored);
    }

    let fields: Vec<&str> = line.split(',').collect();

    let year_field = field(&fields, YEAR_COLUMN)?.trim();
    let year: i32 = year_field
        .parse()
        .map_err(|_| RowError::InvalidYear(year_field.to_string()))?;

    if year != BASE_YEAR && year != TARGET_YEAR {
        return Ok(ParsedLine::Ignored);
    }

    let prefecture = field(&fields, PREFECTURE_COLUMN)?;

    let population_field = field(&fields, POPULATION_COLUMN)?.trim();
    let population: u64 = population_field
        .parse()
        .map_err(|_| RowError::InvalidPopulation(population_field.to_string()))?;

    Ok(ParsedLine::Record(Record {
        year,
        prefecture: prefecture.to_string(),
        population,
    }))
}

fn field<'a>(fields: &[&'a str], index: usize) -> Result<&'a str, RowError> {
    fields.get(index).copied().ok_or(RowError::MissingField {
        index,
        found: fields.len(),
    })
}
