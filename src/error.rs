//! Error types for reading and aggregating the input.

use thiserror::Error;

/// Why a single row could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("expected at least {expected} fields, found {found}", expected = .index + 1)]
    MissingField { index: usize, found: usize },

    #[error("year is not an integer: {0:?}")]
    InvalidYear(String),

    #[error("population is not an integer: {0:?}")]
    InvalidPopulation(String),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("{year} population total for {prefecture:?} overflows")]
    PopulationOverflow { prefecture: String, year: i32 },
}

/// Failure while streaming the input through the aggregate table.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read line {line}")]
    Io {
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed row at line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: RowError,
    },
}
