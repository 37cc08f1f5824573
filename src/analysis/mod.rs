//! Aggregation of population rows into a ranked result.

pub mod aggregator;

pub use aggregator::*;
