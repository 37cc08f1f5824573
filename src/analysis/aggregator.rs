//! Per-prefecture aggregation and ranking.
//!
//! An [`AggregateTable`] accepts rows while the input is being read.
//! [`AggregateTable::finalize`] consumes it, computes every change rate
//! and yields the read-only [`Ranking`].

use crate::cli::MalformedPolicy;
use crate::error::{IngestError, RowError};
use crate::input::{parse_line, ParsedLine};
use crate::models::{Aggregate, IngestStats, RankedEntry, Record};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::BufRead;

const BOM: char = '\u{feff}';
use tracing::{debug, info, warn};

/// What a single line did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Aggregated,
    Ignored,
}

/// Mapping from prefecture name to its running aggregate.
#[derive(Debug, Default)]
pub struct AggregateTable {
    entries: HashMap<String, Aggregate>,
}

impl AggregateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the aggregate for a prefecture, creating a zeroed one first.
    pub fn get_or_insert_default(&mut self, prefecture: &str) -> &mut Aggregate {
        self.entries.entry(prefecture.to_string()).or_default()
    }

    /// Add a qualifying record to its prefecture's totals.
    ///
    /// A sum that would overflow leaves the totals as they were.
    pub fn ingest(&mut self, record: &Record) -> Result<(), RowError> {
        self.get_or_insert_default(&record.prefecture)
            .add(record.year, record.population)
            .ok_or_else(|| RowError::PopulationOverflow {
                prefecture: record.prefecture.clone(),
                year: record.year,
            })
    }

    /// Parse a raw line and fold it into the table.
    pub fn ingest_line(&mut self, line: &str) -> Result<RowOutcome, RowError> {
        match parse_line(line)? {
            ParsedLine::Record(record) => {
                self.ingest(&record)?;
                Ok(RowOutcome::Aggregated)
            }
            ParsedLine::Ignored => Ok(RowOutcome::Ignored),
        }
    }

    #[allow(dead_code)] // Lookup utility for tests
    pub fn get(&self, prefecture: &str) -> Option<&Aggregate> {
        self.entries.get(prefecture)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute every ratio and sort the prefectures into a ranking.
    pub fn finalize(self) -> Ranking {
        let mut entries: Vec<RankedEntry> = self
            .entries
            .into_iter()
            .map(|(prefecture, mut aggregate)| {
                let ratio = aggregate.compute_ratio();
                if !ratio.is_finite() {
                    warn!(
                        "{} has a non-finite change rate ({}=>{})",
                        prefecture, aggregate.population_2010, aggregate.population_2015
                    );
                }
                RankedEntry {
                    prefecture,
                    population_2010: aggregate.population_2010,
                    population_2015: aggregate.population_2015,
                    ratio,
                }
            })
            .collect();

        entries.sort_by(rank_order);

        Ranking { entries }
    }
}

/// Ranking order: ratio descending, NaN last, ties by prefecture name.
pub fn rank_order(a: &RankedEntry, b: &RankedEntry) -> Ordering {
    let by_ratio = match (a.ratio.is_nan(), b.ratio.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.ratio.total_cmp(&a.ratio),
    };

    by_ratio.then_with(|| a.prefecture.cmp(&b.prefecture))
}

/// The frozen, ordered result of an aggregation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    entries: Vec<RankedEntry>,
}

impl Ranking {
    pub fn entries(&self) -> &[RankedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render each entry as one report line.
    pub fn render_lines(&self, label: &str) -> Vec<String> {
        self.entries.iter().map(|e| e.render(label)).collect()
    }
}

/// Stream every line of `reader` through a fresh table and finalize it.
///
/// Lines are ingested in input order. The ranking is only built once the
/// reader is exhausted. A line that is not valid UTF-8 is a malformed row;
/// only a failing read aborts regardless of `policy`. A byte-order mark at
/// the start of the input is dropped.
pub fn aggregate_reader<R: BufRead>(
    mut reader: R,
    policy: MalformedPolicy,
) -> Result<(Ranking, IngestStats), IngestError> {
    let mut table = AggregateTable::new();
    let mut stats = IngestStats::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let line_no = stats.lines_read + 1;
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| IngestError::Io {
                line: line_no,
                source,
            })?;
        if read == 0 {
            break;
        }
        stats.lines_read += 1;

        let outcome = decode_line(&buf).and_then(|line| {
            let line = if line_no == 1 {
                line.strip_prefix(BOM).unwrap_or(line)
            } else {
                line
            };
            table.ingest_line(line)
        });

        match outcome {
            Ok(RowOutcome::Aggregated) => stats.aggregated += 1,
            Ok(RowOutcome::Ignored) => stats.ignored += 1,
            Err(source) => match policy {
                MalformedPolicy::Skip => {
                    debug!("Skipping line {}: {}", line_no, source);
                    stats.malformed += 1;
                }
                MalformedPolicy::Fail => {
                    return Err(IngestError::Malformed {
                        line: line_no,
                        source,
                    });
                }
            },
        }
    }

    if stats.malformed > 0 {
        warn!("Skipped {} malformed rows", stats.malformed);
    }
    info!("Ingest finished: {}", stats);
    info!("Aggregated {} prefectures", table.len());

    Ok((table.finalize(), stats))
}

/// Strip the line terminator and check the bytes are UTF-8.
fn decode_line(buf: &[u8]) -> Result<&str, RowError> {
    let bytes = buf.strip_suffix(b"\n").unwrap_or(buf);
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|_| RowError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn row(year: i32, prefecture: &str, population: u64) -> String {
        format!("{},x,{},a,b,c,d,{}", year, prefecture, population)
    }

    fn aggregate(lines: &[String]) -> (Ranking, IngestStats) {
        let input = lines.join("\n");
        aggregate_reader(Cursor::new(input), MalformedPolicy::Skip).unwrap()
    }

    fn entry(prefecture: &str, ratio: f64) -> RankedEntry {
        RankedEntry {
            prefecture: prefecture.to_string(),
            population_2010: 0,
            population_2015: 0,
            ratio,
        }
    }

    #[test]
    fn test_get_or_insert_default() {
        let mut table = AggregateTable::new();
        assert!(table.is_empty());

        table.get_or_insert_default("A").population_2010 = 5;
        let again = table.get_or_insert_default("A");
        assert_eq!(again.population_2010, 5);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_irrelevant_rows_leave_table_untouched() {
        let mut table = AggregateTable::new();
        table.ingest_line(&row(2010, "A", 100)).unwrap();

        for year in [2000, 2005, 2011, 2014, 2020] {
            let outcome = table.ingest_line(&row(year, "A", 7)).unwrap();
            assert_eq!(outcome, RowOutcome::Ignored);
            let outcome = table.ingest_line(&row(year, "Z", 7)).unwrap();
            assert_eq!(outcome, RowOutcome::Ignored);
        }

        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("A"),
            Some(&Aggregate {
                population_2010: 100,
                population_2015: 0,
                ratio: None,
            })
        );
    }

    #[test]
    fn test_sums_per_prefecture_and_year() {
        let mut table = AggregateTable::new();
        for line in [
            row(2010, "A", 10),
            row(2010, "A", 20),
            row(2015, "A", 5),
            row(2015, "B", 7),
            row(2015, "A", 1),
            row(2010, "B", 3),
        ] {
            table.ingest_line(&line).unwrap();
        }

        let a = table.get("A").unwrap();
        assert_eq!((a.population_2010, a.population_2015), (30, 6));
        let b = table.get("B").unwrap();
        assert_eq!((b.population_2010, b.population_2015), (3, 7));
    }

    #[test]
    fn test_single_prefecture_scenario() {
        let (ranking, stats) = aggregate(&[
            "2010,x,A,...,...,...,...,100".to_string(),
            "2015,x,A,...,...,...,...,150".to_string(),
        ]);

        assert_eq!(stats.aggregated, 2);
        assert_eq!(ranking.len(), 1);
        let a = &ranking.entries()[0];
        assert_eq!(a.population_2010, 100);
        assert_eq!(a.population_2015, 150);
        assert_eq!(a.ratio, 1.5);
        assert_eq!(
            ranking.render_lines("change rate"),
            vec!["A: 100=>150 change rate:1.5".to_string()]
        );
    }

    #[test]
    fn test_higher_ratio_ranks_first() {
        let (ranking, _) = aggregate(&[
            row(2010, "A", 100),
            row(2015, "A", 150),
            row(2010, "B", 100),
            row(2015, "B", 200),
        ]);

        let names: Vec<&str> = ranking
            .entries()
            .iter()
            .map(|e| e.prefecture.as_str())
            .collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(ranking.entries()[0].ratio, 2.0);
    }

    #[test]
    fn test_zero_base_population_is_infinite_and_first() {
        let (ranking, _) = aggregate(&[
            row(2010, "A", 100),
            row(2015, "A", 150),
            row(2010, "C", 0),
            row(2015, "C", 50),
        ]);

        let c = &ranking.entries()[0];
        assert_eq!(c.prefecture, "C");
        assert_eq!(c.ratio, f64::INFINITY);
        assert_eq!(c.render("change rate"), "C: 0=>50 change rate:Infinity");
    }

    #[test]
    fn test_nan_ratio_sorts_last() {
        // 0/0 for N, x/0 for I
        let (ranking, _) = aggregate(&[
            row(2010, "N", 0),
            row(2015, "N", 0),
            row(2010, "A", 100),
            row(2015, "A", 1),
            row(2015, "I", 9),
        ]);

        let names: Vec<&str> = ranking
            .entries()
            .iter()
            .map(|e| e.prefecture.as_str())
            .collect();
        assert_eq!(names, vec!["I", "A", "N"]);
        assert!(ranking.entries()[2].ratio.is_nan());
    }

    #[test]
    fn test_output_is_non_increasing() {
        let lines: Vec<String> = (1..=20u64)
            .flat_map(|i| {
                let name = format!("P{:02}", i);
                vec![row(2010, &name, 100), row(2015, &name, (i * 37) % 200)]
            })
            .collect();
        let (ranking, _) = aggregate(&lines);

        assert_eq!(ranking.len(), 20);
        for pair in ranking.entries().windows(2) {
            assert!(pair[0].ratio >= pair[1].ratio);
        }
    }

    #[test]
    fn test_ties_break_by_name() {
        let mut entries = vec![entry("C", 1.0), entry("A", 1.0), entry("B", 1.0)];
        entries.sort_by(rank_order);
        let names: Vec<&str> = entries.iter().map(|e| e.prefecture.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_rank_order_with_non_finite_values() {
        let mut entries = vec![
            entry("nan", f64::NAN),
            entry("low", 0.5),
            entry("inf", f64::INFINITY),
            entry("high", 3.0),
        ];
        entries.sort_by(rank_order);
        let names: Vec<&str> = entries.iter().map(|e| e.prefecture.as_str()).collect();
        assert_eq!(names, vec!["inf", "high", "low", "nan"]);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let lines: Vec<String> = ["A", "B", "C", "D", "E", "F"]
            .iter()
            .flat_map(|name| vec![row(2010, name, 10), row(2015, name, 12)])
            .collect();

        let (first, _) = aggregate(&lines);
        let (second, _) = aggregate(&lines);
        assert_eq!(
            first.render_lines("change rate"),
            second.render_lines("change rate")
        );
    }

    #[test]
    fn test_empty_input() {
        let (ranking, stats) = aggregate(&[]);
        assert!(ranking.is_empty());
        assert_eq!(stats, IngestStats::default());
    }

    #[test]
    fn test_skip_policy_counts_malformed_rows() {
        let (ranking, stats) = aggregate(&[
            "集計年,地域コード,都道府県名,a,b,c,d,人口".to_string(),
            row(2010, "A", 100),
            "2015,x,A".to_string(),
            "2015,x,A,,,,,many".to_string(),
            row(2015, "A", 150),
            row(2012, "A", 1),
        ]);

        assert_eq!(
            stats,
            IngestStats {
                lines_read: 6,
                aggregated: 2,
                ignored: 1,
                malformed: 3,
            }
        );
        assert_eq!(ranking.entries()[0].ratio, 1.5);
    }

    #[test]
    fn test_fail_policy_reports_line() {
        let input = format!("{}\n2015,x,A,,,,,bad\n{}", row(2010, "A", 1), row(2015, "A", 2));
        let err = aggregate_reader(Cursor::new(input), MalformedPolicy::Fail).unwrap_err();

        match err {
            IngestError::Malformed { line, source } => {
                assert_eq!(line, 2);
                assert_eq!(source, RowError::InvalidPopulation("bad".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sample_file() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/popu-pref.csv");
        let reader = crate::input::open_input(&path).unwrap();
        let (ranking, stats) = aggregate_reader(reader, MalformedPolicy::Skip).unwrap();

        assert_eq!(stats.lines_read, 11);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.ignored, 3);
        assert_eq!(stats.aggregated, 7);

        let names: Vec<&str> = ranking
            .entries()
            .iter()
            .map(|e| e.prefecture.as_str())
            .collect();
        assert_eq!(names, vec!["沖縄県", "東京都", "北海道"]);

        let hokkaido = &ranking.entries()[2];
        assert_eq!(hokkaido.population_2010, 258530);
        assert_eq!(hokkaido.population_2015, 236840);
        assert_eq!(hokkaido.ratio, 236840.0 / 258530.0);
        assert_eq!(
            ranking.entries()[0].render("change rate"),
            "沖縄県: 80000=>82000 change rate:1.025"
        );
    }

    #[test]
    fn test_invalid_utf8_row_is_skipped() {
        let input: &[u8] = b"2010,x,A,,,,,100\n2010,x,\xff\xfe,,,,,5\n2015,x,A,,,,,150\n";
        let (ranking, stats) = aggregate_reader(input, MalformedPolicy::Skip).unwrap();

        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(
            ranking.render_lines("change rate"),
            vec!["A: 100=>150 change rate:1.5".to_string()]
        );
    }

    #[test]
    fn test_invalid_utf8_row_fails_under_fail_policy() {
        let input: &[u8] = b"2010,x,A,,,,,100\n\xff\n";
        let err = aggregate_reader(input, MalformedPolicy::Fail).unwrap_err();

        match err {
            IngestError::Malformed { line, source } => {
                assert_eq!(line, 2);
                assert_eq!(source, RowError::InvalidUtf8);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overflowing_total_is_malformed() {
        let (ranking, stats) = aggregate(&[
            row(2010, "A", u64::MAX),
            row(2010, "A", 1),
            row(2015, "A", 3),
        ]);

        assert_eq!(stats.aggregated, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(ranking.entries()[0].population_2010, u64::MAX);
    }

    #[test]
    fn test_overflow_under_fail_policy() {
        let input = format!("{}\n{}\n", row(2015, "A", u64::MAX), row(2015, "A", 2));
        let err = aggregate_reader(Cursor::new(input), MalformedPolicy::Fail).unwrap_err();

        match err {
            IngestError::Malformed { line, source } => {
                assert_eq!(line, 2);
                assert_eq!(
                    source,
                    RowError::PopulationOverflow {
                        prefecture: "A".to_string(),
                        year: 2015,
                    }
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_leading_bom_is_dropped() {
        let input = "\u{feff}2010,x,A,,,,,100\n2015,x,A,,,,,150\n";
        let (ranking, stats) =
            aggregate_reader(Cursor::new(input), MalformedPolicy::Skip).unwrap();

        assert_eq!(stats.malformed, 0);
        assert_eq!(
            ranking.render_lines("change rate"),
            vec!["A: 100=>150 change rate:1.5".to_string()]
        );
    }

    #[test]
    fn test_bom_after_first_line_is_malformed() {
        let input = "2010,x,A,,,,,100\n\u{feff}2015,x,A,,,,,150\n";
        let (_, stats) = aggregate_reader(Cursor::new(input), MalformedPolicy::Skip).unwrap();
        assert_eq!(stats.malformed, 1);
    }

    #[test]
    fn test_crlf_line_endings() {
        let input = format!("{}\r\n{}\r\n", row(2010, "A", 4), row(2015, "A", 6));
        let (ranking, stats) =
            aggregate_reader(Cursor::new(input), MalformedPolicy::Fail).unwrap();
        assert_eq!(stats.aggregated, 2);
        assert_eq!(ranking.entries()[0].ratio, 1.5);
    }
}
