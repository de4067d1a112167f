//! # Loaders
//!
//! The pipeline consumes prices through [`PriceLoader`]. Two implementations
//! ship with the crate: an in-memory map for tests and embedding, and a
//! directory of `<TICKER>.csv` files for the CLI.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use chrono::NaiveDate;
use csv::ReaderBuilder;
use csv::StringRecord;
use csv::Trim;
use serde::Deserialize;
use tracing::debug;

use super::series::PricePoint;
use super::series::PriceSeries;
use crate::error::PipelineError;
use crate::error::Result;

/// Source of historical prices.
///
/// Implementations return only observations with `start <= date <= end` and
/// fail with [`PipelineError::DataUnavailable`] for unknown tickers or empty
/// ranges.
pub trait PriceLoader {
  fn get_price_series(
    &self,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<PriceSeries>;
}

fn window(
  ticker: &str,
  points: impl IntoIterator<Item = PricePoint>,
  start: NaiveDate,
  end: NaiveDate,
) -> Result<PriceSeries> {
  let mut selected: Vec<PricePoint> = points
    .into_iter()
    .filter(|p| p.date >= start && p.date <= end)
    .collect();
  if selected.is_empty() {
    return Err(PipelineError::DataUnavailable {
      ticker: ticker.to_string(),
      reason: format!("no observations between {start} and {end}"),
    });
  }
  selected.sort_by_key(|p| p.date);
  PriceSeries::new(ticker, selected)
}

/// Loader backed by a map of raw observations.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLoader {
  data: HashMap<String, Vec<PricePoint>>,
}

impl InMemoryLoader {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register (or replace) the history of `ticker`.
  pub fn insert(
    &mut self,
    ticker: impl Into<String>,
    pairs: impl IntoIterator<Item = (NaiveDate, f64)>,
  ) -> &mut Self {
    let points = pairs
      .into_iter()
      .map(|(date, price)| PricePoint { date, price })
      .collect();
    self.data.insert(ticker.into(), points);
    self
  }
}

impl PriceLoader for InMemoryLoader {
  fn get_price_series(
    &self,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<PriceSeries> {
    let points = self
      .data
      .get(ticker)
      .ok_or_else(|| PipelineError::DataUnavailable {
        ticker: ticker.to_string(),
        reason: "unknown ticker".to_string(),
      })?;
    window(ticker, points.iter().copied(), start, end)
  }
}

/// One row of a price file; columns other than `date` and `close` are ignored.
#[derive(Debug, Deserialize)]
struct CsvRow {
  date: NaiveDate,
  close: f64,
}

/// Loader reading `<dir>/<TICKER>.csv` files.
///
/// Files need a header row naming a `date` (`YYYY-MM-DD`) and a `close`
/// column, matched case-insensitively, so OHLC exports load as-is.
#[derive(Clone, Debug)]
pub struct CsvDirectoryLoader {
  dir: PathBuf,
}

impl CsvDirectoryLoader {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  fn read_points(&self, ticker: &str) -> Result<Vec<PricePoint>> {
    let path = self.dir.join(format!("{ticker}.csv"));
    let unavailable = |reason: String| PipelineError::DataUnavailable {
      ticker: ticker.to_string(),
      reason,
    };

    let file = File::open(&path).map_err(|e| unavailable(format!("{}: {e}", path.display())))?;
    let mut reader = ReaderBuilder::new()
      .trim(Trim::All)
      .from_reader(BufReader::new(file));

    let headers: StringRecord = reader
      .headers()
      .map_err(|e| unavailable(format!("{}: {e}", path.display())))?
      .iter()
      .map(|h| h.to_ascii_lowercase())
      .collect();
    for column in ["date", "close"] {
      if !headers.iter().any(|h| h == column) {
        return Err(unavailable(format!(
          "{}: missing `{column}` column",
          path.display()
        )));
      }
    }
    reader.set_headers(headers);

    let mut points = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
      let row = row.map_err(|e| unavailable(format!("{}: {e}", path.display())))?;
      points.push(PricePoint {
        date: row.date,
        price: row.close,
      });
    }

    debug!(ticker, rows = points.len(), path = %path.display(), "read price file");
    Ok(points)
  }
}

impl PriceLoader for CsvDirectoryLoader {
  fn get_price_series(
    &self,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<PriceSeries> {
    let points = self.read_points(ticker)?;
    window(ticker, points, start, end)
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, day).unwrap()
  }

  #[test]
  fn in_memory_loader_windows_and_rejects_unknown() {
    let mut loader = InMemoryLoader::new();
    loader.insert("AMD", [(d(1, 2), 10.0), (d(1, 3), 11.0), (d(1, 4), 12.0)]);

    let s = loader.get_price_series("AMD", d(1, 3), d(1, 31)).unwrap();
    assert_eq!(s.len(), 2);
    assert_eq!(s.first().price, 11.0);

    let err = loader.get_price_series("TSLA", d(1, 1), d(1, 31)).unwrap_err();
    assert_eq!(err.failing_assets(), vec!["TSLA"]);

    let err = loader.get_price_series("AMD", d(2, 1), d(2, 28)).unwrap_err();
    assert_eq!(err.kind(), "data_unavailable");
  }

  #[test]
  fn csv_loader_parses_header_and_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = File::create(dir.path().join("MSFT.csv")).unwrap();
    writeln!(file, "date,close").unwrap();
    writeln!(file, "2024-01-03,370.6").unwrap();
    writeln!(file, "2024-01-02,370.9").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "2024-01-04,367.9").unwrap();

    let loader = CsvDirectoryLoader::new(dir.path());
    let s = loader.get_price_series("MSFT", d(1, 1), d(1, 31)).unwrap();

    assert_eq!(s.len(), 3);
    assert_eq!(s.first().date, d(1, 2));
    assert_eq!(s.last().price, 367.9);
  }

  #[test]
  fn csv_loader_picks_close_column_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = File::create(dir.path().join("AAPL.csv")).unwrap();
    writeln!(file, "Date,Open,High,Low,Close,Volume").unwrap();
    writeln!(file, "2024-01-02,187.2,188.4,183.9,185.6,82488700").unwrap();
    writeln!(file, "2024-01-03, 184.2 ,185.9,183.4, 184.3 ,58414500").unwrap();

    let loader = CsvDirectoryLoader::new(dir.path());
    let s = loader.get_price_series("AAPL", d(1, 1), d(1, 31)).unwrap();

    assert_eq!(s.prices(), vec![185.6, 184.3]);
  }

  #[test]
  fn csv_loader_accepts_quoted_header() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = File::create(dir.path().join("AMD.csv")).unwrap();
    writeln!(file, "\"close\",\"date\"").unwrap();
    writeln!(file, "\"140.5\",\"2024-01-02\"").unwrap();

    let loader = CsvDirectoryLoader::new(dir.path());
    let s = loader.get_price_series("AMD", d(1, 1), d(1, 31)).unwrap();

    assert_eq!(s.len(), 1);
    assert_eq!(s.first().price, 140.5);
  }

  #[test]
  fn csv_loader_rejects_file_without_close_column() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = File::create(dir.path().join("NVDA.csv")).unwrap();
    writeln!(file, "date,open").unwrap();
    writeln!(file, "2024-01-02,495.2").unwrap();

    let loader = CsvDirectoryLoader::new(dir.path());
    let err = loader.get_price_series("NVDA", d(1, 1), d(1, 31)).unwrap_err();

    assert_eq!(err.kind(), "data_unavailable");
    assert!(err.to_string().contains("missing `close` column"), "{err}");
  }

  #[test]
  fn csv_loader_reports_bad_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = File::create(dir.path().join("TSLA.csv")).unwrap();
    writeln!(file, "date,close").unwrap();
    writeln!(file, "02/01/2024,248.4").unwrap();

    let loader = CsvDirectoryLoader::new(dir.path());
    let err = loader.get_price_series("TSLA", d(1, 1), d(1, 31)).unwrap_err();
    assert_eq!(err.kind(), "data_unavailable");
  }

  #[test]
  fn csv_loader_reports_missing_file_as_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let loader = CsvDirectoryLoader::new(dir.path());
    let err = loader.get_price_series("NVDA", d(1, 1), d(1, 31)).unwrap_err();
    assert_eq!(err.kind(), "data_unavailable");
  }
}
