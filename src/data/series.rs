//! # Price Series
//!
//! $$
//! r_t = \frac{p_t}{p_{t-1}} - 1
//! $$
//!
//! Immutable, validated `(date, price)` history of a single asset.

use chrono::Duration;
use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PipelineError;
use crate::error::Result;

/// One observation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
  pub date: NaiveDate,
  pub price: f64,
}

/// Ordered price history for one ticker.
///
/// Construction enforces strictly increasing dates and finite positive
/// prices. The calendar-gap tolerance is a run setting, checked with
/// [`PriceSeries::ensure_max_gap`].
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
  ticker: String,
  points: Vec<PricePoint>,
}

impl PriceSeries {
  pub fn new(ticker: impl Into<String>, points: Vec<PricePoint>) -> Result<Self> {
    let ticker = ticker.into();
    let unavailable = |reason: String| PipelineError::DataUnavailable {
      ticker: ticker.clone(),
      reason,
    };

    if points.is_empty() {
      return Err(unavailable("empty series".to_string()));
    }

    for p in &points {
      if !(p.price.is_finite() && p.price > 0.0) {
        return Err(unavailable(format!("non-positive price {} on {}", p.price, p.date)));
      }
    }

    for pair in points.windows(2) {
      let (prev, next) = (pair[0].date, pair[1].date);
      if next <= prev {
        return Err(unavailable(format!("dates not strictly increasing at {next}")));
      }
    }

    Ok(Self { ticker, points })
  }

  /// Fail when two neighbouring observations are more than `max_gap_days`
  /// calendar days apart.
  pub fn ensure_max_gap(&self, max_gap_days: i64) -> Result<()> {
    for pair in self.points.windows(2) {
      let (prev, next) = (pair[0].date, pair[1].date);
      let gap = (next - prev).num_days();
      if gap > max_gap_days {
        return Err(PipelineError::DataUnavailable {
          ticker: self.ticker.clone(),
          reason: format!("gap of {gap} days between {prev} and {next} exceeds {max_gap_days}"),
        });
      }
    }
    Ok(())
  }

  /// Build from parallel date/price slices.
  pub fn from_pairs(
    ticker: impl Into<String>,
    pairs: impl IntoIterator<Item = (NaiveDate, f64)>,
  ) -> Result<Self> {
    let points = pairs
      .into_iter()
      .map(|(date, price)| PricePoint { date, price })
      .collect();
    Self::new(ticker, points)
  }

  pub fn ticker(&self) -> &str {
    &self.ticker
  }

  pub fn points(&self) -> &[PricePoint] {
    &self.points
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn first(&self) -> PricePoint {
    self.points[0]
  }

  pub fn last(&self) -> PricePoint {
    self.points[self.points.len() - 1]
  }

  /// Calendar days between the first and last observation.
  pub fn span_days(&self) -> i64 {
    (self.last().date - self.first().date).num_days()
  }

  pub fn prices(&self) -> Vec<f64> {
    self.points.iter().map(|p| p.price).collect()
  }

  /// Simple period-over-period returns keyed by the later date.
  pub fn simple_returns(&self) -> Vec<(NaiveDate, f64)> {
    self
      .points
      .windows(2)
      .map(|w| (w[1].date, w[1].price / w[0].price - 1.0))
      .collect()
  }

  /// The last `n` observations, or all of them when shorter.
  pub fn tail(&self, n: usize) -> &[PricePoint] {
    &self.points[self.points.len().saturating_sub(n)..]
  }

  /// Observations on or after `date`.
  pub fn since(&self, date: NaiveDate) -> &[PricePoint] {
    let idx = self.points.partition_point(|p| p.date < date);
    &self.points[idx..]
  }

  /// Observations within the trailing `days` calendar days, last date
  /// inclusive.
  pub fn recent_prices(&self, days: i64) -> &[PricePoint] {
    self.since(self.last().date - Duration::days(days))
  }
}
