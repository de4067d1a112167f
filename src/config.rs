//! # Configuration
//!
//! Explicit run configuration passed into [`crate::AllocationEngine`]. Every
//! run owns its configuration, nothing is read from process-wide state.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PipelineError;
use crate::error::Result;
use crate::quant::forecast::ForecastConfig;

/// What to do when a single asset cannot be loaded, fitted or estimated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDataPolicy {
  /// Abort the whole run on the first per-asset failure.
  #[default]
  FailFast,
  /// Drop the asset from this run and log a warning.
  SkipAsset,
}

/// Per-asset `(min, max)` weight override. `(0, 0)` excludes the asset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetBounds {
  pub min: f64,
  pub max: f64,
}

/// Limits for the allocation solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
  /// Active-set iterations per attempt.
  pub max_iterations: usize,
  /// Wall-clock budget per attempt, in milliseconds.
  pub time_limit_ms: u64,
  /// Nelder-Mead iterations for the retry start.
  pub retry_presolve_iterations: u64,
  /// Relative eigenvalue floor below which the covariance is regularized.
  pub psd_tolerance: f64,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      max_iterations: 500,
      time_limit_ms: 2_000,
      retry_presolve_iterations: 2_000,
      psd_tolerance: 1e-10,
    }
  }
}

impl SolverConfig {
  pub fn time_limit(&self) -> Duration {
    Duration::from_millis(self.time_limit_ms)
  }
}

/// Full configuration of one forecast-to-allocation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
  pub tickers: BTreeSet<String>,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  /// Risk aversion `λ` in `μᵀw − λ wᵀΣw`.
  #[serde(default = "default_risk_aversion")]
  pub risk_aversion: f64,
  #[serde(default = "default_minimum_allocation")]
  pub minimum_allocation: f64,
  #[serde(default = "default_maximum_allocation")]
  pub maximum_allocation: f64,
  #[serde(default)]
  pub asset_bounds: BTreeMap<String, AssetBounds>,
  #[serde(default)]
  pub missing_data_policy: MissingDataPolicy,
  /// Largest tolerated calendar gap between consecutive observations.
  #[serde(default = "default_max_gap_days")]
  pub max_gap_days: i64,
  /// Trailing observations used for risk estimation, `None` uses all.
  #[serde(default = "default_lookback_periods")]
  pub lookback_periods: Option<usize>,
  /// Trailing calendar days of actual prices kept in the run record.
  #[serde(default = "default_recent_price_days")]
  pub recent_price_days: i64,
  #[serde(default)]
  pub forecast: ForecastConfig,
  #[serde(default)]
  pub solver: SolverConfig,
}

fn default_risk_aversion() -> f64 {
  3.0
}

fn default_minimum_allocation() -> f64 {
  0.01
}

fn default_maximum_allocation() -> f64 {
  1.0
}

fn default_max_gap_days() -> i64 {
  7
}

fn default_lookback_periods() -> Option<usize> {
  Some(252)
}

fn default_recent_price_days() -> i64 {
  30
}

impl PipelineConfig {
  /// Configuration with defaults for everything but the universe and window.
  pub fn new<I, S>(tickers: I, start_date: NaiveDate, end_date: NaiveDate) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      tickers: tickers.into_iter().map(Into::into).collect(),
      start_date,
      end_date,
      risk_aversion: default_risk_aversion(),
      minimum_allocation: default_minimum_allocation(),
      maximum_allocation: default_maximum_allocation(),
      asset_bounds: BTreeMap::new(),
      missing_data_policy: MissingDataPolicy::default(),
      max_gap_days: default_max_gap_days(),
      lookback_periods: default_lookback_periods(),
      recent_price_days: default_recent_price_days(),
      forecast: ForecastConfig::default(),
      solver: SolverConfig::default(),
    }
  }

  /// Parse a TOML document.
  pub fn from_toml_str(s: &str) -> Result<Self> {
    let config: Self = toml::from_str(s)?;
    config.validate()?;
    Ok(config)
  }

  /// Load and validate a TOML file.
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  /// Lower and upper weight bound for `ticker`.
  pub fn bounds_for(&self, ticker: &str) -> (f64, f64) {
    match self.asset_bounds.get(ticker) {
      Some(b) => (b.min, b.max),
      None => (self.minimum_allocation, self.maximum_allocation),
    }
  }

  /// Reject values outside their documented domain.
  ///
  /// `minimum_allocation < 1/N` is left to the optimizer's feasibility check,
  /// since `N` is only known once skipped assets are removed.
  pub fn validate(&self) -> Result<()> {
    let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

    if self.tickers.is_empty() {
      return invalid("tickers must not be empty".to_string());
    }
    if self.tickers.iter().any(|t| t.trim().is_empty()) {
      return invalid("tickers must not be blank".to_string());
    }
    if self.start_date >= self.end_date {
      return invalid(format!(
        "start_date {} must precede end_date {}",
        self.start_date, self.end_date
      ));
    }
    if !(self.risk_aversion.is_finite() && self.risk_aversion > 0.0) {
      return invalid(format!("risk_aversion must be > 0, got {}", self.risk_aversion));
    }
    if !(0.0..1.0).contains(&self.minimum_allocation) {
      return invalid(format!(
        "minimum_allocation must lie in [0, 1), got {}",
        self.minimum_allocation
      ));
    }
    if !(self.maximum_allocation > 0.0 && self.maximum_allocation <= 1.0) {
      return invalid(format!(
        "maximum_allocation must lie in (0, 1], got {}",
        self.maximum_allocation
      ));
    }
    if self.minimum_allocation > self.maximum_allocation {
      return invalid("minimum_allocation exceeds maximum_allocation".to_string());
    }
    for (ticker, b) in &self.asset_bounds {
      if !self.tickers.contains(ticker) {
        return invalid(format!("asset_bounds names unknown ticker {ticker}"));
      }
      if !(0.0 <= b.min && b.min <= b.max && b.max <= 1.0) {
        return invalid(format!(
          "asset_bounds for {ticker} must satisfy 0 <= min <= max <= 1, got ({}, {})",
          b.min, b.max
        ));
      }
    }
    if self.max_gap_days < 1 {
      return invalid("max_gap_days must be at least 1".to_string());
    }
    if self.lookback_periods.is_some_and(|n| n < 2) {
      return invalid("lookback_periods must be at least 2".to_string());
    }
    if self.recent_price_days < 0 {
      return invalid("recent_price_days must not be negative".to_string());
    }
    if self.solver.time_limit_ms == 0 {
      return invalid("solver.time_limit_ms must be positive".to_string());
    }
    if !(self.solver.psd_tolerance.is_finite() && self.solver.psd_tolerance >= 0.0) {
      return invalid("solver.psd_tolerance must be finite and >= 0".to_string());
    }

    self.forecast.validate()
  }
}
