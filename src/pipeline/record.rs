//! # Run Record
//!
//! $$
//! \mathcal R=\big(\{\hat p_i\}_{i\in U},\ \{\mu_i\}_{i\in U},\ \mathbf w^\*,\ t_{\text{run}}\big)
//! $$
//!
//! Immutable output of one pipeline run and the assembler that builds it.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use serde::Serialize;

use crate::data::PricePoint;
use crate::error::PipelineError;
use crate::error::Result;
use crate::quant::forecast::Forecast;
use crate::quant::portfolio::AllocationResult;

/// An asset dropped under `skip_asset`, with the error that removed it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExcludedAsset {
  pub ticker: String,
  pub error: PipelineError,
}

/// One persisted row per asset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssetRow {
  pub run_timestamp: DateTime<Utc>,
  pub ticker: String,
  pub price_prediction: f64,
  pub return_prediction: f64,
  pub portfolio_weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunRecord {
  pub run_timestamp: DateTime<Utc>,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  pub requested_tickers: Vec<String>,
  /// Assets that entered the optimization.
  pub universe: Vec<String>,
  pub excluded: Vec<ExcludedAsset>,
  pub forecasts: Vec<Forecast>,
  pub expected_returns: BTreeMap<String, f64>,
  pub allocation: AllocationResult,
  /// Diagonal lift applied to the covariance, if any.
  pub covariance_regularization: Option<f64>,
  /// Trailing actual prices per asset.
  pub recent_prices: BTreeMap<String, Vec<PricePoint>>,
}

impl RunRecord {
  pub fn forecast(&self, ticker: &str) -> Option<&Forecast> {
    self.forecasts.iter().find(|f| f.asset_id == ticker)
  }

  pub fn weight(&self, ticker: &str) -> Option<f64> {
    self.allocation.weight(ticker)
  }

  pub fn is_excluded(&self, ticker: &str) -> bool {
    self.excluded.iter().any(|e| e.ticker == ticker)
  }

  /// Flatten to `(ticker, predicted price, predicted return, weight)` rows
  /// in universe order.
  pub fn asset_rows(&self) -> Vec<AssetRow> {
    self
      .forecasts
      .iter()
      .map(|f| AssetRow {
        run_timestamp: self.run_timestamp,
        ticker: f.asset_id.clone(),
        price_prediction: f.predicted_price,
        return_prediction: self
          .expected_returns
          .get(&f.asset_id)
          .copied()
          .unwrap_or_else(|| f.implied_return()),
        portfolio_weight: self.weight(&f.asset_id).unwrap_or(0.0),
      })
      .collect()
  }
}

/// Inputs collected by the engine for one run.
#[derive(Clone, Debug)]
pub struct RunParts {
  pub run_timestamp: DateTime<Utc>,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  pub requested_tickers: Vec<String>,
  pub universe: Vec<String>,
  pub excluded: Vec<ExcludedAsset>,
  pub forecasts: Vec<Forecast>,
  pub expected_returns: BTreeMap<String, f64>,
  pub allocation: AllocationResult,
  pub covariance_regularization: Option<f64>,
  pub recent_prices: BTreeMap<String, Vec<PricePoint>>,
}

/// Package the run into a [`RunRecord`].
///
/// Weight keys must equal the universe and every universe asset must have
/// exactly one forecast.
pub fn assemble(parts: RunParts) -> Result<RunRecord> {
  let universe: BTreeSet<&str> = parts.universe.iter().map(String::as_str).collect();
  let weight_keys: BTreeSet<&str> = parts.allocation.weights.keys().map(String::as_str).collect();
  if universe != weight_keys || universe.len() != parts.universe.len() {
    return Err(PipelineError::UniverseMismatch {
      expected: parts.universe.clone(),
      found: parts.allocation.weights.keys().cloned().collect(),
    });
  }

  let forecast_ids: Vec<&str> = parts.forecasts.iter().map(|f| f.asset_id.as_str()).collect();
  let forecast_set: BTreeSet<&str> = forecast_ids.iter().copied().collect();
  if forecast_set != universe || forecast_ids.len() != forecast_set.len() {
    return Err(PipelineError::UniverseMismatch {
      expected: parts.universe.clone(),
      found: forecast_ids.iter().map(|s| s.to_string()).collect(),
    });
  }

  Ok(RunRecord {
    run_timestamp: parts.run_timestamp,
    start_date: parts.start_date,
    end_date: parts.end_date,
    requested_tickers: parts.requested_tickers,
    universe: parts.universe,
    excluded: parts.excluded,
    forecasts: parts.forecasts,
    expected_returns: parts.expected_returns,
    allocation: parts.allocation,
    covariance_regularization: parts.covariance_regularization,
    recent_prices: parts.recent_prices,
  })
}
