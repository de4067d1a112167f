//! # Allocation Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}\big(\hat{\boldsymbol\mu}(\hat p),\ \Sigma(r),\ \lambda,\ \mathbf l,\ \mathbf u\big)
//! $$
//!
//! Single entry point that drives one forecast-to-allocation run:
//! load, forecast (parallel per asset), estimate, optimize, assemble.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use nalgebra::DVector;
use rayon::prelude::*;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::record::assemble;
use super::record::ExcludedAsset;
use super::record::RunParts;
use super::record::RunRecord;
use crate::config::MissingDataPolicy;
use crate::config::PipelineConfig;
use crate::data::PriceLoader;
use crate::data::PriceSeries;
use crate::error::PipelineError;
use crate::error::Result;
use crate::quant::forecast::forecast;
use crate::quant::forecast::Forecast;
use crate::quant::portfolio::optimize_mean_variance;
use crate::quant::portfolio::AllocationResult;
use crate::quant::portfolio::MeanVarianceProblem;
use crate::quant::portfolio::ReturnEstimator;
use crate::quant::portfolio::ReturnStats;
use crate::quant::portfolio::SolverSettings;

/// Runs the pipeline for one validated [`PipelineConfig`].
#[derive(Clone, Debug)]
pub struct AllocationEngine {
  config: PipelineConfig,
}

impl AllocationEngine {
  /// Validate `config` and construct the engine.
  pub fn new(config: PipelineConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self { config })
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  /// Run the pipeline, stamped with the current time.
  pub fn run<L: PriceLoader + ?Sized>(&self, loader: &L) -> Result<RunRecord> {
    self.run_at(loader, Utc::now())
  }

  /// Run the pipeline with an explicit run timestamp.
  #[instrument(skip_all, fields(requested = self.config.tickers.len(), run_timestamp = %run_timestamp))]
  pub fn run_at<L: PriceLoader + ?Sized>(
    &self,
    loader: &L,
    run_timestamp: DateTime<Utc>,
  ) -> Result<RunRecord> {
    let requested: Vec<String> = self.config.tickers.iter().cloned().collect();
    let mut excluded = Vec::new();
    info!(
      start = %self.config.start_date,
      end = %self.config.end_date,
      "starting allocation run"
    );

    let loaded = self.load(loader, &requested, &mut excluded)?;
    let (mut series, mut forecasts) = self.forecast_all(loaded, &mut excluded)?;
    let stats = self.estimate(&mut series, &mut forecasts, &mut excluded)?;

    let universe = stats.tickers.clone();
    let (lower, upper): (Vec<f64>, Vec<f64>) =
      universe.iter().map(|t| self.config.bounds_for(t)).unzip();
    let problem = MeanVarianceProblem::new(
      stats.mean_returns.clone(),
      stats.covariance.clone(),
      self.config.risk_aversion,
      DVector::from_vec(lower),
      DVector::from_vec(upper),
    )?;
    let result = optimize_mean_variance(&problem, &SolverSettings::from(&self.config.solver))?;
    let allocation = AllocationResult::from_portfolio(&universe, &result, run_timestamp);

    info!(
      assets = universe.len(),
      excluded = excluded.len(),
      status = %allocation.solver_status,
      objective = allocation.objective_value,
      expected_return = allocation.expected_return,
      "allocation run finished"
    );

    let recent_prices: BTreeMap<String, Vec<_>> = series
      .iter()
      .map(|s| {
        (
          s.ticker().to_string(),
          s.recent_prices(self.config.recent_price_days).to_vec(),
        )
      })
      .collect();

    assemble(RunParts {
      run_timestamp,
      start_date: self.config.start_date,
      end_date: self.config.end_date,
      requested_tickers: requested,
      universe,
      excluded,
      forecasts,
      expected_returns: stats.mean_returns_map(),
      allocation,
      covariance_regularization: stats.regularization,
      recent_prices,
    })
  }

  /// Apply the missing-data policy to one per-asset outcome.
  fn admit<T>(
    &self,
    ticker: &str,
    outcome: Result<T>,
    excluded: &mut Vec<ExcludedAsset>,
  ) -> Result<Option<T>> {
    match outcome {
      Ok(value) => Ok(Some(value)),
      Err(error)
        if error.is_per_asset() && self.config.missing_data_policy == MissingDataPolicy::SkipAsset =>
      {
        warn!(ticker, kind = error.kind(), %error, "skipping asset");
        excluded.push(ExcludedAsset {
          ticker: ticker.to_string(),
          error,
        });
        Ok(None)
      }
      Err(error) => Err(error),
    }
  }

  fn load<L: PriceLoader + ?Sized>(
    &self,
    loader: &L,
    tickers: &[String],
    excluded: &mut Vec<ExcludedAsset>,
  ) -> Result<Vec<PriceSeries>> {
    let mut loaded = Vec::with_capacity(tickers.len());
    for ticker in tickers {
      let outcome = loader
        .get_price_series(ticker, self.config.start_date, self.config.end_date)
        .and_then(|series| {
          series.ensure_max_gap(self.config.max_gap_days)?;
          Ok(series)
        });
      if let Some(series) = self.admit(ticker, outcome, excluded)? {
        loaded.push(series);
      }
    }
    Ok(loaded)
  }

  /// Fit every asset in parallel; outcomes are handled in universe order.
  fn forecast_all(
    &self,
    loaded: Vec<PriceSeries>,
    excluded: &mut Vec<ExcludedAsset>,
  ) -> Result<(Vec<PriceSeries>, Vec<Forecast>)> {
    let outcomes: Vec<Result<Forecast>> = loaded
      .par_iter()
      .map(|series| forecast(series, &self.config.forecast))
      .collect();

    let mut series = Vec::with_capacity(loaded.len());
    let mut forecasts = Vec::with_capacity(loaded.len());
    for (s, outcome) in loaded.into_iter().zip(outcomes) {
      if let Some(f) = self.admit(s.ticker(), outcome, excluded)? {
        series.push(s);
        forecasts.push(f);
      }
    }
    Ok((series, forecasts))
  }

  /// Estimate return statistics, dropping assets whose overlap is too short
  /// when the policy allows it.
  fn estimate(
    &self,
    series: &mut Vec<PriceSeries>,
    forecasts: &mut Vec<Forecast>,
    excluded: &mut Vec<ExcludedAsset>,
  ) -> Result<ReturnStats> {
    let estimator = ReturnEstimator::new(
      self.config.lookback_periods,
      self.config.solver.psd_tolerance,
    );

    loop {
      if series.is_empty() {
        return Err(PipelineError::EmptyUniverse);
      }

      let error = match estimator.estimate(series, forecasts) {
        Ok(stats) => return Ok(stats),
        Err(error @ PipelineError::InsufficientOverlap { .. }) => error,
        Err(error) => return Err(error),
      };

      let idx = overlap_victim(&error, series);
      let ticker = series[idx].ticker().to_string();
      if self.admit(&ticker, Err::<(), _>(error), excluded)?.is_none() {
        series.remove(idx);
        forecasts.remove(idx);
      }
    }
  }
}

/// Of the two assets in an overlap failure, the one with fewer observations;
/// the later one in universe order on ties.
fn overlap_victim(error: &PipelineError, series: &[PriceSeries]) -> usize {
  let position = |ticker: &str| series.iter().position(|s| s.ticker() == ticker);
  match error {
    PipelineError::InsufficientOverlap { first, second, .. } => {
      match (position(first), position(second)) {
        (Some(a), Some(b)) if series[a].len() < series[b].len() => a,
        (_, Some(b)) => b,
        (Some(a), None) => a,
        (None, None) => series.len() - 1,
      }
    }
    _ => series.len() - 1,
  }
}
