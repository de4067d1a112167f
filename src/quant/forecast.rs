//! # Forecast
//!
//! $$
//! \hat p_{T+1}=\bar p\cdot\hat y\big(t(d_T+1)\big)
//! $$
//!
//! One-step-ahead price forecasts from a per-asset trend + seasonality fit.
//! Each fit is a pure function of the series and [`ForecastConfig`], so
//! assets can be fitted in parallel without sharing state.

pub mod calibration;
pub mod holidays;
pub mod model;

use chrono::Duration;
use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use self::calibration::PriorScales;
use self::calibration::TrendSeasonalityCalibrator;
use self::holidays::holiday_effects;
pub use self::holidays::MarketHoliday;
pub use self::model::SeasonalityMode;
use self::model::Seasonality;
use self::model::TrendSeasonalityDesign;
use self::model::WEEKLY_PERIOD;
use self::model::YEARLY_PERIOD;
use crate::data::PriceSeries;
use crate::error::PipelineError;
use crate::error::Result;
use crate::quant::loss;

/// Fewest observations that still cover one weekly cycle.
pub const MIN_CYCLE_OBSERVATIONS: usize = 8;

/// Hyperparameters of the per-asset model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
  pub seasonality_mode: SeasonalityMode,
  /// Potential trend changepoints.
  pub n_changepoints: usize,
  /// Leading share of the history eligible for changepoints.
  pub changepoint_range: f64,
  /// Prior scale of trend changes; larger values follow the data more closely.
  pub changepoint_prior_scale: f64,
  pub seasonality_prior_scale: f64,
  /// Fourier order of the weekly component, 0 disables it.
  pub weekly_order: usize,
  /// Fourier order of the yearly component, 0 disables it.
  pub yearly_order: usize,
  /// Fit NYSE closure indicators.
  pub holidays: bool,
  /// Days before and after each closure that get their own indicator.
  pub holiday_window: u32,
  pub holidays_prior_scale: f64,
  pub min_observations: usize,
  /// Levenberg-Marquardt patience; evaluations are capped at
  /// `patience * (params + 1)`.
  pub fit_patience: usize,
}

impl Default for ForecastConfig {
  fn default() -> Self {
    Self {
      seasonality_mode: SeasonalityMode::Additive,
      n_changepoints: 25,
      changepoint_range: 0.8,
      changepoint_prior_scale: 0.05,
      seasonality_prior_scale: 10.0,
      weekly_order: 3,
      yearly_order: 10,
      holidays: true,
      holiday_window: 1,
      holidays_prior_scale: 10.0,
      min_observations: 30,
      fit_patience: 100,
    }
  }
}

impl ForecastConfig {
  pub fn validate(&self) -> Result<()> {
    let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

    if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
      return invalid(format!(
        "forecast.changepoint_range must lie in (0, 1], got {}",
        self.changepoint_range
      ));
    }
    if !(self.changepoint_prior_scale > 0.0 && self.changepoint_prior_scale.is_finite()) {
      return invalid("forecast.changepoint_prior_scale must be > 0".to_string());
    }
    if !(self.seasonality_prior_scale > 0.0 && self.seasonality_prior_scale.is_finite()) {
      return invalid("forecast.seasonality_prior_scale must be > 0".to_string());
    }
    if !(self.holidays_prior_scale > 0.0 && self.holidays_prior_scale.is_finite()) {
      return invalid("forecast.holidays_prior_scale must be > 0".to_string());
    }
    if self.min_observations < MIN_CYCLE_OBSERVATIONS {
      return invalid(format!(
        "forecast.min_observations must be at least {MIN_CYCLE_OBSERVATIONS}, got {}",
        self.min_observations
      ));
    }
    if self.fit_patience == 0 {
      return invalid("forecast.fit_patience must be positive".to_string());
    }
    Ok(())
  }

  /// Simpler model used for the single retry after a failed fit.
  pub fn relaxed(&self) -> Self {
    Self {
      n_changepoints: self.n_changepoints / 2,
      changepoint_prior_scale: self.changepoint_prior_scale * 0.5,
      weekly_order: halve_order(self.weekly_order),
      yearly_order: halve_order(self.yearly_order),
      ..self.clone()
    }
  }

  /// Seasonal blocks the history is long enough to identify, two full
  /// cycles each.
  fn seasonalities(&self, span_days: i64) -> Vec<Seasonality> {
    let span = span_days as f64;
    let mut out = Vec::new();
    if self.weekly_order > 0 && span >= 2.0 * WEEKLY_PERIOD {
      out.push(Seasonality {
        period: WEEKLY_PERIOD,
        order: self.weekly_order,
      });
    }
    if self.yearly_order > 0 && span >= 2.0 * YEARLY_PERIOD {
      out.push(Seasonality {
        period: YEARLY_PERIOD,
        order: self.yearly_order,
      });
    }
    out
  }
}

fn halve_order(order: usize) -> usize {
  if order == 0 {
    0
  } else {
    (order / 2).max(1)
  }
}

/// One-step-ahead forecast for a single asset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
  pub asset_id: String,
  /// Date of the last observation the model saw.
  pub as_of_date: NaiveDate,
  pub predicted_price: f64,
  pub prediction_date: NaiveDate,
  pub last_observed_price: f64,
  pub in_sample_rmse: f64,
  /// In percent.
  pub in_sample_mape: f64,
  /// Produced by the relaxed-hyperparameter retry.
  pub relaxed_fit: bool,
}

impl Forecast {
  /// `predicted / last − 1`.
  pub fn implied_return(&self) -> f64 {
    self.predicted_price / self.last_observed_price - 1.0
  }
}

/// Fit the model to `series` and forecast the next calendar day.
///
/// A failed fit is retried once with [`ForecastConfig::relaxed`].
#[instrument(skip_all, fields(ticker = series.ticker(), n = series.len()))]
pub fn forecast(series: &PriceSeries, config: &ForecastConfig) -> Result<Forecast> {
  forecast_with(series, config, fit_once)
}

fn forecast_with<F>(series: &PriceSeries, config: &ForecastConfig, fit: F) -> Result<Forecast>
where
  F: Fn(&PriceSeries, &ForecastConfig, bool) -> Result<Forecast>,
{
  if series.len() < config.min_observations {
    return Err(PipelineError::InsufficientData {
      ticker: series.ticker().to_string(),
      observations: series.len(),
      required: config.min_observations,
    });
  }

  match fit(series, config, false) {
    Err(PipelineError::ModelFit { reason, .. }) => {
      warn!(%reason, "fit failed, retrying with relaxed hyperparameters");
      fit(series, &config.relaxed(), true)
    }
    other => other,
  }
}

fn fit_once(series: &PriceSeries, config: &ForecastConfig, relaxed: bool) -> Result<Forecast> {
  let ticker = series.ticker();
  let fit_error = |reason: String| PipelineError::ModelFit {
    ticker: ticker.to_string(),
    reason,
  };

  let dates: Vec<NaiveDate> = series.points().iter().map(|p| p.date).collect();
  let prices = series.prices();
  let scale = prices.iter().fold(0.0_f64, |acc, p| acc.max(p.abs()));
  let y: Vec<f64> = prices.iter().map(|p| p / scale).collect();

  let holidays = if config.holidays {
    holiday_effects(&dates, config.holiday_window)
  } else {
    Vec::new()
  };
  let design = TrendSeasonalityDesign::new(
    &dates,
    config.seasonality_mode,
    config.n_changepoints,
    config.changepoint_range,
    config.seasonalities(series.span_days()),
    holidays,
  );
  debug!(
    params = design.n_params(),
    holiday_features = design.n_holiday_features(),
    "design built"
  );
  let calibrator = TrendSeasonalityCalibrator::new(
    design,
    &y,
    PriorScales {
      changepoint: config.changepoint_prior_scale,
      seasonality: config.seasonality_prior_scale,
      holiday: config.holidays_prior_scale,
    },
  );

  let (problem, outcome) = calibrator.calibrate(config.fit_patience);
  debug!(
    termination = ?outcome.termination,
    evaluations = outcome.evaluations,
    objective = outcome.objective,
    relaxed,
    "calibration finished"
  );
  if !outcome.converged() {
    return Err(fit_error(format!("solver stopped: {:?}", outcome.termination)));
  }

  let as_of = series.last();
  let prediction_date = as_of.date + Duration::days(1);
  let predicted_price = problem.design().predict(prediction_date, &outcome.params) * scale;
  if !(predicted_price.is_finite() && predicted_price > 0.0) {
    return Err(fit_error(format!("non-positive prediction {predicted_price}")));
  }

  let fitted: Vec<f64> = problem
    .design()
    .fitted(&outcome.params)
    .iter()
    .map(|v| v * scale)
    .collect();

  Ok(Forecast {
    asset_id: ticker.to_string(),
    as_of_date: as_of.date,
    predicted_price,
    prediction_date,
    last_observed_price: as_of.price,
    in_sample_rmse: loss::rmse(&prices, &fitted),
    in_sample_mape: loss::mape(&prices, &fitted),
    relaxed_fit: relaxed,
  })
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use tracing_test::traced_test;

  use super::*;

  fn daily_series(ticker: &str, start: NaiveDate, n: usize, f: impl Fn(usize) -> f64) -> PriceSeries {
    PriceSeries::from_pairs(ticker, (0..n).map(|i| (start + Duration::days(i as i64), f(i)))).unwrap()
  }

  fn stalled(ticker: &str) -> PipelineError {
    PipelineError::ModelFit {
      ticker: ticker.to_string(),
      reason: "stalled".to_string(),
    }
  }

  fn weekday_series(ticker: &str, n: usize, f: impl Fn(usize) -> f64) -> PriceSeries {
    let mut date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut pairs = Vec::with_capacity(n);
    while pairs.len() < n {
      let wd = chrono::Datelike::weekday(&date).num_days_from_monday();
      if wd < 5 {
        pairs.push((date, f(pairs.len())));
      }
      date += Duration::days(1);
    }
    PriceSeries::from_pairs(ticker, pairs).unwrap()
  }

  #[test]
  fn rejects_short_history() {
    let series = weekday_series("AMD", 10, |i| 100.0 + i as f64);
    let err = forecast(&series, &ForecastConfig::default()).unwrap_err();

    assert_eq!(
      err,
      PipelineError::InsufficientData {
        ticker: "AMD".to_string(),
        observations: 10,
        required: 30,
      }
    );
  }

  #[test]
  fn extrapolates_linear_trend() {
    let series = weekday_series("MSFT", 120, |i| 100.0 + 0.5 * i as f64);
    let f = forecast(&series, &ForecastConfig::default()).unwrap();

    assert_eq!(f.asset_id, "MSFT");
    assert_eq!(f.prediction_date, f.as_of_date + Duration::days(1));
    assert_eq!(f.last_observed_price, 100.0 + 0.5 * 119.0);
    assert!(!f.relaxed_fit);
    // One calendar day of a weekday-only trend is a fraction of a step.
    assert!(f.predicted_price > 155.0 && f.predicted_price < 162.0, "{}", f.predicted_price);
    assert!(f.in_sample_mape < 1.0);
  }

  #[test]
  fn multiplicative_mode_fits_positive_series() {
    let config = ForecastConfig {
      seasonality_mode: SeasonalityMode::Multiplicative,
      ..ForecastConfig::default()
    };
    let series = weekday_series("AAPL", 90, |i| {
      180.0 * (1.0 + 0.002 * i as f64) * (1.0 + 0.01 * ((i % 5) as f64 - 2.0))
    });
    let f = forecast(&series, &config).unwrap();

    assert!(f.predicted_price > 0.0);
    assert!((f.implied_return()).abs() < 0.1);
  }

  #[test]
  fn forecasting_is_deterministic() {
    let series = weekday_series("NVDA", 60, |i| 50.0 + (i as f64 * 0.3).sin() * 2.0 + 0.1 * i as f64);
    let config = ForecastConfig::default();

    let a = forecast(&series, &config).unwrap();
    let b = forecast(&series, &config).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn relaxed_config_halves_complexity() {
    let relaxed = ForecastConfig::default().relaxed();
    assert_eq!(relaxed.n_changepoints, 12);
    assert_eq!(relaxed.weekly_order, 1);
    assert_eq!(relaxed.yearly_order, 5);
    assert_eq!(relaxed.changepoint_prior_scale, 0.025);

    let none = ForecastConfig {
      weekly_order: 0,
      ..ForecastConfig::default()
    }
    .relaxed();
    assert_eq!(none.weekly_order, 0);
  }

  #[test]
  fn validate_enforces_one_cycle_of_observations() {
    let config = ForecastConfig {
      min_observations: 5,
      ..ForecastConfig::default()
    };
    assert!(config.validate().is_err());
    assert!(ForecastConfig::default().validate().is_ok());
  }

  #[test]
  #[traced_test]
  fn failed_fit_is_retried_once_with_relaxed_config() {
    let series = weekday_series("AMD", 60, |i| 100.0 + 0.2 * i as f64);
    let calls = Cell::new(0);

    let f = forecast_with(&series, &ForecastConfig::default(), |s, config, relaxed| {
      calls.set(calls.get() + 1);
      if !relaxed {
        return Err(stalled(s.ticker()));
      }
      assert_eq!(config, &ForecastConfig::default().relaxed());
      fit_once(s, config, relaxed)
    })
    .unwrap();

    assert_eq!(calls.get(), 2);
    assert!(f.relaxed_fit);
    assert!(f.predicted_price > 100.0);
    assert!(logs_contain("retrying with relaxed hyperparameters"));
  }

  #[test]
  fn second_failure_is_reported() {
    let series = weekday_series("AMD", 60, |i| 100.0 + 0.2 * i as f64);
    let calls = Cell::new(0);

    let err = forecast_with(&series, &ForecastConfig::default(), |s, _, _| {
      calls.set(calls.get() + 1);
      Err(stalled(s.ticker()))
    })
    .unwrap_err();

    assert_eq!(calls.get(), 2);
    assert_eq!(err, stalled("AMD"));
  }

  #[test]
  fn only_fit_failures_are_retried() {
    let series = weekday_series("AMD", 60, |i| 100.0 + 0.2 * i as f64);
    let calls = Cell::new(0);

    let err = forecast_with(&series, &ForecastConfig::default(), |s, _, _| {
      calls.set(calls.get() + 1);
      Err(PipelineError::DataUnavailable {
        ticker: s.ticker().to_string(),
        reason: "gone".to_string(),
      })
    })
    .unwrap_err();

    assert_eq!(calls.get(), 1);
    assert_eq!(err.kind(), "data_unavailable");
  }

  #[test]
  fn collapsing_price_fails_to_fit() {
    // Falls 0.5 a day to 0.1, so the next day extrapolates below zero.
    let start = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let series = daily_series("CRASH", start, 60, |i| 0.1 + 0.5 * (59 - i) as f64);
    let err = forecast(&series, &ForecastConfig::default()).unwrap_err();

    assert_eq!(err.kind(), "model_fit");
    assert_eq!(err.failing_assets(), vec!["CRASH"]);
  }

  #[test]
  fn short_span_fits_without_weekly_component() {
    let config = ForecastConfig {
      min_observations: 5,
      ..ForecastConfig::default()
    };
    let start = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let series = daily_series("IBM", start, 6, |i| 100.0 + i as f64);
    let f = forecast(&series, &config).unwrap();

    assert!(!f.relaxed_fit);
    assert!((f.predicted_price - 106.0).abs() < 0.5, "{}", f.predicted_price);
  }

  #[test]
  fn holidays_can_be_disabled() {
    let series = weekday_series("MSFT", 120, |i| 100.0 + 0.5 * i as f64);
    let with = forecast(&series, &ForecastConfig::default()).unwrap();
    let without = forecast(
      &series,
      &ForecastConfig {
        holidays: false,
        ..ForecastConfig::default()
      },
    )
    .unwrap();

    assert!((with.predicted_price - without.predicted_price).abs() < 1.0);
    assert!(ForecastConfig {
      holidays_prior_scale: 0.0,
      ..ForecastConfig::default()
    }
    .validate()
    .is_err());
  }
}
