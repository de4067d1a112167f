//! # Portfolio Data Utilities
//!
//! $$
//! \Sigma_{ij}=\frac{1}{n_{ij}-1}\sum_{t\in T_i\cap T_j}(r_{i,t}-\bar r_i^{(ij)})(r_{j,t}-\bar r_j^{(ij)}),\qquad
//! \mu_i=\frac{\hat p_{i,T+1}}{p_{i,T}}-1
//! $$
//!
//! Return estimation: forecast-implied expected returns, pairwise-complete
//! sample covariance and positive semi-definite repair.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use nalgebra::DMatrix;
use nalgebra::DVector;
use nalgebra::SymmetricEigen;
use tracing::debug;
use tracing::warn;

use crate::data::PriceSeries;
use crate::error::PipelineError;
use crate::error::Result;
use crate::quant::forecast::Forecast;

fn sample_mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

/// Simple returns of `series`, restricted to the trailing `lookback` returns.
pub fn simple_returns_series(series: &PriceSeries, lookback: Option<usize>) -> Vec<(NaiveDate, f64)> {
  let returns = series.simple_returns();
  match lookback {
    Some(n) => returns[returns.len().saturating_sub(n)..].to_vec(),
    None => returns,
  }
}

/// Values of `a` and `b` observed on the same dates. Both inputs are sorted.
fn overlap(a: &[(NaiveDate, f64)], b: &[(NaiveDate, f64)]) -> (Vec<f64>, Vec<f64>) {
  let (mut i, mut j) = (0, 0);
  let (mut xs, mut ys) = (Vec::new(), Vec::new());
  while i < a.len() && j < b.len() {
    match a[i].0.cmp(&b[j].0) {
      std::cmp::Ordering::Less => i += 1,
      std::cmp::Ordering::Greater => j += 1,
      std::cmp::Ordering::Equal => {
        xs.push(a[i].1);
        ys.push(b[j].1);
        i += 1;
        j += 1;
      }
    }
  }
  (xs, ys)
}

fn sample_covariance(x: &[f64], y: &[f64]) -> f64 {
  let mx = sample_mean(x);
  let my = sample_mean(y);
  let acc: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
  acc / (x.len() - 1) as f64
}

/// Sample covariance with pairwise-complete alignment on dates.
///
/// Each pair uses only the dates both assets observed, with means taken over
/// that overlap. Returns the matrix and the overlap count of every pair.
pub fn pairwise_covariance(
  tickers: &[String],
  returns: &[Vec<(NaiveDate, f64)>],
) -> Result<(DMatrix<f64>, Vec<Vec<usize>>)> {
  let n = returns.len();
  let mut cov = DMatrix::zeros(n, n);
  let mut counts = vec![vec![0usize; n]; n];

  for i in 0..n {
    for j in i..n {
      let (xs, ys) = overlap(&returns[i], &returns[j]);
      if xs.len() < 2 {
        return Err(PipelineError::InsufficientOverlap {
          first: tickers[i].clone(),
          second: tickers[j].clone(),
          overlap: xs.len(),
        });
      }
      let c = sample_covariance(&xs, &ys);
      cov[(i, j)] = c;
      cov[(j, i)] = c;
      counts[i][j] = xs.len();
      counts[j][i] = xs.len();
    }
  }

  Ok((cov, counts))
}

/// Make `cov` numerically positive semi-definite.
///
/// When the smallest eigenvalue falls below `tolerance · max(1, λ_max)` the
/// diagonal is lifted by `ε` so that it lands exactly on that floor. Returns
/// the (possibly adjusted) matrix and `Some(ε)` when it was adjusted.
pub fn ensure_psd(cov: DMatrix<f64>, tolerance: f64) -> (DMatrix<f64>, Option<f64>) {
  let sym = (&cov + cov.transpose()) * 0.5;
  let eigen = SymmetricEigen::new(sym.clone());
  let lambda_min = eigen.eigenvalues.min();
  let lambda_max = eigen.eigenvalues.max();
  let floor = tolerance * lambda_max.abs().max(1.0);

  if lambda_min.is_finite() && lambda_min >= floor {
    return (sym, None);
  }

  let eps = if lambda_min.is_finite() {
    floor - lambda_min
  } else {
    floor.max(f64::EPSILON)
  };
  let n = sym.nrows();
  (sym + DMatrix::identity(n, n) * eps, Some(eps))
}

/// Expected returns and risk model of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStats {
  pub tickers: Vec<String>,
  /// Forecast-implied expected return per asset, aligned with `tickers`.
  pub mean_returns: DVector<f64>,
  pub covariance: DMatrix<f64>,
  /// Overlapping return observations per pair.
  pub observations: Vec<Vec<usize>>,
  /// Diagonal lift applied to restore positive semi-definiteness.
  pub regularization: Option<f64>,
}

impl ReturnStats {
  pub fn mean_return(&self, ticker: &str) -> Option<f64> {
    let idx = self.tickers.iter().position(|t| t == ticker)?;
    Some(self.mean_returns[idx])
  }

  pub fn mean_returns_map(&self) -> BTreeMap<String, f64> {
    self
      .tickers
      .iter()
      .cloned()
      .zip(self.mean_returns.iter().copied())
      .collect()
  }

  pub fn covariance_of(&self, a: &str, b: &str) -> Option<f64> {
    let i = self.tickers.iter().position(|t| t == a)?;
    let j = self.tickers.iter().position(|t| t == b)?;
    Some(self.covariance[(i, j)])
  }
}

/// Derives [`ReturnStats`] from price histories and their forecasts.
#[derive(Clone, Copy, Debug)]
pub struct ReturnEstimator {
  /// Trailing returns used for risk, `None` uses the whole window.
  pub lookback: Option<usize>,
  pub psd_tolerance: f64,
}

impl ReturnEstimator {
  pub fn new(lookback: Option<usize>, psd_tolerance: f64) -> Self {
    Self {
      lookback,
      psd_tolerance,
    }
  }

  /// `series` and `forecasts` must describe the same assets in the same order.
  pub fn estimate(&self, series: &[PriceSeries], forecasts: &[Forecast]) -> Result<ReturnStats> {
    let tickers: Vec<String> = series.iter().map(|s| s.ticker().to_string()).collect();
    let forecast_tickers: Vec<String> = forecasts.iter().map(|f| f.asset_id.clone()).collect();
    if tickers != forecast_tickers {
      return Err(PipelineError::UniverseMismatch {
        expected: tickers,
        found: forecast_tickers,
      });
    }

    let mean_returns = DVector::from_iterator(
      forecasts.len(),
      forecasts.iter().map(|f| f.implied_return()),
    );

    let returns: Vec<Vec<(NaiveDate, f64)>> = series
      .iter()
      .map(|s| simple_returns_series(s, self.lookback))
      .collect();
    let (cov, observations) = pairwise_covariance(&tickers, &returns)?;
    let (covariance, regularization) = ensure_psd(cov, self.psd_tolerance);

    if let Some(eps) = regularization {
      warn!(eps, "covariance was not positive semi-definite, added diagonal regularization");
    }
    debug!(assets = tickers.len(), "estimated return statistics");

    Ok(ReturnStats {
      tickers,
      mean_returns,
      covariance,
      observations,
      regularization,
    })
  }
}
