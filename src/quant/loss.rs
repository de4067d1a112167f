//! # Loss
//!
//! $$
//! L=\frac1n\sum_{i=1}^n \ell(y_i,\hat y_i)
//! $$
//!
//! In-sample fit diagnostics reported alongside each forecast.

/// Mean Squared Error: MSE = (1/N) Σ(actual_i - fitted_i)²
pub fn mse(actual: &[f64], fitted: &[f64]) -> f64 {
  if actual.is_empty() {
    return 0.0;
  }
  actual
    .iter()
    .zip(fitted.iter())
    .map(|(a, f)| (a - f).powi(2))
    .sum::<f64>()
    / actual.len() as f64
}

/// Root Mean Squared Error: RMSE = √MSE
pub fn rmse(actual: &[f64], fitted: &[f64]) -> f64 {
  mse(actual, fitted).sqrt()
}

/// Mean Absolute Percentage Error (in %): MAPE = (100/N) Σ[|actual_i - fitted_i| / |actual_i|]
pub fn mape(actual: &[f64], fitted: &[f64]) -> f64 {
  if actual.is_empty() {
    return 0.0;
  }
  let sum: f64 = actual
    .iter()
    .zip(fitted.iter())
    .map(|(a, f)| {
      if a.abs() < f64::EPSILON {
        0.0
      } else {
        (a - f).abs() / a.abs()
      }
    })
    .sum();
  (sum / actual.len() as f64) * 100.0
}
