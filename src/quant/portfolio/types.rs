//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}}\ \boldsymbol\mu^\top\mathbf w-\lambda\,\mathbf w^\top\Sigma\mathbf w
//! $$
//!
//! Solver statuses and result containers for the allocation step.

use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Outcome of a solver attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
  /// KKT conditions met on the first attempt.
  Optimal,
  /// KKT conditions met after restarting from the presolved start.
  OptimalAfterRetry,
  /// Iteration cap reached.
  IterationLimit,
  /// Wall-clock cap reached.
  TimeLimit,
  /// Bounds and budget admit no portfolio.
  Infeasible,
  /// Singular KKT system or non-finite iterate.
  NumericalFailure,
}

impl SolverStatus {
  pub fn is_optimal(&self) -> bool {
    matches!(self, Self::Optimal | Self::OptimalAfterRetry)
  }
}

impl Display for SolverStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SolverStatus::Optimal => write!(f, "optimal"),
      SolverStatus::OptimalAfterRetry => write!(f, "optimal after retry"),
      SolverStatus::IterationLimit => write!(f, "iteration limit"),
      SolverStatus::TimeLimit => write!(f, "time limit"),
      SolverStatus::Infeasible => write!(f, "infeasible"),
      SolverStatus::NumericalFailure => write!(f, "numerical failure"),
    }
  }
}

/// Output of a portfolio optimization, positionally aligned with its inputs.
#[derive(Clone, Debug)]
pub struct PortfolioResult {
  /// Final portfolio weights.
  pub weights: Vec<f64>,
  /// `μᵀw − λ wᵀΣw` at the final weights.
  pub objective_value: f64,
  /// Model expected portfolio return.
  pub expected_return: f64,
  /// Model portfolio volatility.
  pub volatility: f64,
  pub status: SolverStatus,
  /// Active-set iterations across all attempts.
  pub iterations: usize,
}

/// Ticker-keyed allocation of one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
  pub weights: BTreeMap<String, f64>,
  pub objective_value: f64,
  pub expected_return: f64,
  pub volatility: f64,
  pub solver_status: SolverStatus,
  pub iterations: usize,
  pub run_timestamp: DateTime<Utc>,
}

impl AllocationResult {
  /// Pair positional weights with their tickers.
  pub fn from_portfolio(
    tickers: &[String],
    result: &PortfolioResult,
    run_timestamp: DateTime<Utc>,
  ) -> Self {
    Self {
      weights: tickers
        .iter()
        .cloned()
        .zip(result.weights.iter().copied())
        .collect(),
      objective_value: result.objective_value,
      expected_return: result.expected_return,
      volatility: result.volatility,
      solver_status: result.status,
      iterations: result.iterations,
      run_timestamp,
    }
  }

  pub fn weight(&self, ticker: &str) -> Option<f64> {
    self.weights.get(ticker).copied()
  }
}
