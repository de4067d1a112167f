//! # Portfolio Optimizers
//!
//! $$
//! \max_{\mathbf{w}}\ \boldsymbol\mu^\top\mathbf w-\lambda\,\mathbf w^\top\Sigma\mathbf w
//! \quad\text{s.t.}\quad \mathbf 1^\top\mathbf w=1,\ \ \mathbf l\le\mathbf w\le\mathbf u
//! $$
//!
//! Long-only mean-variance allocation with per-asset bounds.
//!
//! The problem is the convex QP `min ½ wᵀHw + cᵀw` with `H = 2λΣ` and
//! `c = −μ`, solved by a primal active-set method on the budget constraint
//! and the box. The first attempt starts from equal weights projected onto
//! the feasible set. If it does not converge, a second attempt starts from a
//! Nelder-Mead presolve of the softmax-parametrized problem.

use std::time::Duration;
use std::time::Instant;

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;
use tracing::warn;

use super::types::PortfolioResult;
use super::types::SolverStatus;
use crate::config::SolverConfig;
use crate::error::PipelineError;
use crate::error::Result;

/// Slack allowed on the budget and on the bounds of a final allocation.
pub const FEASIBILITY_TOL: f64 = 1e-9;
/// Weights below this are floating-point noise and reported as zero.
pub const ZERO_WEIGHT_TOL: f64 = 1e-8;
const DUAL_TOL: f64 = 1e-10;
const STEP_TOL: f64 = 1e-12;
/// Objective decrease below which a step is treated as zero.
const DECREASE_TOL: f64 = 1e-15;
const RIDGE: f64 = 1e-12;
const PRESOLVE_PENALTY: f64 = 1e3;

fn softmax(x: &[f64]) -> Vec<f64> {
  if x.is_empty() {
    return Vec::new();
  }

  let max_x = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  let exps: Vec<f64> = x.iter().map(|&v| (v - max_x).exp()).collect();
  let sum: f64 = exps.iter().sum();

  if sum < 1e-15 || !sum.is_finite() {
    vec![1.0 / x.len() as f64; x.len()]
  } else {
    exps.iter().map(|&e| e / sum).collect()
  }
}

/// Inputs of one mean-variance allocation, positionally aligned.
#[derive(Clone, Debug, PartialEq)]
pub struct MeanVarianceProblem {
  pub mu: DVector<f64>,
  pub cov: DMatrix<f64>,
  pub risk_aversion: f64,
  pub lower: DVector<f64>,
  pub upper: DVector<f64>,
}

impl MeanVarianceProblem {
  pub fn new(
    mu: DVector<f64>,
    cov: DMatrix<f64>,
    risk_aversion: f64,
    lower: DVector<f64>,
    upper: DVector<f64>,
  ) -> Result<Self> {
    let n = mu.len();
    if cov.nrows() != n || cov.ncols() != n || lower.len() != n || upper.len() != n {
      return Err(PipelineError::InvalidConfig(format!(
        "dimension mismatch: {n} expected returns, {}x{} covariance, {} lower and {} upper bounds",
        cov.nrows(),
        cov.ncols(),
        lower.len(),
        upper.len()
      )));
    }
    if !(risk_aversion > 0.0 && risk_aversion.is_finite()) {
      return Err(PipelineError::InvalidConfig(format!(
        "risk aversion must be positive, got {risk_aversion}"
      )));
    }
    if mu.iter().chain(cov.iter()).any(|v| !v.is_finite()) {
      return Err(PipelineError::Optimization {
        status: SolverStatus::NumericalFailure,
        message: "expected returns or covariance contain non-finite values".to_string(),
      });
    }

    Ok(Self {
      mu,
      cov,
      risk_aversion,
      lower,
      upper,
    })
  }

  /// Same `[min, max]` box for every asset.
  pub fn with_uniform_bounds(
    mu: DVector<f64>,
    cov: DMatrix<f64>,
    risk_aversion: f64,
    min: f64,
    max: f64,
  ) -> Result<Self> {
    let n = mu.len();
    Self::new(
      mu,
      cov,
      risk_aversion,
      DVector::from_element(n, min),
      DVector::from_element(n, max),
    )
  }

  pub fn n_assets(&self) -> usize {
    self.mu.len()
  }

  /// `μᵀw − λ wᵀΣw`
  pub fn objective(&self, w: &DVector<f64>) -> f64 {
    self.mu.dot(w) - self.risk_aversion * w.dot(&(&self.cov * w))
  }

  /// Reject bounds that admit no fully invested portfolio.
  pub fn check_feasible(&self) -> Result<()> {
    let infeasible = |message: String| {
      Err(PipelineError::Optimization {
        status: SolverStatus::Infeasible,
        message,
      })
    };

    for i in 0..self.n_assets() {
      let (l, u) = (self.lower[i], self.upper[i]);
      if !(l.is_finite() && u.is_finite()) || l > u {
        return infeasible(format!("bounds of asset {i} are invalid: [{l}, {u}]"));
      }
    }
    let min_total = self.lower.sum();
    if min_total > 1.0 + FEASIBILITY_TOL {
      return infeasible(format!("minimum allocations sum to {min_total:.6} > 1"));
    }
    let max_total = self.upper.sum();
    if max_total < 1.0 - FEASIBILITY_TOL {
      return infeasible(format!("maximum allocations sum to {max_total:.6} < 1"));
    }
    Ok(())
  }
}

/// Caps applied to each solver attempt.
#[derive(Clone, Copy, Debug)]
pub struct SolverSettings {
  pub max_iterations: usize,
  pub time_limit: Duration,
  pub presolve_iterations: u64,
}

impl Default for SolverSettings {
  fn default() -> Self {
    Self::from(&SolverConfig::default())
  }
}

impl From<&SolverConfig> for SolverSettings {
  fn from(config: &SolverConfig) -> Self {
    Self {
      max_iterations: config.max_iterations,
      time_limit: config.time_limit(),
      presolve_iterations: config.retry_presolve_iterations,
    }
  }
}

/// Euclidean-style projection onto `{1ᵀw = 1, l ≤ w ≤ u}`.
///
/// Finds the shift `τ` with `Σ clamp(v − τ, l, u) = 1` by bisection. Bounds
/// must already be known to be feasible.
pub fn project_onto_feasible(
  v: &DVector<f64>,
  lower: &DVector<f64>,
  upper: &DVector<f64>,
) -> DVector<f64> {
  let n = v.len();
  let clamp_at =
    |tau: f64| DVector::from_fn(n, |i, _| (v[i] - tau).max(lower[i]).min(upper[i]));

  let mut lo = (v - upper).min();
  let mut hi = (v - lower).max();
  for _ in 0..200 {
    let mid = 0.5 * (lo + hi);
    if clamp_at(mid).sum() > 1.0 {
      lo = mid;
    } else {
      hi = mid;
    }
  }
  clamp_at(0.5 * (lo + hi))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BoundState {
  Free,
  AtLower,
  AtUpper,
  /// `l == u`, never released.
  Fixed,
}

struct Attempt {
  weights: DVector<f64>,
  status: SolverStatus,
  iterations: usize,
}

/// Candidate update `x += alpha * step` on the free variables.
struct Move {
  step: DVector<f64>,
  alpha: f64,
  blocking: Option<(usize, BoundState)>,
  decrease: f64,
}

struct ActiveSetQp<'a> {
  problem: &'a MeanVarianceProblem,
  hessian: DMatrix<f64>,
  linear: DVector<f64>,
}

impl<'a> ActiveSetQp<'a> {
  fn new(problem: &'a MeanVarianceProblem) -> Self {
    Self {
      problem,
      hessian: &problem.cov * (2.0 * problem.risk_aversion),
      linear: -&problem.mu,
    }
  }

  fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
    &self.hessian * x + &self.linear
  }

  /// Snap `x` onto bounds it already touches and build the working set.
  fn initial_states(&self, x: &mut DVector<f64>) -> Vec<BoundState> {
    let (lower, upper) = (&self.problem.lower, &self.problem.upper);
    (0..x.len())
      .map(|i| {
        if upper[i] - lower[i] <= FEASIBILITY_TOL {
          x[i] = lower[i];
          BoundState::Fixed
        } else if x[i] <= lower[i] + FEASIBILITY_TOL {
          x[i] = lower[i];
          BoundState::AtLower
        } else if x[i] >= upper[i] - FEASIBILITY_TOL {
          x[i] = upper[i];
          BoundState::AtUpper
        } else {
          BoundState::Free
        }
      })
      .collect()
  }

  /// Newton step on the free variables that keeps the budget. A small ridge
  /// keeps the system solvable when `Σ` is singular on the free set.
  fn equality_step(&self, free: &[usize], g: &DVector<f64>) -> Option<DVector<f64>> {
    let f = free.len();
    let ridge = RIDGE * (1.0 + self.hessian.diagonal().amax());
    let mut kkt = DMatrix::zeros(f + 1, f + 1);
    let mut rhs = DVector::zeros(f + 1);

    for (a, &i) in free.iter().enumerate() {
      for (b, &j) in free.iter().enumerate() {
        kkt[(a, b)] = self.hessian[(i, j)];
      }
      kkt[(a, a)] += ridge;
      kkt[(a, f)] = 1.0;
      kkt[(f, a)] = 1.0;
      rhs[a] = -g[i];
    }

    let solution = kkt.lu().solve(&rhs)?;
    let step = solution.rows(0, f).into_owned();
    step.iter().all(|v| v.is_finite()).then_some(step)
  }

  /// Exact minimization of the quadratic along `step`, cut at the first bound.
  ///
  /// Curvature comes from the true Hessian, so a direction of zero curvature
  /// runs until it hits the box. Returns `None` unless `step` is a descent
  /// direction.
  fn line_search(
    &self,
    x: &DVector<f64>,
    free: &[usize],
    g: &DVector<f64>,
    step: DVector<f64>,
  ) -> Option<Move> {
    let (lower, upper) = (&self.problem.lower, &self.problem.upper);
    let slope: f64 = free.iter().enumerate().map(|(k, &i)| g[i] * step[k]).sum();
    if !(slope < 0.0) {
      return None;
    }

    let mut curvature = 0.0;
    for (a, &i) in free.iter().enumerate() {
      for (b, &j) in free.iter().enumerate() {
        curvature += step[a] * self.hessian[(i, j)] * step[b];
      }
    }

    let mut alpha = if curvature > 0.0 { -slope / curvature } else { f64::INFINITY };
    let mut blocking = None;
    for (k, &i) in free.iter().enumerate() {
      let p = step[k];
      let limit = if p < -STEP_TOL {
        Some(((lower[i] - x[i]) / p, BoundState::AtLower))
      } else if p > STEP_TOL {
        Some(((upper[i] - x[i]) / p, BoundState::AtUpper))
      } else {
        None
      };
      if let Some((a, state)) = limit {
        if a < alpha {
          alpha = a;
          blocking = Some((i, state));
        }
      }
    }
    if !alpha.is_finite() {
      return None;
    }

    let alpha = alpha.max(0.0);
    Some(Move {
      decrease: -(alpha * slope + 0.5 * alpha * alpha * curvature),
      step,
      alpha,
      blocking,
    })
  }

  /// Bound with the most negative multiplier at a stationary point of the
  /// current working set.
  fn most_violated_bound(&self, g: &DVector<f64>, nu: f64, states: &[BoundState]) -> Option<usize> {
    let tol = DUAL_TOL * (1.0 + g.amax());
    let mut worst: Option<(usize, f64)> = None;

    for (i, state) in states.iter().enumerate() {
      let violation = match state {
        BoundState::AtLower => -(g[i] + nu),
        BoundState::AtUpper => g[i] + nu,
        _ => continue,
      };
      if violation > tol && worst.map_or(true, |(_, w)| violation > w) {
        worst = Some((i, violation));
      }
    }

    worst.map(|(i, _)| i)
  }

  /// With every variable on a bound the budget multiplier is only known to
  /// lie in an interval. Returns the bound to release if that interval is
  /// empty.
  fn release_when_all_bound(&self, g: &DVector<f64>, states: &[BoundState]) -> Option<usize> {
    let tol = DUAL_TOL * (1.0 + g.amax());
    let mut lo: Option<(usize, f64)> = None;
    let mut hi: Option<(usize, f64)> = None;

    for (i, state) in states.iter().enumerate() {
      match state {
        BoundState::AtLower if lo.map_or(true, |(_, v)| -g[i] > v) => lo = Some((i, -g[i])),
        BoundState::AtUpper if hi.map_or(true, |(_, v)| -g[i] < v) => hi = Some((i, -g[i])),
        _ => {}
      }
    }

    match (lo, hi) {
      (Some((i, lo)), Some((_, hi))) if lo > hi + tol => Some(i),
      _ => None,
    }
  }

  fn solve(&self, start: DVector<f64>, settings: &SolverSettings) -> Attempt {
    let clock = Instant::now();
    let (lower, upper) = (&self.problem.lower, &self.problem.upper);
    let n = start.len();
    let mut x = start;
    let mut states = self.initial_states(&mut x);

    for iteration in 0..settings.max_iterations {
      if clock.elapsed() >= settings.time_limit {
        return Attempt {
          weights: x,
          status: SolverStatus::TimeLimit,
          iterations: iteration,
        };
      }
      if x.iter().any(|v| !v.is_finite()) {
        return Attempt {
          weights: x,
          status: SolverStatus::NumericalFailure,
          iterations: iteration,
        };
      }

      let g = self.gradient(&x);
      let free: Vec<usize> = (0..n).filter(|&i| states[i] == BoundState::Free).collect();

      if free.is_empty() {
        match self.release_when_all_bound(&g, &states) {
          Some(i) => {
            states[i] = BoundState::Free;
            continue;
          }
          None => {
            return Attempt {
              weights: x,
              status: SolverStatus::Optimal,
              iterations: iteration,
            }
          }
        }
      }

      // Budget multiplier that best fits stationarity on the free set.
      let nu = -free.iter().map(|&i| g[i]).sum::<f64>() / free.len() as f64;
      let projected = DVector::from_iterator(free.len(), free.iter().map(|&i| -(g[i] + nu)));

      let best = if projected.amax() <= DUAL_TOL * (1.0 + g.amax()) {
        None
      } else {
        // The Newton step can be useless on a singular Hessian; the projected
        // gradient always descends.
        [self.equality_step(&free, &g), Some(projected)]
          .into_iter()
          .flatten()
          .filter_map(|step| self.line_search(&x, &free, &g, step))
          .max_by(|a, b| a.decrease.total_cmp(&b.decrease))
      };

      let Some(mv) = best.filter(|mv| mv.decrease > DECREASE_TOL || mv.blocking.is_some()) else {
        match self.most_violated_bound(&g, nu, &states) {
          Some(i) => {
            states[i] = BoundState::Free;
            continue;
          }
          None => {
            return Attempt {
              weights: x,
              status: SolverStatus::Optimal,
              iterations: iteration,
            }
          }
        }
      };

      for (k, &i) in free.iter().enumerate() {
        x[i] += mv.alpha * mv.step[k];
      }
      if let Some((i, state)) = mv.blocking {
        x[i] = if state == BoundState::AtLower {
          lower[i]
        } else {
          upper[i]
        };
        states[i] = state;
      }
    }

    Attempt {
      weights: x,
      status: SolverStatus::IterationLimit,
      iterations: settings.max_iterations,
    }
  }
}

fn presolve_weights(
  lower: &DVector<f64>,
  movable: &[usize],
  budget: f64,
  x: &[f64],
) -> DVector<f64> {
  let mut w = lower.clone();
  for (i, s) in movable.iter().zip(softmax(x)) {
    w[*i] += budget * s;
  }
  w
}

/// Vertex that fills the highest expected returns first.
fn greedy_vertex(problem: &MeanVarianceProblem) -> DVector<f64> {
  let mut order: Vec<usize> = (0..problem.n_assets()).collect();
  order.sort_by(|&a, &b| problem.mu[b].total_cmp(&problem.mu[a]));

  let mut w = problem.lower.clone();
  let mut remaining = 1.0 - problem.lower.sum();
  for i in order {
    let add = remaining.min(problem.upper[i] - problem.lower[i]).max(0.0);
    w[i] += add;
    remaining -= add;
  }
  w
}

/// Start for the retry attempt: Nelder-Mead on
/// `w = l + (1 − Σl)·softmax(x)` with a penalty on upper-bound excess,
/// projected back onto the feasible set.
fn presolve_start(problem: &MeanVarianceProblem, iterations: u64) -> DVector<f64> {
  let movable: Vec<usize> = (0..problem.n_assets())
    .filter(|&i| problem.upper[i] - problem.lower[i] > FEASIBILITY_TOL)
    .collect();
  if movable.is_empty() {
    return problem.lower.clone();
  }
  let budget = 1.0 - problem.lower.sum();

  struct PresolveCost {
    problem: MeanVarianceProblem,
    movable: Vec<usize>,
    budget: f64,
  }

  impl CostFunction for PresolveCost {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
      let w = presolve_weights(&self.problem.lower, &self.movable, self.budget, x);
      let excess: f64 = w
        .iter()
        .zip(self.problem.upper.iter())
        .map(|(w, u)| (w - u).max(0.0).powi(2))
        .sum();

      Ok(-self.problem.objective(&w) + PRESOLVE_PENALTY * excess)
    }
  }

  let m = movable.len();
  let cost = PresolveCost {
    problem: problem.clone(),
    movable: movable.clone(),
    budget,
  };

  let x0 = vec![0.0; m];
  let mut simplex = Vec::with_capacity(m + 1);
  simplex.push(x0.clone());
  for i in 0..m {
    let mut point = x0.clone();
    point[i] = 1.0;
    simplex.push(point);
  }

  let w = match NelderMead::new(simplex).with_sd_tolerance(1e-12) {
    Ok(solver) => {
      match Executor::new(cost, solver)
        .configure(|state| state.max_iters(iterations))
        .run()
      {
        Ok(res) => {
          let best_x = res.state.best_param.unwrap_or(x0);
          presolve_weights(&problem.lower, &movable, budget, &best_x)
        }
        Err(_) => greedy_vertex(problem),
      }
    }
    Err(_) => greedy_vertex(problem),
  };

  project_onto_feasible(&w, &problem.lower, &problem.upper)
}

/// Clean solver noise and report the final allocation.
fn finalize(
  problem: &MeanVarianceProblem,
  mut w: DVector<f64>,
  status: SolverStatus,
  iterations: usize,
) -> Result<PortfolioResult> {
  let numerical = |message: String| PipelineError::Optimization {
    status: SolverStatus::NumericalFailure,
    message,
  };

  for i in 0..w.len() {
    let (l, u) = (problem.lower[i], problem.upper[i]);
    if w[i] < l.max(ZERO_WEIGHT_TOL) {
      w[i] = if l > ZERO_WEIGHT_TOL { l } else { 0.0 };
    }
    w[i] = w[i].min(u);
  }

  let total = w.sum();
  if !(total.is_finite() && total > 0.0) {
    return Err(numerical(format!("weights sum to {total}")));
  }
  w /= total;

  for i in 0..w.len() {
    if w[i] < problem.lower[i] - FEASIBILITY_TOL || w[i] > problem.upper[i] + FEASIBILITY_TOL {
      return Err(numerical(format!(
        "weight {} of asset {i} violates [{}, {}]",
        w[i], problem.lower[i], problem.upper[i]
      )));
    }
  }

  let expected_return = problem.mu.dot(&w);
  let variance = w.dot(&(&problem.cov * &w));

  Ok(PortfolioResult {
    objective_value: expected_return - problem.risk_aversion * variance,
    expected_return,
    volatility: variance.max(0.0).sqrt(),
    weights: w.iter().copied().collect(),
    status,
    iterations,
  })
}

/// Long-only mean-variance optimizer with per-asset bounds.
///
/// Returns the weights maximizing `μᵀw − λ wᵀΣw` subject to full investment
/// and `l ≤ w ≤ u`. Infeasible bounds, an exhausted retry or a numerical
/// breakdown are reported as [`PipelineError::Optimization`].
pub fn optimize_mean_variance(
  problem: &MeanVarianceProblem,
  settings: &SolverSettings,
) -> Result<PortfolioResult> {
  let n = problem.n_assets();
  if n == 0 {
    return Err(PipelineError::EmptyUniverse);
  }
  problem.check_feasible()?;
  if n == 1 {
    return finalize(problem, DVector::from_element(1, 1.0), SolverStatus::Optimal, 0);
  }

  let qp = ActiveSetQp::new(problem);
  let start = project_onto_feasible(
    &DVector::from_element(n, 1.0 / n as f64),
    &problem.lower,
    &problem.upper,
  );

  let first = qp.solve(start, settings);
  debug!(status = %first.status, iterations = first.iterations, "active-set attempt finished");
  if first.status == SolverStatus::Optimal {
    return finalize(problem, first.weights, SolverStatus::Optimal, first.iterations);
  }

  warn!(status = %first.status, "allocation did not converge, retrying from presolved start");
  let start = presolve_start(problem, settings.presolve_iterations);
  let second = qp.solve(start, settings);
  let iterations = first.iterations + second.iterations;
  if second.status == SolverStatus::Optimal {
    return finalize(
      problem,
      second.weights,
      SolverStatus::OptimalAfterRetry,
      iterations,
    );
  }

  Err(PipelineError::Optimization {
    status: second.status,
    message: format!("no optimum after retry, {iterations} active-set iterations"),
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;

  use super::*;

  fn two_asset_problem(min: f64, max: f64) -> MeanVarianceProblem {
    MeanVarianceProblem::with_uniform_bounds(
      DVector::from_vec(vec![0.02, 0.01]),
      DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.09]),
      3.0,
      min,
      max,
    )
    .unwrap()
  }

  fn assert_feasible(problem: &MeanVarianceProblem, w: &[f64]) {
    let total: f64 = w.iter().sum();
    assert!((total - 1.0).abs() < FEASIBILITY_TOL, "sum {total}");
    for (i, wi) in w.iter().enumerate() {
      assert!(*wi >= problem.lower[i] - FEASIBILITY_TOL, "w[{i}] = {wi}");
      assert!(*wi <= problem.upper[i] + FEASIBILITY_TOL, "w[{i}] = {wi}");
    }
  }

  #[test]
  fn two_asset_interior_optimum() {
    let problem = two_asset_problem(0.01, 1.0);
    let res = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();

    // d/da: 0.49 − 0.66a = 0
    assert_relative_eq!(res.weights[0], 0.49 / 0.66, epsilon = 1e-9);
    assert_relative_eq!(res.weights[1], 1.0 - 0.49 / 0.66, epsilon = 1e-9);
    assert_eq!(res.status, SolverStatus::Optimal);
    assert_feasible(&problem, &res.weights);

    let w = DVector::from_vec(res.weights.clone());
    assert_relative_eq!(res.objective_value, problem.objective(&w), epsilon = 1e-15);
  }

  #[test]
  fn two_asset_without_minimum_favors_higher_return() {
    let problem = two_asset_problem(0.0, 1.0);
    let res = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();

    assert!(res.weights[0] > res.weights[1]);
    assert_relative_eq!(res.weights[0], 0.49 / 0.66, epsilon = 1e-9);
    assert_eq!(res.status, SolverStatus::Optimal);
    assert_feasible(&problem, &res.weights);
  }

  #[test]
  fn upper_bound_binds() {
    let problem = two_asset_problem(0.0, 0.6);
    let res = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();

    assert_relative_eq!(res.weights[0], 0.6, epsilon = 1e-12);
    assert_relative_eq!(res.weights[1], 0.4, epsilon = 1e-12);
  }

  #[test]
  fn minimum_allocation_binds_for_unattractive_asset() {
    let problem = MeanVarianceProblem::with_uniform_bounds(
      DVector::from_vec(vec![0.03, 0.02, -0.05]),
      DMatrix::from_row_slice(3, 3, &[0.04, 0.0, 0.0, 0.0, 0.04, 0.0, 0.0, 0.0, 0.04]),
      1.0,
      0.1,
      1.0,
    )
    .unwrap();
    let res = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();

    assert_relative_eq!(res.weights[2], 0.1, epsilon = 1e-12);
    assert!(res.weights[0] > res.weights[1]);
    assert_feasible(&problem, &res.weights);
  }

  #[test]
  fn excluded_asset_gets_exactly_zero() {
    let problem = MeanVarianceProblem::new(
      DVector::from_vec(vec![0.02, 0.01, 0.05]),
      DMatrix::from_row_slice(3, 3, &[0.04, 0.01, 0.0, 0.01, 0.09, 0.0, 0.0, 0.0, 0.01]),
      3.0,
      DVector::from_vec(vec![0.01, 0.01, 0.0]),
      DVector::from_vec(vec![1.0, 1.0, 0.0]),
    )
    .unwrap();
    let res = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();

    assert_eq!(res.weights[2], 0.0);
    assert_relative_eq!(res.weights[0], 0.49 / 0.66, epsilon = 1e-9);
  }

  #[test]
  fn infeasible_minimum_allocation() {
    let problem = MeanVarianceProblem::with_uniform_bounds(
      DVector::from_vec(vec![0.01, 0.02, 0.03]),
      DMatrix::identity(3, 3) * 0.04,
      3.0,
      0.5,
      1.0,
    )
    .unwrap();
    let err = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap_err();

    match err {
      PipelineError::Optimization { status, .. } => assert_eq!(status, SolverStatus::Infeasible),
      other => panic!("unexpected error {other:?}"),
    }
  }

  #[test]
  fn maximum_allocations_too_small_is_infeasible() {
    let problem = two_asset_problem(0.0, 0.4);
    let err = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap_err();
    assert_eq!(err.kind(), "optimization");
  }

  #[test]
  fn single_asset_takes_everything() {
    let problem = MeanVarianceProblem::with_uniform_bounds(
      DVector::from_vec(vec![-0.01]),
      DMatrix::from_element(1, 1, 0.04),
      3.0,
      0.01,
      1.0,
    )
    .unwrap();
    let res = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();
    assert_eq!(res.weights, vec![1.0]);
  }

  #[test]
  fn identical_assets_split_evenly() {
    let problem = MeanVarianceProblem::with_uniform_bounds(
      DVector::from_vec(vec![0.01, 0.01]),
      DMatrix::from_row_slice(2, 2, &[0.04, 0.04, 0.04, 0.04]) + DMatrix::identity(2, 2) * 1e-10,
      3.0,
      0.0,
      1.0,
    )
    .unwrap();
    let res = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();

    assert_relative_eq!(res.weights[0], 0.5, epsilon = 1e-6);
    assert_relative_eq!(res.weights[1], 0.5, epsilon = 1e-6);
  }

  #[test]
  fn exhausted_iterations_are_reported() {
    let problem = MeanVarianceProblem::with_uniform_bounds(
      DVector::from_vec(vec![0.01, 0.02, 0.03]),
      DMatrix::identity(3, 3) * 0.04,
      3.0,
      0.0,
      1.0,
    )
    .unwrap();
    let settings = SolverSettings {
      max_iterations: 0,
      ..SolverSettings::default()
    };
    let err = optimize_mean_variance(&problem, &settings).unwrap_err();

    assert_eq!(
      err,
      PipelineError::Optimization {
        status: SolverStatus::IterationLimit,
        message: "no optimum after retry, 0 active-set iterations".to_string(),
      }
    );
  }

  #[test]
  fn capped_first_attempt_recovers_on_retry() {
    // From equal weights the first step only reaches the upper bound.
    let problem = two_asset_problem(0.0, 0.6);
    let settings = SolverSettings {
      max_iterations: 1,
      ..SolverSettings::default()
    };
    let res = optimize_mean_variance(&problem, &settings).unwrap();

    assert_eq!(res.status, SolverStatus::OptimalAfterRetry);
    assert_eq!(res.iterations, 1);
    assert_relative_eq!(res.weights[0], 0.6, epsilon = 1e-12);
    assert_relative_eq!(res.weights[1], 0.4, epsilon = 1e-12);
  }

  #[test]
  fn exhausted_time_is_reported() {
    let problem = two_asset_problem(0.0, 1.0);
    let settings = SolverSettings {
      time_limit: Duration::ZERO,
      ..SolverSettings::default()
    };
    let err = optimize_mean_variance(&problem, &settings).unwrap_err();

    match err {
      PipelineError::Optimization { status, .. } => assert_eq!(status, SolverStatus::TimeLimit),
      other => panic!("unexpected error {other:?}"),
    }
  }

  #[test]
  fn presolve_start_is_feasible_and_near_optimal() {
    let problem = two_asset_problem(0.01, 1.0);
    let start = presolve_start(&problem, 2_000);
    assert_feasible(&problem, start.as_slice());

    let optimum = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();
    assert!(problem.objective(&start) > optimum.objective_value - 1e-4);
  }

  #[test]
  fn projection_lands_on_feasible_set() {
    let lower = DVector::from_vec(vec![0.1, 0.0, 0.2]);
    let upper = DVector::from_vec(vec![0.3, 1.0, 0.5]);
    let v = DVector::from_vec(vec![2.0, -1.0, 0.4]);
    let w = project_onto_feasible(&v, &lower, &upper);

    assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-12);
    assert_relative_eq!(w[0], 0.3, epsilon = 1e-12);
    assert_relative_eq!(w[2], 0.5, epsilon = 1e-12);
  }

  #[test]
  fn random_problems_beat_random_feasible_points() {
    let mut rng = StdRng::seed_from_u64(42);
    let n = 6;

    for _ in 0..20 {
      let a = DMatrix::from_fn(n, n, |_, _| rng.gen_range(-0.05..0.05));
      let cov = a.transpose() * &a + DMatrix::identity(n, n) * 1e-4;
      let mu = DVector::from_fn(n, |_, _| rng.gen_range(-0.02..0.03));
      let problem = MeanVarianceProblem::with_uniform_bounds(mu, cov, 3.0, 0.02, 0.5).unwrap();

      let res = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();
      assert_feasible(&problem, &res.weights);

      for _ in 0..50 {
        let v = DVector::from_fn(n, |_, _| rng.gen_range(0.0..1.0));
        let candidate = project_onto_feasible(&v, &problem.lower, &problem.upper);
        assert!(problem.objective(&candidate) <= res.objective_value + 1e-10);
      }
    }
  }

  #[test]
  fn rank_one_covariance_reaches_edge_optimum() {
    let v = DVector::from_vec(vec![0.03, 0.05, 0.02]);
    let problem = MeanVarianceProblem::with_uniform_bounds(
      DVector::from_vec(vec![0.02, 0.025, 0.0]),
      &v * v.transpose(),
      3.0,
      0.0,
      1.0,
    )
    .unwrap();
    let res = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();

    // On the edge w = (a, 1 − a, 0): 0.001 − 0.0024a = 0.
    assert_eq!(res.status, SolverStatus::Optimal);
    assert_relative_eq!(res.weights[0], 5.0 / 12.0, epsilon = 1e-9);
    assert_relative_eq!(res.weights[1], 7.0 / 12.0, epsilon = 1e-9);
    assert_eq!(res.weights[2], 0.0);

    let equal = DVector::from_element(3, 1.0 / 3.0);
    assert!(res.objective_value > problem.objective(&equal) + 1e-3);
  }

  #[test]
  fn rank_deficient_problems_beat_random_feasible_points() {
    let mut rng = StdRng::seed_from_u64(7);

    for trial in 0..30 {
      let n = 3 + trial % 4;
      let rank = 1 + trial % 2;
      let a = DMatrix::from_fn(rank, n, |_, _| rng.gen_range(-0.2..0.2));
      let cov = a.transpose() * &a;
      let mu = DVector::from_fn(n, |_, _| rng.gen_range(-0.01..0.03));
      let problem = MeanVarianceProblem::with_uniform_bounds(mu, cov, 3.0, 0.0, 1.0).unwrap();

      let res = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();
      assert!(res.status.is_optimal());
      assert_feasible(&problem, &res.weights);

      for _ in 0..200 {
        let v = DVector::from_fn(n, |_, _| rng.gen_range(0.0..2.0));
        let candidate = project_onto_feasible(&v, &problem.lower, &problem.upper);
        assert!(
          problem.objective(&candidate) <= res.objective_value + 1e-10,
          "trial {trial}: {} beats {}",
          problem.objective(&candidate),
          res.objective_value
        );
      }
    }
  }

  #[test]
  fn repeated_runs_are_identical() {
    let problem = two_asset_problem(0.01, 1.0);
    let a = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();
    let b = optimize_mean_variance(&problem, &SolverSettings::default()).unwrap();
    assert_eq!(a.weights, b.weights);
    assert_eq!(a.objective_value, b.objective_value);
  }
}
