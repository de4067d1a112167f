//! # Forecast Calibration
//!
//! $$
//! \hat\theta=\arg\min_\theta \sum_i\Big(\frac{\hat y_i(\theta)-y_i}{\sigma}\Big)^2
//! +\sum_j\Big(\frac{\delta_j}{\tau}\Big)^2+\sum_f\Big(\frac{\beta_f}{\sigma_\beta}\Big)^2
//! +\sum_h\Big(\frac{\eta_h}{\sigma_\eta}\Big)^2
//! +\Big(\frac{k}{5}\Big)^2+\Big(\frac{m}{5}\Big)^2
//! $$
//!
//! Maximum a-posteriori fit of [`TrendSeasonalityDesign`] with Gaussian
//! priors, solved by Levenberg-Marquardt.

use levenberg_marquardt::LeastSquaresProblem;
use levenberg_marquardt::LevenbergMarquardt;
use levenberg_marquardt::TerminationReason;
use nalgebra::DMatrix;
use nalgebra::DVector;
use nalgebra::Dyn;
use nalgebra::Owned;

use super::model::TrendSeasonalityDesign;

const TREND_PRIOR_SCALE: f64 = 5.0;
const MIN_NOISE_SCALE: f64 = 1e-3;

/// Prior scales of the MAP objective.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PriorScales {
  pub changepoint: f64,
  pub seasonality: f64,
  pub holiday: f64,
}

#[derive(Clone, Debug)]
pub(crate) struct TrendSeasonalityCalibrator {
  design: TrendSeasonalityDesign,
  /// Observations in scaled units.
  y: DVector<f64>,
  priors: PriorScales,
  /// Observation noise used to weight data residuals.
  noise: f64,
  params: DVector<f64>,
}

/// Converged parameters plus the solver's diagnostics.
#[derive(Debug)]
pub(crate) struct CalibrationOutcome {
  pub params: DVector<f64>,
  pub termination: TerminationReason,
  pub evaluations: usize,
  pub objective: f64,
}

impl CalibrationOutcome {
  pub fn converged(&self) -> bool {
    self.termination.was_successful() && self.params.iter().all(|p| p.is_finite())
  }
}

/// Noise scale from first differences, `sd(Δy) / √2`, floored.
fn noise_scale(y: &[f64]) -> f64 {
  if y.len() < 3 {
    return MIN_NOISE_SCALE;
  }
  let diffs: Vec<f64> = y.windows(2).map(|w| w[1] - w[0]).collect();
  let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
  let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (diffs.len() - 1) as f64;
  (var.sqrt() / std::f64::consts::SQRT_2).max(MIN_NOISE_SCALE)
}

impl TrendSeasonalityCalibrator {
  pub fn new(design: TrendSeasonalityDesign, y: &[f64], priors: PriorScales) -> Self {
    let params = design.initial_params(y);
    Self {
      noise: noise_scale(y),
      y: DVector::from_column_slice(y),
      design,
      priors,
      params,
    }
  }

  pub fn design(&self) -> &TrendSeasonalityDesign {
    &self.design
  }

  /// Run Levenberg-Marquardt; `patience` bounds the number of evaluations.
  pub fn calibrate(self, patience: usize) -> (Self, CalibrationOutcome) {
    let (problem, report) = LevenbergMarquardt::new()
      .with_patience(patience)
      .minimize(self);

    let outcome = CalibrationOutcome {
      params: problem.params.clone(),
      termination: report.termination,
      evaluations: report.number_of_evaluations,
      objective: report.objective_function,
    };
    (problem, outcome)
  }

  fn prior_scale(&self, idx: usize) -> f64 {
    let n_cp = self.design.n_changepoints();
    let first_holiday = self.design.n_params() - self.design.n_holiday_features();
    if idx < 2 {
      TREND_PRIOR_SCALE
    } else if idx < 2 + n_cp {
      self.priors.changepoint
    } else if idx < first_holiday {
      self.priors.seasonality
    } else {
      self.priors.holiday
    }
  }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for TrendSeasonalityCalibrator {
  type JacobianStorage = Owned<f64, Dyn, Dyn>;
  type ParameterStorage = Owned<f64, Dyn>;
  type ResidualStorage = Owned<f64, Dyn>;

  fn set_params(&mut self, params: &DVector<f64>) {
    self.params.copy_from(params);
  }

  fn params(&self) -> DVector<f64> {
    self.params.clone()
  }

  fn residuals(&self) -> Option<DVector<f64>> {
    let n = self.y.len();
    let p = self.params.len();
    let fitted = self.design.fitted(&self.params);
    let mut residuals = DVector::zeros(n + p);

    for i in 0..n {
      residuals[i] = (fitted[i] - self.y[i]) / self.noise;
    }
    for j in 0..p {
      residuals[n + j] = self.params[j] / self.prior_scale(j);
    }

    Some(residuals)
  }

  fn jacobian(&self) -> Option<DMatrix<f64>> {
    let n = self.y.len();
    let p = self.params.len();
    let data = self.design.jacobian(&self.params) / self.noise;
    let mut jac = DMatrix::zeros(n + p, p);

    jac.view_mut((0, 0), (n, p)).copy_from(&data);
    for j in 0..p {
      jac[(n + j, j)] = 1.0 / self.prior_scale(j);
    }

    Some(jac)
  }
}
