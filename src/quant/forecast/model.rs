//! # Trend + Seasonality Model
//!
//! $$
//! g(t)=\big(k+\mathbf a(t)^\top\boldsymbol\delta\big)t+\big(m-\mathbf a(t)^\top(\mathbf s\circ\boldsymbol\delta)\big),\qquad
//! s(d)=\sum_{n=1}^{N}\Big(a_n\cos\tfrac{2\pi n d}{P}+b_n\sin\tfrac{2\pi n d}{P}\Big)
//! $$
//!
//! Piecewise-linear trend with changepoints plus Fourier seasonality and
//! holiday indicators, combined additively or multiplicatively.

use chrono::NaiveDate;
use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;

use super::holidays::HolidayEffect;

pub(crate) const WEEKLY_PERIOD: f64 = 7.0;
pub(crate) const YEARLY_PERIOD: f64 = 365.25;

/// How the seasonal component enters the fitted value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalityMode {
  /// `y = g(t) + s(t)`
  #[default]
  Additive,
  /// `y = g(t) · (1 + s(t))`
  Multiplicative,
}

/// One Fourier block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Seasonality {
  pub period: f64,
  pub order: usize,
}

fn days_since_epoch(date: NaiveDate) -> f64 {
  // Unix epoch, so phases do not depend on where the history starts.
  let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
  (date - epoch).num_days() as f64
}

fn feature_row(
  date: NaiveDate,
  seasonalities: &[Seasonality],
  holidays: &[HolidayEffect],
  out: &mut Vec<f64>,
) {
  let d = days_since_epoch(date);
  for s in seasonalities {
    for n in 1..=s.order {
      let x = 2.0 * std::f64::consts::PI * n as f64 * d / s.period;
      out.push(x.sin());
      out.push(x.cos());
    }
  }
  for h in holidays {
    out.push(if h.is_active(date) { 1.0 } else { 0.0 });
  }
}

/// Fixed design of a fit: time scaling, changepoints, seasonal and holiday
/// features.
///
/// Parameter layout is `[k, m, δ_1..δ_S, β_1..β_F, η_1..η_H]`.
#[derive(Clone, Debug)]
pub(crate) struct TrendSeasonalityDesign {
  pub mode: SeasonalityMode,
  pub start: NaiveDate,
  pub span_days: f64,
  /// Changepoint locations on the scaled time axis.
  pub changepoints: Vec<f64>,
  pub seasonalities: Vec<Seasonality>,
  pub holidays: Vec<HolidayEffect>,
  /// Scaled time of each observation.
  pub t: Vec<f64>,
  /// Fourier then holiday features, one row per observation.
  pub x: DMatrix<f64>,
}

impl TrendSeasonalityDesign {
  /// Place `n_changepoints` uniformly over the first `changepoint_range` of
  /// the history, clipped to what the history can support.
  pub fn new(
    dates: &[NaiveDate],
    mode: SeasonalityMode,
    n_changepoints: usize,
    changepoint_range: f64,
    seasonalities: Vec<Seasonality>,
    holidays: Vec<HolidayEffect>,
  ) -> Self {
    let start = dates[0];
    let span_days = ((dates[dates.len() - 1] - start).num_days() as f64).max(1.0);
    let t: Vec<f64> = dates
      .iter()
      .map(|d| (*d - start).num_days() as f64 / span_days)
      .collect();

    let hist_size = ((dates.len() as f64) * changepoint_range).floor() as usize;
    let n_cp = n_changepoints.min(hist_size.saturating_sub(1));
    let changepoints = if n_cp == 0 {
      Vec::new()
    } else {
      let last = (hist_size - 1) as f64;
      (1..=n_cp)
        .map(|j| {
          let idx = (last * j as f64 / n_cp as f64).round() as usize;
          t[idx]
        })
        .collect()
    };

    let n_features = seasonalities.iter().map(|s| 2 * s.order).sum::<usize>() + holidays.len();
    let mut data = Vec::with_capacity(dates.len() * n_features);
    for d in dates {
      feature_row(*d, &seasonalities, &holidays, &mut data);
    }
    let x = DMatrix::from_row_slice(dates.len(), n_features, &data);

    Self {
      mode,
      start,
      span_days,
      changepoints,
      seasonalities,
      holidays,
      t,
      x,
    }
  }

  pub fn n_changepoints(&self) -> usize {
    self.changepoints.len()
  }

  pub fn n_features(&self) -> usize {
    self.x.ncols()
  }

  pub fn n_holiday_features(&self) -> usize {
    self.holidays.len()
  }

  pub fn n_params(&self) -> usize {
    2 + self.n_changepoints() + self.n_features()
  }

  pub fn scaled_time(&self, date: NaiveDate) -> f64 {
    (date - self.start).num_days() as f64 / self.span_days
  }

  fn trend(&self, t: f64, params: &DVector<f64>) -> f64 {
    let (k, m) = (params[0], params[1]);
    let mut g = k * t + m;
    for (j, s) in self.changepoints.iter().enumerate() {
      if t >= *s {
        g += params[2 + j] * (t - s);
      }
    }
    g
  }

  fn combine(&self, trend: f64, seasonal: f64) -> f64 {
    match self.mode {
      SeasonalityMode::Additive => trend + seasonal,
      SeasonalityMode::Multiplicative => trend * (1.0 + seasonal),
    }
  }

  /// Fitted values over the history.
  pub fn fitted(&self, params: &DVector<f64>) -> DVector<f64> {
    let offset = 2 + self.n_changepoints();
    let beta = params.rows(offset, self.n_features());
    let seasonal = &self.x * beta;
    DVector::from_iterator(
      self.t.len(),
      self
        .t
        .iter()
        .zip(seasonal.iter())
        .map(|(t, s)| self.combine(self.trend(*t, params), *s)),
    )
  }

  /// Derivative of the fitted values with respect to every parameter.
  pub fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
    let n = self.t.len();
    let n_cp = self.n_changepoints();
    let offset = 2 + n_cp;
    let beta = params.rows(offset, self.n_features());
    let seasonal = &self.x * beta;
    let mut jac = DMatrix::zeros(n, self.n_params());

    for i in 0..n {
      let t = self.t[i];
      let (trend_scale, seasonal_scale) = match self.mode {
        SeasonalityMode::Additive => (1.0, 1.0),
        SeasonalityMode::Multiplicative => (1.0 + seasonal[i], self.trend(t, params)),
      };

      jac[(i, 0)] = t * trend_scale;
      jac[(i, 1)] = trend_scale;
      for (j, s) in self.changepoints.iter().enumerate() {
        if t >= *s {
          jac[(i, 2 + j)] = (t - s) * trend_scale;
        }
      }
      for f in 0..self.n_features() {
        jac[(i, offset + f)] = self.x[(i, f)] * seasonal_scale;
      }
    }

    jac
  }

  /// Model value at an arbitrary date, in scaled units.
  pub fn predict(&self, date: NaiveDate, params: &DVector<f64>) -> f64 {
    let t = self.scaled_time(date);
    let mut row = Vec::with_capacity(self.n_features());
    feature_row(date, &self.seasonalities, &self.holidays, &mut row);
    let offset = 2 + self.n_changepoints();
    let seasonal: f64 = row
      .iter()
      .enumerate()
      .map(|(f, x)| x * params[offset + f])
      .sum();
    self.combine(self.trend(t, params), seasonal)
  }

  /// Straight line through the first and last observation, no changes,
  /// no seasonality.
  pub fn initial_params(&self, y: &[f64]) -> DVector<f64> {
    let mut params = DVector::zeros(self.n_params());
    let (t0, t1) = (self.t[0], self.t[self.t.len() - 1]);
    let (y0, y1) = (y[0], y[y.len() - 1]);
    let k = if t1 > t0 { (y1 - y0) / (t1 - t0) } else { 0.0 };
    params[0] = k;
    params[1] = y0 - k * t0;
    params
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;
  use crate::quant::forecast::holidays::holiday_effects;
  use crate::quant::forecast::holidays::MarketHoliday;

  fn dates(n: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..n).map(|i| start + Duration::days(i as i64)).collect()
  }

  #[test]
  fn changepoints_cover_leading_share_of_history() {
    let design = TrendSeasonalityDesign::new(&dates(101), SeasonalityMode::Additive, 4, 0.8, vec![], vec![]);

    assert_eq!(design.n_changepoints(), 4);
    assert!(design.changepoints.iter().all(|s| *s > 0.0 && *s <= 0.8));
    assert!(design.changepoints.windows(2).all(|w| w[0] < w[1]));
  }

  #[test]
  fn short_history_limits_changepoints() {
    let design = TrendSeasonalityDesign::new(&dates(5), SeasonalityMode::Additive, 25, 0.8, vec![], vec![]);
    assert_eq!(design.n_changepoints(), 3);
  }

  #[test]
  fn jacobian_matches_finite_differences() {
    let seasonalities = vec![Seasonality {
      period: WEEKLY_PERIOD,
      order: 2,
    }];
    for mode in [SeasonalityMode::Additive, SeasonalityMode::Multiplicative] {
      let ds = dates(40);
      let holidays = holiday_effects(&ds, 1);
      let design = TrendSeasonalityDesign::new(&ds, mode, 3, 0.8, seasonalities.clone(), holidays);
      let params = DVector::from_fn(design.n_params(), |i, _| 0.1 + 0.05 * i as f64);
      let jac = design.jacobian(&params);
      let base = design.fitted(&params);

      let h = 1e-6;
      for p in 0..design.n_params() {
        let mut bumped = params.clone();
        bumped[p] += h;
        let numeric = (design.fitted(&bumped) - &base) / h;
        for i in 0..numeric.len() {
          assert!(
            (numeric[i] - jac[(i, p)]).abs() < 1e-4,
            "{mode:?} param {p} row {i}: {} vs {}",
            numeric[i],
            jac[(i, p)]
          );
        }
      }
    }
  }

  #[test]
  fn predict_agrees_with_fitted_on_history() {
    let ds = dates(30);
    let design = TrendSeasonalityDesign::new(
      &ds,
      SeasonalityMode::Multiplicative,
      2,
      0.8,
      vec![Seasonality {
        period: WEEKLY_PERIOD,
        order: 1,
      }],
      holiday_effects(&ds, 1),
    );
    let params = DVector::from_fn(design.n_params(), |i, _| 0.2 * (i as f64 + 1.0));
    let fitted = design.fitted(&params);

    assert!(design.n_holiday_features() > 0);
    for i in [0, 14, 17] {
      assert!((design.predict(ds[i], &params) - fitted[i]).abs() < 1e-12);
    }
  }

  #[test]
  fn holiday_columns_follow_closures() {
    let ds = dates(40);
    let holidays = holiday_effects(&ds, 1);
    let design = TrendSeasonalityDesign::new(&ds, SeasonalityMode::Additive, 0, 0.8, vec![], holidays);

    // 2024-01-01 .. 2024-02-09 spans New Year and MLK day (Jan 15), three
    // offsets each; New Year's day before falls outside the history.
    assert_eq!(design.n_holiday_features(), 5);
    assert_eq!(design.n_params(), 2 + 5);
    let mlk = design
      .holidays
      .iter()
      .position(|h| h.holiday == MarketHoliday::MartinLutherKingDay && h.offset == 0)
      .unwrap();
    let column = design.x.column(mlk);
    assert_eq!(column.sum(), 1.0);
    assert_eq!(column[14], 1.0);
  }
}
