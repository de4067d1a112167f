//! # Market Holidays
//!
//! $$
//! h_{k,o}(d)=\mathbb 1\big[d=D_k+o\big],\qquad o\in\{-w,\dots,w\}
//! $$
//!
//! Regular NYSE closures and the indicator regressors built from them. Each
//! holiday contributes one column per day offset in the window, so the fit
//! can learn the run-up to and the session after a closure.

use chrono::Datelike;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::Weekday;
use serde::Serialize;

/// Regular full-day NYSE closures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketHoliday {
  NewYearsDay,
  MartinLutherKingDay,
  WashingtonsBirthday,
  GoodFriday,
  MemorialDay,
  Juneteenth,
  IndependenceDay,
  LaborDay,
  Thanksgiving,
  Christmas,
}

impl MarketHoliday {
  pub const ALL: [MarketHoliday; 10] = [
    MarketHoliday::NewYearsDay,
    MarketHoliday::MartinLutherKingDay,
    MarketHoliday::WashingtonsBirthday,
    MarketHoliday::GoodFriday,
    MarketHoliday::MemorialDay,
    MarketHoliday::Juneteenth,
    MarketHoliday::IndependenceDay,
    MarketHoliday::LaborDay,
    MarketHoliday::Thanksgiving,
    MarketHoliday::Christmas,
  ];

  /// Date the exchange is closed for this holiday in `year`, if any.
  pub fn observed(self, year: i32) -> Option<NaiveDate> {
    let nth = |month, weekday, n| NaiveDate::from_weekday_of_month_opt(year, month, weekday, n);
    match self {
      // A Saturday New Year is not moved back into the previous year.
      MarketHoliday::NewYearsDay => {
        let day = NaiveDate::from_ymd_opt(year, 1, 1)?;
        match day.weekday() {
          Weekday::Sat => None,
          Weekday::Sun => day.succ_opt(),
          _ => Some(day),
        }
      }
      MarketHoliday::MartinLutherKingDay => nth(1, Weekday::Mon, 3),
      MarketHoliday::WashingtonsBirthday => nth(2, Weekday::Mon, 3),
      MarketHoliday::GoodFriday => easter_sunday(year).map(|d| d - Duration::days(2)),
      MarketHoliday::MemorialDay => nth(5, Weekday::Mon, 5).or_else(|| nth(5, Weekday::Mon, 4)),
      MarketHoliday::Juneteenth if year >= 2022 => weekend_shifted(year, 6, 19),
      MarketHoliday::Juneteenth => None,
      MarketHoliday::IndependenceDay => weekend_shifted(year, 7, 4),
      MarketHoliday::LaborDay => nth(9, Weekday::Mon, 1),
      MarketHoliday::Thanksgiving => nth(11, Weekday::Thu, 4),
      MarketHoliday::Christmas => weekend_shifted(year, 12, 25),
    }
  }
}

/// Saturday closures move to Friday, Sunday closures to Monday.
fn weekend_shifted(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
  let date = NaiveDate::from_ymd_opt(year, month, day)?;
  match date.weekday() {
    Weekday::Sat => date.pred_opt(),
    Weekday::Sun => date.succ_opt(),
    _ => Some(date),
  }
}

/// Gregorian Easter (anonymous Gregorian algorithm).
fn easter_sunday(year: i32) -> Option<NaiveDate> {
  let a = year % 19;
  let b = year / 100;
  let c = year % 100;
  let d = b / 4;
  let e = b % 4;
  let f = (b + 8) / 25;
  let g = (b - f + 1) / 3;
  let h = (19 * a + b - d - g + 15) % 30;
  let i = c / 4;
  let k = c % 4;
  let l = (32 + 2 * e + 2 * i - h - k) % 7;
  let m = (a + 11 * h + 22 * l) / 451;
  let month = (h + l - 7 * m + 114) / 31;
  let day = (h + l - 7 * m + 114) % 31 + 1;
  NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

/// Every closure between `start` and `end`, inclusive, in date order.
pub fn nyse_holidays(start: NaiveDate, end: NaiveDate) -> Vec<(MarketHoliday, NaiveDate)> {
  let mut out: Vec<(MarketHoliday, NaiveDate)> = (start.year()..=end.year())
    .flat_map(|year| {
      MarketHoliday::ALL
        .into_iter()
        .filter_map(move |h| h.observed(year).map(|d| (h, d)))
    })
    .filter(|(_, d)| *d >= start && *d <= end)
    .collect();
  out.sort_by_key(|(h, d)| (*d, *h));
  out
}

/// Indicator regressor for one holiday at one day offset.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct HolidayEffect {
  pub holiday: MarketHoliday,
  pub offset: i64,
  /// Sorted dates on which the indicator is 1.
  dates: Vec<NaiveDate>,
}

impl HolidayEffect {
  pub fn is_active(&self, date: NaiveDate) -> bool {
    self.dates.binary_search(&date).is_ok()
  }
}

/// Effects with offsets in `[-window, window]` for the closures around a
/// history, keeping only those active on at least one observed date.
///
/// Closures up to a year past the history stay in each effect so the
/// forecast date is covered.
pub(crate) fn holiday_effects(history: &[NaiveDate], window: u32) -> Vec<HolidayEffect> {
  let (Some(first), Some(last)) = (history.first(), history.last()) else {
    return Vec::new();
  };
  let window = i64::from(window);
  let closures = nyse_holidays(
    *first - Duration::days(window),
    *last + Duration::days(366 + window),
  );

  let mut effects = Vec::new();
  for holiday in MarketHoliday::ALL {
    for offset in -window..=window {
      let mut dates: Vec<NaiveDate> = closures
        .iter()
        .filter(|(h, _)| *h == holiday)
        .map(|(_, d)| *d + Duration::days(offset))
        .collect();
      dates.sort();

      let effect = HolidayEffect {
        holiday,
        offset,
        dates,
      };
      if history.iter().any(|d| effect.is_active(*d)) {
        effects.push(effect);
      }
    }
  }
  effects
}
