//! Relative and absolute change against a baseline average.

use biotrade_core::{columns, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Columns appended by the change analysis.
pub const CHANGE_COLUMNS: [&str; 5] = [
    "average_value",
    "relative_change",
    "absolute_change",
    columns::YEAR_RANGE_LOWER,
    columns::YEAR_RANGE_UPPER,
];

/// Identity columns copied into rows created for missing years.
pub const FILL_COLUMNS: [&str; 12] = [
    columns::SOURCE,
    columns::REPORTER_CODE,
    columns::REPORTER,
    columns::PARTNER_CODE,
    columns::PARTNER,
    columns::PRODUCT_CODE,
    columns::PRODUCT,
    columns::ELEMENT_CODE,
    columns::ELEMENT,
    columns::FLOW,
    columns::UNIT,
    columns::UNIT_CODE,
];

/// Baseline of the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeWindow {
    /// The `n` years before each row's year.
    Lookback(u32),
    /// A fixed inclusive range of years, shared by every row.
    Range { start: i64, end: i64 },
}

impl ChangeWindow {
    /// Inclusive baseline years for a row of `year`.
    pub fn bounds(&self, year: i64) -> (i64, i64) {
        match *self {
            ChangeWindow::Lookback(n) => (year - i64::from(n), year - 1),
            ChangeWindow::Range { start, end } => (start, end),
        }
    }
}

/// Yearly values of one series. The first value seen for a year wins.
#[derive(Debug, Clone, Default)]
pub struct YearlyValues {
    values: HashMap<i64, Option<f64>>,
    duplicates: usize,
}

impl YearlyValues {
    pub fn insert(&mut self, year: i64, value: Option<f64>) {
        if self.values.contains_key(&year) {
            self.duplicates += 1;
        } else {
            self.values.insert(year, value);
        }
    }

    /// Number of years seen more than once.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn get(&self, year: i64) -> Option<f64> {
        self.values.get(&year).copied().flatten()
    }

    /// Mean over `lower..=upper`.
    ///
    /// Strict mode needs every year present and non-null; otherwise the mean
    /// covers whatever is available. `None` when nothing qualifies.
    pub fn average(&self, lower: i64, upper: i64, skip_missing: bool) -> Option<f64> {
        if upper < lower {
            return None;
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for year in lower..=upper {
            match self.get(year) {
                Some(v) => {
                    sum += v;
                    count += 1;
                }
                None if skip_missing => {}
                None => return None,
            }
        }
        (count > 0).then(|| sum / count as f64)
    }
}

/// Change of `current` against `average`: `(relative %, absolute)`.
///
/// Division by a zero average gives a null relative change.
pub fn change_values(current: Option<f64>, average: Option<f64>) -> (Value, Value) {
    match (current, average) {
        (Some(v), Some(avg)) => (Value::finite((v - avg) / avg * 100.0), Value::finite(v - avg)),
        _ => (Value::Null, Value::Null),
    }
}

/// The five appended cells for one row.
pub fn change_cells(
    series: &YearlyValues,
    year: i64,
    window: ChangeWindow,
    skip_missing: bool,
) -> [Value; 5] {
    let (lower, upper) = window.bounds(year);
    let average = series.average(lower, upper, skip_missing);
    let (relative, absolute) = change_values(series.get(year), average);
    [
        Value::opt_float(average),
        relative,
        absolute,
        Value::Int(lower),
        Value::Int(upper),
    ]
}

/// Years in `min..=max` absent from `present`, ascending.
pub fn missing_years(present: &[i64]) -> Vec<i64> {
    let (Some(&min), Some(&max)) = (present.iter().min(), present.iter().max()) else {
        return Vec::new();
    };
    (min..=max).filter(|y| !present.contains(y)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn series(values: &[(i64, Option<f64>)]) -> YearlyValues {
        let mut s = YearlyValues::default();
        for &(y, v) in values {
            s.insert(y, v);
        }
        s
    }

    #[test]
    fn test_full_window() {
        let s = series(&[
            (1, Some(100.0)),
            (2, Some(100.0)),
            (3, Some(100.0)),
            (4, Some(100.0)),
            (5, Some(100.0)),
            (6, Some(150.0)),
        ]);
        let cells = change_cells(&s, 6, ChangeWindow::Lookback(5), false);
        assert_relative_eq!(cells[0].as_f64().unwrap(), 100.0);
        assert_relative_eq!(cells[1].as_f64().unwrap(), 50.0);
        assert_relative_eq!(cells[2].as_f64().unwrap(), 50.0);
        assert_eq!(cells[3], Value::Int(1));
        assert_eq!(cells[4], Value::Int(5));
    }

    #[test]
    fn test_gap_nulls_strict_average() {
        let s = series(&[(1, Some(10.0)), (2, None), (3, Some(20.0)), (4, Some(30.0))]);
        assert_eq!(s.average(1, 3, false), None);
        assert_relative_eq!(s.average(1, 3, true).unwrap(), 15.0);
        assert_eq!(s.average(7, 9, true), None);
        let cells = change_cells(&s, 4, ChangeWindow::Lookback(3), false);
        assert!(cells[0].is_null() && cells[1].is_null() && cells[2].is_null());
    }

    #[test]
    fn test_zero_average() {
        let (rel, abs) = change_values(Some(0.0), Some(0.0));
        assert!(rel.is_null());
        assert_eq!(abs, Value::from(0.0));
        let (rel, abs) = change_values(Some(5.0), Some(0.0));
        assert!(rel.is_null());
        assert_eq!(abs, Value::from(5.0));
    }

    #[test]
    fn test_fixed_range() {
        let s = series(&[(2010, Some(4.0)), (2011, Some(8.0)), (2012, Some(9.0))]);
        let window = ChangeWindow::Range { start: 2010, end: 2011 };
        let cells = change_cells(&s, 2012, window, false);
        assert_relative_eq!(cells[0].as_f64().unwrap(), 6.0);
        assert_relative_eq!(cells[1].as_f64().unwrap(), 50.0);
        assert_eq!(cells[3], Value::Int(2010));
        assert_eq!(window.bounds(1990), (2010, 2011));
    }

    #[test]
    fn test_duplicates_and_missing_years() {
        let s = series(&[(1, Some(1.0)), (1, Some(9.0))]);
        assert_eq!(s.duplicates(), 1);
        assert_eq!(s.get(1), Some(1.0));
        assert_eq!(missing_years(&[2003, 2000, 2005]), vec![2001, 2002, 2004]);
        assert!(missing_years(&[]).is_empty());
    }
}
