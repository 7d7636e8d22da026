//! Mann-Kendall monotonic trend test with Sen's slope.

use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;

/// Direction reported by the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Increasing,
    Decreasing,
    NoTrend,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::NoTrend => "no trend",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MannKendall {
    pub trend: Trend,
    /// Whether the no-trend hypothesis is rejected at the given level.
    pub h: bool,
    pub p: f64,
    pub z: f64,
    pub s: f64,
    pub var_s: f64,
    /// Sen's slope per observation step.
    pub slope: f64,
    /// Intercept matching `slope` with observation index as abscissa.
    pub intercept: f64,
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Median of a sample. `None` when empty.
pub fn median_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut v = values.to_vec();
    Some(median(&mut v))
}

/// Sen's slope and intercept, with the observation index as abscissa.
pub fn sens_slope(y: &[f64]) -> Option<(f64, f64)> {
    let n = y.len();
    if n < 2 {
        return None;
    }
    let mut slopes = Vec::with_capacity(n * (n - 1) / 2);
    for j in 1..n {
        for k in 0..j {
            slopes.push((y[j] - y[k]) / (j - k) as f64);
        }
    }
    let slope = median(&mut slopes);
    let mut ys = y.to_vec();
    let mid_index = (n - 1) as f64 / 2.0;
    Some((slope, median(&mut ys) - mid_index * slope))
}

/// Original (non-seasonal, no autocorrelation correction) test.
///
/// Returns `None` for fewer than two observations or an `alpha` outside
/// `(0, 1)`.
pub fn original_test(y: &[f64], alpha: f64) -> Option<MannKendall> {
    let n = y.len();
    if n < 2 || !(alpha > 0.0 && alpha < 1.0) {
        return None;
    }

    let mut s = 0.0;
    for k in 0..n - 1 {
        for j in k + 1..n {
            s += match y[j].partial_cmp(&y[k]) {
                Some(std::cmp::Ordering::Greater) => 1.0,
                Some(std::cmp::Ordering::Less) => -1.0,
                _ => 0.0,
            };
        }
    }

    // Tie-corrected variance.
    let mut sorted = y.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut ties = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && sorted[j] == sorted[i] {
            j += 1;
        }
        let t = (j - i) as f64;
        ties += t * (t - 1.0) * (2.0 * t + 5.0);
        i = j;
    }
    let nf = n as f64;
    let var_s = (nf * (nf - 1.0) * (2.0 * nf + 5.0) - ties) / 18.0;

    let z = if s > 0.0 && var_s > 0.0 {
        (s - 1.0) / var_s.sqrt()
    } else if s < 0.0 && var_s > 0.0 {
        (s + 1.0) / var_s.sqrt()
    } else {
        0.0
    };

    let normal = Normal::new(0.0, 1.0).ok()?;
    let p = 2.0 * (1.0 - normal.cdf(z.abs()));
    let h = z.abs() > normal.inverse_cdf(1.0 - alpha / 2.0);
    let trend = match (h, z) {
        (true, z) if z < 0.0 => Trend::Decreasing,
        (true, z) if z > 0.0 => Trend::Increasing,
        _ => Trend::NoTrend,
    };
    let (slope, intercept) = sens_slope(y)?;

    Some(MannKendall {
        trend,
        h,
        p,
        z,
        s,
        var_s,
        slope,
        intercept,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_strictly_increasing() {
        let y: Vec<f64> = (0..10).map(|i| 2.0 * i as f64 + 1.0).collect();
        let mk = original_test(&y, 0.05).unwrap();
        assert_eq!(mk.s, 45.0);
        assert_relative_eq!(mk.var_s, 10.0 * 9.0 * 25.0 / 18.0);
        assert_relative_eq!(mk.z, 44.0 / mk.var_s.sqrt());
        assert!(mk.h);
        assert_eq!(mk.trend, Trend::Increasing);
        assert!(mk.p < 0.001);
        assert_relative_eq!(mk.slope, 2.0);
        assert_relative_eq!(mk.intercept, 1.0);
    }

    #[test]
    fn test_decreasing_with_ties() {
        let y = [5.0, 5.0, 4.0, 3.0, 3.0, 2.0, 1.0];
        let mk = original_test(&y, 0.05).unwrap();
        assert!(mk.s < 0.0);
        // two tie groups of size two: 2 * (2 * 1 * 9)
        let expected = (7.0 * 6.0 * 19.0 - 36.0) / 18.0;
        assert_relative_eq!(mk.var_s, expected);
        assert_eq!(mk.trend, Trend::Decreasing);
        assert_eq!(mk.trend.to_string(), "decreasing");
    }

    #[test]
    fn test_constant_series_has_no_trend() {
        let mk = original_test(&[3.0; 8], 0.05).unwrap();
        assert_eq!(mk.s, 0.0);
        assert_eq!(mk.z, 0.0);
        assert!(!mk.h);
        assert_relative_eq!(mk.p, 1.0);
        assert_eq!(mk.trend, Trend::NoTrend);
    }

    #[test]
    fn test_rejects_short_series_and_bad_alpha() {
        assert!(original_test(&[1.0], 0.05).is_none());
        assert!(original_test(&[1.0, 2.0, 3.0], 1.5).is_none());
        assert_eq!(median_of(&[3.0, 1.0, 2.0, 10.0]), Some(2.5));
        assert_eq!(median_of(&[]), None);
    }
}
