//! Ordinary least-squares line fit.
//!
//! Mirrors the statistics of a classic `linregress`: slope and intercept,
//! correlation, two-sided p-value of a zero-slope test and the standard
//! errors of both coefficients.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Result of a straight-line fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation coefficient.
    pub rvalue: f64,
    /// Two-sided p-value for the hypothesis that the slope is zero.
    pub pvalue: f64,
    /// Standard error of the slope.
    pub stderr: f64,
    /// Standard error of the intercept.
    pub intercept_stderr: f64,
}

impl LinearFit {
    /// Coefficient of determination.
    #[inline]
    pub fn rsquared(&self) -> f64 {
        self.rvalue * self.rvalue
    }

    #[inline]
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Residual sum of squares over the given points.
    pub fn rss(&self, x: &[f64], y: &[f64]) -> f64 {
        x.iter()
            .zip(y)
            .map(|(&xi, &yi)| {
                let r = yi - self.predict(xi);
                r * r
            })
            .sum()
    }
}

const TINY: f64 = 1.0e-20;

/// Fit `y = slope * x + intercept`.
///
/// Returns `None` with fewer than two points, mismatched lengths, or when
/// every `x` is identical.
pub fn linregress(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len();
    if n < 2 || y.len() != n {
        return None;
    }
    let nf = n as f64;
    let xmean = x.iter().sum::<f64>() / nf;
    let ymean = y.iter().sum::<f64>() / nf;

    // Population (biased) second moments.
    let mut ssxm = 0.0;
    let mut ssym = 0.0;
    let mut ssxym = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = xi - xmean;
        let dy = yi - ymean;
        ssxm += dx * dx;
        ssym += dy * dy;
        ssxym += dx * dy;
    }
    ssxm /= nf;
    ssym /= nf;
    ssxym /= nf;
    if ssxm == 0.0 {
        return None;
    }

    let r_den = (ssxm * ssym).sqrt();
    let rvalue = if r_den == 0.0 {
        0.0
    } else {
        (ssxym / r_den).clamp(-1.0, 1.0)
    };
    let slope = ssxym / ssxm;
    let intercept = ymean - slope * xmean;

    if n == 2 {
        let pvalue = if y[0] == y[1] { 1.0 } else { 0.0 };
        return Some(LinearFit {
            slope,
            intercept,
            rvalue,
            pvalue,
            stderr: 0.0,
            intercept_stderr: 0.0,
        });
    }

    let df = (n - 2) as f64;
    let t = rvalue * (df / ((1.0 - rvalue + TINY) * (1.0 + rvalue + TINY))).sqrt();
    let pvalue = StudentsT::new(0.0, 1.0, df)
        .map(|dist| 2.0 * dist.sf(t.abs()))
        .unwrap_or(f64::NAN);
    let stderr = ((1.0 - rvalue * rvalue) * ssym / ssxm / df).sqrt();
    let intercept_stderr = stderr * (ssxm + xmean * xmean).sqrt();

    Some(LinearFit {
        slope,
        intercept,
        rvalue,
        pvalue,
        stderr,
        intercept_stderr,
    })
}
