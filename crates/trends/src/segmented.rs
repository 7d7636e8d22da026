//! Piecewise linear regression with breakpoint search.
//!
//! A breakpoint `b` starts a new segment at position `b` of the time-ordered
//! series, so breakpoints `[b1, .., bk]` cut `0..n` into
//! `0..b1, b1..b2, .., bk..n`. Every candidate placement is scored by an
//! [`Objective`]; placements leaving a non-empty segment shorter than the
//! minimum are scored `+inf` and can never win.

use crate::mann_kendall::{median_of, original_test, MannKendall};
use crate::regression::{linregress, LinearFit};
use biotrade_core::config::Objective;
use std::collections::HashMap;
use std::ops::Range;

/// Split `0..n` at the canonical form of `breakpoints`, keeping only
/// non-empty segments.
pub fn split_segments(n: usize, breakpoints: &[usize]) -> Vec<Range<usize>> {
    let mut segments = Vec::with_capacity(breakpoints.len() + 1);
    let mut start = 0;
    for b in canonical(n, breakpoints) {
        segments.push(start..b);
        start = b;
    }
    if start < n {
        segments.push(start..n);
    }
    segments
}

/// Sorted, de-duplicated breakpoints strictly inside `1..n`.
fn canonical(n: usize, breakpoints: &[usize]) -> Vec<usize> {
    let mut out: Vec<usize> = breakpoints
        .iter()
        .copied()
        .filter(|&b| b > 0 && b < n)
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Memoized objective of one series.
///
/// Lives for a single group's search; keys are canonical breakpoint tuples.
/// The search never revisits a placement, so it clears the memo after each
/// breakpoint count to keep at most one count's placements in memory.
pub struct ObjectiveCache<'a> {
    x: &'a [f64],
    y: &'a [f64],
    objective: Objective,
    min_points: usize,
    memo: HashMap<Vec<usize>, f64>,
}

impl<'a> ObjectiveCache<'a> {
    pub fn new(x: &'a [f64], y: &'a [f64], objective: Objective, min_points: usize) -> Self {
        Self {
            x,
            y,
            objective,
            min_points,
            memo: HashMap::new(),
        }
    }

    /// Number of distinct placements evaluated so far.
    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    pub fn clear(&mut self) {
        self.memo.clear();
    }

    /// Objective value of a placement. Lower is better.
    pub fn evaluate(&mut self, breakpoints: &[usize]) -> f64 {
        let key = canonical(self.x.len(), breakpoints);
        if let Some(&v) = self.memo.get(&key) {
            return v;
        }
        let v = self.compute(&key);
        self.memo.insert(key, v);
        v
    }

    fn compute(&self, breakpoints: &[usize]) -> f64 {
        let segments = split_segments(self.x.len(), breakpoints);
        if segments.is_empty() {
            return f64::INFINITY;
        }
        if segments.len() > 1 && segments.iter().any(|s| s.len() < self.min_points) {
            return f64::INFINITY;
        }
        let count = segments.len() as f64;
        let mut total = 0.0;
        for seg in segments {
            let (x, y) = (&self.x[seg.clone()], &self.y[seg]);
            let Some(fit) = linregress(x, y) else {
                return f64::INFINITY;
            };
            let rss = fit.rss(x, y);
            total += match self.objective {
                Objective::Rss => rss,
                Objective::R2 => {
                    let mean = y.iter().sum::<f64>() / y.len() as f64;
                    let ss_tot: f64 = y.iter().map(|v| (v - mean) * (v - mean)).sum();
                    let r2 = if ss_tot == 0.0 { 1.0 - rss } else { 1.0 - rss / ss_tot };
                    -r2 / count
                }
            };
        }
        total
    }
}

/// Best placement found by [`search_breakpoints`].
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    pub breakpoints: Vec<usize>,
    pub objective: f64,
}

/// Global minimum of the objective over all breakpoint counts.
///
/// Counts go from 0 to `n / min_points - 1` (optionally capped). Placements
/// are visited in lexicographic order, skipping those that would leave a
/// segment shorter than `min_points`; the incumbent is replaced only on a
/// strict improvement, so ties favour fewer breakpoints.
pub fn search_breakpoints(
    cache: &mut ObjectiveCache<'_>,
    max_breakpoints: Option<usize>,
) -> Segmentation {
    let n = cache.x.len();
    let min = cache.min_points.max(1);
    let mut best = Segmentation {
        breakpoints: Vec::new(),
        objective: cache.evaluate(&[]),
    };
    let mut limit = (n / min).saturating_sub(1);
    if let Some(cap) = max_breakpoints {
        limit = limit.min(cap);
    }
    for k in 1..=limit {
        let mut current = Vec::with_capacity(k);
        visit_placements(n, k, min, 0, &mut current, &mut |placement: &[usize]| {
            let value = cache.evaluate(placement);
            if value < best.objective {
                best = Segmentation {
                    breakpoints: placement.to_vec(),
                    objective: value,
                };
            }
        });
        cache.clear();
    }
    best
}

fn visit_placements(
    n: usize,
    remaining: usize,
    min: usize,
    prev: usize,
    current: &mut Vec<usize>,
    visit: &mut dyn FnMut(&[usize]),
) {
    if remaining == 0 {
        visit(current);
        return;
    }
    let Some(last) = n.checked_sub(remaining * min) else {
        return;
    };
    for b in prev + min..=last {
        current.push(b);
        visit_placements(n, remaining - 1, min, b, current, visit);
        current.pop();
    }
}

/// Fit of one segment, with its inclusive year range.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentFit {
    pub years: (i64, i64),
    /// `None` when the segment cannot be regressed.
    pub fit: Option<LinearFit>,
}

/// Mann-Kendall result on the last segment, slope expressed per year.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTrend {
    pub test: MannKendall,
    pub slope: f64,
    pub intercept: f64,
}

/// Everything computed for one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesFit {
    pub segments: Vec<SegmentFit>,
    pub breakpoints: Vec<usize>,
    pub objective: f64,
    pub trend: Option<SegmentTrend>,
}

impl SeriesFit {
    /// Segment whose year range contains `year`.
    pub fn segment_for(&self, year: i64) -> Option<&SegmentFit> {
        self.segments
            .iter()
            .find(|s| s.years.0 <= year && year <= s.years.1)
    }
}

/// Search the best segmentation of an ascending `(year, value)` series and
/// fit each segment.
pub fn fit_series(
    years: &[i64],
    values: &[f64],
    objective: Objective,
    min_points: usize,
    max_breakpoints: Option<usize>,
    alpha: f64,
) -> SeriesFit {
    let x: Vec<f64> = years.iter().map(|&y| y as f64).collect();
    let mut cache = ObjectiveCache::new(&x, values, objective, min_points);
    let best = search_breakpoints(&mut cache, max_breakpoints);

    let ranges = split_segments(years.len(), &best.breakpoints);
    let segments: Vec<SegmentFit> = ranges
        .iter()
        .map(|r| SegmentFit {
            years: (years[r.start], years[r.end - 1]),
            fit: linregress(&x[r.clone()], &values[r.clone()]),
        })
        .collect();
    let trend = ranges
        .last()
        .and_then(|r| segment_trend(&years[r.clone()], &values[r.clone()], alpha));

    SeriesFit {
        segments,
        breakpoints: best.breakpoints,
        objective: best.objective,
        trend,
    }
}

fn segment_trend(years: &[i64], values: &[f64], alpha: f64) -> Option<SegmentTrend> {
    let test = original_test(values, alpha)?;
    let steps = years.windows(2).map(|w| (w[1] - w[0]) as f64);
    let mean_step = steps.sum::<f64>() / (years.len() - 1) as f64;
    if mean_step == 0.0 {
        return None;
    }
    let slope = test.slope / mean_step;
    let x: Vec<f64> = years.iter().map(|&y| y as f64).collect();
    let intercept = median_of(values)? - median_of(&x)? * slope;
    Some(SegmentTrend {
        test,
        slope,
        intercept,
    })
}
