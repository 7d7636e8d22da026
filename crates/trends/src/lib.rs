//! Change and trend analyses of yearly series.
//!
//! This crate handles:
//! - Relative and absolute change against a lookback or fixed baseline
//! - Ordinary least-squares line fits
//! - Piecewise linear regression with breakpoint search
//! - The Mann-Kendall trend test with Sen's slope
//! - Group-parallel execution and merging of both analyses

pub mod change;
pub mod engine;
pub mod mann_kendall;
pub mod regression;
pub mod segmented;

pub use change::{ChangeWindow, CHANGE_COLUMNS};
pub use engine::{merge_analysis, SeriesSpec, TrendEngine, SEGMENTED_COLUMNS};
pub use mann_kendall::{original_test, sens_slope, MannKendall, Trend};
pub use regression::{linregress, LinearFit};
pub use segmented::{fit_series, search_breakpoints, ObjectiveCache, SeriesFit};
