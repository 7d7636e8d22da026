//! Configuration structures for the biotrade system.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main configuration for the analysis components.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Group aggregation configuration.
    pub aggregation: AggregationConfig,
    /// EU / rest-of-world reclassification configuration.
    pub reclassify: ReclassifyConfig,
    /// Continent aggregation configuration.
    pub country_groups: CountryGroupsConfig,
    /// Relative / absolute change configuration.
    pub change: ChangeConfig,
    /// Segmented regression configuration.
    pub segmented: SegmentedConfig,
    /// Import reallocation configuration.
    pub reallocation: ReallocationConfig,
}

impl Config {
    /// Parse a configuration from JSON. Missing sections take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.aggregation.tolerance < 0.0 {
            return Err(Error::config("aggregation.tolerance must be >= 0"));
        }
        if self.segmented.min_data_points < 2 {
            return Err(Error::config("segmented.min_data_points must be >= 2"));
        }
        if !(0.0..1.0).contains(&self.segmented.alpha) || self.segmented.alpha == 0.0 {
            return Err(Error::config("segmented.alpha must be in (0, 1)"));
        }
        if self.change.years == 0 {
            return Err(Error::config("change.years must be >= 1"));
        }
        if self.reallocation.steps == 0 {
            return Err(Error::config("reallocation.steps must be >= 1"));
        }
        Ok(())
    }
}

/// What to do when an aggregation changes the value total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyPolicy {
    /// Log a warning and report an anomaly.
    #[default]
    Warn,
    /// Fail with a consistency error.
    Strict,
}

/// Group aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Policy for sum-preservation failures.
    pub consistency: ConsistencyPolicy,
    /// Relative tolerance of the sum-preservation check.
    pub tolerance: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyPolicy::Warn,
            tolerance: 1e-7,
        }
    }
}

/// EU / rest-of-world reclassification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclassifyConfig {
    /// Partner label of pre-aggregated world totals.
    pub world_label: String,
    /// Partner codes at or above this value denote regions, not countries.
    pub region_code_threshold: i64,
    /// Label given to EU members.
    pub eu_label: String,
    /// Label given to everything else.
    pub row_label: String,
}

impl Default for ReclassifyConfig {
    fn default() -> Self {
        Self {
            world_label: "World".to_string(),
            region_code_threshold: 1000,
            eu_label: "eu".to_string(),
            row_label: "row".to_string(),
        }
    }
}

/// Continent aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountryGroupsConfig {
    /// Country codes at or above this value are aggregates (China mainland, regions).
    pub country_code_threshold: i64,
}

impl Default for CountryGroupsConfig {
    fn default() -> Self {
        Self {
            country_code_threshold: 300,
        }
    }
}

/// Relative / absolute change configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeConfig {
    /// Lookback window in years.
    pub years: u32,
    /// Average over the available years instead of nulling on a gap.
    pub skip_missing: bool,
    /// Return only the most recent year of each series.
    pub last_value: bool,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self {
            years: 5,
            skip_missing: false,
            last_value: true,
        }
    }
}

/// Objective minimized by the breakpoint search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Objective {
    /// Residual sum of squares over all segments.
    #[default]
    #[serde(rename = "RSS")]
    Rss,
    /// Negative mean coefficient of determination.
    #[serde(rename = "R2")]
    R2,
}

impl Objective {
    pub fn as_str(self) -> &'static str {
        match self {
            Objective::Rss => "RSS",
            Objective::R2 => "R2",
        }
    }
}

impl FromStr for Objective {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RSS" => Ok(Objective::Rss),
            "R2" => Ok(Objective::R2),
            other => Err(Error::invalid_argument(format!(
                "objective must be \"RSS\" or \"R2\", got \"{other}\""
            ))),
        }
    }
}

/// Segmented regression configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentedConfig {
    /// Objective function.
    pub objective: Objective,
    /// Minimum points per regression segment.
    pub min_data_points: usize,
    /// Significance level of the Mann-Kendall test.
    pub alpha: f64,
    /// Return only the most recent year of each series.
    pub last_value: bool,
    /// Upper bound on the breakpoint count (None = floor(n / min_data_points) - 1).
    pub max_breakpoints: Option<usize>,
    /// Number of parallel workers (0 = auto).
    pub workers: u32,
    /// Wall-clock budget for a batch of groups, in milliseconds.
    pub deadline_ms: Option<u64>,
}

impl Default for SegmentedConfig {
    fn default() -> Self {
        Self {
            objective: Objective::Rss,
            min_data_points: 7,
            alpha: 0.05,
            last_value: true,
            max_breakpoints: None,
            workers: 0,
            deadline_ms: None,
        }
    }
}

/// Import reallocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReallocationConfig {
    /// Number of times imported shares are traced back to a partner.
    pub steps: usize,
    /// Allocated quantities at or below this are not traced further.
    pub threshold: f64,
}

impl Default for ReallocationConfig {
    fn default() -> Self {
        Self {
            steps: 3,
            threshold: 1.0,
        }
    }
}
