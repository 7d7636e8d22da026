//! Per-series change and trend analyses over a dataset.
//!
//! Rows are split into series by their identity columns (everything that
//! names the flow except the year). Each series is processed independently
//! on a rayon pool; results keep the ascending order of the series keys.

use crate::change::{
    change_cells, missing_years, ChangeWindow, YearlyValues, CHANGE_COLUMNS, FILL_COLUMNS,
};
use crate::segmented::{fit_series, SeriesFit};
use biotrade_core::config::{ChangeConfig, SegmentedConfig};
use biotrade_core::{columns, Anomaly, Config, Dataset, Error, Group, Outcome, Result, Value};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Columns appended by the segmented regression.
pub const SEGMENTED_COLUMNS: [&str; 15] = [
    "slope",
    "intercept",
    "rsquared",
    "pvalue",
    "stderr_slope",
    "stderr_intercept",
    columns::YEAR_RANGE_LOWER,
    columns::YEAR_RANGE_UPPER,
    "mk_trend",
    "mk_ha_test",
    "mk_pvalue",
    "mk_slope",
    "mk_intercept",
    "obj_function",
    "significance_level",
];

/// How rows are split into time series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSpec {
    /// Identity columns of a series.
    pub index: Vec<String>,
    /// Column holding the observations.
    pub value_column: String,
}

impl SeriesSpec {
    pub fn new<S: Into<String>>(index: Vec<S>, value_column: impl Into<String>) -> Self {
        Self {
            index: index.into_iter().map(Into::into).collect(),
            value_column: value_column.into(),
        }
    }

    /// Natural identity and value columns of a trade or production dataset.
    ///
    /// `reporter`, `product_code` and `unit` always take part; `source`,
    /// `partner`, `element` and `flow` join when present and `unit_code`
    /// replaces `unit` when present. The value column is `value`, falling
    /// back to `net_weight`.
    pub fn infer(dataset: &Dataset) -> Result<Self> {
        let mut index = Vec::new();
        for (column, required) in [
            (columns::SOURCE, false),
            (columns::REPORTER, true),
            (columns::PARTNER, false),
            (columns::PRODUCT_CODE, true),
            (columns::ELEMENT, false),
            (columns::FLOW, false),
        ] {
            if required || dataset.has_column(column) {
                index.push(column.to_string());
            }
        }
        if dataset.has_column(columns::UNIT_CODE) {
            index.push(columns::UNIT_CODE.to_string());
        } else {
            index.push(columns::UNIT.to_string());
        }

        let value_column = [columns::VALUE, columns::NET_WEIGHT]
            .into_iter()
            .find(|c| dataset.has_column(c))
            .ok_or_else(|| {
                Error::invalid_argument("no value column: expected 'value' or 'net_weight'")
            })?;
        Ok(Self::new(index, value_column))
    }

    fn index_refs(&self) -> Vec<&str> {
        self.index.iter().map(String::as_str).collect()
    }
}

/// Runs the change and segmented regression analyses.
pub struct TrendEngine {
    change: ChangeConfig,
    segmented: SegmentedConfig,
    pool: ThreadPool,
}

impl TrendEngine {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.segmented.workers as usize)
            .build()
            .map_err(|e| Error::config(format!("cannot build worker pool: {e}")))?;
        Ok(Self {
            change: config.change.clone(),
            segmented: config.segmented.clone(),
            pool,
        })
    }

    /// Change of each year against the configured lookback window.
    pub fn relative_absolute_change(
        &self,
        dataset: &Dataset,
        series_spec: &SeriesSpec,
    ) -> Result<Outcome<Dataset>> {
        self.change_over(dataset, series_spec, ChangeWindow::Lookback(self.change.years))
    }

    /// Change of each year against an explicit baseline.
    ///
    /// Missing years inside each series span are filled with null-valued
    /// rows before averaging. Series rows come back by descending year; with
    /// `last_value` only the most recent year of each series is kept.
    pub fn change_over(
        &self,
        dataset: &Dataset,
        series_spec: &SeriesSpec,
        window: ChangeWindow,
    ) -> Result<Outcome<Dataset>> {
        let index = series_spec.index_refs();
        dataset.require_columns(&[columns::YEAR, series_spec.value_column.as_str()])?;
        dataset.require_columns(&index)?;

        let base = dataset.drop_columns(&CHANGE_COLUMNS);
        let year_idx = base.column_index(columns::YEAR)?;
        let value_idx = base.column_index(&series_spec.value_column)?;
        let period_idx = base.column_index(columns::PERIOD).ok();
        let mut copy_idx: Vec<usize> = FILL_COLUMNS
            .iter()
            .filter_map(|c| base.column_index(c).ok())
            .collect();
        for c in &index {
            let i = base.column_index(c)?;
            if !copy_idx.contains(&i) {
                copy_idx.push(i);
            }
        }
        let width = base.columns().len();
        let skip_missing = self.change.skip_missing;
        let last_value = self.change.last_value;

        let groups = base.group_indices(&index)?;
        let (results, skipped) = self.run_groups(&groups, |group| {
            let mut rows: Vec<Vec<Value>> =
                group.rows.iter().map(|&i| base.raw_rows()[i].clone()).collect();
            let mut series = YearlyValues::default();
            let mut present = Vec::with_capacity(rows.len());
            for row in &rows {
                if let Some(year) = row[year_idx].as_i64() {
                    series.insert(year, row[value_idx].as_f64());
                    present.push(year);
                }
            }
            for year in missing_years(&present) {
                let mut filled = vec![Value::Null; width];
                for &i in &copy_idx {
                    filled[i] = rows[0][i].clone();
                }
                filled[year_idx] = Value::Int(year);
                if let Some(p) = period_idx {
                    filled[p] = Value::Int(year);
                }
                rows.push(filled);
            }
            rows.sort_by(|a, b| match (a[year_idx].as_i64(), b[year_idx].as_i64()) {
                (Some(x), Some(y)) => y.cmp(&x),
                _ => by_year(&a[year_idx], &b[year_idx]),
            });
            if last_value {
                rows.truncate(1);
            }
            for row in &mut rows {
                let cells = match row[year_idx].as_i64() {
                    Some(year) => change_cells(&series, year, window, skip_missing),
                    None => std::array::from_fn(|_| Value::Null),
                };
                row.extend(cells);
            }
            Ok((rows, series.duplicates()))
        })?;

        let mut out_columns: Vec<&str> = base.columns().iter().map(String::as_str).collect();
        out_columns.extend(CHANGE_COLUMNS);
        let mut out = Dataset::new(out_columns)?;
        let mut duplicates = 0;
        for (rows, dup) in results {
            duplicates += dup;
            for row in rows {
                out.push_row(row)?;
            }
        }

        let mut anomalies = Vec::new();
        if duplicates > 0 {
            let mut key: Vec<String> = series_spec.index.clone();
            key.push(columns::YEAR.to_string());
            warn!(duplicates, columns = ?key, "repeated years in series, first value used");
            anomalies.push(Anomaly::DuplicateKeys {
                columns: key,
                duplicates,
            });
        }
        push_incomplete(&mut anomalies, skipped);
        debug!(groups = groups.len(), rows = out.len(), ?window, "computed change");
        Ok(Outcome::with_anomalies(out, anomalies))
    }

    /// Best piecewise linear fit of each series.
    ///
    /// Every row gets the statistics of the segment containing its year,
    /// plus the Mann-Kendall test of the last segment. Rows with a null
    /// value stay in the output. Series rows come back by ascending year;
    /// with `last_value` only the most recent fitted year is kept.
    pub fn segmented_regression(
        &self,
        dataset: &Dataset,
        series_spec: &SeriesSpec,
    ) -> Result<Outcome<Dataset>> {
        let index = series_spec.index_refs();
        dataset.require_columns(&[columns::YEAR, series_spec.value_column.as_str()])?;
        dataset.require_columns(&index)?;

        let base = dataset.drop_columns(&SEGMENTED_COLUMNS);
        let year_idx = base.column_index(columns::YEAR)?;
        let value_idx = base.column_index(&series_spec.value_column)?;
        let cfg = &self.segmented;

        let groups = base.group_indices(&index)?;
        let (results, skipped) = self.run_groups(&groups, |group| {
            let mut rows: Vec<Vec<Value>> =
                group.rows.iter().map(|&i| base.raw_rows()[i].clone()).collect();
            rows.sort_by(|a, b| by_year(&a[year_idx], &b[year_idx]));

            let (years, values): (Vec<i64>, Vec<f64>) = rows
                .iter()
                .filter_map(|r| Some((r[year_idx].as_i64()?, r[value_idx].as_f64()?)))
                .unzip();
            let fit = fit_series(
                &years,
                &values,
                cfg.objective,
                cfg.min_data_points,
                cfg.max_breakpoints,
                cfg.alpha,
            );
            debug!(
                key = %group_label(&group.key),
                points = years.len(),
                breakpoints = ?fit.breakpoints,
                objective = fit.objective,
                "fitted series"
            );

            if cfg.last_value {
                let keep = rows
                    .iter()
                    .rposition(|r| {
                        r[year_idx].as_i64().is_some() && r[value_idx].as_f64().is_some()
                    })
                    .or_else(|| rows.iter().rposition(|r| r[year_idx].as_i64().is_some()))
                    .or(rows.len().checked_sub(1));
                rows = keep.map(|i| vec![rows.swap_remove(i)]).unwrap_or_default();
            }
            for row in &mut rows {
                let year = row[year_idx].as_i64();
                row.extend(self.regression_cells(&fit, year));
            }
            Ok(rows)
        })?;

        let mut out_columns: Vec<&str> = base.columns().iter().map(String::as_str).collect();
        out_columns.extend(SEGMENTED_COLUMNS);
        let mut out = Dataset::new(out_columns)?;
        for row in results.into_iter().flatten() {
            out.push_row(row)?;
        }

        let mut anomalies = Vec::new();
        push_incomplete(&mut anomalies, skipped);
        debug!(groups = groups.len(), rows = out.len(), "computed segmented regression");
        Ok(Outcome::with_anomalies(out, anomalies))
    }

    fn regression_cells(&self, fit: &SeriesFit, year: Option<i64>) -> Vec<Value> {
        let mut cells = Vec::with_capacity(SEGMENTED_COLUMNS.len());
        match year.and_then(|y| fit.segment_for(y)) {
            Some(segment) => {
                match &segment.fit {
                    Some(f) => cells.extend([
                        Value::float(f.slope),
                        Value::float(f.intercept),
                        Value::float(f.rsquared()),
                        Value::float(f.pvalue),
                        Value::float(f.stderr),
                        Value::float(f.intercept_stderr),
                    ]),
                    None => cells.extend(std::iter::repeat(Value::Null).take(6)),
                }
                cells.push(Value::Int(segment.years.0));
                cells.push(Value::Int(segment.years.1));
            }
            None => cells.extend(std::iter::repeat(Value::Null).take(8)),
        }
        match &fit.trend {
            Some(t) => cells.extend([
                Value::from(t.test.trend.as_str()),
                Value::from(t.test.h),
                Value::float(t.test.p),
                Value::float(t.slope),
                Value::float(t.intercept),
            ]),
            None => cells.extend(std::iter::repeat(Value::Null).take(5)),
        }
        cells.push(Value::from(self.segmented.objective.as_str()));
        cells.push(Value::float(self.segmented.alpha));
        cells
    }

    /// Apply `work` to every group on the pool.
    ///
    /// With a deadline, groups not yet started when it passes are skipped
    /// and returned by label.
    fn run_groups<T, F>(&self, groups: &[Group], work: F) -> Result<(Vec<T>, Vec<String>)>
    where
        T: Send,
        F: Fn(&Group) -> Result<T> + Sync,
    {
        let deadline = self
            .segmented
            .deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let results: Vec<Option<Result<T>>> = self.pool.install(|| {
            groups
                .par_iter()
                .map(|group| {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return None;
                    }
                    Some(work(group))
                })
                .collect()
        });

        let mut done = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for (group, result) in groups.iter().zip(results) {
            match result {
                Some(r) => done.push(r?),
                None => skipped.push(group_label(&group.key)),
            }
        }
        Ok((done, skipped))
    }
}

fn push_incomplete(anomalies: &mut Vec<Anomaly>, skipped: Vec<String>) {
    if skipped.is_empty() {
        return;
    }
    warn!(groups = skipped.len(), "deadline reached, series left unprocessed");
    anomalies.push(Anomaly::IncompleteGroups { groups: skipped });
}

/// Ascending by year, rows without a year last.
fn by_year(a: &Value, b: &Value) -> Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn group_label(key: &[Value]) -> String {
    key.iter().map(ToString::to_string).collect::<Vec<_>>().join("/")
}

/// Put change and regression results side by side.
///
/// Outer join on the columns both inputs share, except the appended
/// analysis columns. The year range columns of each side are kept with a
/// `_change` / `_regression` suffix.
pub fn merge_analysis(change: &Dataset, segmented: &Dataset) -> Result<Dataset> {
    let left_cols = [
        "relative_change",
        "absolute_change",
        columns::YEAR_RANGE_LOWER,
        columns::YEAR_RANGE_UPPER,
    ];
    let right_cols = [
        "mk_slope",
        "mk_ha_test",
        columns::YEAR_RANGE_LOWER,
        columns::YEAR_RANGE_UPPER,
    ];
    change.require_columns(&left_cols)?;
    segmented.require_columns(&right_cols)?;

    let join: Vec<&str> = change
        .columns()
        .iter()
        .map(String::as_str)
        .filter(|c| segmented.has_column(c))
        .filter(|c| !CHANGE_COLUMNS.contains(c) && !SEGMENTED_COLUMNS.contains(c))
        .collect();
    let left_key: Vec<usize> = join.iter().map(|c| change.column_index(c)).collect::<Result<_>>()?;
    let right_key: Vec<usize> = join.iter().map(|c| segmented.column_index(c)).collect::<Result<_>>()?;
    let left_val: Vec<usize> = left_cols.iter().map(|c| change.column_index(c)).collect::<Result<_>>()?;
    let right_val: Vec<usize> = right_cols.iter().map(|c| segmented.column_index(c)).collect::<Result<_>>()?;

    let mut out_columns: Vec<&str> = join.clone();
    out_columns.extend([
        "relative_change",
        "absolute_change",
        "year_range_lower_change",
        "year_range_upper_change",
        "mk_slope",
        "mk_ha_test",
        "year_range_lower_regression",
        "year_range_upper_regression",
    ]);
    let mut out = Dataset::new(out_columns)?;

    let mut lookup: HashMap<Vec<&Value>, Vec<usize>> = HashMap::new();
    for (i, row) in segmented.raw_rows().iter().enumerate() {
        let key = right_key.iter().map(|&j| &row[j]).collect();
        lookup.entry(key).or_default().push(i);
    }
    let nulls = |n: usize| std::iter::repeat(Value::Null).take(n);

    let mut matched = vec![false; segmented.len()];
    for row in change.raw_rows() {
        let key: Vec<&Value> = left_key.iter().map(|&j| &row[j]).collect();
        let mut out_row: Vec<Value> = key.iter().map(|v| (*v).clone()).collect();
        out_row.extend(left_val.iter().map(|&j| row[j].clone()));
        match lookup.get(&key) {
            Some(hits) => {
                for &h in hits {
                    matched[h] = true;
                    let right = &segmented.raw_rows()[h];
                    let mut full = out_row.clone();
                    full.extend(right_val.iter().map(|&j| right[j].clone()));
                    out.push_row(full)?;
                }
            }
            None => {
                out_row.extend(nulls(right_val.len()));
                out.push_row(out_row)?;
            }
        }
    }
    for (i, row) in segmented.raw_rows().iter().enumerate() {
        if matched[i] {
            continue;
        }
        let mut out_row: Vec<Value> = right_key.iter().map(|&j| row[j].clone()).collect();
        out_row.extend(nulls(left_val.len()));
        out_row.extend(right_val.iter().map(|&j| row[j].clone()));
        out.push_row(out_row)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use biotrade_core::config::Objective;

    fn series_rows(reporter: &str, product: i64, years: std::ops::Range<i64>, value: impl Fn(i64) -> f64) -> Vec<Vec<Value>> {
        years
            .map(|y| vec![reporter.into(), product.into(), "t".into(), y.into(), value(y).into()])
            .collect()
    }

    fn dataset(rows: Vec<Vec<Value>>) -> Dataset {
        Dataset::from_rows(vec!["reporter", "product_code", "unit", "year", "value"], rows).unwrap()
    }

    fn engine(edit: impl FnOnce(&mut Config)) -> TrendEngine {
        let mut config = Config::default();
        config.segmented.workers = 2;
        edit(&mut config);
        TrendEngine::new(&config).unwrap()
    }

    fn f(ds: &Dataset, row: usize, column: &str) -> f64 {
        ds.value(row, column).unwrap().as_f64().unwrap()
    }

    #[test]
    fn test_infer_series_spec() -> anyhow::Result<()> {
        let ds = Dataset::new(vec!["reporter", "partner", "product_code", "element", "unit", "year", "value"])?;
        let series_spec = SeriesSpec::infer(&ds)?;
        assert_eq!(series_spec.index, vec!["reporter", "partner", "product_code", "element", "unit"]);
        assert_eq!(series_spec.value_column, "value");

        let ds = Dataset::new(vec!["source", "reporter", "product_code", "unit", "unit_code", "flow", "net_weight"])?;
        let series_spec = SeriesSpec::infer(&ds)?;
        assert_eq!(series_spec.index, vec!["source", "reporter", "product_code", "flow", "unit_code"]);
        assert_eq!(series_spec.value_column, "net_weight");

        let ds = Dataset::new(vec!["reporter", "product_code", "unit", "year"])?;
        assert!(matches!(SeriesSpec::infer(&ds), Err(Error::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn test_change_with_full_window() -> anyhow::Result<()> {
        let ds = dataset(series_rows("A", 1, 1..7, |y| if y == 6 { 150.0 } else { 100.0 }));
        let series_spec = SeriesSpec::infer(&ds)?;
        let out = engine(|_| {}).relative_absolute_change(&ds, &series_spec)?;
        assert!(out.is_clean());
        let ds = out.value;
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.value(0, "year")?, &Value::Int(6));
        assert_relative_eq!(f(&ds, 0, "average_value"), 100.0);
        assert_relative_eq!(f(&ds, 0, "relative_change"), 50.0);
        assert_relative_eq!(f(&ds, 0, "absolute_change"), 50.0);
        assert_eq!(ds.value(0, "year_range_lower")?, &Value::Int(1));
        assert_eq!(ds.value(0, "year_range_upper")?, &Value::Int(5));
        Ok(())
    }

    #[test]
    fn test_change_fills_missing_years() -> anyhow::Result<()> {
        let mut rows = series_rows("A", 1, 2000..2002, |_| 10.0);
        rows.extend(series_rows("A", 1, 2003..2004, |_| 30.0));
        let ds = dataset(rows);
        let series_spec = SeriesSpec::infer(&ds)?;
        let engine = engine(|c| {
            c.change.years = 2;
            c.change.last_value = false;
        });

        let out = engine.relative_absolute_change(&ds, &series_spec)?.value;
        let years: Vec<_> = out.column("year")?.cloned().collect();
        assert_eq!(years, [2003, 2002, 2001, 2000].map(Value::from).to_vec());
        assert_eq!(out.value(1, "reporter")?, &Value::from("A"));
        assert!(out.value(1, "value")?.is_null());
        // 2003 against 2001..=2002 has a gap.
        assert!(out.value(0, "average_value")?.is_null());
        // 2002 against 2000..=2001 is complete but its own value is missing.
        assert_relative_eq!(f(&out, 1, "average_value"), 10.0);
        assert!(out.value(1, "relative_change")?.is_null());

        let out = engine
            .change_over(&ds, &series_spec, ChangeWindow::Range { start: 2000, end: 2002 })?
            .value;
        assert!(out.value(0, "average_value")?.is_null());
        Ok(())
    }

    #[test]
    fn test_change_skip_missing_and_duplicates() -> anyhow::Result<()> {
        let mut rows = series_rows("A", 1, 2000..2002, |_| 10.0);
        rows.extend(series_rows("A", 1, 2003..2004, |_| 30.0));
        rows.extend(series_rows("A", 1, 2000..2001, |_| 99.0));
        let ds = dataset(rows);
        let series_spec = SeriesSpec::infer(&ds)?;
        let engine = engine(|c| {
            c.change.years = 3;
            c.change.skip_missing = true;
        });
        let out = engine.relative_absolute_change(&ds, &series_spec)?;
        assert_eq!(
            out.anomalies,
            vec![Anomaly::DuplicateKeys {
                columns: vec!["reporter".into(), "product_code".into(), "unit".into(), "year".into()],
                duplicates: 1,
            }]
        );
        assert_relative_eq!(f(&out.value, 0, "average_value"), 10.0);
        assert_relative_eq!(f(&out.value, 0, "relative_change"), 200.0);
        Ok(())
    }

    fn kinked(y: i64) -> f64 {
        let i = (y - 2000) as f64;
        if y < 2007 {
            100.0 - 5.0 * i
        } else {
            65.0 + 8.0 * (i - 7.0)
        }
    }

    #[test]
    fn test_segmented_regression_per_row() -> anyhow::Result<()> {
        let mut rows = series_rows("A", 1, 2000..2014, kinked);
        rows.extend(series_rows("B", 1, 2010..2014, |y| (y - 2000) as f64));
        let ds = dataset(rows);
        let series_spec = SeriesSpec::infer(&ds)?;
        let out = engine(|c| c.segmented.last_value = false).segmented_regression(&ds, &series_spec)?;
        assert!(out.is_clean());
        let ds = out.value;
        assert_eq!(ds.len(), 18);

        assert_relative_eq!(f(&ds, 0, "slope"), -5.0, epsilon = 1e-9);
        assert_eq!(ds.value(0, "year_range_lower")?, &Value::Int(2000));
        assert_eq!(ds.value(0, "year_range_upper")?, &Value::Int(2006));
        assert_relative_eq!(f(&ds, 13, "slope"), 8.0, epsilon = 1e-9);
        assert_eq!(ds.value(13, "year_range_lower")?, &Value::Int(2007));
        assert_relative_eq!(f(&ds, 13, "rsquared"), 1.0, epsilon = 1e-9);
        assert_eq!(ds.value(0, "mk_trend")?, &Value::from("increasing"));
        assert_eq!(ds.value(0, "mk_ha_test")?, &Value::Int(1));
        assert_relative_eq!(f(&ds, 0, "mk_slope"), 8.0);
        assert_eq!(ds.value(0, "obj_function")?, &Value::from("RSS"));
        assert_relative_eq!(f(&ds, 0, "significance_level"), 0.05);

        assert_eq!(ds.value(14, "reporter")?, &Value::from("B"));
        assert_relative_eq!(f(&ds, 14, "slope"), 1.0, epsilon = 1e-9);
        assert_eq!(ds.value(14, "year_range_lower")?, &Value::Int(2010));
        assert_eq!(ds.value(17, "year_range_upper")?, &Value::Int(2013));
        Ok(())
    }

    #[test]
    fn test_segmented_last_value_and_nulls() -> anyhow::Result<()> {
        let mut rows = series_rows("A", 1, 2000..2003, |y| y as f64);
        rows.push(vec!["A".into(), 1.into(), "t".into(), 2003.into(), Value::Null]);
        rows.push(vec!["C".into(), 1.into(), "t".into(), 2001.into(), 3.0.into()]);
        let ds = dataset(rows);
        let series_spec = SeriesSpec::infer(&ds)?;
        let engine = engine(|c| c.segmented.objective = Objective::R2);
        let out = engine.segmented_regression(&ds, &series_spec)?.value;
        assert_eq!(out.len(), 2);

        // The null-valued 2003 row is skipped; 2002 is the newest fitted year.
        assert_eq!(out.value(0, "year")?, &Value::Int(2002));
        assert_relative_eq!(f(&out, 0, "slope"), 1.0, epsilon = 1e-9);
        assert_eq!(out.value(0, "year_range_lower")?, &Value::Int(2000));
        assert_eq!(out.value(0, "year_range_upper")?, &Value::Int(2002));
        assert_eq!(out.value(0, "obj_function")?, &Value::from("R2"));

        // One point cannot be regressed.
        assert!(out.value(1, "slope")?.is_null());
        assert_eq!(out.value(1, "year_range_lower")?, &Value::Int(2001));
        assert!(out.value(1, "mk_trend")?.is_null());
        Ok(())
    }

    #[test]
    fn test_last_value_is_newest_fitted_year() -> anyhow::Result<()> {
        let mut rows = series_rows("A", 1, 2000..2010, |y| (y - 2000) as f64);
        rows.push(vec!["A".into(), 1.into(), "t".into(), 2010.into(), Value::Null]);
        let ds = dataset(rows);
        let out = engine(|_| {}).segmented_regression(&ds, &SeriesSpec::infer(&ds)?)?.value;
        assert_eq!(out.len(), 1);
        assert_eq!(out.value(0, "year")?, &Value::Int(2009));
        assert_relative_eq!(f(&out, 0, "slope"), 1.0, epsilon = 1e-9);
        assert_eq!(out.value(0, "year_range_upper")?, &Value::Int(2009));
        assert_eq!(out.value(0, "mk_trend")?, &Value::from("increasing"));
        Ok(())
    }

    #[test]
    fn test_deadline_reports_unprocessed_groups() -> anyhow::Result<()> {
        let mut rows = series_rows("A", 1, 2000..2010, |y| y as f64);
        rows.extend(series_rows("B", 2, 2000..2010, |y| y as f64));
        let ds = dataset(rows);
        let series_spec = SeriesSpec::infer(&ds)?;
        let out = engine(|c| c.segmented.deadline_ms = Some(0)).segmented_regression(&ds, &series_spec)?;
        assert!(out.value.is_empty());
        assert_eq!(
            out.anomalies,
            vec![Anomaly::IncompleteGroups {
                groups: vec!["A/1/t".into(), "B/2/t".into()],
            }]
        );
        Ok(())
    }

    #[test]
    fn test_merge_analysis() -> anyhow::Result<()> {
        let mut rows = series_rows("A", 1, 2000..2008, |y| (y - 1990) as f64);
        rows.extend(series_rows("B", 1, 2000..2008, |y| (2030 - y) as f64));
        let ds = dataset(rows);
        let series_spec = SeriesSpec::infer(&ds)?;
        let engine = engine(|_| {});
        let change = engine.relative_absolute_change(&ds, &series_spec)?.value;
        let segmented = engine.segmented_regression(&ds, &series_spec)?.value;

        let merged = merge_analysis(&change, &segmented)?;
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged.columns(),
            &[
                "reporter",
                "product_code",
                "unit",
                "year",
                "value",
                "relative_change",
                "absolute_change",
                "year_range_lower_change",
                "year_range_upper_change",
                "mk_slope",
                "mk_ha_test",
                "year_range_lower_regression",
                "year_range_upper_regression",
            ]
        );
        assert_eq!(merged.value(0, "year_range_lower_change")?, &Value::Int(2002));
        assert_eq!(merged.value(0, "year_range_lower_regression")?, &Value::Int(2000));
        assert_relative_eq!(f(&merged, 0, "absolute_change"), 3.0);
        assert_relative_eq!(f(&merged, 1, "mk_slope"), -1.0);

        let partial = merge_analysis(&change, &segmented.head(1))?;
        assert_eq!(partial.len(), 2);
        assert!(partial.value(1, "mk_slope")?.is_null());
        Ok(())
    }

    #[test]
    fn test_missing_columns() {
        let ds = Dataset::new(vec!["reporter", "product_code", "unit", "value"]).unwrap();
        let series_spec = SeriesSpec::infer(&ds).unwrap();
        let engine = engine(|_| {});
        assert!(matches!(
            engine.relative_absolute_change(&ds, &series_spec),
            Err(Error::MissingColumn { .. })
        ));
    }
}
