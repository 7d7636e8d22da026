//! Group rollups with a total-preservation check.
//!
//! Rows are partitioned by equality of the index columns (nulls form their own
//! group) and each value column is reduced per group. For sums the grand total
//! before and after is compared; a difference means the index did not
//! partition the input cleanly.

use biotrade_core::config::{AggregationConfig, ConsistencyPolicy};
use biotrade_core::{Anomaly, Dataset, Error, Outcome, Result, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Reduction applied to each value column within a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFn {
    /// Nulls skipped; a group of only nulls sums to 0.
    #[default]
    Sum,
    Mean,
    Min,
    Max,
    /// Number of non-null cells.
    Count,
}

impl AggFn {
    /// Reduce one group's cells.
    pub fn apply<'a, I>(self, cells: I) -> Value
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let present = cells.into_iter().filter(|v| !v.is_null());
        match self {
            AggFn::Sum => sum(present),
            AggFn::Count => Value::Int(present.count() as i64),
            AggFn::Mean => {
                let (total, n) = present
                    .filter_map(Value::as_f64)
                    .fold((0.0, 0usize), |(t, n), x| (t + x, n + 1));
                if n == 0 {
                    Value::Null
                } else {
                    Value::float(total / n as f64)
                }
            }
            AggFn::Min => present.min_by(|a, b| compare(a, b)).cloned().unwrap_or(Value::Null),
            AggFn::Max => present.max_by(|a, b| compare(a, b)).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Integer sums stay integers unless a float is mixed in or they overflow.
fn sum<'a>(cells: impl Iterator<Item = &'a Value>) -> Value {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    for v in cells {
        match v {
            Value::Int(i) => {
                int_total = int_total.and_then(|t| t.checked_add(*i));
                float_total += *i as f64;
            }
            other => {
                int_total = None;
                float_total += other.as_f64().unwrap_or(0.0);
            }
        }
    }
    match int_total {
        Some(t) => Value::Int(t),
        None => Value::float(float_total),
    }
}

/// Numbers compare by magnitude regardless of int/float storage.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => a.cmp(b),
    }
}

/// Group, then reduce, without any consistency check.
///
/// Output columns are `index` followed by `values`; rows come in ascending
/// key order.
pub fn reduce(dataset: &Dataset, index: &[&str], values: &[&str], agg: AggFn) -> Result<Dataset> {
    dataset.require_columns(index)?;
    dataset.require_columns(values)?;
    if let Some(dup) = values.iter().find(|v| index.contains(v)) {
        return Err(Error::invalid_argument(format!(
            "column '{dup}' is both an index and a value column"
        )));
    }
    let value_idx: Vec<usize> = values
        .iter()
        .map(|v| dataset.column_index(v))
        .collect::<Result<_>>()?;

    let columns: Vec<&str> = index.iter().chain(values).copied().collect();
    let mut out = Dataset::new(columns)?;
    for group in dataset.group_indices(index)? {
        let mut row = group.key;
        for &vi in &value_idx {
            let cells = group.rows.iter().map(|&r| &dataset.raw_rows()[r][vi]);
            row.push(agg.apply(cells));
        }
        out.push_row(row)?;
    }
    Ok(out)
}

/// Group aggregator honouring the configured consistency policy.
#[derive(Debug, Clone)]
pub struct Aggregator {
    policy: ConsistencyPolicy,
    /// Relative tolerance on the total comparison.
    tolerance: f64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(&AggregationConfig::default())
    }
}

impl Aggregator {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            policy: config.consistency,
            tolerance: config.tolerance,
        }
    }

    pub fn policy(&self) -> ConsistencyPolicy {
        self.policy
    }

    /// Aggregate `values` over groups of `index`.
    ///
    /// Missing columns fail before any grouping. With [`AggFn::Sum`] every
    /// value column's total is compared with the input's; a mismatch is an
    /// anomaly under the warn policy and an error under the strict one.
    pub fn aggregate(
        &self,
        dataset: &Dataset,
        index: &[&str],
        values: &[&str],
        agg: AggFn,
    ) -> Result<Outcome<Dataset>> {
        let out = reduce(dataset, index, values, agg)?;
        debug!(
            input_rows = dataset.len(),
            groups = out.len(),
            ?index,
            "aggregated"
        );
        let mut outcome = Outcome::new(out);
        if agg != AggFn::Sum {
            return Ok(outcome);
        }
        for column in values {
            let input_total = dataset.sum(column)?;
            let output_total = outcome.value.sum(column)?;
            if self.within_tolerance(input_total, output_total) {
                continue;
            }
            let anomaly = Anomaly::SumMismatch {
                column: column.to_string(),
                input_total,
                output_total,
            };
            match self.policy {
                ConsistencyPolicy::Strict => return Err(Error::consistency(anomaly.to_string())),
                ConsistencyPolicy::Warn => {
                    warn!(column, input_total, output_total, "aggregated total differs from input");
                    outcome.push(anomaly);
                }
            }
        }
        Ok(outcome)
    }

    fn within_tolerance(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.tolerance * a.abs().max(b.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn trade() -> Dataset {
        Dataset::from_rows(
            vec!["reporter", "partner", "year", "value"],
            vec![
                vec!["A".into(), "Y".into(), 2020.into(), 1.5.into()],
                vec!["A".into(), "Z".into(), 2020.into(), 2.0.into()],
                vec!["A".into(), Value::Null, 2021.into(), 4.0.into()],
                vec!["B".into(), Value::Null, 2021.into(), Value::Null],
                vec!["B".into(), "Z".into(), 2021.into(), 0.25.into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_sum_preserves_total() -> anyhow::Result<()> {
        let ds = trade();
        for index in [vec!["reporter"], vec!["partner"], vec!["reporter", "year"], vec![]] {
            let out = Aggregator::default().aggregate(&ds, &index, &["value"], AggFn::Sum)?;
            assert!(out.is_clean());
            assert_relative_eq!(out.value.sum("value")?, ds.sum("value")?);
        }
        Ok(())
    }

    #[test]
    fn test_null_keys_form_a_group() -> anyhow::Result<()> {
        let out = Aggregator::default()
            .aggregate(&trade(), &["partner"], &["value"], AggFn::Sum)?
            .into_inner();
        assert_eq!(out.columns(), &["partner", "value"]);
        assert_eq!(out.len(), 3);
        assert_eq!(out.value(2, "partner")?, &Value::Null);
        assert_eq!(out.value(2, "value")?, &Value::from(4.0));
        Ok(())
    }

    #[test]
    fn test_integer_sums_and_all_null_groups() {
        assert_eq!(AggFn::Sum.apply(&[Value::from(2), Value::from(3)]), Value::Int(5));
        assert_eq!(AggFn::Sum.apply(&[Value::from(2), Value::from(0.5)]), Value::from(2.5));
        assert_eq!(AggFn::Sum.apply(&[Value::Null, Value::Null]), Value::Int(0));
        assert_eq!(AggFn::Mean.apply(&[Value::Null]), Value::Null);
        assert_eq!(AggFn::Count.apply(&[Value::Null, Value::from(1)]), Value::Int(1));
    }

    #[test]
    fn test_min_max_mix_ints_and_floats() {
        let cells = [Value::from(3), Value::from(2.5), Value::Null, Value::from(10)];
        assert_eq!(AggFn::Min.apply(&cells), Value::from(2.5));
        assert_eq!(AggFn::Max.apply(&cells), Value::from(10));
        assert_eq!(AggFn::Mean.apply(&cells), Value::from(15.5 / 3.0));
    }

    #[test]
    fn test_missing_column_fails_before_grouping() {
        let err = Aggregator::default()
            .aggregate(&trade(), &["flow"], &["value"], AggFn::Sum)
            .unwrap_err();
        assert!(matches!(err, Error::MissingColumn { ref column, .. } if column == "flow"));
    }

    #[test]
    fn test_index_and_value_overlap_rejected() {
        let err = reduce(&trade(), &["value"], &["value"], AggFn::Sum).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    /// Large values cancel inside a group but absorb the small ones in
    /// input order, so the grouped total differs from the input total.
    fn cancelling() -> Dataset {
        Dataset::from_rows(
            vec!["reporter", "value"],
            vec![
                vec!["A".into(), 1e16.into()],
                vec!["B".into(), 1.0.into()],
                vec!["A".into(), (-1e16).into()],
                vec!["B".into(), 1.0.into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_sum_mismatch_is_reported() -> anyhow::Result<()> {
        let ds = cancelling();
        assert_eq!(ds.sum("value")?, 1.0);
        let out = Aggregator::default().aggregate(&ds, &["reporter"], &["value"], AggFn::Sum)?;
        assert_eq!(out.value.sum("value")?, 2.0);
        assert_eq!(
            out.anomalies,
            vec![Anomaly::SumMismatch {
                column: "value".into(),
                input_total: 1.0,
                output_total: 2.0,
            }]
        );
        Ok(())
    }

    #[test]
    fn test_sum_mismatch_is_an_error_when_strict() {
        let strict = Aggregator::new(&AggregationConfig {
            consistency: ConsistencyPolicy::Strict,
            ..AggregationConfig::default()
        });
        let err = strict
            .aggregate(&cancelling(), &["reporter"], &["value"], AggFn::Sum)
            .unwrap_err();
        assert!(matches!(err, Error::Consistency(ref msg) if msg.contains("'value'")));
    }

    #[test]
    fn test_within_tolerance() {
        let strict = Aggregator::new(&AggregationConfig {
            consistency: ConsistencyPolicy::Strict,
            tolerance: 1e-7,
        });
        assert_eq!(strict.policy(), ConsistencyPolicy::Strict);
        assert!(strict.within_tolerance(0.0, 0.0));
        assert!(strict.within_tolerance(1e9, 1e9 + 1.0));
        assert!(!strict.within_tolerance(10.0, 9.0));
    }
}
