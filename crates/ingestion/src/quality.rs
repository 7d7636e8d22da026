//! Data-quality checks on extracted tables.

use biotrade_core::config::AggregationConfig;
use biotrade_core::{columns, Anomaly, Dataset, Outcome, Result, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Columns identifying one bilateral trade observation.
pub const TRADE_KEY: &[&str] = &[
    columns::PERIOD,
    columns::REPORTER_CODE,
    columns::PARTNER_CODE,
    columns::PRODUCT_CODE,
    columns::ELEMENT,
    columns::UNIT,
    columns::FLAG,
];

/// Columns identifying one production observation.
pub const PRODUCTION_KEY: &[&str] = &[
    columns::PERIOD,
    columns::REPORTER_CODE,
    columns::PRODUCT_CODE,
    columns::ELEMENT,
    columns::UNIT,
    columns::FLAG,
];

/// Keys occurring more than once, with their row positions.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateKey {
    pub key: Vec<Value>,
    pub rows: Vec<usize>,
}

/// Find key combinations that identify more than one row.
///
/// Returns the duplicated keys in key order; when any exist a
/// `DuplicateKeys` anomaly is reported alongside.
pub fn find_duplicate_keys(
    dataset: &Dataset,
    key_columns: &[&str],
) -> Result<(Vec<DuplicateKey>, Option<Anomaly>)> {
    let groups = dataset.group_indices(key_columns)?;
    let duplicates: Vec<DuplicateKey> = groups
        .into_iter()
        .filter(|g| g.rows.len() > 1)
        .map(|g| DuplicateKey {
            key: g.key,
            rows: g.rows,
        })
        .collect();
    if duplicates.is_empty() {
        return Ok((duplicates, None));
    }
    warn!(
        columns = ?key_columns,
        duplicates = duplicates.len(),
        "key columns do not identify rows uniquely"
    );
    let anomaly = Anomaly::DuplicateKeys {
        columns: key_columns.iter().map(|c| c.to_string()).collect(),
        duplicates: duplicates.len(),
    };
    Ok((duplicates, Some(anomaly)))
}

/// Count of rows per key, for keys occurring more than once.
pub fn duplicate_counts(dataset: &Dataset, key_columns: &[&str]) -> Result<HashMap<Vec<Value>, usize>> {
    let (dups, _) = find_duplicate_keys(dataset, key_columns)?;
    Ok(dups.into_iter().map(|d| (d.key, d.rows.len())).collect())
}

/// Comparison of a reported aggregate with the sum of its constituents.
///
/// Rows whose `member_column` holds the aggregate label form one side; the
/// remaining non-null members (or only the listed parts) form the other.
/// Both sides are summed per index key and outer-joined, a missing side
/// counting as zero.
#[derive(Debug, Clone)]
pub struct PartsCheck {
    member_column: String,
    aggregate: Value,
    parts: Vec<Value>,
    index: Vec<String>,
    values: Vec<String>,
    tolerance: f64,
}

impl PartsCheck {
    pub fn new<S: Into<String>>(
        member_column: impl Into<String>,
        aggregate: impl Into<Value>,
        index: Vec<S>,
        values: Vec<S>,
    ) -> Self {
        Self {
            member_column: member_column.into(),
            aggregate: aggregate.into(),
            parts: Vec::new(),
            index: index.into_iter().map(Into::into).collect(),
            values: values.into_iter().map(Into::into).collect(),
            tolerance: AggregationConfig::default().tolerance,
        }
    }

    /// Partner `world_code` totals against the sum over every other partner
    /// code. Regional aggregates must be filtered out beforehand.
    pub fn world_partner(world_code: i64) -> Self {
        Self::new(
            columns::PARTNER_CODE,
            world_code,
            vec![
                columns::REPORTER_CODE,
                columns::PRODUCT_CODE,
                columns::ELEMENT,
                columns::UNIT,
                columns::PERIOD,
            ],
            vec![columns::VALUE],
        )
    }

    /// An aggregate product against the listed constituent products.
    pub fn product_constituents(aggregate: &str, constituents: &[&str]) -> Self {
        Self::new(
            columns::PRODUCT,
            aggregate,
            vec![columns::REPORTER, columns::ELEMENT, columns::UNIT, columns::YEAR],
            vec![columns::VALUE],
        )
        .with_parts(constituents.iter().map(|&c| Value::from(c)).collect())
    }

    /// Restrict the constituent side to these members.
    pub fn with_parts(mut self, parts: Vec<Value>) -> Self {
        self.parts = parts;
        self
    }

    /// Relative tolerance of the comparison.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// One row per index key with `<value>_aggregate`, `<value>_parts` and
    /// `<value>_diff` columns. A value column differing on any key is
    /// reported as an `AggregateMismatch` anomaly.
    pub fn compare(&self, dataset: &Dataset) -> Result<Outcome<Dataset>> {
        let index: Vec<&str> = self.index.iter().map(String::as_str).collect();
        let values: Vec<&str> = self.values.iter().map(String::as_str).collect();
        let member_idx = dataset.column_index(&self.member_column)?;
        dataset.require_columns(&index)?;
        dataset.require_columns(&values)?;
        let key_idx: Vec<usize> = index.iter().map(|c| dataset.column_index(c)).collect::<Result<_>>()?;
        let value_idx: Vec<usize> = values.iter().map(|c| dataset.column_index(c)).collect::<Result<_>>()?;

        // Per key and value column: [aggregate, parts].
        let mut sums: BTreeMap<Vec<Value>, Vec<[Option<f64>; 2]>> = BTreeMap::new();
        for row in dataset.raw_rows() {
            let member = &row[member_idx];
            let side = if *member == self.aggregate {
                0
            } else if !member.is_null() && (self.parts.is_empty() || self.parts.contains(member)) {
                1
            } else {
                continue;
            };
            let key = key_idx.iter().map(|&i| row[i].clone()).collect();
            let slots = sums
                .entry(key)
                .or_insert_with(|| vec![[None, None]; value_idx.len()]);
            for (slot, &vi) in slots.iter_mut().zip(&value_idx) {
                if let Some(v) = row[vi].as_f64() {
                    slot[side] = Some(slot[side].unwrap_or(0.0) + v);
                }
            }
        }

        let mut out_columns: Vec<String> = self.index.clone();
        for v in &values {
            out_columns.extend([format!("{v}_aggregate"), format!("{v}_parts"), format!("{v}_diff")]);
        }
        let mut out = Dataset::new(out_columns)?;
        let mut mismatched = vec![0usize; values.len()];
        for (key, slots) in sums {
            let mut row = key;
            for (i, [aggregate, parts]) in slots.into_iter().enumerate() {
                let (a, p) = (aggregate.unwrap_or(0.0), parts.unwrap_or(0.0));
                if (a - p).abs() > self.tolerance * a.abs().max(p.abs()) {
                    mismatched[i] += 1;
                }
                row.extend([Value::opt_float(aggregate), Value::opt_float(parts), Value::float(a - p)]);
            }
            out.push_row(row)?;
        }

        let mut outcome = Outcome::new(out);
        for (column, keys) in values.iter().zip(mismatched) {
            if keys == 0 {
                continue;
            }
            warn!(column, aggregate = %self.aggregate, keys, "aggregate differs from the sum of its parts");
            outcome.push(Anomaly::AggregateMismatch {
                column: column.to_string(),
                aggregate: self.aggregate.to_string(),
                keys,
            });
        }
        debug!(keys = outcome.value.len(), member = %self.member_column, "compared aggregate to parts");
        Ok(outcome)
    }

    /// Like [`compare`](Self::compare), failing on any mismatch.
    pub fn check(&self, dataset: &Dataset) -> Result<Dataset> {
        self.compare(dataset)?.escalate()
    }
}
