//! Continent and sub-continent rollups.

use crate::aggregator::{AggFn, Aggregator};
use biotrade_core::reference::GroupLevel;
use biotrade_core::{columns, Anomaly, Config, Dataset, Outcome, ReferenceTables, Result, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity columns kept whenever present.
const FIXED_INDEX: &[&str] = &[
    columns::PERIOD,
    columns::PRODUCT,
    columns::PRODUCT_CODE,
    columns::ELEMENT,
    columns::ELEMENT_CODE,
    columns::UNIT,
];

/// Sums country-level flows into country groups.
pub struct CountryGroupAggregator {
    tables: Arc<ReferenceTables>,
    /// Codes at or above this are regions, not countries.
    country_code_threshold: i64,
    aggregator: Aggregator,
}

impl CountryGroupAggregator {
    pub fn new(tables: Arc<ReferenceTables>, config: &Config) -> Self {
        Self {
            tables,
            country_code_threshold: config.country_groups.country_code_threshold,
            aggregator: Aggregator::new(&config.aggregation),
        }
    }

    /// Aggregate to the requested level on each side.
    ///
    /// `None` keeps country identity on that side. The label column is named
    /// `<level>_reporter` / `<level>_partner`; countries missing from the
    /// continent table get a null label and are summed together.
    pub fn aggregate(
        &self,
        dataset: &Dataset,
        reporter_level: Option<GroupLevel>,
        partner_level: Option<GroupLevel>,
    ) -> Result<Outcome<Dataset>> {
        dataset.require_columns(&[columns::REPORTER_CODE, columns::VALUE])?;
        let bilateral = dataset.has_column(columns::PARTNER_CODE);

        let mut anomalies = Vec::new();
        let mut ds = self.keep_countries(dataset, columns::REPORTER_CODE, &mut anomalies)?;
        if bilateral {
            ds = self.keep_countries(&ds, columns::PARTNER_CODE, &mut anomalies)?;
        }

        let mut index: Vec<String> = FIXED_INDEX
            .iter()
            .filter(|c| ds.has_column(c))
            .map(|c| c.to_string())
            .collect();
        let sides = [
            (columns::REPORTER, columns::REPORTER_CODE, reporter_level, true),
            (columns::PARTNER, columns::PARTNER_CODE, partner_level, bilateral),
        ];
        for (name, code, level, present) in sides {
            if !present {
                continue;
            }
            match level {
                None => {
                    for c in [name, code] {
                        if ds.has_column(c) {
                            index.push(c.to_string());
                        }
                    }
                }
                Some(level) => {
                    let label_column = format!("{}_{}", level.as_str(), name);
                    let labels = ds
                        .column(code)?
                        .map(|v| {
                            v.as_i64()
                                .and_then(|c| self.tables.country_group(c, level))
                                .map(Value::from)
                                .unwrap_or(Value::Null)
                        })
                        .collect();
                    ds = ds.with_column(&label_column, labels)?;
                    index.push(label_column);
                }
            }
        }

        let index: Vec<&str> = index.iter().map(String::as_str).collect();
        let outcome = self
            .aggregator
            .aggregate(&ds, &index, &[columns::VALUE], AggFn::Sum)?;
        debug!(?index, groups = outcome.value.len(), "aggregated by country groups");
        let (value, more) = outcome.into_parts();
        anomalies.extend(more);
        Ok(Outcome::with_anomalies(value, anomalies))
    }

    /// Remove region rows (and rows without a code) on one side.
    fn keep_countries(
        &self,
        dataset: &Dataset,
        code_column: &str,
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<Dataset> {
        let threshold = self.country_code_threshold;
        let is_country = |v: Option<&Value>| {
            v.and_then(Value::as_i64).is_some_and(|c| c < threshold)
        };
        let removed = dataset.filter(|r| !is_country(r.get(code_column)));
        if removed.is_empty() {
            return Ok(dataset.clone());
        }
        let name_column = code_column.trim_end_matches("_code");
        let label_source = if removed.has_column(name_column) {
            name_column
        } else {
            code_column
        };
        let labels: BTreeSet<String> = removed.column(label_source)?.map(|v| v.to_string()).collect();
        let value_total = removed.sum(columns::VALUE)?;
        warn!(
            column = code_column,
            rows = removed.len(),
            value_total,
            "excluding region aggregates before country group aggregation"
        );
        anomalies.push(Anomaly::ExcludedRows {
            column: code_column.to_string(),
            labels: labels.into_iter().collect(),
            rows: removed.len(),
            value_total,
        });
        Ok(dataset.filter(|r| is_country(r.get(code_column))))
    }
}
