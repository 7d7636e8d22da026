//! EU / rest-of-world reclassification of bilateral trade.
//!
//! Countries on one side of each flow are replaced by an "eu" or "row" label
//! and the flows are summed within the new groups. Aggregate partners
//! ("World" and region codes) are removed first so they are not counted twice.

use crate::aggregator::{AggFn, Aggregator};
use biotrade_core::config::ReclassifyConfig;
use biotrade_core::{columns, Anomaly, Config, Dataset, Error, Outcome, ReferenceTables, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Side of the flow whose countries are reclassified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingSide {
    Reporter,
    Partner,
}

impl GroupingSide {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupingSide::Reporter => "reporter",
            GroupingSide::Partner => "partner",
        }
    }

    pub fn other(self) -> Self {
        match self {
            GroupingSide::Reporter => GroupingSide::Partner,
            GroupingSide::Partner => GroupingSide::Reporter,
        }
    }

    /// Country name column of this side.
    pub fn name_column(self) -> &'static str {
        match self {
            GroupingSide::Reporter => columns::REPORTER,
            GroupingSide::Partner => columns::PARTNER,
        }
    }

    /// Country code column of this side.
    pub fn code_column(self) -> &'static str {
        match self {
            GroupingSide::Reporter => columns::REPORTER_CODE,
            GroupingSide::Partner => columns::PARTNER_CODE,
        }
    }
}

impl fmt::Display for GroupingSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupingSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reporter" => Ok(GroupingSide::Reporter),
            "partner" => Ok(GroupingSide::Partner),
            other => Err(Error::invalid_argument(format!(
                "grouping side must be 'reporter' or 'partner', got '{other}'"
            ))),
        }
    }
}

/// Collapses EU members into "eu" and everyone else into "row".
pub struct EuRowReclassifier {
    /// EU membership, shared read-only.
    tables: Arc<ReferenceTables>,
    config: ReclassifyConfig,
    aggregator: Aggregator,
}

impl EuRowReclassifier {
    pub fn new(tables: Arc<ReferenceTables>, config: &Config) -> Self {
        Self {
            tables,
            config: config.reclassify.clone(),
            aggregator: Aggregator::new(&config.aggregation),
        }
    }

    /// Label for one country name.
    pub fn label(&self, country: &Value) -> &str {
        match country.as_str() {
            Some(name) if self.tables.is_eu_member(name) => &self.config.eu_label,
            _ => &self.config.row_label,
        }
    }

    /// Reclassify with the usual arguments: drop `flag`, sum `value`.
    pub fn reclassify_default(
        &self,
        dataset: &Dataset,
        side: GroupingSide,
    ) -> Result<Outcome<Dataset>> {
        self.reclassify(dataset, side, &[columns::FLAG], &[columns::VALUE])
    }

    /// Replace countries on `side` with eu/row labels and sum `value_columns`.
    ///
    /// The grouping index is the other side's code and name (whichever are
    /// present), the label, then every remaining column except this side's
    /// code, the value columns and `drop_columns`. Excluded aggregate
    /// partners are reported as an anomaly; they are the only value removed.
    pub fn reclassify(
        &self,
        dataset: &Dataset,
        side: GroupingSide,
        drop_columns: &[&str],
        value_columns: &[&str],
    ) -> Result<Outcome<Dataset>> {
        dataset.require_columns(&[side.name_column()])?;
        dataset.require_columns(value_columns)?;

        let (mut kept, excluded) = self.exclude_aggregates(dataset, value_columns)?;

        let labels: Vec<Value> = kept
            .column(side.name_column())?
            .map(|c| Value::from(self.label(c)))
            .collect();
        kept = kept.with_column(side.name_column(), labels)?;

        let other = side.other();
        let mut index: Vec<&str> = [other.code_column(), other.name_column()]
            .into_iter()
            .filter(|c| kept.has_column(c))
            .collect();
        index.push(side.name_column());
        for c in kept.columns() {
            let c = c.as_str();
            let skip = index.contains(&c)
                || c == side.code_column()
                || value_columns.contains(&c)
                || drop_columns.contains(&c);
            if !skip {
                index.push(c);
            }
        }

        let mut outcome = self
            .aggregator
            .aggregate(&kept, &index, value_columns, AggFn::Sum)?;
        debug!(
            side = %side,
            input_rows = dataset.len(),
            output_rows = outcome.value.len(),
            "reclassified into eu/row"
        );
        if let Some(anomaly) = excluded {
            outcome.anomalies.insert(0, anomaly);
        }
        Ok(outcome)
    }

    /// Partner side first, then reporter side.
    pub fn reclassify_both_sides(
        &self,
        dataset: &Dataset,
        drop_columns: &[&str],
        value_columns: &[&str],
    ) -> Result<Outcome<Dataset>> {
        let partner = self.reclassify(dataset, GroupingSide::Partner, drop_columns, value_columns)?;
        let (first, mut anomalies) = partner.into_parts();
        let reporter = self.reclassify(&first, GroupingSide::Reporter, drop_columns, value_columns)?;
        let (value, more) = reporter.into_parts();
        anomalies.extend(more);
        Ok(Outcome::with_anomalies(value, anomalies))
    }

    /// Drop rows whose partner is the world aggregate or a region code.
    fn exclude_aggregates(
        &self,
        dataset: &Dataset,
        value_columns: &[&str],
    ) -> Result<(Dataset, Option<Anomaly>)> {
        if !dataset.has_column(columns::PARTNER) {
            return Ok((dataset.clone(), None));
        }
        let has_code = dataset.has_column(columns::PARTNER_CODE);
        let is_aggregate = |row: &biotrade_core::RowRef<'_>| {
            let world = row
                .get(columns::PARTNER)
                .and_then(Value::as_str)
                .is_some_and(|p| p == self.config.world_label);
            let region = has_code
                && row
                    .get(columns::PARTNER_CODE)
                    .and_then(Value::as_i64)
                    .is_some_and(|c| c >= self.config.region_code_threshold);
            world || region
        };

        let removed = dataset.filter(|r| is_aggregate(r));
        if removed.is_empty() {
            return Ok((dataset.clone(), None));
        }
        let labels: BTreeSet<String> = removed
            .column(columns::PARTNER)?
            .map(|v| v.to_string())
            .collect();
        let mut value_total = 0.0;
        for c in value_columns {
            value_total += removed.sum(c)?;
        }
        warn!(
            rows = removed.len(),
            partners = ?labels,
            value_total,
            "excluding aggregate partners before eu/row reclassification"
        );
        let anomaly = Anomaly::ExcludedRows {
            column: columns::PARTNER.to_string(),
            labels: labels.into_iter().collect(),
            rows: removed.len(),
            value_total,
        };
        Ok((dataset.filter(|r| !is_aggregate(r)), Some(anomaly)))
    }
}
