//! Query interface over stored tables.
//!
//! Reporter, partner and element filters match exactly; product filters match
//! case-insensitive substrings.

use biotrade_core::{columns, Dataset, Error, Result, RowRef, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Equality, membership and substring filters for a table query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub reporter: Vec<String>,
    pub partner: Vec<String>,
    /// Substrings, any of which may occur in the product name.
    pub product: Vec<String>,
    pub element: Vec<String>,
    pub reporter_code: Vec<i64>,
    pub partner_code: Vec<i64>,
    pub product_code: Vec<i64>,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reporter<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        self.reporter = strings(names);
        self
    }

    pub fn partner<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        self.partner = strings(names);
        self
    }

    pub fn product<I: IntoIterator<Item = S>, S: Into<String>>(mut self, patterns: I) -> Self {
        self.product = strings(patterns);
        self
    }

    pub fn element<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        self.element = strings(names);
        self
    }

    pub fn reporter_code<I: IntoIterator<Item = i64>>(mut self, codes: I) -> Self {
        self.reporter_code = codes.into_iter().collect();
        self
    }

    pub fn partner_code<I: IntoIterator<Item = i64>>(mut self, codes: I) -> Self {
        self.partner_code = codes.into_iter().collect();
        self
    }

    pub fn product_code<I: IntoIterator<Item = i64>>(mut self, codes: I) -> Self {
        self.product_code = codes.into_iter().collect();
        self
    }

    pub fn periods(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.period_start = start;
        self.period_end = end;
        self
    }

    /// Columns this filter needs to be present.
    pub fn referenced_columns(&self) -> Vec<&'static str> {
        let mut cols = Vec::new();
        let active = [
            (columns::REPORTER, !self.reporter.is_empty()),
            (columns::PARTNER, !self.partner.is_empty()),
            (columns::PRODUCT, !self.product.is_empty()),
            (columns::ELEMENT, !self.element.is_empty()),
            (columns::REPORTER_CODE, !self.reporter_code.is_empty()),
            (columns::PARTNER_CODE, !self.partner_code.is_empty()),
            (columns::PRODUCT_CODE, !self.product_code.is_empty()),
            (
                columns::PERIOD,
                self.period_start.is_some() || self.period_end.is_some(),
            ),
        ];
        for (col, used) in active {
            if used {
                cols.push(col);
            }
        }
        cols
    }

    /// Whether a row passes every active filter.
    pub fn matches(&self, row: &RowRef<'_>) -> bool {
        let text_in = |col: &str, list: &[String]| {
            list.is_empty()
                || row
                    .get(col)
                    .and_then(Value::as_str)
                    .is_some_and(|v| list.iter().any(|x| x == v))
        };
        let code_in = |col: &str, list: &[i64]| {
            list.is_empty()
                || row
                    .get(col)
                    .and_then(Value::as_i64)
                    .is_some_and(|v| list.contains(&v))
        };
        let product_like = self.product.is_empty()
            || row
                .get(columns::PRODUCT)
                .and_then(Value::as_str)
                .is_some_and(|name| {
                    let name = name.to_lowercase();
                    self.product.iter().any(|p| name.contains(&p.to_lowercase()))
                });
        let period = row.get(columns::PERIOD).and_then(Value::as_i64);
        let period_ok = match (self.period_start, self.period_end) {
            (None, None) => true,
            (start, end) => period.is_some_and(|p| {
                start.map_or(true, |s| p >= s) && end.map_or(true, |e| p <= e)
            }),
        };
        text_in(columns::REPORTER, &self.reporter)
            && text_in(columns::PARTNER, &self.partner)
            && text_in(columns::ELEMENT, &self.element)
            && code_in(columns::REPORTER_CODE, &self.reporter_code)
            && code_in(columns::PARTNER_CODE, &self.partner_code)
            && code_in(columns::PRODUCT_CODE, &self.product_code)
            && product_like
            && period_ok
    }
}

/// Read access to named tables.
pub trait TableSource: Send + Sync {
    /// Rows of `table` passing `filter`.
    fn query(&self, table: &str, filter: &QueryFilter) -> Result<Dataset>;

    /// Names of the available tables.
    fn table_names(&self) -> Result<Vec<String>>;
}

/// Tables held in memory, mostly for tests and small extracts.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    tables: BTreeMap<String, Dataset>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a table.
    pub fn insert(&mut self, name: impl Into<String>, dataset: Dataset) {
        self.tables.insert(name.into(), dataset);
    }

    pub fn with_table(mut self, name: impl Into<String>, dataset: Dataset) -> Self {
        self.insert(name, dataset);
        self
    }
}

impl TableSource for InMemorySource {
    fn query(&self, table: &str, filter: &QueryFilter) -> Result<Dataset> {
        let dataset = self
            .tables
            .get(table)
            .ok_or_else(|| Error::invalid_argument(format!("unknown table '{table}'")))?;
        dataset.require_columns(&filter.referenced_columns())?;
        Ok(dataset.filter(|row| filter.matches(row)))
    }

    fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biotrade_core::TradeFlow;

    fn flow(reporter: &str, partner: &str, product: &str, code: i64, year: i32) -> TradeFlow {
        TradeFlow {
            reporter: reporter.into(),
            reporter_code: Some(code),
            partner: partner.into(),
            partner_code: None,
            product: product.into(),
            product_code: Some(236),
            element: "import_quantity".into(),
            period: year as i64,
            year,
            unit: "tonnes".into(),
            value: Some(1.0),
            flag: None,
        }
    }

    fn source() -> InMemorySource {
        let ds = Dataset::from_records(&[
            flow("Netherlands", "Brazil", "Soya beans", 150, 2019),
            flow("Netherlands", "Brazil", "Soya bean oil", 150, 2020),
            flow("Brazil", "Netherlands", "Soya beans", 21, 2020),
            flow("Italy", "France", "Wheat", 106, 2021),
        ]);
        InMemorySource::new().with_table("crop_trade", ds)
    }

    #[test]
    fn test_exact_reporter_and_partner() {
        let filter = QueryFilter::new().reporter(["Netherlands"]).partner(["Brazil"]);
        let ds = source().query("crop_trade", &filter).unwrap();
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn test_product_substring_is_case_insensitive() {
        let filter = QueryFilter::new().product(["SOY"]);
        let ds = source().query("crop_trade", &filter).unwrap();
        assert_eq!(ds.len(), 3);
    }

    #[test]
    fn test_code_and_period_filters() {
        let filter = QueryFilter::new()
            .reporter_code([150, 106])
            .periods(Some(2020), None);
        let ds = source().query("crop_trade", &filter).unwrap();
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn test_unknown_table_and_column() {
        let src = source();
        assert!(src.query("forestry_trade", &QueryFilter::new()).is_err());

        let production = Dataset::new(vec!["reporter", "value"]).unwrap();
        let src = src.with_table("crop_production", production);
        let err = src
            .query("crop_production", &QueryFilter::new().partner(["Brazil"]))
            .unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
        assert_eq!(src.table_names().unwrap().len(), 2);
    }
}
