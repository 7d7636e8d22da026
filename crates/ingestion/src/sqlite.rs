//! SQLite-backed row store.
//!
//! Tables are declared with a [`TableSchema`] whose uniqueness constraint is
//! enforced by the database engine, so a duplicated observation fails the
//! append instead of silently doubling a value.

use crate::source::{QueryFilter, TableSource};
use biotrade_core::{columns, Anomaly, Dataset, Error, Outcome, Result, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// SQL storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    fn sql(self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text => "TEXT",
        }
    }
}

/// Table structure: typed columns plus a uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<(String, ColumnKind)>,
    pub unique: Vec<String>,
}

impl TableSchema {
    /// Bilateral trade table, unique on
    /// (period, reporter_code, partner_code, product_code, element, unit, flag).
    pub fn trade(name: impl Into<String>) -> Self {
        use ColumnKind::*;
        Self {
            name: name.into(),
            columns: vec![
                (columns::REPORTER.into(), Text),
                (columns::REPORTER_CODE.into(), Integer),
                (columns::PARTNER.into(), Text),
                (columns::PARTNER_CODE.into(), Integer),
                (columns::PRODUCT.into(), Text),
                (columns::PRODUCT_CODE.into(), Integer),
                (columns::ELEMENT.into(), Text),
                (columns::PERIOD.into(), Integer),
                (columns::YEAR.into(), Integer),
                (columns::UNIT.into(), Text),
                (columns::VALUE.into(), Real),
                (columns::FLAG.into(), Text),
            ],
            unique: crate::quality::TRADE_KEY.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Production table, unique on
    /// (period, reporter_code, product_code, element, unit, flag).
    pub fn production(name: impl Into<String>) -> Self {
        let mut schema = Self::trade(name);
        schema
            .columns
            .retain(|(c, _)| c != columns::PARTNER && c != columns::PARTNER_CODE);
        schema.unique = crate::quality::PRODUCTION_KEY
            .iter()
            .map(|c| c.to_string())
            .collect();
        schema
    }

    fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(c, _)| c.as_str()).collect()
    }
}

/// Reject anything that is not a plain identifier before splicing it into SQL.
fn ident(name: &str) -> Result<String> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(Error::invalid_argument(format!("invalid identifier '{name}'")))
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::database(e.to_string())
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(f.0),
        Value::Str(s) => SqlValue::Text(s.clone()),
        Value::Null => SqlValue::Null,
    }
}

fn from_sql(value: SqlValue) -> Result<Value> {
    match value {
        SqlValue::Integer(i) => Ok(Value::Int(i)),
        SqlValue::Real(f) => Ok(Value::float(f)),
        SqlValue::Text(s) => Ok(Value::Str(s)),
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Blob(_) => Err(Error::database("blob columns are not supported")),
    }
}

/// Relational store on a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    schemas: Mutex<BTreeMap<String, TableSchema>>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            schemas: Mutex::new(BTreeMap::new()),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::database("connection lock poisoned"))
    }

    fn schema(&self, table: &str) -> Result<TableSchema> {
        self.schemas
            .lock()
            .map_err(|_| Error::database("schema lock poisoned"))?
            .get(table)
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("table '{table}' is not defined")))
    }

    /// Create the table unless it already exists, and register its schema.
    pub fn create_if_not_existing(&self, schema: &TableSchema) -> Result<()> {
        let mut defs = schema
            .columns
            .iter()
            .map(|(name, kind)| Ok(format!("{} {}", ident(name)?, kind.sql())))
            .collect::<Result<Vec<_>>>()?;
        if !schema.unique.is_empty() {
            let unique = schema
                .unique
                .iter()
                .map(|c| ident(c))
                .collect::<Result<Vec<_>>>()?;
            defs.push(format!("UNIQUE ({})", unique.join(", ")));
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            ident(&schema.name)?,
            defs.join(", ")
        );
        self.conn()?.execute(&sql, []).map_err(db_err)?;
        self.schemas
            .lock()
            .map_err(|_| Error::database("schema lock poisoned"))?
            .insert(schema.name.clone(), schema.clone());
        info!(table = %schema.name, "table ready");
        Ok(())
    }

    /// Append rows to a table.
    ///
    /// Columns outside the schema are ignored. Rows with a null in a
    /// uniqueness column are dropped first and reported, since SQL treats
    /// nulls as distinct and would let duplicates in. A genuine duplicate
    /// fails the whole append.
    pub fn append(&self, table: &str, dataset: &Dataset) -> Result<Outcome<usize>> {
        let schema = self.schema(table)?;
        let names = schema.column_names();
        let projected = dataset.select(&names)?;
        let unique_idx: Vec<usize> = schema
            .unique
            .iter()
            .map(|c| projected.column_index(c))
            .collect::<Result<_>>()?;

        let mut outcome = Outcome::new(0);
        let (keep, dropped): (Vec<_>, Vec<_>) = projected
            .raw_rows()
            .iter()
            .partition(|row| unique_idx.iter().all(|&i| !row[i].is_null()));
        if !dropped.is_empty() {
            warn!(
                table,
                rows = dropped.len(),
                columns = ?schema.unique,
                "dropping rows with null values in unique constraint columns"
            );
            outcome.push(Anomaly::NullKeyRows {
                columns: schema.unique.clone(),
                rows: dropped.len(),
            });
        }

        let placeholders = vec!["?"; names.len()].join(", ");
        let quoted = names
            .iter()
            .map(|c| ident(c))
            .collect::<Result<Vec<_>>>()?;
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            ident(table)?,
            quoted.join(", "),
            placeholders
        );

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx.prepare(&sql).map_err(db_err)?;
            for row in &keep {
                stmt.execute(params_from_iter(row.iter().map(to_sql)))
                    .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        info!(table, rows = keep.len(), "wrote rows to the database table");
        outcome.value = keep.len();
        Ok(outcome)
    }

    /// Latest year stored in a table.
    pub fn most_recent_year(&self, table: &str) -> Result<Option<i64>> {
        let schema = self.schema(table)?;
        let sql = format!(
            "SELECT MAX({}) FROM {}",
            ident(columns::YEAR)?,
            ident(&schema.name)?
        );
        self.conn()?
            .query_row(&sql, [], |row| row.get::<_, Option<i64>>(0))
            .map_err(db_err)
    }

    fn build_where(filter: &QueryFilter) -> Result<(String, Vec<SqlValue>)> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        let mut member = |col: &str, values: Vec<SqlValue>| -> Result<()> {
            if values.is_empty() {
                return Ok(());
            }
            let marks = vec!["?"; values.len()].join(", ");
            clauses.push(format!("{} IN ({marks})", ident(col)?));
            params.extend(values);
            Ok(())
        };
        let texts = |v: &[String]| v.iter().cloned().map(SqlValue::Text).collect::<Vec<_>>();
        let ints = |v: &[i64]| v.iter().copied().map(SqlValue::Integer).collect::<Vec<_>>();
        member(columns::REPORTER, texts(&filter.reporter))?;
        member(columns::PARTNER, texts(&filter.partner))?;
        member(columns::ELEMENT, texts(&filter.element))?;
        member(columns::REPORTER_CODE, ints(&filter.reporter_code))?;
        member(columns::PARTNER_CODE, ints(&filter.partner_code))?;
        member(columns::PRODUCT_CODE, ints(&filter.product_code))?;

        if !filter.product.is_empty() {
            let product = ident(columns::PRODUCT)?;
            let likes = vec![format!("lower({product}) LIKE ? ESCAPE '\\'"); filter.product.len()];
            clauses.push(format!("({})", likes.join(" OR ")));
            params.extend(
                filter
                    .product
                    .iter()
                    .map(|p| SqlValue::Text(format!("%{}%", escape_like(&p.to_lowercase())))),
            );
        }
        if let Some(start) = filter.period_start {
            clauses.push(format!("{} >= ?", ident(columns::PERIOD)?));
            params.push(SqlValue::Integer(start));
        }
        if let Some(end) = filter.period_end {
            clauses.push(format!("{} <= ?", ident(columns::PERIOD)?));
            params.push(SqlValue::Integer(end));
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        Ok((sql, params))
    }
}

/// Make `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn escape_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl TableSource for SqliteStore {
    fn query(&self, table: &str, filter: &QueryFilter) -> Result<Dataset> {
        let schema = self.schema(table)?;
        let names = schema.column_names();
        for col in filter.referenced_columns() {
            if !names.contains(&col) {
                return Err(Error::missing_column(
                    col,
                    &names.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
                ));
            }
        }
        let (where_sql, params) = Self::build_where(filter)?;
        let quoted = names
            .iter()
            .map(|c| ident(c))
            .collect::<Result<Vec<_>>>()?;
        let sql = format!(
            "SELECT {} FROM {}{}",
            quoted.join(", "),
            ident(table)?,
            where_sql
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let width = names.len();
        let raw = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let rows = raw
            .into_iter()
            .map(|r| r.into_iter().map(from_sql).collect::<Result<Vec<_>>>())
            .collect::<Result<Vec<_>>>()?;
        Dataset::from_rows(names, rows)
    }

    fn table_names(&self) -> Result<Vec<String>> {
        Ok(self
            .schemas
            .lock()
            .map_err(|_| Error::database("schema lock poisoned"))?
            .keys()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::source::InMemorySource;
    use biotrade_core::{ProductionRecord, TradeFlow};

    fn flow(partner: &str, partner_code: i64, year: i32, value: f64) -> TradeFlow {
        TradeFlow {
            reporter: "Brazil".into(),
            reporter_code: Some(21),
            partner: partner.into(),
            partner_code: Some(partner_code),
            product: "Soya beans".into(),
            product_code: Some(236),
            element: "export_quantity".into(),
            period: year as i64,
            year,
            unit: "tonnes".into(),
            value: Some(value),
            flag: Some("A".into()),
        }
    }

    fn store() -> anyhow::Result<SqliteStore> {
        let store = SqliteStore::open_in_memory()?;
        store.create_if_not_existing(&TableSchema::trade("crop_trade"))?;
        Ok(store)
    }

    #[test]
    fn test_append_and_query() -> anyhow::Result<()> {
        let store = store()?;
        let ds = Dataset::from_records(&[
            flow("Netherlands", 150, 2019, 10.0),
            flow("Netherlands", 150, 2020, 12.0),
            flow("China", 351, 2020, 30.0),
        ]);
        let written = store.append("crop_trade", &ds)?;
        assert_eq!(written.value, 3);
        assert!(written.is_clean());

        let nl = store.query("crop_trade", &QueryFilter::new().partner(["Netherlands"]))?;
        assert_eq!(nl.len(), 2);
        assert_relative_eq!(nl.sum("value")?, 22.0);

        let soy = store.query(
            "crop_trade",
            &QueryFilter::new().product(["SOYA"]).periods(Some(2020), Some(2020)),
        )?;
        assert_eq!(soy.len(), 2);
        assert_eq!(store.most_recent_year("crop_trade")?, Some(2020));
        Ok(())
    }

    #[test]
    fn test_product_filter_is_literal() -> anyhow::Result<()> {
        let store = store()?;
        let mut palm = flow("China", 351, 2020, 7.0);
        palm.product = "Palm_oil 100%".into();
        let ds = Dataset::from_records(&[flow("Netherlands", 150, 2020, 12.0), palm]);
        store.append("crop_trade", &ds)?;
        let memory = InMemorySource::new().with_table("crop_trade", ds);

        for (pattern, expected) in [("_", 1), ("%", 1), ("m_o", 1), ("a b", 1), ("a%b", 0), ("\\", 0)] {
            let filter = QueryFilter::new().product([pattern]);
            assert_eq!(store.query("crop_trade", &filter)?.len(), expected, "{pattern}");
            assert_eq!(memory.query("crop_trade", &filter)?.len(), expected, "{pattern}");
        }
        assert_eq!(escape_like("5%_a\\"), "5\\%\\_a\\\\");
        Ok(())
    }

    #[test]
    fn test_unique_constraint_rejects_duplicates() -> anyhow::Result<()> {
        let store = store()?;
        let ds = Dataset::from_records(&[flow("Netherlands", 150, 2019, 10.0)]);
        store.append("crop_trade", &ds)?;
        let err = store.append("crop_trade", &ds).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        Ok(())
    }

    #[test]
    fn test_null_key_rows_dropped() -> anyhow::Result<()> {
        let store = store()?;
        let mut row = flow("Netherlands", 150, 2019, 10.0);
        row.flag = None;
        let ds = Dataset::from_records(&[row, flow("China", 351, 2019, 5.0)]);
        let written = store.append("crop_trade", &ds)?;
        assert_eq!(written.value, 1);
        assert!(matches!(
            written.anomalies[0],
            Anomaly::NullKeyRows { rows: 1, .. }
        ));
        Ok(())
    }

    #[test]
    fn test_production_table_has_no_partner() -> anyhow::Result<()> {
        let store = SqliteStore::open_in_memory()?;
        store.create_if_not_existing(&TableSchema::production("crop_production"))?;
        let ds = Dataset::from_records(&[ProductionRecord {
            reporter: "Malaysia".into(),
            reporter_code: Some(131),
            product: "Oil palm fruit".into(),
            product_code: Some(254),
            element: "production".into(),
            period: 2020,
            year: 2020,
            unit: "tonnes".into(),
            value: Some(1.0),
            flag: Some("A".into()),
        }]);
        store.append("crop_production", &ds)?;
        let err = store
            .query("crop_production", &QueryFilter::new().partner(["World"]))
            .unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
        assert_eq!(store.table_names()?, vec!["crop_production".to_string()]);
        Ok(())
    }

    #[test]
    fn test_invalid_identifier() {
        assert!(ident("crop_trade").is_ok());
        assert!(ident("x; DROP TABLE y").is_err());
        assert!(ident("1abc").is_err());
    }
}
