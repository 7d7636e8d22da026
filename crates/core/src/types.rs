//! Core data types for the biotrade system.

use crate::error::{Error, Result};
use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known column names shared by the trade and production tables.
pub mod columns {
    pub const REPORTER: &str = "reporter";
    pub const REPORTER_CODE: &str = "reporter_code";
    pub const PARTNER: &str = "partner";
    pub const PARTNER_CODE: &str = "partner_code";
    pub const PRODUCT: &str = "product";
    pub const PRODUCT_CODE: &str = "product_code";
    pub const ELEMENT: &str = "element";
    pub const ELEMENT_CODE: &str = "element_code";
    pub const FLOW: &str = "flow";
    pub const SOURCE: &str = "source";
    pub const PERIOD: &str = "period";
    pub const YEAR: &str = "year";
    pub const UNIT: &str = "unit";
    pub const UNIT_CODE: &str = "unit_code";
    pub const VALUE: &str = "value";
    pub const NET_WEIGHT: &str = "net_weight";
    pub const FLAG: &str = "flag";
    pub const VALUE_MIRROR: &str = "value_mirror";
    pub const YEAR_RANGE_LOWER: &str = "year_range_lower";
    pub const YEAR_RANGE_UPPER: &str = "year_range_upper";
}

/// A single scalar cell.
///
/// Variant order doubles as sort order: integers, floats, strings, then nulls
/// last. Integers and floats never compare equal to each other, so a grouping
/// key mixing `1` and `1.0` yields two groups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Null,
}

impl Value {
    /// Create a float value. NaN becomes null.
    #[inline]
    pub fn float(x: f64) -> Self {
        if x.is_nan() {
            Value::Null
        } else {
            Value::Float(OrderedFloat(x))
        }
    }

    /// Create a float value, mapping NaN and infinities to null.
    #[inline]
    pub fn finite(x: f64) -> Self {
        if x.is_finite() {
            Value::Float(OrderedFloat(x))
        } else {
            Value::Null
        }
    }

    /// Create an optional float value.
    #[inline]
    pub fn opt_float(x: Option<f64>) -> Self {
        x.map(Value::float).unwrap_or(Value::Null)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(f.0),
            _ => None,
        }
    }

    /// Integer view of the value. Floats with no fractional part qualify.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.0.fract() == 0.0 && f.0.is_finite() => Some(f.0 as i64),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", x.0),
            Value::Str(s) => write!(f, "{s}"),
            Value::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Temporal key of a record.
///
/// Annual sources use the bare year (`2021`), monthly sources append the
/// month (`202103`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: Option<u32>,
}

impl Period {
    /// Decode a `YYYY` or `YYYYMM` period code.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1000..=9999 => Ok(Self {
                year: code as i32,
                month: None,
            }),
            100_000..=999_999 => {
                let month = (code % 100) as u32;
                if !(1..=12).contains(&month) {
                    return Err(Error::invalid_argument(format!(
                        "period {code} has month {month}"
                    )));
                }
                Ok(Self {
                    year: (code / 100) as i32,
                    month: Some(month),
                })
            }
            _ => Err(Error::invalid_argument(format!(
                "period {code} is neither YYYY nor YYYYMM"
            ))),
        }
    }

    /// Encode back to the integer period code.
    pub fn code(&self) -> i64 {
        match self.month {
            Some(m) => self.year as i64 * 100 + m as i64,
            None => self.year as i64,
        }
    }

    /// First day covered by the period.
    pub fn start_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month.unwrap_or(1), 1)
    }

    pub fn is_monthly(&self) -> bool {
        self.month.is_some()
    }
}

/// A typed record that can be laid out as a dataset row.
pub trait Record {
    /// Column names, in row order.
    fn column_names() -> &'static [&'static str];
    /// Cell values, in the same order as `column_names`.
    fn values(&self) -> Vec<Value>;
}

/// One reported bilateral trade observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFlow {
    pub reporter: String,
    pub reporter_code: Option<i64>,
    pub partner: String,
    pub partner_code: Option<i64>,
    pub product: String,
    pub product_code: Option<i64>,
    /// Semantic quantity kind, e.g. "export_quantity".
    pub element: String,
    pub period: i64,
    pub year: i32,
    pub unit: String,
    pub value: Option<f64>,
    /// Data-quality or estimation marker.
    pub flag: Option<String>,
}

impl Record for TradeFlow {
    fn column_names() -> &'static [&'static str] {
        &[
            columns::REPORTER,
            columns::REPORTER_CODE,
            columns::PARTNER,
            columns::PARTNER_CODE,
            columns::PRODUCT,
            columns::PRODUCT_CODE,
            columns::ELEMENT,
            columns::PERIOD,
            columns::YEAR,
            columns::UNIT,
            columns::VALUE,
            columns::FLAG,
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.reporter.as_str().into(),
            self.reporter_code.into(),
            self.partner.as_str().into(),
            self.partner_code.into(),
            self.product.as_str().into(),
            self.product_code.into(),
            self.element.as_str().into(),
            self.period.into(),
            self.year.into(),
            self.unit.as_str().into(),
            Value::opt_float(self.value),
            self.flag.clone().into(),
        ]
    }
}

/// One production observation (no partner side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionRecord {
    pub reporter: String,
    pub reporter_code: Option<i64>,
    pub product: String,
    pub product_code: Option<i64>,
    pub element: String,
    pub period: i64,
    pub year: i32,
    pub unit: String,
    pub value: Option<f64>,
    pub flag: Option<String>,
}

impl Record for ProductionRecord {
    fn column_names() -> &'static [&'static str] {
        &[
            columns::REPORTER,
            columns::REPORTER_CODE,
            columns::PRODUCT,
            columns::PRODUCT_CODE,
            columns::ELEMENT,
            columns::PERIOD,
            columns::YEAR,
            columns::UNIT,
            columns::VALUE,
            columns::FLAG,
        ]
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.reporter.as_str().into(),
            self.reporter_code.into(),
            self.product.as_str().into(),
            self.product_code.into(),
            self.element.as_str().into(),
            self.period.into(),
            self.year.into(),
            self.unit.as_str().into(),
            Value::opt_float(self.value),
            self.flag.clone().into(),
        ]
    }
}
