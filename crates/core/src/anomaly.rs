//! Non-fatal findings reported alongside a result.
//!
//! Consistency problems that callers sometimes expect (partial aggregations,
//! excluded aggregate partners) are returned as [`Anomaly`] records inside an
//! [`Outcome`] so the caller decides whether to escalate.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-fatal finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Anomaly {
    /// Aggregated total differs from the input total.
    SumMismatch {
        column: String,
        input_total: f64,
        output_total: f64,
    },
    /// Rows removed before processing.
    ExcludedRows {
        column: String,
        labels: Vec<String>,
        rows: usize,
        value_total: f64,
    },
    /// Key columns do not identify rows uniquely.
    DuplicateKeys {
        columns: Vec<String>,
        duplicates: usize,
    },
    /// Rows dropped because a uniqueness column is null.
    NullKeyRows { columns: Vec<String>, rows: usize },
    /// Groups left unprocessed when the deadline was reached.
    IncompleteGroups { groups: Vec<String> },
    /// Keys where a reported aggregate differs from the sum of its parts.
    AggregateMismatch {
        column: String,
        aggregate: String,
        keys: usize,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::SumMismatch {
                column,
                input_total,
                output_total,
            } => write!(
                f,
                "sum of '{column}' changed from {input_total} to {output_total}"
            ),
            Anomaly::ExcludedRows {
                column,
                labels,
                rows,
                value_total,
            } => write!(
                f,
                "excluded {rows} rows (value {value_total}) where '{column}' in {labels:?}"
            ),
            Anomaly::DuplicateKeys {
                columns,
                duplicates,
            } => write!(f, "{duplicates} duplicated keys on {columns:?}"),
            Anomaly::NullKeyRows { columns, rows } => {
                write!(f, "{rows} rows with null values in {columns:?}")
            }
            Anomaly::IncompleteGroups { groups } => {
                write!(f, "{} groups not processed before the deadline", groups.len())
            }
            Anomaly::AggregateMismatch {
                column,
                aggregate,
                keys,
            } => write!(
                f,
                "'{column}' of {aggregate} differs from the sum of its parts for {keys} keys"
            ),
        }
    }
}

/// A result value together with the anomalies found while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub anomalies: Vec<Anomaly>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            anomalies: Vec::new(),
        }
    }

    pub fn with_anomalies(value: T, anomalies: Vec<Anomaly>) -> Self {
        Self { value, anomalies }
    }

    pub fn push(&mut self, anomaly: Anomaly) {
        self.anomalies.push(anomaly);
    }

    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// Drop the anomalies.
    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn into_parts(self) -> (T, Vec<Anomaly>) {
        (self.value, self.anomalies)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            anomalies: self.anomalies,
        }
    }

    /// Treat any anomaly as an error.
    pub fn escalate(self) -> Result<T> {
        match self.anomalies.first() {
            Some(a) => Err(Error::consistency(a.to_string())),
            None => Ok(self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalate() {
        let clean = Outcome::new(1);
        assert!(clean.is_clean());
        assert_eq!(clean.escalate().unwrap(), 1);

        let mut dirty = Outcome::new(2);
        dirty.push(Anomaly::SumMismatch {
            column: "value".into(),
            input_total: 3.0,
            output_total: 2.0,
        });
        let err = dirty.escalate().unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    #[test]
    fn test_map_keeps_anomalies() {
        let outcome = Outcome::with_anomalies(
            2,
            vec![Anomaly::NullKeyRows {
                columns: vec!["period".into()],
                rows: 1,
            }],
        )
        .map(|v| v * 10);
        let (value, anomalies) = outcome.into_parts();
        assert_eq!(value, 20);
        assert_eq!(anomalies.len(), 1);
    }
}
