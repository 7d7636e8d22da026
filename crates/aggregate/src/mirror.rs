//! Mirror flows: the same movement as reported by the counterparty.
//!
//! A shadow copy of the input swaps reporter and partner and turns imports
//! into exports (and back). Joining the input to that shadow on every other
//! column puts the counterparty's value beside each reported value.

use biotrade_core::{columns, Anomaly, Dataset, Error, Outcome, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// How unmatched shadow rows are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorJoin {
    /// One output row per input row (more if the shadow has duplicate keys).
    #[default]
    Left,
    /// Also append flows known only from the counterparty, with a null `value`.
    Outer,
}

const PLACEHOLDER: &str = "\u{0}";

/// Swap the "import" and "export" tokens of an element name.
pub fn flip_element(element: &str) -> String {
    element
        .replace("import", PLACEHOLDER)
        .replace("export", "import")
        .replace(PLACEHOLDER, "export")
}

/// Attaches a `value_mirror` column.
#[derive(Debug, Clone, Default)]
pub struct MirrorReconciler {
    join: MirrorJoin,
}

impl MirrorReconciler {
    pub fn new(join: MirrorJoin) -> Self {
        Self { join }
    }

    /// Put each flow's mirror value beside it, excluding `flag`.
    pub fn attach_mirror_default(&self, dataset: &Dataset) -> Result<Outcome<Dataset>> {
        self.attach_mirror(dataset, &[columns::FLAG])
    }

    /// Join every row to its counterparty report.
    ///
    /// The key is every column except `value`, `element_code` and
    /// `drop_columns`. Rows without a counterparty get a null
    /// `value_mirror`. Duplicated shadow keys multiply the matching rows
    /// and are reported as an anomaly.
    pub fn attach_mirror(&self, dataset: &Dataset, drop_columns: &[&str]) -> Result<Outcome<Dataset>> {
        dataset.require_columns(&[columns::VALUE])?;
        if dataset.has_column(columns::VALUE_MIRROR) {
            return Err(Error::schema("dataset already has a value_mirror column"));
        }
        let pairs = swap_pairs(dataset)?;

        let key_idx: Vec<usize> = dataset
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                let c = c.as_str();
                c != columns::VALUE && c != columns::ELEMENT_CODE && !drop_columns.contains(&c)
            })
            .map(|(i, _)| i)
            .collect();
        let value_idx = dataset.column_index(columns::VALUE)?;
        let element_idx = dataset.column_index(columns::ELEMENT).ok();

        // Shadow rows in input order, with their keys.
        let shadow: Vec<Vec<Value>> = dataset
            .raw_rows()
            .iter()
            .map(|row| {
                let mut swapped = row.clone();
                for &(a, b) in &pairs {
                    swapped.swap(a, b);
                }
                if let Some(e) = element_idx {
                    if let Some(name) = swapped[e].as_str() {
                        swapped[e] = Value::from(flip_element(name));
                    }
                }
                swapped
            })
            .collect();
        let key_of = |row: &[Value]| -> Vec<Value> { key_idx.iter().map(|&i| row[i].clone()).collect() };

        let mut lookup: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        for (pos, row) in shadow.iter().enumerate() {
            lookup.entry(key_of(row.as_slice())).or_default().push(pos);
        }

        let mut outcome = Outcome::new(Dataset::default());
        let duplicates = lookup.values().filter(|p| p.len() > 1).count();
        if duplicates > 0 {
            let key_columns: Vec<String> = key_idx.iter().map(|&i| dataset.columns()[i].clone()).collect();
            warn!(
                duplicates,
                columns = ?key_columns,
                "mirror join key is not unique, matching rows are multiplied"
            );
            outcome.push(Anomaly::DuplicateKeys {
                columns: key_columns,
                duplicates,
            });
        }

        let mut out_columns: Vec<&str> = dataset.columns().iter().map(String::as_str).collect();
        out_columns.push(columns::VALUE_MIRROR);
        let mut out = Dataset::new(out_columns)?;

        let mut matched = vec![false; shadow.len()];
        let mut unmatched = 0usize;
        for row in dataset.raw_rows() {
            match lookup.get(&key_of(row.as_slice())) {
                Some(hits) => {
                    for &s in hits {
                        matched[s] = true;
                        let mut joined = row.clone();
                        joined.push(shadow[s][value_idx].clone());
                        out.push_row(joined)?;
                    }
                }
                None => {
                    unmatched += 1;
                    let mut joined = row.clone();
                    joined.push(Value::Null);
                    out.push_row(joined)?;
                }
            }
        }

        if self.join == MirrorJoin::Outer {
            for (s, row) in shadow.iter().enumerate() {
                if matched[s] {
                    continue;
                }
                let mut extra = vec![Value::Null; row.len()];
                for &i in &key_idx {
                    extra[i] = row[i].clone();
                }
                extra.push(row[value_idx].clone());
                out.push_row(extra)?;
            }
        }

        debug!(
            rows = out.len(),
            without_mirror = unmatched,
            join = ?self.join,
            "attached mirror values"
        );
        outcome.value = out;
        Ok(outcome)
    }
}

/// Column positions swapped between reporter and partner.
fn swap_pairs(dataset: &Dataset) -> Result<Vec<(usize, usize)>> {
    let mut pairs = Vec::new();
    for (a, b) in [
        (columns::REPORTER, columns::PARTNER),
        (columns::REPORTER_CODE, columns::PARTNER_CODE),
    ] {
        match (dataset.has_column(a), dataset.has_column(b)) {
            (true, true) => pairs.push((dataset.column_index(a)?, dataset.column_index(b)?)),
            (false, false) => {}
            (true, false) => return Err(Error::missing_column(b, dataset.columns())),
            (false, true) => return Err(Error::missing_column(a, dataset.columns())),
        }
    }
    if pairs.is_empty() {
        return Err(Error::missing_column(columns::PARTNER, dataset.columns()));
    }
    Ok(pairs)
}
