//! In-memory tabular dataset.
//!
//! Every component consumes and produces [`Dataset`] values: an ordered list
//! of rows sharing one column schema. Operations return new datasets unless
//! the method takes `&mut self`.

use crate::error::{Error, Result};
use crate::types::{Record, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Ordered rows with a fixed column schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl<'a> RowRef<'a> {
    /// Cell by column name, `None` if the column does not exist.
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let idx = self.dataset.columns.iter().position(|c| c == column)?;
        Some(&self.dataset.rows[self.index][idx])
    }

    pub fn values(&self) -> &'a [Value] {
        &self.dataset.rows[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Which unmatched rows a [`Dataset::merge`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Every left row, matched or not.
    Left,
    /// Every left row, then the right rows no left row matched.
    Outer,
}

/// Rows sharing one grouping key.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Key values, in index-column order.
    pub key: Vec<Value>,
    /// Positions of the member rows, in input order.
    pub rows: Vec<usize>,
}

impl Dataset {
    /// Create an empty dataset with the given columns.
    pub fn new<S: Into<String>>(columns: Vec<S>) -> Result<Self> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.as_str()) {
                return Err(Error::schema(format!("duplicate column '{c}'")));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    /// Create a dataset from columns and rows, checking row widths.
    pub fn from_rows<S: Into<String>>(columns: Vec<S>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut ds = Self::new(columns)?;
        for row in rows {
            ds.push_row(row)?;
        }
        Ok(ds)
    }

    /// Lay out typed records as rows.
    pub fn from_records<R: Record>(records: &[R]) -> Self {
        Self {
            columns: R::column_names().iter().map(|c| c.to_string()).collect(),
            rows: records.iter().map(Record::values).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Position of a column, or a missing-column error.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::missing_column(name, &self.columns))
    }

    /// Fail with the first absent column, if any.
    pub fn require_columns(&self, names: &[&str]) -> Result<()> {
        for name in names {
            self.column_index(name)?;
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> RowRef<'_> {
        RowRef {
            dataset: self,
            index,
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> + '_ {
        (0..self.rows.len()).map(move |index| RowRef {
            dataset: self,
            index,
        })
    }

    pub fn raw_rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Append a row. Its width must match the schema.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::schema(format!(
                "row has {} values, schema has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Cell at a row position and column name.
    pub fn value(&self, row: usize, column: &str) -> Result<&Value> {
        let idx = self.column_index(column)?;
        self.rows
            .get(row)
            .map(|r| &r[idx])
            .ok_or_else(|| Error::invalid_argument(format!("row {row} out of range")))
    }

    /// All cells of one column.
    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = &Value> + '_> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Sum of the numeric cells of a column, nulls skipped.
    pub fn sum(&self, name: &str) -> Result<f64> {
        Ok(self.column(name)?.filter_map(Value::as_f64).sum())
    }

    /// Keep the rows for which the predicate holds.
    pub fn filter<F>(&self, predicate: F) -> Dataset
    where
        F: Fn(&RowRef<'_>) -> bool,
    {
        let rows = self
            .rows()
            .filter(|r| predicate(r))
            .map(|r| r.values().to_vec())
            .collect();
        Dataset {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Rows at the given positions, in that order.
    pub fn take(&self, indices: &[usize]) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Project onto the named columns, in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Dataset> {
        let idx: Vec<usize> = names
            .iter()
            .map(|n| self.column_index(n))
            .collect::<Result<_>>()?;
        let columns = names.iter().map(|n| n.to_string()).collect();
        let rows = self
            .rows
            .iter()
            .map(|r| idx.iter().map(|&i| r[i].clone()).collect())
            .collect();
        Ok(Dataset { columns, rows })
    }

    /// Remove the named columns. Names not present are ignored.
    pub fn drop_columns(&self, names: &[&str]) -> Dataset {
        let keep: Vec<&str> = self
            .columns
            .iter()
            .map(String::as_str)
            .filter(|c| !names.contains(c))
            .collect();
        // Every kept name comes from our own schema.
        self.select(&keep).unwrap_or_default()
    }

    /// Rename a column in place.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let idx = self.column_index(from)?;
        if from != to && self.has_column(to) {
            return Err(Error::schema(format!("column '{to}' already exists")));
        }
        self.columns[idx] = to.to_string();
        Ok(())
    }

    /// Add a column, or replace it if it already exists.
    pub fn with_column(mut self, name: &str, values: Vec<Value>) -> Result<Dataset> {
        if values.len() != self.rows.len() {
            return Err(Error::schema(format!(
                "column '{name}' has {} values, dataset has {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        match self.columns.iter().position(|c| c == name) {
            Some(idx) => {
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[idx] = v;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
        Ok(self)
    }

    /// Rewrite every cell of a column in place.
    pub fn map_column<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&Value) -> Value,
    {
        let idx = self.column_index(name)?;
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
        Ok(())
    }

    /// Stable sort on several keys; `true` means ascending. Nulls sort last
    /// in either direction.
    pub fn sort_by(&self, keys: &[(&str, bool)]) -> Result<Dataset> {
        let idx: Vec<(usize, bool)> = keys
            .iter()
            .map(|(name, asc)| Ok((self.column_index(name)?, *asc)))
            .collect::<Result<_>>()?;
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            for &(i, asc) in &idx {
                let ord = match (&a[i], &b[i]) {
                    (Value::Null, Value::Null) => Ordering::Equal,
                    (Value::Null, _) => Ordering::Greater,
                    (_, Value::Null) => Ordering::Less,
                    (x, y) if asc => x.cmp(y),
                    (x, y) => y.cmp(x),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(Dataset {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Partition rows by equality of the index columns.
    ///
    /// Nulls form their own group rather than being dropped. Groups come back
    /// in ascending key order.
    pub fn group_indices(&self, index: &[&str]) -> Result<Vec<Group>> {
        let idx: Vec<usize> = index
            .iter()
            .map(|n| self.column_index(n))
            .collect::<Result<_>>()?;
        let mut groups: BTreeMap<Vec<Value>, Vec<usize>> = BTreeMap::new();
        for (pos, row) in self.rows.iter().enumerate() {
            let key = idx.iter().map(|&i| row[i].clone()).collect();
            groups.entry(key).or_default().push(pos);
        }
        Ok(groups
            .into_iter()
            .map(|(key, rows)| Group { key, rows })
            .collect())
    }

    /// Join with `right` on equality of the `on` columns.
    ///
    /// Output columns are the left columns followed by the right columns not
    /// already on the left. A left row matching several right rows is
    /// repeated once per match; null keys match each other.
    pub fn merge(&self, right: &Dataset, on: &[&str], how: JoinKind) -> Result<Dataset> {
        let left_key: Vec<usize> = on.iter().map(|c| self.column_index(c)).collect::<Result<_>>()?;
        let right_key: Vec<usize> = on.iter().map(|c| right.column_index(c)).collect::<Result<_>>()?;
        let extra: Vec<usize> = (0..right.columns.len())
            .filter(|&i| !self.has_column(&right.columns[i]))
            .collect();

        let mut columns = self.columns.clone();
        columns.extend(extra.iter().map(|&i| right.columns[i].clone()));

        let mut lookup: BTreeMap<Vec<&Value>, Vec<usize>> = BTreeMap::new();
        for (pos, row) in right.rows.iter().enumerate() {
            let key = right_key.iter().map(|&i| &row[i]).collect();
            lookup.entry(key).or_default().push(pos);
        }

        let mut matched = vec![false; right.rows.len()];
        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let key: Vec<&Value> = left_key.iter().map(|&i| &row[i]).collect();
            match lookup.get(&key) {
                Some(hits) => {
                    for &h in hits {
                        matched[h] = true;
                        let mut out = row.clone();
                        out.extend(extra.iter().map(|&i| right.rows[h][i].clone()));
                        rows.push(out);
                    }
                }
                None => {
                    let mut out = row.clone();
                    out.resize(columns.len(), Value::Null);
                    rows.push(out);
                }
            }
        }
        if how == JoinKind::Outer {
            for (pos, row) in right.rows.iter().enumerate() {
                if matched[pos] {
                    continue;
                }
                let mut out = vec![Value::Null; self.columns.len()];
                for (&l, &r) in left_key.iter().zip(&right_key) {
                    out[l] = row[r].clone();
                }
                out.extend(extra.iter().map(|&i| row[i].clone()));
                rows.push(out);
            }
        }
        Ok(Dataset { columns, rows })
    }

    /// Stack datasets sharing one schema.
    pub fn concat(parts: Vec<Dataset>) -> Result<Dataset> {
        let mut iter = parts.into_iter();
        let Some(mut out) = iter.next() else {
            return Ok(Dataset::default());
        };
        for part in iter {
            if part.columns != out.columns {
                return Err(Error::schema(format!(
                    "cannot concatenate {:?} with {:?}",
                    out.columns, part.columns
                )));
            }
            out.rows.extend(part.rows);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn letters() -> Dataset {
        Dataset::from_rows(
            vec!["reporter", "partner", "value"],
            vec![
                vec!["A".into(), "Y".into(), 1.into()],
                vec!["A".into(), "Z".into(), 2.into()],
                vec!["B".into(), Value::Null, 1.into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        assert!(Dataset::new(vec!["a", "a"]).is_err());
    }

    #[test]
    fn test_row_width_checked() {
        let mut ds = Dataset::new(vec!["a", "b"]).unwrap();
        assert!(ds.push_row(vec![1.into()]).is_err());
        assert!(ds.push_row(vec![1.into(), 2.into()]).is_ok());
    }

    #[test]
    fn test_missing_column() {
        let ds = letters();
        assert!(ds.has_column("partner"));
        assert!(!ds.has_column("flag"));
        let err = ds.require_columns(&["reporter", "flag"]).unwrap_err();
        assert!(matches!(err, Error::MissingColumn { ref column, .. } if column == "flag"));
    }

    #[test]
    fn test_null_inclusive_grouping() {
        let ds = letters();
        let groups = ds.group_indices(&["partner"]).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[2].key, vec![Value::Null]);
        assert_eq!(groups[2].rows, vec![2]);
    }

    #[test]
    fn test_select_drop_rename() {
        let mut ds = letters().drop_columns(&["partner", "unknown"]);
        assert_eq!(ds.columns(), &["reporter".to_string(), "value".to_string()]);
        ds.rename_column("value", "net_weight").unwrap();
        assert!(ds.has_column("net_weight"));
        assert!(ds.rename_column("reporter", "net_weight").is_err());
    }

    #[test]
    fn test_sort_descending_nulls_last() {
        let ds = letters().sort_by(&[("partner", false)]).unwrap();
        assert_eq!(ds.value(0, "partner").unwrap(), &Value::from("Z"));
        assert_eq!(ds.value(2, "partner").unwrap(), &Value::Null);
    }

    #[test]
    fn test_sum_and_filter() {
        let ds = letters();
        assert_relative_eq!(ds.sum("value").unwrap(), 4.0);
        let a = ds.filter(|r| r.get("reporter") == Some(&Value::from("A")));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_merge_left_and_outer() {
        let right = Dataset::from_rows(
            vec!["reporter", "partner", "share"],
            vec![
                vec!["A".into(), "Y".into(), 0.5.into()],
                vec!["A".into(), "Y".into(), 0.25.into()],
                vec!["C".into(), "Y".into(), 1.0.into()],
            ],
        )
        .unwrap();
        let left = letters().merge(&right, &["reporter", "partner"], JoinKind::Left).unwrap();
        assert_eq!(left.columns(), &["reporter", "partner", "value", "share"]);
        assert_eq!(left.len(), 4);
        assert_eq!(left.value(1, "share").unwrap(), &Value::from(0.25));
        assert!(left.value(2, "share").unwrap().is_null());

        let outer = letters().merge(&right, &["reporter", "partner"], JoinKind::Outer).unwrap();
        assert_eq!(outer.len(), 5);
        assert_eq!(outer.value(4, "reporter").unwrap(), &Value::from("C"));
        assert!(outer.value(4, "value").unwrap().is_null());
        assert!(letters().merge(&right, &["flag"], JoinKind::Left).is_err());
    }

    #[test]
    fn test_with_column_and_concat() {
        let ds = letters()
            .with_column("flag", vec![Value::Null, "E".into(), Value::Null])
            .unwrap();
        assert_eq!(ds.columns().len(), 4);
        let both = Dataset::concat(vec![ds.clone(), ds]).unwrap();
        assert_eq!(both.len(), 6);
        assert!(Dataset::concat(vec![both, letters()]).is_err());
    }
}
