//! Largest contributors per slice.

use crate::aggregator::{reduce, AggFn};
use biotrade_core::{columns, Dataset, Error, Result};

/// The `n` largest groups by their average yearly (or per-period) total.
///
/// Values are first summed over `agg_groups` plus `time_columns`, then
/// averaged over `agg_groups`. Rows are ordered by `slice_groups` ascending
/// and the first value column descending, and the first `n` of each slice
/// are kept. Slice columns are always part of the groups. An empty
/// `time_columns` means `year`.
pub fn nlargest(
    dataset: &Dataset,
    value_columns: &[&str],
    time_columns: &[&str],
    agg_groups: &[&str],
    slice_groups: &[&str],
    n: usize,
) -> Result<Dataset> {
    let Some(first_value) = value_columns.first().copied() else {
        return Err(Error::invalid_argument("nlargest needs at least one value column"));
    };
    let time_columns = if time_columns.is_empty() {
        &[columns::YEAR][..]
    } else {
        time_columns
    };

    let mut groups: Vec<&str> = agg_groups.to_vec();
    for s in slice_groups {
        if !groups.contains(s) {
            groups.push(s);
        }
    }
    let mut per_time = groups.clone();
    per_time.extend(time_columns.iter().copied());

    let summed = reduce(dataset, &per_time, value_columns, AggFn::Sum)?;
    let averaged = if groups.is_empty() {
        summed
    } else {
        reduce(&summed, &groups, value_columns, AggFn::Mean)?
    };

    let mut keys: Vec<(&str, bool)> = slice_groups.iter().map(|s| (*s, true)).collect();
    keys.push((first_value, false));
    let sorted = averaged.sort_by(&keys)?;
    if slice_groups.is_empty() {
        return Ok(sorted.head(n));
    }

    let slice_idx: Vec<usize> = slice_groups
        .iter()
        .map(|s| sorted.column_index(s))
        .collect::<Result<_>>()?;
    let mut keep = Vec::new();
    let mut current: Option<Vec<&biotrade_core::Value>> = None;
    let mut taken = 0;
    for (i, row) in sorted.raw_rows().iter().enumerate() {
        let key: Vec<_> = slice_idx.iter().map(|&j| &row[j]).collect();
        if current.as_ref() != Some(&key) {
            current = Some(key);
            taken = 0;
        }
        if taken < n {
            keep.push(i);
            taken += 1;
        }
    }
    Ok(sorted.take(&keep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use biotrade_core::Value;

    fn wheat() -> Dataset {
        let mut rows = Vec::new();
        for (reporter, element, base) in [
            ("France", "production", 30.0),
            ("Germany", "production", 20.0),
            ("Italy", "production", 5.0),
            ("France", "area_harvested", 4.0),
            ("Germany", "area_harvested", 3.0),
            ("Italy", "area_harvested", 2.0),
        ] {
            for (year, bump) in [(2019, 0.0), (2020, 2.0)] {
                rows.push(vec![reporter.into(), element.into(), Value::from(year), Value::from(base + bump)]);
            }
        }
        Dataset::from_rows(vec!["reporter", "element", "year", "value"], rows).unwrap()
    }

    #[test]
    fn test_top_two_per_element() -> anyhow::Result<()> {
        let top = nlargest(&wheat(), &["value"], &[], &["reporter"], &["element"], 2)?;
        assert_eq!(top.columns(), &["reporter", "element", "value"]);
        assert_eq!(top.len(), 4);
        assert_eq!(top.value(0, "element")?, &Value::from("area_harvested"));
        assert_eq!(top.value(0, "reporter")?, &Value::from("France"));
        assert_eq!(top.value(2, "reporter")?, &Value::from("France"));
        assert_relative_eq!(top.value(2, "value")?.as_f64().unwrap(), 31.0);
        assert_eq!(top.value(3, "reporter")?, &Value::from("Germany"));
        Ok(())
    }

    #[test]
    fn test_without_slices() -> anyhow::Result<()> {
        let top = nlargest(&wheat(), &["value"], &["year"], &["reporter", "element"], &[], 1)?;
        assert_eq!(top.len(), 1);
        assert_eq!(top.value(0, "reporter")?, &Value::from("France"));
        Ok(())
    }

    #[test]
    fn test_requires_value_column() {
        assert!(nlargest(&wheat(), &[], &[], &["reporter"], &[], 3).is_err());
    }
}
