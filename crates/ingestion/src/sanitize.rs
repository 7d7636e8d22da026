//! Column-name normalisation for raw source extracts.

use biotrade_core::{Dataset, Error, Result};
use std::collections::HashSet;

/// Snake-case a raw header: every run of non-word characters becomes a
/// single `_` and letters are lower-cased.
pub fn sanitize_column_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for c in raw.chars() {
        if c.is_alphanumeric() || c == '_' {
            out.extend(c.to_lowercase());
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Sanitize every column name of a dataset.
pub fn sanitize_columns(dataset: &Dataset) -> Result<Dataset> {
    let names: Vec<String> = dataset
        .columns()
        .iter()
        .map(|c| sanitize_column_name(c))
        .collect();
    Dataset::from_rows(names, dataset.raw_rows().to_vec())
}

/// Sanitize the headers, then map source names onto the store's names.
///
/// Every source name in `mapping` must be present after sanitizing; a
/// missing one means the upstream layout changed. Columns without a mapping
/// are dropped.
pub fn rename_columns(dataset: &Dataset, mapping: &[(&str, &str)]) -> Result<Dataset> {
    let sanitized = sanitize_columns(dataset)?;
    let sources: Vec<&str> = mapping.iter().map(|(from, _)| *from).collect();
    sanitized.require_columns(&sources)?;

    let mut targets = HashSet::new();
    for (_, to) in mapping {
        if !targets.insert(*to) {
            return Err(Error::schema(format!("column '{to}' mapped twice")));
        }
    }

    let mut out = sanitized.select(&sources)?;
    for (from, to) in mapping {
        if from != to {
            // Move to a temporary name first so swaps cannot collide.
            out.rename_column(from, &format!("__{to}"))?;
        }
    }
    for (from, to) in mapping {
        if from != to {
            out.rename_column(&format!("__{to}"), to)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use biotrade_core::Value;

    #[test]
    fn test_sanitize_column_name() {
        assert_eq!(sanitize_column_name("Reporter Countries"), "reporter_countries");
        assert_eq!(sanitize_column_name("Item Code (CPC)"), "item_code_cpc_");
        assert_eq!(sanitize_column_name("Year--Code"), "year_code");
        assert_eq!(sanitize_column_name("unit"), "unit");
    }

    #[test]
    fn test_rename_columns() -> anyhow::Result<()> {
        let raw = Dataset::from_rows(
            vec!["Reporter Countries", "Item", "Value", "Note"],
            vec![vec!["Brazil".into(), "Soya beans".into(), 1.5.into(), Value::Null]],
        )?;
        let ds = rename_columns(
            &raw,
            &[
                ("reporter_countries", "reporter"),
                ("item", "product"),
                ("value", "value"),
            ],
        )?;
        assert_eq!(ds.columns(), &["reporter", "product", "value"]);
        assert_eq!(ds.value(0, "reporter")?, &Value::from("Brazil"));
        Ok(())
    }

    #[test]
    fn test_rename_columns_detects_changed_source() {
        let raw = Dataset::new(vec!["Reporter", "Value"]).unwrap();
        let err = rename_columns(&raw, &[("reporter_countries", "reporter")]).unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
    }

    #[test]
    fn test_rename_columns_swap() -> anyhow::Result<()> {
        let raw = Dataset::from_rows(vec!["a", "b"], vec![vec![1.into(), 2.into()]])?;
        let ds = rename_columns(&raw, &[("a", "b"), ("b", "a")])?;
        assert_eq!(ds.value(0, "b")?, &Value::from(1));
        assert_eq!(ds.value(0, "a")?, &Value::from(2));
        Ok(())
    }
}
