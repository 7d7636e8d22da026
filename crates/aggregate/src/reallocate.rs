//! Reallocation of imported quantities to the country of primary production.
//!
//! When A imports a commodity from B and B itself imported part of it from C,
//! the quantity should be attributed to C rather than B. Each step splits a
//! quantity into the share its holder produced and the share it imported,
//! then spreads the imported share over the holder's own import partners in
//! proportion to their trade. Quantities are expressed in primary-commodity
//! equivalent throughout.
//!
//! Step `k` reads `primary_eq_{k-1}` and adds `primary_eq_prod_k`,
//! `primary_eq_imp_k` and, on the trade side, `partner_k` with
//! `primary_eq_imp_alloc_k`.

use crate::aggregator::{reduce, AggFn};
use biotrade_core::config::ReallocationConfig;
use biotrade_core::{columns, Dataset, Error, JoinKind, Result, Value};
use tracing::{debug, info};

pub const PRODUCTION: &str = "production";
pub const IMPORT_QUANTITY: &str = "import_quantity";
pub const SHARE_PROD_IMP: &str = "share_prod_imp";
pub const IMPORT_SHARE_BY_PARTNER: &str = "imp_share_by_p";
pub const PRIMARY_PRODUCT: &str = "primary_product";
pub const PRIMARY_PRODUCT_CODE: &str = "primary_product_code";

/// Quantity column read by `step`.
pub fn primary_eq(step: usize) -> String {
    format!("primary_eq_{step}")
}

/// Trade partner column added by `step`.
pub fn partner_column(step: usize) -> String {
    format!("partner_{step}")
}

fn produced(step: usize) -> String {
    format!("primary_eq_prod_{step}")
}

fn imported(step: usize) -> String {
    format!("primary_eq_imp_{step}")
}

/// Imported quantity attributed to one partner at `step`.
pub fn allocated(step: usize) -> String {
    format!("primary_eq_imp_alloc_{step}")
}

/// Code columns matching the named columns, e.g. `reporter_code`.
fn code_columns(names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter(|n| {
            matches!(
                **n,
                columns::REPORTER | columns::PARTNER | columns::PRODUCT | PRIMARY_PRODUCT
            )
        })
        .map(|n| format!("{n}_code"))
        .collect()
}

/// Join index extended with the code columns both datasets carry.
fn with_codes(mut index: Vec<String>, left: &Dataset, right: &Dataset) -> Vec<String> {
    let names: Vec<&str> = index.iter().map(String::as_str).collect();
    let codes: Vec<String> = code_columns(&names)
        .into_iter()
        .filter(|c| left.has_column(c) && right.has_column(c))
        .collect();
    index.extend(codes);
    index
}

fn check_step(step: usize) -> Result<()> {
    if step == 0 {
        return Err(Error::invalid_argument("reallocation steps start at 1"));
    }
    Ok(())
}

fn refs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}

/// Cell-wise `f(a, b)` over two numeric columns; null where either is null.
fn combine<F>(dataset: &Dataset, a: &str, b: &str, f: F) -> Result<Vec<Value>>
where
    F: Fn(f64, f64) -> f64,
{
    let (ia, ib) = (dataset.column_index(a)?, dataset.column_index(b)?);
    Ok(dataset
        .raw_rows()
        .iter()
        .map(|r| match (r[ia].as_f64(), r[ib].as_f64()) {
            (Some(x), Some(y)) => Value::finite(f(x, y)),
            _ => Value::Null,
        })
        .collect())
}

/// Share of domestic production in production plus imports.
///
/// Imports are summed per reporter, product and year (plus the code columns
/// present in both inputs) and outer-joined to `production`; a missing side
/// counts as zero. Adds `import_quantity` and `share_prod_imp`; the share is
/// null when both quantities are zero.
pub fn share_prod_imp(production: &Dataset, trade: &Dataset) -> Result<Dataset> {
    let base = [columns::REPORTER, columns::PRODUCT, columns::YEAR];
    production.require_columns(&base)?;
    production.require_columns(&[PRODUCTION])?;
    trade.require_columns(&base)?;
    trade.require_columns(&[IMPORT_QUANTITY])?;

    let index = with_codes(base.iter().map(|c| c.to_string()).collect(), production, trade);
    let index = refs(&index);
    let imports = reduce(trade, &index, &[IMPORT_QUANTITY], AggFn::Sum)?;
    let mut merged = production
        .drop_columns(&[IMPORT_QUANTITY, SHARE_PROD_IMP])
        .merge(&imports, &index, JoinKind::Outer)?;
    for column in [IMPORT_QUANTITY, PRODUCTION] {
        merged.map_column(column, |v| if v.is_null() { Value::Int(0) } else { v.clone() })?;
    }
    let share = combine(&merged, PRODUCTION, IMPORT_QUANTITY, |p, i| p / (p + i))?;
    merged.with_column(SHARE_PROD_IMP, share)
}

/// Share of each partner in a reporter's imports of a primary product.
///
/// Adds `imp_share_by_p`; shares within one reporter, primary product and
/// year sum to one.
pub fn share_by_partners(trade: &Dataset) -> Result<Dataset> {
    let base = [columns::REPORTER, PRIMARY_PRODUCT, columns::YEAR];
    trade.require_columns(&base)?;
    let mut index: Vec<&str> = base.to_vec();
    let codes: Vec<String> = code_columns(&base)
        .into_iter()
        .filter(|c| trade.has_column(c))
        .collect();
    index.extend(refs(&codes));

    let qty = trade.column_index(IMPORT_QUANTITY)?;
    let mut shares = vec![Value::Null; trade.len()];
    for group in trade.group_indices(&index)? {
        let total: f64 = group
            .rows
            .iter()
            .filter_map(|&r| trade.raw_rows()[r][qty].as_f64())
            .sum();
        for &r in &group.rows {
            if let Some(v) = trade.raw_rows()[r][qty].as_f64() {
                shares[r] = Value::finite(v / total);
            }
        }
    }
    trade.clone().with_column(IMPORT_SHARE_BY_PARTNER, shares)
}

/// Split `primary_eq_{step-1}` into produced and imported parts.
///
/// The holder of the quantity is `reporter` at step 1 and
/// `partner_{step-1}` afterwards; its `share_prod_imp` is looked up in
/// `shares`. Rows without a share get null parts.
pub fn split_prod_imp(dataset: &Dataset, shares: &Dataset, step: usize) -> Result<Dataset> {
    check_step(step)?;
    let holder = if step == 1 {
        columns::REPORTER.to_string()
    } else {
        partner_column(step - 1)
    };
    let mut shares = shares.clone();
    if step > 1 {
        shares.rename_column(columns::REPORTER, &holder)?;
    }
    let index = with_codes(
        vec![holder, PRIMARY_PRODUCT.to_string(), columns::YEAR.to_string()],
        dataset,
        &shares,
    );
    let index = refs(&index);
    let mut keep = index.clone();
    keep.push(SHARE_PROD_IMP);

    let source = primary_eq(step - 1);
    let out = dataset
        .drop_columns(&[SHARE_PROD_IMP])
        .merge(&shares.select(&keep)?, &index, JoinKind::Left)?;
    let prod = combine(&out, &source, SHARE_PROD_IMP, |q, s| q * s)?;
    let imp = combine(&out, &source, SHARE_PROD_IMP, |q, s| q * (1.0 - s))?;
    Ok(out
        .with_column(&produced(step), prod)?
        .with_column(&imported(step), imp)?
        .drop_columns(&[SHARE_PROD_IMP]))
}

/// Spread `primary_eq_imp_{step}` over the holder's import partners.
///
/// `trade` carries `imp_share_by_p`; its `partner` becomes `partner_{step}`.
/// A holder with no recorded imports keeps one row with null partner and
/// allocation.
pub fn allocate_by_partners(dataset: &Dataset, trade: &Dataset, step: usize) -> Result<Dataset> {
    check_step(step)?;
    let mut trade = trade.clone();
    let holder = if step == 1 {
        columns::REPORTER.to_string()
    } else {
        let holder = partner_column(step - 1);
        trade.rename_column(columns::REPORTER, &holder)?;
        holder
    };
    let index = with_codes(
        vec![PRIMARY_PRODUCT.to_string(), columns::YEAR.to_string(), holder],
        dataset,
        &trade,
    );
    trade.rename_column(columns::PARTNER, &partner_column(step))?;

    let out = dataset.merge(&trade, &refs(&index), JoinKind::Left)?;
    let alloc = combine(&out, &imported(step), IMPORT_SHARE_BY_PARTNER, |q, s| q * s)?;
    out.with_column(&allocated(step), alloc)
}

/// Production and trade tables of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct ReallocationStep {
    pub step: usize,
    pub production: Dataset,
    pub trade: Dataset,
}

/// Every step of a reallocation, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Reallocation {
    pub steps: Vec<ReallocationStep>,
}

impl Reallocation {
    /// Outer join of every step's production table.
    pub fn merged_production(&self) -> Result<Dataset> {
        merge_steps(self.steps.iter().map(|s| &s.production))
    }

    /// Outer join of every step's trade table.
    pub fn merged_trade(&self) -> Result<Dataset> {
        merge_steps(self.steps.iter().map(|s| &s.trade))
    }
}

fn is_identity(column: &str) -> bool {
    matches!(
        column,
        columns::REPORTER
            | columns::REPORTER_CODE
            | columns::PRODUCT
            | columns::PRODUCT_CODE
            | PRIMARY_PRODUCT
            | PRIMARY_PRODUCT_CODE
            | columns::YEAR
    ) || column
        .strip_prefix("partner_")
        .is_some_and(|n| n.parse::<usize>().is_ok())
}

/// Join step tables on the identity columns they share, adding the columns
/// each later step introduces.
fn merge_steps<'a>(mut tables: impl Iterator<Item = &'a Dataset>) -> Result<Dataset> {
    let Some(first) = tables.next() else {
        return Ok(Dataset::default());
    };
    let mut merged = first.clone();
    for table in tables {
        let on: Vec<&str> = merged
            .columns()
            .iter()
            .map(String::as_str)
            .filter(|c| is_identity(c) && table.has_column(c))
            .collect();
        merged = merged.merge(table, &on, JoinKind::Outer)?;
    }
    Ok(merged)
}

/// Traces secondary-product quantities back through primary-crop trade.
#[derive(Debug, Clone)]
pub struct Reallocator {
    steps: usize,
    threshold: f64,
}

impl Default for Reallocator {
    fn default() -> Self {
        Self::new(&ReallocationConfig::default())
    }
}

impl Reallocator {
    pub fn new(config: &ReallocationConfig) -> Self {
        Self {
            steps: config.steps,
            threshold: config.threshold,
        }
    }

    /// Run every step.
    ///
    /// `quantities` holds the flows to reallocate in `primary_eq_0`, with
    /// `reporter`, `primary_product` and `year`. `crop_production` (with
    /// `production`) and `crop_trade` (with `partner` and `import_quantity`)
    /// describe the primary crop, keyed by `product`. After the first step
    /// only allocations above the threshold are traced further.
    pub fn reallocate(
        &self,
        quantities: &Dataset,
        crop_production: &Dataset,
        crop_trade: &Dataset,
    ) -> Result<Reallocation> {
        if self.steps == 0 {
            return Err(Error::invalid_argument("reallocation needs at least one step"));
        }
        quantities.require_columns(&[columns::REPORTER, PRIMARY_PRODUCT, columns::YEAR])?;
        quantities.column_index(&primary_eq(0))?;
        crop_trade.require_columns(&[columns::PARTNER, IMPORT_QUANTITY])?;

        let mut shares = share_prod_imp(crop_production, crop_trade)?;
        let mut trade = crop_trade.clone();
        for ds in [&mut shares, &mut trade] {
            ds.rename_column(columns::PRODUCT, PRIMARY_PRODUCT)?;
            if ds.has_column(columns::PRODUCT_CODE) {
                ds.rename_column(columns::PRODUCT_CODE, PRIMARY_PRODUCT_CODE)?;
            }
        }
        let trade = share_by_partners(&trade)?.drop_columns(&[
            IMPORT_QUANTITY,
            columns::REPORTER_CODE,
            columns::PARTNER_CODE,
        ]);

        let mut current = quantities.drop_columns(&[columns::REPORTER_CODE]);
        let mut steps: Vec<ReallocationStep> = Vec::with_capacity(self.steps);
        for step in 1..=self.steps {
            if let Some(prev) = steps.last() {
                let alloc = allocated(step - 1);
                let kept = prev.trade.filter(|r| {
                    r.get(&alloc)
                        .and_then(Value::as_f64)
                        .is_some_and(|v| v > self.threshold)
                });
                debug!(step, kept = kept.len(), dropped = prev.trade.len() - kept.len(), "thresholded allocations");
                let carried: Vec<Value> = kept.column(&alloc)?.cloned().collect();
                current = kept
                    .with_column(&primary_eq(step - 1), carried)?
                    .drop_columns(&[IMPORT_SHARE_BY_PARTNER]);
            }
            let production = split_prod_imp(&current, &shares, step)?;
            let trade_step = allocate_by_partners(&production, &trade, step)?;
            info!(
                step,
                production_rows = production.len(),
                trade_rows = trade_step.len(),
                "reallocation step"
            );
            steps.push(ReallocationStep {
                step,
                production,
                trade: trade_step,
            });
        }
        Ok(Reallocation { steps })
    }
}
