//! Aggregation and reconciliation of trade datasets.
//!
//! This crate handles:
//! - Group rollups with total-preservation checks
//! - EU / rest-of-world reclassification
//! - Mirror flows (counterparty values beside reported values)
//! - Continent and sub-continent rollups
//! - Largest contributors per slice
//! - Reallocation of imports to the country of primary production

pub mod aggregator;
pub mod country_groups;
pub mod eu_row;
pub mod mirror;
pub mod ranking;
pub mod reallocate;

pub use aggregator::{reduce, AggFn, Aggregator};
pub use country_groups::CountryGroupAggregator;
pub use eu_row::{EuRowReclassifier, GroupingSide};
pub use mirror::{flip_element, MirrorJoin, MirrorReconciler};
pub use ranking::nlargest;
pub use reallocate::{Reallocation, ReallocationStep, Reallocator};
