//! Core types and configuration for the biotrade system.
//!
//! This crate provides shared types used across all other crates:
//! - Tabular datasets, rows and scalar values
//! - Trade flow and production records
//! - Configuration structures and reference tables
//! - Common error and anomaly types

pub mod anomaly;
pub mod config;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod reference;
pub mod types;

pub use anomaly::{Anomaly, Outcome};
pub use config::Config;
pub use dataset::{Dataset, Group, JoinKind, RowRef};
pub use error::{Error, Result};
pub use reference::ReferenceTables;
pub use types::*;
