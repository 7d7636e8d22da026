//! Data access for the biotrade system.
//!
//! This crate handles:
//! - The query interface shared by every table source
//! - An in-memory source and a SQLite-backed row store
//! - Column-name sanitizing for raw extracts
//! - Duplicate-key and aggregate-versus-parts checks

pub mod quality;
pub mod sanitize;
pub mod source;
pub mod sqlite;

pub use quality::{find_duplicate_keys, DuplicateKey, PartsCheck, PRODUCTION_KEY, TRADE_KEY};
pub use sanitize::{rename_columns, sanitize_column_name, sanitize_columns};
pub use source::{InMemorySource, QueryFilter, TableSource};
pub use sqlite::{ColumnKind, SqliteStore, TableSchema};
