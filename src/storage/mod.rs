//! Storage Module
//!
//! Provides the fact-loader/fact-writer boundary the LVM evaluator's `Load`
//! and `Store` opcodes call through (see `crate::lvm::eval::IoDirective`):
//! - Parquet serialization (columnar, compressed, efficient for analytics)
//! - CSV serialization (human-readable, interoperable)
//! - Error handling
//!
//! ## Format Selection
//!
//! - Parquet: Best for large datasets, analytics workloads, and production use
//! - CSV: Best for data exchange, debugging, and human inspection
//!
//! This module performs one-shot import/export only; relation state is not
//! persisted between runs (see DESIGN.md's Non-goals discussion).

pub mod csv;
pub mod error;
pub mod parquet;

pub use csv::{
    load_from_csv, load_from_csv_with_options, save_to_csv, save_to_csv_with_options, CsvOptions,
};
pub use error::{StorageError, StorageResult};
pub use parquet::{load_from_parquet, save_to_parquet};
