// ABOUTME: Library root for warehouse-loader
// ABOUTME: Exposes dataset, configuration, reconciler, and support modules

pub mod config;
pub mod dataset;
pub mod dates;
pub mod ingest;
pub mod markers;
pub mod reconciler;
pub mod rules;
pub mod sql;
pub mod sqlite;
pub mod utils;

pub use config::{ForeignKey, LoaderConfig, TableSpec};
pub use dataset::{Column, ColumnType, Dataset, DatasetError, KeyAffinity};
pub use reconciler::{LoadMode, LoadSummary, Reconciler, VerifyReport};
pub use rules::MergeRule;
