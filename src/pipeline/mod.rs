//! # Change-data-capture ingestion pipeline
//!
//! One run takes a batch of daily OHLCV bars from the price source through
//! four phases:
//!
//! 1. `validation` - shape checks on the columnar batch (nothing written)
//! 2. `db` - connect with retry, then stage the batch and merge it into the
//!    primary table keyed by `(date, ticker)`
//! 3. `aggregate` - drop and rebuild the rolling-metrics table from the
//!    whole primary table
//! 4. `engine` - runs the phases in order and turns failures into a
//!    `RunReport` instead of panics
//!
//! ## Tables
//!
//! - `raw_data` - every bar ever ingested, one row per `(date, ticker)`
//! - `staging_raw_data` - transient copy of the current batch
//! - `agg_stock_data` - derived, rebuilt on every run
//!
//! ## Module Organization
//!
//! - `types` - `Record` and `AggregateRow`
//! - `batch` - columnar `Batch`, `Column`, `Value`, fixed raw schema
//! - `validation` - `validate`
//! - `db` - `SqliteStore`, `connect`, `upsert_batch`, storage seams
//! - `windows` - trailing row windows for rolling statistics
//! - `aggregate` - `compute_aggregates`, `recompute_aggregate`
//! - `fetch` - `PriceSource`, Alpha Vantage client, `assemble_batch`
//! - `engine` - `PipelineEngine`, `RunState`, `RunReport`
//! - `scheduler` - periodic non-overlapping runs
//! - `config` - environment configuration
//! - `error` - per-phase error types

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod scheduler;
pub mod types;
pub mod validation;
pub mod windows;

// Re-export commonly used types
pub use batch::{Batch, Column, DataType, Value};
pub use config::{FetchConfig, PipelineConfig, StoreConfig, TableConfig};
pub use db::{connect, upsert_batch, LoadPlan, MergeOutcome, SqliteStore};
pub use engine::{PipelineEngine, RunReport, RunState};
pub use fetch::{AlphaVantageClient, PriceSource};
pub use types::{AggregateRow, Record};
pub use validation::{validate, ValidationReport};
