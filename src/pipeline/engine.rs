//! Pipeline Engine - one ingestion run, start to finish
//!
//! ```text
//! FETCHED ──validate──▶ VALIDATED ──connect+upsert──▶ STORED ──recompute──▶ AGGREGATED
//!    │                      │
//!    ▼                      ▼
//! VALIDATION_FAILED    STORAGE_FAILED
//! ```
//!
//! Validation and storage failures end the run. An aggregation failure is
//! reported but leaves the run at STORED: the batch is already committed.
//! Each phase opens its own connection and drops it before returning.
//!
//! The engine is not reentrant; callers must not start a run while another
//! is in progress (the scheduler awaits each run).

use super::aggregate::recompute_aggregate;
use super::batch::Batch;
use super::config::{StoreConfig, TableConfig};
use super::db::{connect, upsert_batch, MergeOutcome};
use super::error::{AggregationError, FetchError, StoreError, StoreFailure};
use super::fetch::{assemble_batch, PriceSource};
use super::validation::validate;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Fetched,
    Validated,
    Stored,
    Aggregated,
    ValidationFailed,
    StorageFailed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Fetched => "FETCHED",
            RunState::Validated => "VALIDATED",
            RunState::Stored => "STORED",
            RunState::Aggregated => "AGGREGATED",
            RunState::ValidationFailed => "VALIDATION_FAILED",
            RunState::StorageFailed => "STORAGE_FAILED",
        }
    }

    /// True when the batch reached durable storage.
    pub fn is_persisted(&self) -> bool {
        matches!(self, RunState::Stored | RunState::Aggregated)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a caller needs to know about one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub state: RunState,
    pub rows: usize,
    pub validation_errors: Vec<String>,
    pub merge: Option<MergeOutcome>,
    pub storage_failure: Option<StoreFailure>,
    pub storage_error: Option<String>,
    pub aggregate_rows: Option<usize>,
    pub aggregation_error: Option<String>,
}

impl RunReport {
    fn new(rows: usize) -> Self {
        Self {
            state: RunState::Fetched,
            rows,
            validation_errors: Vec::new(),
            merge: None,
            storage_failure: None,
            storage_error: None,
            aggregate_rows: None,
            aggregation_error: None,
        }
    }

    fn transition(&mut self, next: RunState) {
        log::info!("   ├─ {} → {}", self.state, next);
        self.state = next;
    }
}

/// Storage handle plus table names, constructed once and passed around.
#[derive(Debug, Clone)]
pub struct PipelineEngine {
    store: StoreConfig,
    tables: TableConfig,
}

impl PipelineEngine {
    pub fn new(store: StoreConfig, tables: TableConfig) -> Self {
        Self { store, tables }
    }

    pub fn store_config(&self) -> &StoreConfig {
        &self.store
    }

    pub fn tables(&self) -> &TableConfig {
        &self.tables
    }

    /// Fetch every ticker, then run the batch through the pipeline.
    ///
    /// A fetch failure aborts before validation and is returned as-is.
    pub async fn run_once(
        &self,
        source: &dyn PriceSource,
        tickers: &[String],
        delay: Duration,
    ) -> Result<RunReport, FetchError> {
        log::info!("🚀 Starting ingestion run for {} tickers", tickers.len());
        let batch = match assemble_batch(source, tickers, delay).await {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("❌ Batch assembly aborted: {}", e);
                return Err(e);
            }
        };
        Ok(self.run_batch(&batch).await)
    }

    /// Validate, store and aggregate an already-assembled batch.
    ///
    /// Never fails: every phase error is logged and captured in the report.
    pub async fn run_batch(&self, batch: &Batch) -> RunReport {
        let mut report = RunReport::new(batch.len());
        log::info!("📦 Batch received: {} rows ({})", batch.len(), report.state);

        let validation = validate(batch);
        if !validation.ok {
            for e in &validation.errors {
                log::error!("   ├─ validation: {}", e);
            }
            report.validation_errors = validation.errors;
            report.transition(RunState::ValidationFailed);
            log::error!("❌ Run ended: batch rejected, storage untouched");
            return report;
        }
        report.transition(RunState::Validated);

        match self.store_batch(batch).await {
            Ok(outcome) => {
                report.merge = Some(outcome);
                report.transition(RunState::Stored);
            }
            Err(e) => {
                log::error!("❌ Run ended: {}", e);
                report.storage_failure = Some(e.failure());
                report.storage_error = Some(e.to_string());
                report.transition(RunState::StorageFailed);
                return report;
            }
        }

        match self.rebuild_aggregate().await {
            Ok(rows) => {
                report.aggregate_rows = Some(rows);
                report.transition(RunState::Aggregated);
                log::info!("✅ Run complete");
            }
            Err(e) => {
                log::error!("⚠️  Aggregation failed, ingested batch kept: {}", e);
                report.aggregation_error = Some(e.to_string());
            }
        }

        report
    }

    /// Connect and merge; connection and storage errors both end the run.
    async fn store_batch(&self, batch: &Batch) -> Result<MergeOutcome, StoreError> {
        let mut store = connect(&self.store).await?;
        Ok(upsert_batch(&mut store, batch, &self.tables.raw_table)?)
    }

    /// Drop and rebuild the aggregate table on a fresh connection.
    pub async fn rebuild_aggregate(&self) -> Result<usize, AggregationError> {
        let mut store = connect(&self.store).await?;
        recompute_aggregate(&mut store, &self.tables.raw_table, &self.tables.agg_table)
    }
}
