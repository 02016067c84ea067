//! Error kinds for each pipeline phase
//!
//! Every phase has its own error so the orchestrator can decide whether a
//! failure ends the run (connection, storage, validation) or is only
//! reported (aggregation).

use thiserror::Error;

/// The store could not be reached within the retry budget.
#[derive(Debug, Error)]
#[error("could not connect to {target} after {attempts} attempt(s): {last_error}")]
pub struct ConnectionError {
    pub target: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Failure while creating, staging or merging into a table.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid table name '{0}': expected a lower-case SQL identifier")]
    InvalidTableName(String),

    #[error("Batch is missing column '{0}' required by the merge")]
    MissingColumn(String),

    #[error("Merge into '{table}' failed: {reason}")]
    Merge { table: String, reason: String },
}

/// Why a batch did not reach the primary table.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Which side of `StoreError` ended a run, kept in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailure {
    Connection,
    Storage,
}

impl StoreError {
    pub fn failure(&self) -> StoreFailure {
        match self {
            StoreError::Connection(_) => StoreFailure::Connection,
            StoreError::Storage(_) => StoreFailure::Storage,
        }
    }
}

/// The batch failed its shape checks; nothing was written.
#[derive(Debug, Error)]
#[error("batch failed validation: {}", .errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

/// Rebuilding the derived table failed. The ingested batch stays committed.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

/// The market-data collaborator failed hard enough to abort batch assembly.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request error for {ticker}: {source}")]
    Transport {
        ticker: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Price source error for {ticker}: {reason}")]
    Source { ticker: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
