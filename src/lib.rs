//! stockflow: daily price ingestion into SQLite with a change-data-capture
//! merge and a fully recomputed rolling-metrics table.

pub mod pipeline;
