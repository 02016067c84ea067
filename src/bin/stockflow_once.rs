//! Single ingestion run
//!
//! Fetches every configured ticker, validates the batch, merges it into
//! `raw_data` and rebuilds `agg_stock_data`, then exits.
//!
//! Usage:
//!   cargo run --release --bin stockflow_once
//!
//! Exit status is non-zero when the batch was not persisted.

use dotenv::dotenv;
use log::{error, info};
use stockflow::pipeline::{AlphaVantageClient, PipelineConfig, PipelineEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = PipelineConfig::from_env()?;

    info!("🚀 stockflow - single run");
    info!("   ├─ Database: {}", config.store.db_path().display());
    info!("   ├─ Tables: {} / {}", config.tables.raw_table, config.tables.agg_table);
    info!("   └─ Tickers: {}", config.fetch.tickers.join(", "));

    std::fs::create_dir_all(&config.store.db_dir)?;

    let source = AlphaVantageClient::new(&config.fetch)?;
    let engine = PipelineEngine::new(config.store.clone(), config.tables.clone());

    let report = engine
        .run_once(&source, &config.fetch.tickers, config.fetch.delay)
        .await?;

    info!("📊 Run finished in state {}", report.state);
    if !report.state.is_persisted() {
        error!("❌ Batch not persisted");
        std::process::exit(1);
    }

    Ok(())
}
