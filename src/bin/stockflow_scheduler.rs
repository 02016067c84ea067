//! Scheduled ingestion runtime
//!
//! Runs one ingestion immediately and then every SCHEDULE_INTERVAL
//! SCHEDULE_UNIT until CTRL+C. A failed run is logged and the next tick
//! tries again; runs never overlap.
//!
//! Usage:
//!   cargo run --release --bin stockflow_scheduler
//!
//! Environment variables:
//!   DB_DIR / DB_NAME - database location (default: data/stock_db.db)
//!   TICKERS - comma-separated symbols
//!   ALPHA_VANTAGE_API_KEY - required
//!   SCHEDULE_INTERVAL / SCHEDULE_UNIT - cadence (default: 24 hours)

use dotenv::dotenv;
use log::{error, info, warn};
use stockflow::pipeline::{
    scheduler::run_scheduled, AlphaVantageClient, PipelineConfig, PipelineEngine,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = PipelineConfig::from_env()?;

    info!("🚀 stockflow scheduler");
    info!("   ├─ Database: {}", config.store.db_path().display());
    info!(
        "   ├─ Retry policy: {} attempts, {}s apart",
        config.store.max_retries,
        config.store.retry_interval.as_secs()
    );
    info!("   ├─ Tickers: {}", config.fetch.tickers.join(", "));
    info!(
        "   └─ Cadence: every {} {}",
        config.schedule.interval,
        config.schedule.unit.as_str()
    );

    std::fs::create_dir_all(&config.store.db_dir)?;

    let source = AlphaVantageClient::new(&config.fetch)?;
    let engine = PipelineEngine::new(config.store.clone(), config.tables.clone());

    let (engine, source, config) = (&engine, &source, &config);
    let job = move || async move {
        match engine
            .run_once(source, &config.fetch.tickers, config.fetch.delay)
            .await
        {
            Ok(report) if report.state.is_persisted() => {
                info!("📊 Run finished in state {}", report.state);
            }
            Ok(report) => {
                warn!("⚠️  Run finished in state {}, batch not persisted", report.state);
            }
            Err(e) => {
                error!("❌ Run aborted during fetch: {}", e);
            }
        }
    };

    info!("🔄 Press CTRL+C to shutdown gracefully");

    tokio::select! {
        runs = run_scheduled(&config.schedule, None, job) => {
            info!("Scheduler stopped after {} runs", runs);
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
        }
    }

    info!("✅ Scheduler stopped");
    Ok(())
}
