//! End-to-end pipeline tests
//!
//! Drive `PipelineEngine` with an in-memory price source against a
//! temporary SQLite database and check the resulting tables.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use stockflow::pipeline::aggregate::load_aggregates;
use stockflow::pipeline::error::FetchError;
use stockflow::pipeline::{
    Batch, PipelineEngine, PriceSource, Record, RunState, SqliteStore, StoreConfig, TableConfig,
};
use tempfile::{tempdir, TempDir};

/// Serves canned bars and remembers the order tickers were requested in.
struct MemorySource {
    bars: HashMap<String, Vec<Record>>,
    calls: Mutex<Vec<String>>,
    fail_ticker: Option<String>,
}

impl MemorySource {
    fn new(records: Vec<Record>) -> Self {
        let mut bars: HashMap<String, Vec<Record>> = HashMap::new();
        for r in records {
            bars.entry(r.ticker.clone()).or_default().push(r);
        }
        Self {
            bars,
            calls: Mutex::new(Vec::new()),
            fail_ticker: None,
        }
    }
}

#[async_trait]
impl PriceSource for MemorySource {
    async fn fetch_daily(&self, ticker: &str) -> Result<Vec<Record>, FetchError> {
        self.calls.lock().unwrap().push(ticker.to_string());
        if self.fail_ticker.as_deref() == Some(ticker) {
            return Err(FetchError::Source {
                ticker: ticker.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        Ok(self.bars.get(ticker).cloned().unwrap_or_default())
    }
}

fn bar(date: (i32, u32, u32), ticker: &str, o: f64, h: f64, l: f64, c: f64, v: i64) -> Record {
    Record {
        date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        ticker: ticker.to_string(),
        open: o,
        high: h,
        low: l,
        close: c,
        volume: v,
    }
}

fn scenario_records() -> Vec<Record> {
    vec![
        bar((2024, 1, 2), "AAPL", 100.0, 101.0, 99.0, 100.5, 1000),
        bar((2024, 1, 3), "AAPL", 100.5, 102.0, 100.0, 101.5, 1200),
    ]
}

fn engine_in(dir: &Path, tables: TableConfig) -> PipelineEngine {
    PipelineEngine::new(
        StoreConfig {
            db_dir: dir.to_path_buf(),
            db_name: "stock_db".to_string(),
            max_retries: 2,
            retry_interval: Duration::from_millis(1),
        },
        tables,
    )
}

fn setup() -> (TempDir, PipelineEngine) {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path(), TableConfig::default());
    (dir, engine)
}

fn raw_rows(engine: &PipelineEngine) -> Vec<(String, String, f64, i64, String)> {
    let conn = Connection::open(engine.store_config().db_path()).unwrap();
    let mut stmt = conn
        .prepare("SELECT date, ticker, close, volume, curr_timestamp FROM raw_data ORDER BY ticker, date")
        .unwrap();
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    rows
}

#[tokio::test]
async fn test_ingest_into_empty_store_then_aggregate() {
    let (_dir, engine) = setup();
    let ts = Utc.with_ymd_and_hms(2024, 1, 4, 8, 0, 0).unwrap();
    let batch = Batch::from_records(&scenario_records(), ts);

    let report = engine.run_batch(&batch).await;

    assert_eq!(report.state, RunState::Aggregated);
    assert_eq!(report.merge.unwrap().inserted, 2);
    assert_eq!(raw_rows(&engine).len(), 2);

    let store = SqliteStore::open(engine.store_config().db_path()).unwrap();
    let agg = load_aggregates(&store, "agg_stock_data").unwrap();
    assert_eq!(agg.len(), 2);

    let jan3 = &agg[0];
    let jan2 = &agg[1];
    assert_eq!(jan3.date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    assert!((jan3.daily_return.unwrap() - (101.5 - 100.5) / 100.5).abs() < 1e-12);
    assert!((jan3.daily_return.unwrap() - 0.00995).abs() < 1e-5);
    assert!(jan2.daily_return.is_none());
}

#[tokio::test]
async fn test_reingest_same_batch_is_a_no_op() {
    let (_dir, engine) = setup();
    let ts = Utc.with_ymd_and_hms(2024, 1, 4, 8, 0, 0).unwrap();
    let batch = Batch::from_records(&scenario_records(), ts);

    engine.run_batch(&batch).await;
    let before = raw_rows(&engine);

    let report = engine.run_batch(&batch).await;
    let merge = report.merge.unwrap();

    assert_eq!(report.state, RunState::Aggregated);
    assert_eq!(merge.inserted, 0);
    assert_eq!(merge.updated, 0, "identical rows must not be rewritten");
    assert_eq!(merge.unchanged, 2);
    assert_eq!(raw_rows(&engine), before);
}

#[tokio::test]
async fn test_new_timestamp_updates_existing_rows() {
    let (_dir, engine) = setup();
    let first = Utc.with_ymd_and_hms(2024, 1, 4, 8, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap();

    engine.run_batch(&Batch::from_records(&scenario_records(), first)).await;

    let mut records = scenario_records();
    records.push(bar((2024, 1, 4), "AAPL", 101.5, 103.0, 101.0, 102.0, 900));
    let report = engine.run_batch(&Batch::from_records(&records, second)).await;
    let merge = report.merge.unwrap();

    assert_eq!(merge.inserted, 1);
    assert_eq!(merge.updated, 2);
    let rows = raw_rows(&engine);
    assert_eq!(rows.len(), 3);
    let stamps: Vec<&String> = rows.iter().map(|r| &r.4).collect();
    assert!(stamps.iter().all(|s| *s == stamps[0]));
}

#[tokio::test]
async fn test_run_once_fetches_in_ticker_order() {
    let (_dir, engine) = setup();
    let mut records = scenario_records();
    records.push(bar((2024, 1, 2), "MSFT", 370.0, 372.0, 368.0, 371.0, 500));
    let source = MemorySource::new(records);

    let tickers = vec!["MSFT".to_string(), "TSLA".to_string(), "AAPL".to_string()];
    let report = engine
        .run_once(&source, &tickers, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(*source.calls.lock().unwrap(), tickers);
    assert_eq!(report.state, RunState::Aggregated);
    assert_eq!(report.rows, 3);
    assert_eq!(report.aggregate_rows, Some(3));
}

#[tokio::test]
async fn test_fetch_failure_aborts_before_validation() {
    let (_dir, engine) = setup();
    let mut source = MemorySource::new(scenario_records());
    source.fail_ticker = Some("MSFT".to_string());

    let tickers = vec!["AAPL".to_string(), "MSFT".to_string(), "GOOGL".to_string()];
    let result = engine.run_once(&source, &tickers, Duration::ZERO).await;

    assert!(result.is_err());
    assert_eq!(source.calls.lock().unwrap().len(), 2);
    assert!(!engine.store_config().db_path().exists());
}

#[tokio::test]
async fn test_aggregation_failure_keeps_ingested_batch() {
    let dir = tempdir().unwrap();
    let engine = engine_in(
        dir.path(),
        TableConfig {
            raw_table: "raw_data".to_string(),
            agg_table: "Agg-Stock-Data".to_string(),
        },
    );
    let batch = Batch::from_records(&scenario_records(), Utc::now());

    let report = engine.run_batch(&batch).await;

    assert_eq!(report.state, RunState::Stored);
    assert!(report.state.is_persisted());
    assert!(report.aggregation_error.is_some());
    assert_eq!(raw_rows(&engine).len(), 2);
}

#[tokio::test]
async fn test_recompute_twice_is_identical() {
    let (_dir, engine) = setup();
    let records: Vec<Record> = (1..=20)
        .map(|d| {
            let c = 100.0 + (d as f64 * 1.3).sin() * 5.0;
            bar((2024, 2, d), "AAPL", c - 0.5, c + 1.0, c - 1.0, c, 1000 + d as i64)
        })
        .collect();
    engine
        .run_batch(&Batch::from_records(&records, Utc::now()))
        .await;

    let store = SqliteStore::open(engine.store_config().db_path()).unwrap();
    let first = load_aggregates(&store, "agg_stock_data").unwrap();
    drop(store);

    engine.rebuild_aggregate().await.unwrap();

    let store = SqliteStore::open(engine.store_config().db_path()).unwrap();
    let second = load_aggregates(&store, "agg_stock_data").unwrap();

    assert_eq!(first.len(), 20);
    assert_eq!(first, second);
    // rows 1..=6 have a partial 7-row window but still carry a mean
    assert!(first[18].avg_return_7d.is_some());
    assert!(first[19].avg_return_7d.is_none());
}

#[tokio::test]
async fn test_empty_fetch_creates_schema_only() {
    let (_dir, engine) = setup();
    let source = MemorySource::new(Vec::new());

    let report = engine
        .run_once(&source, &["AAPL".to_string()], Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Aggregated);
    assert_eq!(report.rows, 0);
    assert!(raw_rows(&engine).is_empty());
    assert_eq!(report.aggregate_rows, Some(0));
}

#[tokio::test]
async fn test_nan_close_is_rejected_and_later_runs_still_aggregate() {
    let (_dir, engine) = setup();
    let mut records = scenario_records();
    records[1].close = f64::NAN;

    let report = engine
        .run_batch(&Batch::from_records(&records, Utc::now()))
        .await;

    assert_eq!(report.state, RunState::ValidationFailed);
    assert_eq!(report.validation_errors, vec!["Data contains missing values.".to_string()]);
    assert!(!engine.store_config().db_path().exists());

    let clean = vec![bar((2024, 1, 2), "MSFT", 370.0, 372.0, 368.0, 371.0, 500)];
    let report = engine
        .run_batch(&Batch::from_records(&clean, Utc::now()))
        .await;

    assert_eq!(report.state, RunState::Aggregated);
    assert!(report.aggregation_error.is_none());
}
