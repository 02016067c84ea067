//! Pipeline configuration from environment variables
//!
//! Values are read once at process start (after `dotenv`) and passed down
//! explicitly; nothing below this module reads the environment.

use super::error::ConfigError;
use super::scheduler::ScheduleConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TICKERS: &[&str] = &["AAPL", "MSFT", "GOOGL", "AMZN", "META"];

/// Where the relational store lives and how hard to try reaching it.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the database file. Never created by `connect`.
    pub db_dir: PathBuf,

    /// Database name; the file is `<db_dir>/<db_name>.db`
    pub db_name: String,

    /// Total connection attempts before giving up
    pub max_retries: u32,

    /// Pause between failed attempts
    pub retry_interval: Duration,
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.db_dir.join(format!("{}.db", self.db_name))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from("data"),
            db_name: "stock_db".to_string(),
            max_retries: 5,
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Target table names. Drawn from this closed configuration set only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub raw_table: String,
    pub agg_table: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            raw_table: "raw_data".to_string(),
            agg_table: "agg_stock_data".to_string(),
        }
    }
}

/// Market-data collaborator settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub tickers: Vec<String>,
    /// Pause between consecutive ticker requests (provider quota)
    pub delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://www.alphavantage.co/query".to_string(),
            tickers: DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect(),
            delay: Duration::from_secs(12),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub tables: TableConfig,
    pub fetch: FetchConfig,
    pub schedule: ScheduleConfig,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `DB_DIR` (default: data)
    /// - `DB_NAME` (default: stock_db)
    /// - `DB_MAX_RETRIES` (default: 5)
    /// - `DB_RETRY_INTERVAL_SECS` (default: 5)
    /// - `RAW_TABLE` (default: raw_data)
    /// - `AGG_TABLE` (default: agg_stock_data)
    /// - `TICKERS` (default: AAPL,MSFT,GOOGL,AMZN,META)
    /// - `FETCH_DELAY_SECS` (default: 12)
    /// - `ALPHA_VANTAGE_API_KEY` (no default)
    /// - `ALPHA_VANTAGE_BASE_URL` (default: https://www.alphavantage.co/query)
    /// - `SCHEDULE_INTERVAL` / `SCHEDULE_UNIT` (default: 24 hours)
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_defaults = StoreConfig::default();
        let table_defaults = TableConfig::default();
        let fetch_defaults = FetchConfig::default();

        let store = StoreConfig {
            db_dir: env::var("DB_DIR")
                .map(PathBuf::from)
                .unwrap_or(store_defaults.db_dir),
            db_name: env::var("DB_NAME").unwrap_or(store_defaults.db_name),
            max_retries: parse_var("DB_MAX_RETRIES")?.unwrap_or(store_defaults.max_retries),
            retry_interval: parse_var("DB_RETRY_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(store_defaults.retry_interval),
        };

        if store.max_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "DB_MAX_RETRIES must be at least 1".to_string(),
            ));
        }

        let tables = TableConfig {
            raw_table: env::var("RAW_TABLE").unwrap_or(table_defaults.raw_table),
            agg_table: env::var("AGG_TABLE").unwrap_or(table_defaults.agg_table),
        };

        let tickers = match env::var("TICKERS") {
            Ok(s) => s
                .split(',')
                .map(|t| t.trim().to_uppercase())
                .filter(|t| !t.is_empty())
                .collect(),
            Err(_) => fetch_defaults.tickers,
        };

        let fetch = FetchConfig {
            api_key: env::var("ALPHA_VANTAGE_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: env::var("ALPHA_VANTAGE_BASE_URL").unwrap_or(fetch_defaults.base_url),
            tickers,
            delay: parse_var("FETCH_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(fetch_defaults.delay),
        };

        let schedule = ScheduleConfig::from_env()?;

        Ok(Self {
            store,
            tables,
            fetch,
            schedule,
        })
    }
}

/// Parse an optional numeric variable; present-but-garbage is an error.
fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{}='{}' is not a number", name, raw))),
        Err(_) => Ok(None),
    }
}
