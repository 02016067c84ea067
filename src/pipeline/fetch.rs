//! Market-data collaborator
//!
//! Pulls daily bars per ticker from Alpha Vantage (`TIME_SERIES_DAILY`,
//! compact output = last 100 trading days) and assembles them into one
//! batch.
//!
//! Failure policy:
//! - non-2xx status, unparsable body, or a body without a daily series
//!   (rate-limit notes, unknown symbol): warn and yield no rows
//! - transport failure or a malformed or non-finite number inside a bar:
//!   `FetchError`,
//!   which aborts batch assembly before validation

use super::batch::Batch;
use super::config::FetchConfig;
use super::error::{ConfigError, FetchError};
use super::types::Record;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Source of daily bars for one ticker.
///
/// An empty vector means "no data for this ticker", not an error.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_daily(&self, ticker: &str) -> Result<Vec<Record>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct DailyResponse {
    #[serde(rename = "Time Series (Daily)")]
    series: Option<BTreeMap<String, DailyBar>>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}

fn parse_field<T: std::str::FromStr>(ticker: &str, date: &str, field: &str, raw: &str) -> Result<T, FetchError> {
    raw.trim().parse().map_err(|_| FetchError::Source {
        ticker: ticker.to_string(),
        reason: format!("bad {} '{}' on {}", field, raw, date),
    })
}

fn parse_price(ticker: &str, date: &str, field: &str, raw: &str) -> Result<f64, FetchError> {
    let value: f64 = parse_field(ticker, date, field, raw)?;
    if !value.is_finite() {
        return Err(FetchError::Source {
            ticker: ticker.to_string(),
            reason: format!("non-finite {} '{}' on {}", field, raw, date),
        });
    }
    Ok(value)
}

/// Turn an Alpha Vantage daily-series body into records, oldest first.
pub fn parse_daily_series(ticker: &str, body: &str) -> Result<Vec<Record>, FetchError> {
    let response: DailyResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => {
            log::error!("JSON decode error for ticker {}: {}", ticker, e);
            return Ok(Vec::new());
        }
    };

    let Some(series) = response.series.filter(|s| !s.is_empty()) else {
        let detail = response
            .error_message
            .or(response.note)
            .or(response.information)
            .unwrap_or_else(|| "empty response".to_string());
        log::warn!("⚠️  No time series data found for ticker {}: {}", ticker, detail);
        return Ok(Vec::new());
    };

    series
        .iter()
        .map(|(date, bar)| {
            let parsed_date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| FetchError::Source {
                ticker: ticker.to_string(),
                reason: format!("bad date '{}'", date),
            })?;
            Ok(Record {
                date: parsed_date,
                ticker: ticker.to_string(),
                open: parse_price(ticker, date, "open", &bar.open)?,
                high: parse_price(ticker, date, "high", &bar.high)?,
                low: parse_price(ticker, date, "low", &bar.low)?,
                close: parse_price(ticker, date, "close", &bar.close)?,
                volume: parse_field(ticker, date, "volume", &bar.volume)?,
            })
        })
        .collect()
}

/// Alpha Vantage REST client.
pub struct AlphaVantageClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageClient {
    pub fn new(config: &FetchConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingVariable("ALPHA_VANTAGE_API_KEY".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl PriceSource for AlphaVantageClient {
    async fn fetch_daily(&self, ticker: &str) -> Result<Vec<Record>, FetchError> {
        log::info!("📡 Fetching data for ticker: {}", ticker);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", ticker),
                ("apikey", self.api_key.as_str()),
                ("outputsize", "compact"),
            ])
            .send()
            .await
            .map_err(|source| {
                log::error!("❌ Error fetching data for ticker {}: {}", ticker, source);
                FetchError::Transport {
                    ticker: ticker.to_string(),
                    source,
                }
            })?;

        if !response.status().is_success() {
            log::error!("HTTP error for ticker {}: {}", ticker, response.status());
            return Ok(Vec::new());
        }

        let body = response.text().await.map_err(|source| FetchError::Transport {
            ticker: ticker.to_string(),
            source,
        })?;

        let records = parse_daily_series(ticker, &body)?;
        if !records.is_empty() {
            log::info!("✅ Data for {} fetched successfully ({} bars)", ticker, records.len());
        }
        Ok(records)
    }
}

/// Fetch every ticker in order and stamp the result with one ingestion time.
///
/// Calls are sequential and spaced by `delay`; rows keep ticker order, not
/// completion order. The first hard failure aborts assembly.
pub async fn assemble_batch(
    source: &dyn PriceSource,
    tickers: &[String],
    delay: Duration,
) -> Result<Batch, FetchError> {
    let mut all_records = Vec::new();

    for (i, ticker) in tickers.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let records = source.fetch_daily(ticker).await?;
        all_records.extend(records);
    }

    log::info!(
        "Data fetching completed. Total records fetched: {} ({} tickers)",
        all_records.len(),
        tickers.len()
    );

    Ok(Batch::from_records(&all_records, Utc::now()))
}
