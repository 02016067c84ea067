//! Core row types shared by fetch, storage and aggregation

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily OHLCV bar for one ticker, as delivered by the price source.
///
/// `(date, ticker)` is the natural key of the primary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Record {
    /// Unweighted mean of open/high/low/close.
    pub fn avg_price(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }
}

/// One row of the derived metrics table.
///
/// Figures that need a prior close (or more samples than the partition
/// holds so far) are `None` and persist as NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub daily_return: Option<f64>,
    pub avg_daily_price: f64,
    pub avg_return_7d: Option<f64>,
    pub avg_return_10d: Option<f64>,
    pub price_volatility_7d: Option<f64>,
    pub return_volatility_7d: Option<f64>,
    pub return_volatility_10d: Option<f64>,
}
