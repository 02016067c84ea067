//! Derived rolling-metrics table
//!
//! The aggregate table is disposable: every recompute drops it and rebuilds
//! it from the full primary table. There is no incremental path.
//!
//! Per ticker, in date order:
//! - `daily_return` = (close[t] - close[t-1]) / close[t-1], NULL on the
//!   first day (or when the prior close is zero)
//! - `avg_daily_price` = mean(open, high, low, close)
//! - `avg_return_7d` / `avg_return_10d`: trailing mean of `daily_return`
//! - `price_volatility_7d`: trailing sample stddev of `avg_daily_price`
//! - `return_volatility_7d` / `return_volatility_10d`: trailing sample
//!   stddev of `daily_return`
//!
//! Windows are row counts and shrink to the rows available at the start of
//! a ticker. NULLs are skipped. A mean needs one value and a sample stddev
//! needs two, so `return_volatility_*` stays NULL on a ticker's second row
//! even though its means are already set (same as SQL `stddev_samp`).
//!
//! Rows are materialized ticker ascending, date descending.

use super::db::{checked_identifier, SqliteStore};
use super::error::AggregationError;
use super::types::{AggregateRow, Record};
use super::windows::TrailingWindow;
use rusqlite::params;

pub const SHORT_WINDOW: usize = 7;
pub const LONG_WINDOW: usize = 10;

/// Compute the aggregate rows for `bars`, which may arrive in any order.
///
/// Pure function of its input: the same bars always yield the same rows in
/// the same order.
pub fn compute_aggregates(bars: &[Record]) -> Vec<AggregateRow> {
    let mut sorted: Vec<&Record> = bars.iter().collect();
    sorted.sort_by(|a, b| a.ticker.cmp(&b.ticker).then(a.date.cmp(&b.date)));

    let mut rows = Vec::with_capacity(sorted.len());

    for partition in sorted.chunk_by(|a, b| a.ticker == b.ticker) {
        let mut prev_close: Option<f64> = None;
        let mut returns_7 = TrailingWindow::new(SHORT_WINDOW);
        let mut returns_10 = TrailingWindow::new(LONG_WINDOW);
        let mut prices_7 = TrailingWindow::new(SHORT_WINDOW);

        let mut ticker_rows = Vec::with_capacity(partition.len());
        for bar in partition {
            let daily_return = prev_close
                .filter(|p| *p != 0.0)
                .map(|p| (bar.close - p) / p);
            let avg_daily_price = bar.avg_price();

            returns_7.push(daily_return);
            returns_10.push(daily_return);
            prices_7.push(Some(avg_daily_price));

            ticker_rows.push(AggregateRow {
                date: bar.date,
                ticker: bar.ticker.clone(),
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                daily_return,
                avg_daily_price,
                avg_return_7d: returns_7.mean(),
                avg_return_10d: returns_10.mean(),
                price_volatility_7d: prices_7.sample_std(),
                return_volatility_7d: returns_7.sample_std(),
                return_volatility_10d: returns_10.sample_std(),
            });

            prev_close = Some(bar.close);
        }

        ticker_rows.reverse();
        rows.extend(ticker_rows);
    }

    rows
}

/// Read every bar from the primary table, oldest first per ticker.
pub fn load_bars(store: &SqliteStore, source_table: &str) -> Result<Vec<Record>, AggregationError> {
    let source = checked_identifier(source_table)?;
    let mut stmt = store.conn().prepare(&format!(
        "SELECT date, ticker, open, high, low, close, volume FROM \"{}\" ORDER BY ticker ASC, date ASC",
        source
    ))?;

    let bars = stmt
        .query_map([], |row| {
            Ok(Record {
                date: row.get(0)?,
                ticker: row.get(1)?,
                open: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                close: row.get(5)?,
                volume: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(bars)
}

/// Drop and rebuild `table_name` from `source_table`.
///
/// Drop, create and fill happen in one transaction, so readers see either
/// the previous table or the complete new one. Returns the row count.
pub fn recompute_aggregate(
    store: &mut SqliteStore,
    source_table: &str,
    table_name: &str,
) -> Result<usize, AggregationError> {
    let table = checked_identifier(table_name)?;
    let bars = load_bars(store, source_table)?;
    let rows = compute_aggregates(&bars);

    let tx = store.conn_mut().transaction()?;
    tx.execute(&format!("DROP TABLE IF EXISTS \"{}\"", table), [])?;
    tx.execute(
        &format!(
            "CREATE TABLE \"{}\" (
                date DATE NOT NULL,
                ticker TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                daily_return REAL,
                avg_daily_price REAL NOT NULL,
                avg_return_7d REAL,
                avg_return_10d REAL,
                price_volatility_7d REAL,
                return_volatility_7d REAL,
                return_volatility_10d REAL,
                PRIMARY KEY (date, ticker)
            )",
            table
        ),
        [],
    )?;

    {
        let mut insert = tx.prepare(&format!(
            "INSERT INTO \"{}\" (
                date, ticker, open, high, low, close, volume,
                daily_return, avg_daily_price, avg_return_7d, avg_return_10d,
                price_volatility_7d, return_volatility_7d, return_volatility_10d
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            table
        ))?;

        for row in &rows {
            insert.execute(params![
                row.date,
                row.ticker,
                row.open,
                row.high,
                row.low,
                row.close,
                row.volume,
                row.daily_return,
                row.avg_daily_price,
                row.avg_return_7d,
                row.avg_return_10d,
                row.price_volatility_7d,
                row.return_volatility_7d,
                row.return_volatility_10d,
            ])?;
        }
    }

    tx.commit()?;

    log::info!("✅ Rebuilt '{}' from '{}': {} rows", table, source_table, rows.len());
    Ok(rows.len())
}

/// Read back the aggregate table in its materialized order.
pub fn load_aggregates(store: &SqliteStore, table_name: &str) -> Result<Vec<AggregateRow>, AggregationError> {
    let table = checked_identifier(table_name)?;
    let mut stmt = store.conn().prepare(&format!(
        "SELECT date, ticker, open, high, low, close, volume,
                daily_return, avg_daily_price, avg_return_7d, avg_return_10d,
                price_volatility_7d, return_volatility_7d, return_volatility_10d
         FROM \"{}\" ORDER BY ticker ASC, date DESC",
        table
    ))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(AggregateRow {
                date: row.get(0)?,
                ticker: row.get(1)?,
                open: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                close: row.get(5)?,
                volume: row.get(6)?,
                daily_return: row.get(7)?,
                avg_daily_price: row.get(8)?,
                avg_return_7d: row.get(9)?,
                avg_return_10d: row.get(10)?,
                price_volatility_7d: row.get(11)?,
                return_volatility_7d: row.get(12)?,
                return_volatility_10d: row.get(13)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}
