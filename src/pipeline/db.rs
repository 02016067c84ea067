//! Storage engine: connect-with-retry and change-data-capture upsert
//!
//! Load strategy for one batch:
//! 1. `LoadPlan::detect` asks the schema once whether the target exists.
//! 2. `NeedsCreation` creates the table from the batch schema and adds the
//!    `(date, ticker)` unique index. This happens once per table lifetime.
//! 3. The batch is written to `staging_<table>` (replacing any leftover).
//! 4. One `INSERT ... SELECT ... ON CONFLICT(date, ticker) DO UPDATE`
//!    merges staging into the target inside a transaction. Conflicting rows
//!    are only rewritten when a price, volume or timestamp field differs.
//! 5. The staging table is dropped.
//!
//! Table names are interpolated into SQL, so they must pass
//! `checked_identifier`; row values are always bound as parameters.

use super::batch::Batch;
use super::config::StoreConfig;
use super::error::{ConnectionError, StorageError};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Natural key of the primary table.
pub const KEY_COLUMNS: &[&str] = &["date", "ticker"];

/// Columns rewritten when an incoming row hits an existing key.
pub const UPDATE_COLUMNS: &[&str] = &["open", "high", "low", "close", "volume", "curr_timestamp"];

/// Every column the merge moves from staging into the target, in order.
pub const MERGE_COLUMNS: &[&str] = &[
    "date",
    "ticker",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "curr_timestamp",
];

/// Read-only view of the store's catalogue.
pub trait SchemaInspector {
    fn table_exists(&self, table: &str) -> Result<bool, StorageError>;
}

/// Runs single SQL statements with bound parameters.
pub trait StatementExecutor {
    /// Execute one statement; returns the number of rows changed.
    fn execute(&mut self, sql: &str, params: &[&dyn ToSql]) -> Result<usize, StorageError>;

    /// Run a query returning a single integer.
    fn query_i64(&mut self, sql: &str) -> Result<i64, StorageError>;
}

/// What `upsert_batch` has to do before it can merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPlan {
    NeedsCreation,
    NeedsMerge,
}

impl LoadPlan {
    pub fn detect<I>(inspector: &I, table: &str) -> Result<Self, StorageError>
    where
        I: SchemaInspector + ?Sized,
    {
        if inspector.table_exists(table)? {
            Ok(LoadPlan::NeedsMerge)
        } else {
            Ok(LoadPlan::NeedsCreation)
        }
    }
}

/// Row accounting for one merge.
///
/// `updated` only counts rows whose values actually changed, so an
/// identical re-ingest reports `updated == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub staged: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// A single open connection to the SQLite store.
///
/// Dropping it closes the connection.
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Open the database file and probe it.
    ///
    /// The parent directory must already exist; a missing directory is an
    /// unreachable store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl SchemaInspector for SqliteStore {
    fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        Ok(stmt.exists([table])?)
    }
}

impl StatementExecutor for SqliteStore {
    fn execute(&mut self, sql: &str, params: &[&dyn ToSql]) -> Result<usize, StorageError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params)?)
    }

    fn query_i64(&mut self, sql: &str) -> Result<i64, StorageError> {
        Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
    }
}

/// Open a connection, retrying on failure.
///
/// Makes at most `config.max_retries` attempts (at least one), sleeping
/// `config.retry_interval` between them. Every attempt is logged.
pub async fn connect(config: &StoreConfig) -> Result<SqliteStore, ConnectionError> {
    let path = config.db_path();
    let max_attempts = config.max_retries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match SqliteStore::open(&path) {
            Ok(store) => {
                log::info!(
                    "✅ Connected to {} (attempt {}/{})",
                    path.display(),
                    attempt,
                    max_attempts
                );
                return Ok(store);
            }
            Err(e) => {
                log::warn!(
                    "⚠️  Connection attempt {}/{} to {} failed: {}",
                    attempt,
                    max_attempts,
                    path.display(),
                    e
                );

                if attempt >= max_attempts {
                    log::error!("❌ Max retry attempts reached, giving up on {}", path.display());
                    return Err(ConnectionError {
                        target: path.display().to_string(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }

                tokio::time::sleep(config.retry_interval).await;
            }
        }
    }
}

/// Accept only plain lower-case SQL identifiers (`[a-z_][a-z0-9_]*`).
pub fn checked_identifier(name: &str) -> Result<&str, StorageError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63;

    if valid {
        Ok(name)
    } else {
        Err(StorageError::InvalidTableName(name.to_string()))
    }
}

pub fn staging_table_name(table: &str) -> String {
    format!("staging_{}", table)
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Lower-cased column names of the batch, in batch order.
fn normalized_columns(batch: &Batch) -> Vec<String> {
    batch
        .columns()
        .iter()
        .map(|c| c.name().to_lowercase())
        .collect()
}

/// `CREATE TABLE` for `table` with the batch's (lower-cased) columns.
pub fn create_table_sql(table: &str, batch: &Batch) -> String {
    let defs = batch
        .columns()
        .iter()
        .map(|c| format!("\"{}\" {}", c.name().to_lowercase(), c.data_type().sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE \"{}\" ({})", table, defs)
}

pub fn unique_index_sql(table: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS \"uq_{}_date_ticker\" ON \"{}\" ({})",
        table,
        table,
        KEY_COLUMNS
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Number of distinct staged keys not yet present in `table`.
pub fn new_keys_sql(table: &str, staging: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM (
            SELECT DISTINCT s.\"date\", s.\"ticker\" FROM \"{staging}\" s
            WHERE NOT EXISTS (
                SELECT 1 FROM \"{table}\" t
                WHERE t.\"date\" = s.\"date\" AND t.\"ticker\" = s.\"ticker\"
            )
        )",
        table = table,
        staging = staging,
    )
}

/// The conflict-aware merge from staging into `table`.
///
/// Staging rows are read in insertion order, so when a batch carries the
/// same key twice the later row wins.
pub fn merge_sql(table: &str, staging: &str) -> String {
    let cols = MERGE_COLUMNS
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    let keys = KEY_COLUMNS
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    let assignments = UPDATE_COLUMNS
        .iter()
        .map(|c| format!("\"{c}\" = excluded.\"{c}\"", c = c))
        .collect::<Vec<_>>()
        .join(", ");
    let changed = UPDATE_COLUMNS
        .iter()
        .map(|c| format!("\"{t}\".\"{c}\" IS NOT excluded.\"{c}\"", t = table, c = c))
        .collect::<Vec<_>>()
        .join(" OR ");

    format!(
        "INSERT INTO \"{table}\" ({cols})
         SELECT {cols} FROM \"{staging}\" WHERE true ORDER BY rowid
         ON CONFLICT({keys}) DO UPDATE SET {assignments}
         WHERE {changed}",
        table = table,
        cols = cols,
        staging = staging,
        keys = keys,
        assignments = assignments,
        changed = changed,
    )
}

/// Merge `batch` into `table_name`, creating the table on first use.
///
/// Errors from any step are returned to the caller; nothing is swallowed.
/// Rows merged before a failing statement may persist only if that
/// statement ran outside the merge transaction (table creation, staging).
pub fn upsert_batch<S>(
    store: &mut S,
    batch: &Batch,
    table_name: &str,
) -> Result<MergeOutcome, StorageError>
where
    S: SchemaInspector + StatementExecutor + ?Sized,
{
    let table = checked_identifier(table_name)?;
    let staging = staging_table_name(table);
    checked_identifier(&staging)?;

    for required in MERGE_COLUMNS {
        if batch.column_ci(required).is_none() {
            return Err(StorageError::MissingColumn(required.to_string()));
        }
    }
    if batch.is_ragged() {
        return Err(StorageError::Merge {
            table: table.to_string(),
            reason: "batch columns have unequal lengths".to_string(),
        });
    }

    match LoadPlan::detect(store, table)? {
        LoadPlan::NeedsCreation => {
            log::info!("🔧 Table '{}' not found, creating from batch schema", table);
            store.execute(&create_table_sql(table, batch), &[])?;
            store.execute(&unique_index_sql(table), &[])?;
            log::info!("   └─ ✅ Created '{}' with unique (date, ticker)", table);
        }
        LoadPlan::NeedsMerge => {
            log::debug!("Table '{}' exists, merging through staging", table);
        }
    }

    stage_batch(store, &staging, batch)?;

    match merge_staged(store, table, &staging, batch.len()) {
        Ok(outcome) => {
            store.execute(&format!("DROP TABLE IF EXISTS \"{}\"", staging), &[])?;
            log::info!(
                "✅ Merged {} staged rows into '{}': {} inserted, {} updated, {} unchanged",
                outcome.staged,
                table,
                outcome.inserted,
                outcome.updated,
                outcome.unchanged
            );
            Ok(outcome)
        }
        Err(e) => {
            log::error!("❌ Merge into '{}' failed: {}", table, e);
            if let Err(drop_err) = store.execute(&format!("DROP TABLE IF EXISTS \"{}\"", staging), &[]) {
                log::warn!("⚠️  Could not drop staging table '{}': {}", staging, drop_err);
            }
            Err(e)
        }
    }
}

/// Replace `staging` with a fresh table holding exactly `batch`.
fn stage_batch<S>(store: &mut S, staging: &str, batch: &Batch) -> Result<(), StorageError>
where
    S: StatementExecutor + ?Sized,
{
    store.execute(&format!("DROP TABLE IF EXISTS \"{}\"", staging), &[])?;
    store.execute(&create_table_sql(staging, batch), &[])?;

    let columns = normalized_columns(batch);
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let insert = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        staging,
        column_list(&columns),
        placeholders
    );

    store.execute("BEGIN", &[])?;
    for row in 0..batch.len() {
        let params: Vec<&dyn ToSql> = batch
            .columns()
            .iter()
            .map(|c| &c.values()[row] as &dyn ToSql)
            .collect();
        if let Err(e) = store.execute(&insert, &params) {
            let _ = store.execute("ROLLBACK", &[]);
            return Err(e);
        }
    }
    store.execute("COMMIT", &[])?;

    log::debug!("Staged {} rows into '{}'", batch.len(), staging);
    Ok(())
}

fn merge_staged<S>(
    store: &mut S,
    table: &str,
    staging: &str,
    staged: usize,
) -> Result<MergeOutcome, StorageError>
where
    S: StatementExecutor + ?Sized,
{
    store.execute("BEGIN IMMEDIATE", &[])?;

    let result = store
        .query_i64(&new_keys_sql(table, staging))
        .and_then(|new_keys| {
            let changed = store.execute(&merge_sql(table, staging), &[])?;
            Ok((new_keys.max(0) as usize, changed))
        })
        .and_then(|counts| {
            store.execute("COMMIT", &[])?;
            Ok(counts)
        });

    match result {
        Ok((inserted, changed)) => {
            let updated = changed.saturating_sub(inserted);
            Ok(MergeOutcome {
                staged,
                inserted,
                updated,
                unchanged: staged.saturating_sub(inserted + updated),
            })
        }
        Err(e) => {
            let _ = store.execute("ROLLBACK", &[]);
            Err(StorageError::Merge {
                table: table.to_string(),
                reason: e.to_string(),
            })
        }
    }
}
