//! Columnar ingestion batch
//!
//! A batch is a small table: named columns, each with a declared data type
//! and one `Value` per row. The validator inspects it before anything
//! touches storage, and the storage engine binds its values directly into
//! staging inserts.

use super::types::Record;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{ToSql, ToSqlOutput};
use std::fmt;

/// Column holding the shared ingestion wall-clock time.
pub const TIMESTAMP_COLUMN: &str = "curr_timestamp";

/// Fixed schema of a fetched batch, in column order.
pub const RAW_SCHEMA: &[(&str, DataType)] = &[
    ("Date", DataType::Date),
    ("Ticker", DataType::String),
    ("Open", DataType::Float),
    ("High", DataType::Float),
    ("Low", DataType::Float),
    ("Close", DataType::Float),
    ("Volume", DataType::Integer),
    (TIMESTAMP_COLUMN, DataType::Timestamp),
];

/// Runtime data type of a column.
///
/// `Object` is never declared; it is what a column reports when its values
/// disagree with the declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Date,
    String,
    Float,
    Integer,
    Timestamp,
    Object,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Date => "date",
            DataType::String => "string",
            DataType::Float => "float",
            DataType::Integer => "integer",
            DataType::Timestamp => "timestamp",
            DataType::Object => "object",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Float | DataType::Integer)
    }

    /// Column type used when a table is created from a batch schema.
    pub fn sql_type(&self) -> &'static str {
        match self {
            DataType::Date => "DATE",
            DataType::String => "TEXT",
            DataType::Float => "REAL",
            DataType::Integer => "INTEGER",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Object => "BLOB",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Date(NaiveDate),
    String(String),
    Float(f64),
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, or a float that is NaN or infinite. SQLite binds NaN as NULL,
    /// so these count as missing too.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(v) => !v.is_finite(),
            _ => false,
        }
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Date(_) => Some(DataType::Date),
            Value::String(_) => Some(DataType::String),
            Value::Float(_) => Some(DataType::Float),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Null => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Null)),
            Value::Date(d) => d.to_sql(),
            Value::String(s) => s.to_sql(),
            Value::Float(v) => v.to_sql(),
            Value::Integer(v) => v.to_sql(),
            Value::Timestamp(ts) => ts.to_sql(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    dtype: DataType,
    values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: DataType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Declared type, or `Object` when any non-null value disagrees with it.
    pub fn data_type(&self) -> DataType {
        let conforms = self
            .values
            .iter()
            .all(|v| v.data_type().map_or(true, |t| t == self.dtype));
        if conforms {
            self.dtype
        } else {
            DataType::Object
        }
    }
}

/// Ordered rows of one ingestion run, stored column-wise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    columns: Vec<Column>,
}

impl Batch {
    /// Build a batch from columns. All columns are expected to have the same
    /// length; the shortest one bounds `len()`.
    pub fn from_columns(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Assemble fetched records into a batch, stamping every row with the
    /// same ingestion time. Row order is record order.
    pub fn from_records(records: &[Record], curr_timestamp: DateTime<Utc>) -> Self {
        let mut date = Vec::with_capacity(records.len());
        let mut ticker = Vec::with_capacity(records.len());
        let mut open = Vec::with_capacity(records.len());
        let mut high = Vec::with_capacity(records.len());
        let mut low = Vec::with_capacity(records.len());
        let mut close = Vec::with_capacity(records.len());
        let mut volume = Vec::with_capacity(records.len());

        for r in records {
            date.push(Value::Date(r.date));
            ticker.push(Value::String(r.ticker.clone()));
            open.push(Value::Float(r.open));
            high.push(Value::Float(r.high));
            low.push(Value::Float(r.low));
            close.push(Value::Float(r.close));
            volume.push(Value::Integer(r.volume));
        }

        let stamps = vec![Value::Timestamp(curr_timestamp); records.len()];

        let data = [date, ticker, open, high, low, close, volume, stamps];
        let columns = RAW_SCHEMA
            .iter()
            .zip(data)
            .map(|((name, dtype), values)| Column::new(*name, *dtype, values))
            .collect();

        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Exact-name lookup.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Case-insensitive lookup, used once names have been normalised.
    pub fn column_ci(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.values.len())
            .min()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when columns disagree on length. `len()` would then silently
    /// drop the tail of the longer columns.
    pub fn is_ragged(&self) -> bool {
        let mut lengths = self.columns.iter().map(|c| c.values.len());
        match lengths.next() {
            Some(first) => lengths.any(|n| n != first),
            None => false,
        }
    }

    /// Drop a column; used by tests to build malformed batches.
    pub fn without_column(mut self, name: &str) -> Self {
        self.columns.retain(|c| c.name != name);
        self
    }

    /// Replace (or append) a column.
    pub fn with_column(mut self, column: Column) -> Self {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        self
    }
}
