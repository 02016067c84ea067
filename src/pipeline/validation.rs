//! Batch shape checks
//!
//! All checks run on every call and their messages accumulate; a batch is
//! valid only when no check produced a message. Validation never touches
//! storage.

use super::batch::{Batch, RAW_SCHEMA};
use super::error::ValidationError;

/// Outcome of validating one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.ok {
            Ok(())
        } else {
            Err(ValidationError { errors: self.errors })
        }
    }
}

/// Check `batch` against the fixed raw schema.
///
/// Checks, in reporting order:
/// 1. every schema column is present (one message listing all missing ones)
/// 2. no missing cell anywhere in the batch: nulls, NaN or infinite
///    floats, and columns shorter than the longest one
/// 3. no negative value in any numeric column (one message per column)
/// 4. each present column has its declared type (one message per column)
pub fn validate(batch: &Batch) -> ValidationReport {
    let mut errors = Vec::new();

    let missing: Vec<&str> = RAW_SCHEMA
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| batch.column(name).is_none())
        .collect();
    if !missing.is_empty() {
        errors.push(format!("Missing required columns: {}", missing.join(", ")));
    }

    let has_missing = batch.is_ragged()
        || batch
            .columns()
            .iter()
            .any(|c| c.values().iter().any(|v| v.is_missing()));
    if has_missing {
        errors.push("Data contains missing values.".to_string());
    }

    for (name, dtype) in RAW_SCHEMA.iter().filter(|(_, t)| t.is_numeric()) {
        let Some(column) = batch.column(name) else {
            continue;
        };
        let negative = column
            .values()
            .iter()
            .filter_map(|v| v.as_f64())
            .any(|v| v < 0.0);
        if negative {
            log::debug!("negative values in {} column '{}'", dtype, name);
            errors.push(format!("Column '{}' contains negative values.", name));
        }
    }

    for (name, expected) in RAW_SCHEMA {
        if let Some(column) = batch.column(name) {
            let actual = column.data_type();
            if actual != *expected {
                errors.push(format!(
                    "Column '{}' has incorrect data type. Expected: {}, Found: {}",
                    name, expected, actual
                ));
            }
        }
    }

    ValidationReport {
        ok: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::{Column, DataType, Value};
    use crate::pipeline::types::Record;
    use chrono::{NaiveDate, Utc};

    fn sample_batch() -> Batch {
        let records = vec![
            Record {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                ticker: "AAPL".to_string(),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 1000,
            },
            Record {
                date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                ticker: "AAPL".to_string(),
                open: 100.5,
                high: 102.0,
                low: 100.0,
                close: 101.5,
                volume: 1200,
            },
        ];
        Batch::from_records(&records, Utc::now())
    }

    #[test]
    fn test_valid_batch_passes() {
        let report = validate(&sample_batch());
        assert!(report.ok);
        assert!(report.errors.is_empty());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_missing_columns_reported_together() {
        let batch = sample_batch().without_column("Open").without_column("Volume");
        let report = validate(&batch);

        assert!(!report.ok);
        assert_eq!(report.errors, vec!["Missing required columns: Open, Volume".to_string()]);
    }

    #[test]
    fn test_negative_values_reported_once_per_column() {
        let batch = sample_batch()
            .with_column(Column::new(
                "Low",
                DataType::Float,
                vec![Value::Float(-1.0), Value::Float(-2.0)],
            ))
            .with_column(Column::new(
                "Volume",
                DataType::Integer,
                vec![Value::Integer(5), Value::Integer(-5)],
            ));
        let report = validate(&batch);

        assert!(!report.ok);
        assert_eq!(
            report.errors,
            vec![
                "Column 'Low' contains negative values.".to_string(),
                "Column 'Volume' contains negative values.".to_string(),
            ]
        );
    }

    #[test]
    fn test_nulls_detected() {
        let batch = sample_batch().with_column(Column::new(
            "Close",
            DataType::Float,
            vec![Value::Float(1.0), Value::Null],
        ));
        let report = validate(&batch);

        assert!(!report.ok);
        assert_eq!(report.errors, vec!["Data contains missing values.".to_string()]);
    }

    #[test]
    fn test_nan_and_infinite_prices_are_missing() {
        for bad in [f64::NAN, f64::INFINITY] {
            let batch = sample_batch().with_column(Column::new(
                "Close",
                DataType::Float,
                vec![Value::Float(100.5), Value::Float(bad)],
            ));
            let report = validate(&batch);

            assert!(!report.ok);
            assert_eq!(report.errors, vec!["Data contains missing values.".to_string()]);
        }
    }

    #[test]
    fn test_short_column_is_missing_values() {
        let batch = sample_batch().with_column(Column::new(
            "Close",
            DataType::Float,
            vec![Value::Float(100.5)],
        ));
        let report = validate(&batch);

        assert!(!report.ok);
        assert_eq!(report.errors, vec!["Data contains missing values.".to_string()]);
    }

    #[test]
    fn test_type_mismatch_reports_expected_and_found() {
        let batch = sample_batch().with_column(Column::new(
            "Volume",
            DataType::Float,
            vec![Value::Float(1000.0), Value::Float(1200.0)],
        ));
        let report = validate(&batch);

        assert!(!report.ok);
        assert_eq!(
            report.errors,
            vec!["Column 'Volume' has incorrect data type. Expected: integer, Found: float".to_string()]
        );
    }

    #[test]
    fn test_checks_do_not_short_circuit() {
        let batch = sample_batch()
            .without_column("Ticker")
            .with_column(Column::new(
                "Open",
                DataType::Float,
                vec![Value::Float(-3.0), Value::Null],
            ))
            .with_column(Column::new(
                "High",
                DataType::String,
                vec![Value::String("x".into()), Value::String("y".into())],
            ));
        let report = validate(&batch);

        assert!(!report.ok);
        assert_eq!(report.errors.len(), 4);
        assert_eq!(report.errors[0], "Missing required columns: Ticker");
        assert_eq!(report.errors[1], "Data contains missing values.");
        assert_eq!(report.errors[2], "Column 'Open' contains negative values.");
        assert_eq!(
            report.errors[3],
            "Column 'High' has incorrect data type. Expected: float, Found: string"
        );

        let err = report.into_result().unwrap_err();
        assert_eq!(err.errors.len(), 4);
    }
}
