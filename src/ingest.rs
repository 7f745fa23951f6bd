// ABOUTME: CSV ingestion of cleaned exports into a typed Dataset
// ABOUTME: Column types come from the table spec, falling back to inference

use std::path::Path;

use rusqlite::types::Value;
use thiserror::Error;

use crate::config::TableSpec;
use crate::dataset::{Column, ColumnType, Dataset, DatasetError};
use crate::dates;

/// Error type returned by CSV ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    Parse {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Ingest a CSV export for the table described by `spec`.
///
/// - Headers define column order.
/// - Declared column types win; columns named like dates or listed in
///   `date_columns` are DateTime; anything else is inferred from the values.
/// - DateTime values are stored as `YYYY-MM-DD`.
pub fn ingest_csv_from_path(path: impl AsRef<Path>, spec: &TableSpec) -> IngestResult<Dataset> {
    let path = path.as_ref();
    tracing::info!("Reading {} for table '{}'", path.display(), spec.name);

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_path(path)?;
    ingest_csv_from_reader(&mut rdr, spec)
}

/// Ingest CSV data from an existing reader.
pub fn ingest_csv_from_reader<R: std::io::Read>(
    rdr: &mut csv::Reader<R>,
    spec: &TableSpec,
) -> IngestResult<Dataset> {
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();

    let mut records = Vec::new();
    for result in rdr.records() {
        records.push(result?);
    }

    let columns: Vec<Column> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let column_type = resolve_type(spec, name, || {
                records.iter().map(move |r| r.get(idx).unwrap_or(""))
            });
            Column::new(name.clone(), column_type)
        })
        .collect();

    let mut dataset = Dataset::new(columns.clone())?;

    for (row_idx0, record) in records.iter().enumerate() {
        // 1-based, plus the header line
        let user_row = row_idx0 + 2;
        let mut row = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            let raw = record.get(idx).unwrap_or("");
            row.push(parse_typed_value(user_row, column, raw)?);
        }
        dataset.push_row(row)?;
    }

    tracing::debug!(
        "Ingested {} rows, {} columns for '{}'",
        dataset.row_count(),
        dataset.columns().len(),
        spec.name
    );

    Ok(dataset)
}

fn resolve_type<'a, F, I>(spec: &TableSpec, name: &str, values: F) -> ColumnType
where
    F: FnOnce() -> I,
    I: Iterator<Item = &'a str>,
{
    if let Some(declared) = spec.columns.get(name) {
        return *declared;
    }
    if dates::is_date_column_name(name) || spec.date_columns.iter().any(|c| c == name) {
        return ColumnType::DateTime;
    }
    ColumnType::infer(values())
}

fn parse_typed_value(row: usize, column: &Column, raw: &str) -> IngestResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let parse_error = |message: String| IngestError::Parse {
        row,
        column: column.name.clone(),
        raw: raw.to_owned(),
        message,
    };

    match column.column_type {
        ColumnType::Text => Ok(Value::Text(trimmed.to_owned())),
        ColumnType::Integer => parse_integer(trimmed)
            .map(Value::Integer)
            .ok_or_else(|| parse_error("expected an integer".to_string())),
        ColumnType::Float => trimmed
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|e| parse_error(e.to_string())),
        ColumnType::DateTime => match dates::normalize(trimmed) {
            Ok(Some(date)) => Ok(Value::Text(date)),
            Ok(None) => Ok(Value::Null),
            Err(e) => Err(parse_error(e.to_string())),
        },
    }
}

/// Integers exported through a float column arrive as `1001.0`.
///
/// Whole floats outside the i64 range are rejected rather than saturated.
fn parse_integer(raw: &str) -> Option<i64> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(i);
    }
    // 2^63 is exactly representable; i64::MAX is not
    const UPPER: f64 = 9_223_372_036_854_775_808.0;
    match raw.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < UPPER => Some(f as i64),
        _ => None,
    }
}
