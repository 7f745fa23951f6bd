// ABOUTME: In-memory typed Dataset: one batch of cleaned rows awaiting load
// ABOUTME: Columns carry explicit types; rows are validated on push

use std::collections::HashMap;
use std::fmt;

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dates;

/// Errors raised while building a [`Dataset`].
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("invalid column name: {0}")]
    InvalidColumn(String),

    #[error("row has {got} values but the dataset has {expected} columns")]
    RowWidth { expected: usize, got: usize },

    #[error("column '{column}' is {expected} but got {got}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        got: &'static str,
    },

    #[error("column '{column}' holds an unparseable date: {message}")]
    BadDate { column: String, message: String },

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("row {row} has no value for key column '{column}'")]
    NullKey { column: String, row: usize },
}

/// Declared storage type of a dataset column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "real")]
    Float,
    Text,
    #[serde(alias = "date")]
    DateTime,
}

impl ColumnType {
    /// SQLite column type used in `CREATE TABLE`.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Text => "TEXT",
            ColumnType::DateTime => "DATETIME",
        }
    }

    /// Infer a type from raw text values.
    ///
    /// Empty cells are ignored. A column with no non-empty values is Text,
    /// never a numeric type, so it cannot clash with later updates.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a str>) -> ColumnType {
        let mut seen = false;
        let mut all_int = true;
        let mut all_float = true;
        let mut all_date = true;

        for raw in values {
            let raw = raw.trim();
            if dates::is_missing(raw) {
                continue;
            }
            seen = true;
            all_int &= raw.parse::<i64>().is_ok();
            all_float &= raw.parse::<f64>().is_ok();
            all_date &= dates::parse_datetime(raw).is_ok();
            if !all_int && !all_float && !all_date {
                break;
            }
        }

        match (seen, all_int, all_float, all_date) {
            (false, ..) => ColumnType::Text,
            (true, true, _, _) => ColumnType::Integer,
            (true, false, true, _) => ColumnType::Float,
            (true, false, false, true) => ColumnType::DateTime,
            _ => ColumnType::Text,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Hashable identity of a cell, used for key and membership comparisons.
///
/// Whole-valued floats compare equal to the matching integer, as they do in
/// SQLite. Text is never reinterpreted: `"007"` and `"7"` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellKey {
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellKey {
    /// Returns `None` for NULL, which never matches anything.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Integer(i) => Some(CellKey::Integer(*i)),
            Value::Real(f) => {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Some(CellKey::Integer(*f as i64))
                } else {
                    Some(CellKey::Real(f.to_bits()))
                }
            }
            Value::Text(s) => Some(CellKey::Text(s.clone())),
            Value::Blob(b) => Some(CellKey::Blob(b.clone())),
        }
    }
}

/// How values are compared against a stored column.
///
/// SQLite converts integer-looking text to an integer when storing it in a
/// column with INTEGER affinity, so a text `"1001"` matches a stored `1001`
/// there. Every other column compares values as they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAffinity {
    Exact,
    Integer,
}

impl KeyAffinity {
    /// Affinity of a column from its declared SQL type.
    pub fn from_declared_type(declared: &str) -> Self {
        if declared.to_ascii_uppercase().contains("INT") {
            KeyAffinity::Integer
        } else {
            KeyAffinity::Exact
        }
    }

    pub fn key(&self, value: &Value) -> Option<CellKey> {
        match (self, value) {
            (KeyAffinity::Integer, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Some(CellKey::Integer(i)),
                Err(_) => CellKey::from_value(value),
            },
            _ => CellKey::from_value(value),
        }
    }
}

/// One batch of rows for a single target table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Create an empty dataset with the given columns.
    pub fn new(columns: Vec<Column>) -> Result<Self, DatasetError> {
        let mut seen = HashMap::new();
        for (idx, column) in columns.iter().enumerate() {
            crate::utils::validate_identifier(&column.name)
                .map_err(|e| DatasetError::InvalidColumn(e.to_string()))?;
            if seen.insert(column.name.clone(), idx).is_some() {
                return Err(DatasetError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Indexes of the named columns, in the order given.
    pub fn column_indexes(&self, names: &[String]) -> Result<Vec<usize>, DatasetError> {
        names
            .iter()
            .map(|n| {
                self.column_index(n)
                    .ok_or_else(|| DatasetError::UnknownColumn(n.clone()))
            })
            .collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row after checking it against the declared column types.
    ///
    /// Integers pushed into Float columns are widened. DateTime cells must be
    /// text in a recognized date format and are stored normalized.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), DatasetError> {
        if row.len() != self.columns.len() {
            return Err(DatasetError::RowWidth {
                expected: self.columns.len(),
                got: row.len(),
            });
        }

        let mut checked = Vec::with_capacity(row.len());
        for (column, value) in self.columns.iter().zip(row) {
            checked.push(coerce(column, value)?);
        }
        self.rows.push(checked);
        Ok(())
    }

    /// Keep only rows for which `keep` returns true; returns how many were dropped.
    pub fn retain_rows<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&[Value]) -> bool,
    {
        let before = self.rows.len();
        self.rows.retain(|row| keep(row.as_slice()));
        before - self.rows.len()
    }

    /// Drop rows sharing a key with a later row, keeping the last occurrence.
    ///
    /// Surviving rows keep their relative order. Returns how many were removed.
    /// A NULL in any key column is an error: NULL never equals itself, so
    /// such a row could never be matched by a later merge.
    pub fn dedup_by_key_keep_last(&mut self, key_columns: &[String]) -> Result<usize, DatasetError> {
        let idxs = self.column_indexes(key_columns)?;

        for (row_idx, row) in self.rows.iter().enumerate() {
            if let Some(&i) = idxs.iter().find(|&&i| row[i] == Value::Null) {
                return Err(DatasetError::NullKey {
                    column: self.columns[i].name.clone(),
                    row: row_idx + 1,
                });
            }
        }

        let mut last_seen: HashMap<Vec<Option<CellKey>>, usize> = HashMap::new();
        for (row_idx, row) in self.rows.iter().enumerate() {
            let key = idxs.iter().map(|&i| CellKey::from_value(&row[i])).collect();
            last_seen.insert(key, row_idx);
        }

        let before = self.rows.len();
        let mut row_idx = 0;
        self.rows.retain(|row| {
            let key: Vec<Option<CellKey>> =
                idxs.iter().map(|&i| CellKey::from_value(&row[i])).collect();
            let keep = last_seen.get(&key) == Some(&row_idx);
            row_idx += 1;
            keep
        });
        Ok(before - self.rows.len())
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "NULL",
        Value::Integer(_) => "integer",
        Value::Real(_) => "float",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}

fn coerce(column: &Column, value: Value) -> Result<Value, DatasetError> {
    let mismatch = |value: &Value| DatasetError::TypeMismatch {
        column: column.name.clone(),
        expected: column.column_type,
        got: value_kind(value),
    };

    match (column.column_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (ColumnType::Integer, v @ Value::Integer(_)) => Ok(v),
        (ColumnType::Float, v @ Value::Real(_)) => Ok(v),
        (ColumnType::Float, Value::Integer(i)) => Ok(Value::Real(i as f64)),
        (ColumnType::Text, v @ Value::Text(_)) => Ok(v),
        (ColumnType::DateTime, Value::Text(s)) => match dates::normalize(&s) {
            Ok(Some(text)) => Ok(Value::Text(text)),
            Ok(None) => Ok(Value::Null),
            Err(e) => Err(DatasetError::BadDate {
                column: column.name.clone(),
                message: e.to_string(),
            }),
        },
        (_, v) => Err(mismatch(&v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teams_dataset() -> Dataset {
        Dataset::new(vec![
            Column::new("member_id", ColumnType::Integer),
            Column::new("team", ColumnType::Text),
            Column::new("start_date", ColumnType::DateTime),
        ])
        .unwrap()
    }

    #[test]
    fn test_sql_type_mapping() {
        assert_eq!(ColumnType::Float.sql_type(), "FLOAT");
        assert_eq!(ColumnType::Integer.sql_type(), "INTEGER");
        assert_eq!(ColumnType::DateTime.sql_type(), "DATETIME");
        assert_eq!(ColumnType::Text.sql_type(), "TEXT");
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = Dataset::new(vec![
            Column::new("member_id", ColumnType::Integer),
            Column::new("member_id", ColumnType::Text),
        ])
        .unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateColumn(name) if name == "member_id"));
    }

    #[test]
    fn test_push_row_normalizes_dates() {
        let mut ds = teams_dataset();
        ds.push_row(vec![
            Value::Integer(1),
            Value::Text("North".into()),
            Value::Text("01/15/2022".into()),
        ])
        .unwrap();
        assert_eq!(ds.rows()[0][2], Value::Text("2022-01-15".into()));
    }

    #[test]
    fn test_push_row_drops_time_of_day() {
        let mut ds = teams_dataset();
        ds.push_row(vec![
            Value::Integer(1),
            Value::Text("North".into()),
            Value::Text("2022-01-15 09:30:00".into()),
        ])
        .unwrap();
        assert_eq!(ds.rows()[0][2], Value::Text("2022-01-15".into()));
    }

    #[test]
    fn test_push_row_type_mismatch() {
        let mut ds = teams_dataset();
        let err = ds
            .push_row(vec![
                Value::Text("abc".into()),
                Value::Text("North".into()),
                Value::Null,
            ])
            .unwrap_err();
        assert!(matches!(err, DatasetError::TypeMismatch { ref column, .. } if column == "member_id"));
    }

    #[test]
    fn test_push_row_width() {
        let mut ds = teams_dataset();
        let err = ds.push_row(vec![Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, DatasetError::RowWidth { expected: 3, got: 1 }));
    }

    #[test]
    fn test_float_column_widens_integers() {
        let mut ds = Dataset::new(vec![Column::new("amount", ColumnType::Float)]).unwrap();
        ds.push_row(vec![Value::Integer(3)]).unwrap();
        assert_eq!(ds.rows()[0][0], Value::Real(3.0));
    }

    #[test]
    fn test_dedup_keeps_last() {
        let mut ds = teams_dataset();
        for (id, team) in [(1, "North"), (2, "South"), (1, "East")] {
            ds.push_row(vec![
                Value::Integer(id),
                Value::Text(team.into()),
                Value::Text("2022-01-01".into()),
            ])
            .unwrap();
        }

        let removed = ds
            .dedup_by_key_keep_last(&["member_id".to_string(), "start_date".to_string()])
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.rows()[0][1], Value::Text("South".into()));
        assert_eq!(ds.rows()[1][1], Value::Text("East".into()));
    }

    #[test]
    fn test_dedup_keeps_numeric_looking_text_keys_apart() {
        let mut ds = Dataset::new(vec![
            Column::new("code", ColumnType::Text),
            Column::new("sub", ColumnType::Text),
        ])
        .unwrap();
        for code in ["007", "7", "+7"] {
            ds.push_row(vec![Value::Text(code.into()), Value::Text("a".into())])
                .unwrap();
        }

        let removed = ds
            .dedup_by_key_keep_last(&["code".to_string(), "sub".to_string()])
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(ds.row_count(), 3);
    }

    #[test]
    fn test_dedup_rejects_null_key() {
        let mut ds = teams_dataset();
        ds.push_row(vec![
            Value::Integer(1),
            Value::Text("North".into()),
            Value::Text("2022-01-01".into()),
        ])
        .unwrap();
        ds.push_row(vec![Value::Integer(2), Value::Null, Value::Text("2022-01-01".into())])
            .unwrap();

        let err = ds
            .dedup_by_key_keep_last(&["member_id".to_string(), "team".to_string()])
            .unwrap_err();
        assert!(matches!(err, DatasetError::NullKey { ref column, row: 2 } if column == "team"));
    }

    #[test]
    fn test_infer_column_type() {
        assert_eq!(ColumnType::infer(["1", "2", ""]), ColumnType::Integer);
        assert_eq!(ColumnType::infer(["1.5", "2"]), ColumnType::Float);
        assert_eq!(ColumnType::infer(["2021-01-01", "NaT"]), ColumnType::DateTime);
        assert_eq!(ColumnType::infer(["abc", "1"]), ColumnType::Text);
        // all-empty columns never infer as numeric
        assert_eq!(ColumnType::infer(["", "  "]), ColumnType::Text);
    }

    #[test]
    fn test_cell_key_float_matches_integer() {
        assert_eq!(
            CellKey::from_value(&Value::Real(1001.0)),
            CellKey::from_value(&Value::Integer(1001))
        );
        assert_eq!(CellKey::from_value(&Value::Null), None);
    }

    #[test]
    fn test_integer_affinity_only_coerces_for_integer_columns() {
        let seven = Value::Text("007".into());
        assert_eq!(KeyAffinity::from_declared_type("INTEGER"), KeyAffinity::Integer);
        assert_eq!(KeyAffinity::from_declared_type("TEXT"), KeyAffinity::Exact);

        assert_eq!(KeyAffinity::Integer.key(&seven), Some(CellKey::Integer(7)));
        assert_eq!(KeyAffinity::Exact.key(&seven), Some(CellKey::Text("007".into())));
        assert_eq!(
            KeyAffinity::Integer.key(&Value::Text("North".into())),
            Some(CellKey::Text("North".into()))
        );
    }
}
