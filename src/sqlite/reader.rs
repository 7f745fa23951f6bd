// ABOUTME: SQLite introspection and data reading for the warehouse database
// ABOUTME: Lists tables, reads back declared keys and columns, reads rows

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};

use crate::dataset::{CellKey, KeyAffinity};
use crate::utils::{quote_ident, validate_identifier, validate_table_name};

/// List all user tables in the database, sorted by name.
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    tracing::debug!("Listing tables from SQLite database");

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type='table' \
             AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .context("Failed to prepare statement to list tables")?;

    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("Failed to query table list")?
        .collect::<Result<Vec<String>, _>>()
        .context("Failed to collect table names")?;

    Ok(tables)
}

/// Whether a table exists in the main schema.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to check whether table '{}' exists", table))?;

    Ok(found.is_some())
}

/// Get row count for a specific table
///
/// # Security
///
/// The table name is validated before it is interpolated.
pub fn get_table_row_count(conn: &Connection, table: &str) -> Result<usize> {
    validate_table_name(table).context("Invalid table name for row count query")?;

    tracing::debug!("Getting row count for table '{}'", table);

    let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table));

    let count: i64 = conn
        .query_row(&query, [], |row| row.get(0))
        .with_context(|| format!("Failed to count rows in table '{}'", table))?;

    Ok(count as usize)
}

/// Column metadata read back from `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    /// 1-based position in the primary key, 0 when not part of it.
    pub pk_position: usize,
}

/// Columns of a table in declaration order.
pub fn get_table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    validate_table_name(table).context("Invalid table name for column lookup")?;

    let query = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn
        .prepare(&query)
        .with_context(|| format!("Failed to prepare column lookup for '{}'", table))?;

    let columns = stmt
        .query_map([], |row| {
            let pk: i64 = row.get(5)?;
            Ok(ColumnInfo {
                name: row.get(1)?,
                declared_type: row.get(2)?,
                pk_position: pk.max(0) as usize,
            })
        })
        .with_context(|| format!("Failed to read columns of '{}'", table))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to collect columns of '{}'", table))?;

    Ok(columns)
}

/// Primary key columns of a table, in key order.
pub fn get_primary_key_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut key: Vec<ColumnInfo> = get_table_columns(conn, table)?
        .into_iter()
        .filter(|c| c.pk_position > 0)
        .collect();
    key.sort_by_key(|c| c.pk_position);
    Ok(key.into_iter().map(|c| c.name).collect())
}

/// Distinct non-NULL values of one column, as keys compared under `affinity`.
///
/// Used for referential filtering against a referenced table.
pub fn read_column_keys(
    conn: &Connection,
    table: &str,
    column: &str,
    affinity: KeyAffinity,
) -> Result<HashSet<CellKey>> {
    validate_table_name(table)?;
    validate_identifier(column)?;

    let query = format!(
        "SELECT DISTINCT {} FROM {}",
        quote_ident(column),
        quote_ident(table)
    );
    let mut stmt = conn
        .prepare(&query)
        .with_context(|| format!("Failed to prepare key lookup on '{}.{}'", table, column))?;

    let values = stmt
        .query_map([], |row| row.get::<_, rusqlite::types::Value>(0))
        .with_context(|| format!("Failed to read keys from '{}.{}'", table, column))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to collect keys from '{}.{}'", table, column))?;

    Ok(values.iter().filter_map(|v| affinity.key(v)).collect())
}

/// Read all data from a table
///
/// Returns all rows as a vector of HashMaps mapping column names to values.
/// Loads everything into memory; intended for verification and tests.
pub fn read_table_data(
    conn: &Connection,
    table: &str,
) -> Result<Vec<HashMap<String, rusqlite::types::Value>>> {
    validate_table_name(table).context("Invalid table name for data reading")?;

    let query = format!("SELECT * FROM {} ORDER BY rowid", quote_ident(table));

    let mut stmt = conn
        .prepare(&query)
        .with_context(|| format!("Failed to prepare statement for table '{}'", table))?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let rows = stmt
        .query_map([], |row| {
            let mut row_map = HashMap::new();
            for (idx, col_name) in column_names.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(idx)?;
                row_map.insert(col_name.clone(), value);
            }
            Ok(row_map)
        })
        .with_context(|| format!("Failed to query rows from table '{}'", table))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to collect rows from table '{}'", table))?;

    tracing::debug!("Read {} rows from table '{}'", rows.len(), table);

    Ok(rows)
}
