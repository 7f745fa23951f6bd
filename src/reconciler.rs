// ABOUTME: Table Reconciler - creates target tables or merges batches into them
// ABOUTME: Updates run in one transaction: stage, patch by key, insert new keys, apply rules

use anyhow::{bail, Context, Result};
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::HashSet;

use crate::config::TableSpec;
use crate::dataset::{Dataset, KeyAffinity};
use crate::rules::{apply_rules, RuleOutcome};
use crate::sql;
use crate::sqlite::reader;
use crate::utils::quote_ident;

/// Whether a load creates the target table or merges into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    Create,
    Update,
}

impl LoadMode {
    pub fn from_update_flag(update: bool) -> Self {
        if update {
            LoadMode::Update
        } else {
            LoadMode::Create
        }
    }
}

/// What one create or update call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub table: String,
    pub mode: LoadMode,
    pub rows_received: usize,
    /// Rows dropped because a foreign key had no match.
    pub rows_filtered: usize,
    pub duplicates_removed: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rules: Vec<RuleOutcome>,
}

impl LoadSummary {
    fn new(table: &str, mode: LoadMode, rows_received: usize) -> Self {
        Self {
            table: table.to_string(),
            mode,
            rows_received,
            rows_filtered: 0,
            duplicates_removed: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rules: Vec::new(),
        }
    }
}

/// Result of checking a table's key invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub table: String,
    pub row_count: usize,
    /// Number of key tuples occurring more than once.
    pub duplicate_keys: usize,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.duplicate_keys == 0
    }
}

/// Creates target tables from datasets and merges later batches into them.
///
/// One writer per table is assumed; callers sequence loads of the same table.
pub struct Reconciler<'a> {
    conn: &'a mut Connection,
}

impl<'a> Reconciler<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Create or update depending on `mode`.
    pub fn load(&mut self, dataset: Dataset, spec: &TableSpec, mode: LoadMode) -> Result<LoadSummary> {
        match mode {
            LoadMode::Create => self.create_table(dataset, spec),
            LoadMode::Update => self.update_table(dataset, spec),
        }
    }

    /// Create the target table and load every surviving row.
    ///
    /// Rows failing a foreign key are dropped, then rows are deduplicated by
    /// primary key keeping the last. A zero-row dataset still creates the table.
    pub fn create_table(&mut self, mut dataset: Dataset, spec: &TableSpec) -> Result<LoadSummary> {
        spec.validate()?;
        check_dataset_columns(&dataset, spec)?;

        let table = spec.name.as_str();
        let mut summary = LoadSummary::new(table, LoadMode::Create, dataset.row_count());

        if reader::table_exists(self.conn, table)? {
            tracing::warn!(
                "Table '{}' already exists; appending rows to it",
                table
            );
        }

        let tx = self
            .conn
            .transaction()
            .context("Failed to begin create transaction")?;

        summary.rows_filtered = filter_foreign_keys(&tx, &mut dataset, spec)?;
        summary.duplicates_removed = dataset.dedup_by_key_keep_last(&spec.primary_key)?;

        let create_sql = sql::build_create_table(
            table,
            dataset.columns(),
            &spec.primary_key,
            &spec.foreign_keys,
        );
        tracing::debug!("Creating table: {}", create_sql);
        tx.execute(&create_sql, [])
            .with_context(|| format!("Failed to create table '{}'", table))?;

        summary.rows_inserted = insert_rows(&tx, &quote_ident(table), &dataset)
            .with_context(|| format!("Failed to load rows into '{}'", table))?;

        tx.commit()
            .with_context(|| format!("Failed to commit creation of '{}'", table))?;

        tracing::info!(
            "Created '{}': {} rows inserted ({} filtered, {} duplicates)",
            table,
            summary.rows_inserted,
            summary.rows_filtered,
            summary.duplicates_removed
        );

        Ok(summary)
    }

    /// Merge a batch into an existing table.
    ///
    /// Rows whose key already exists are patched column by column (except
    /// preserved columns), rows with new keys are inserted, then the table's
    /// merge rules run. Everything happens in one transaction; on failure
    /// the table and staging area are left as they were.
    pub fn update_table(&mut self, mut dataset: Dataset, spec: &TableSpec) -> Result<LoadSummary> {
        let table = spec.name.as_str();
        let mut summary = LoadSummary::new(table, LoadMode::Update, dataset.row_count());

        if dataset.is_empty() {
            tracing::info!("No rows to merge into '{}'", table);
            return Ok(summary);
        }

        spec.validate()?;
        check_dataset_columns(&dataset, spec)?;
        self.check_target(&dataset, spec)?;

        let tx = self
            .conn
            .transaction()
            .context("Failed to begin update transaction")?;

        summary.rows_filtered = filter_foreign_keys(&tx, &mut dataset, spec)?;
        summary.duplicates_removed = dataset.dedup_by_key_keep_last(&spec.primary_key)?;

        if dataset.is_empty() {
            tracing::info!("Every row for '{}' was filtered out; nothing to merge", table);
            return Ok(summary);
        }

        tx.execute(&sql::build_drop_staging(table), [])
            .context("Failed to clear stale staging table")?;
        tx.execute(&sql::build_create_staging(table, dataset.columns()), [])
            .with_context(|| format!("Failed to create staging table for '{}'", table))?;
        insert_rows(&tx, &sql::staging_ref(table), &dataset)
            .with_context(|| format!("Failed to stage rows for '{}'", table))?;

        let columns = dataset.column_names();
        let set_columns = spec.updatable_columns(&columns);
        if let Some(update_sql) = sql::build_correlated_update(table, &spec.primary_key, &set_columns) {
            tracing::debug!("Patching existing rows: {}", update_sql);
            summary.rows_updated = tx
                .execute(&update_sql, [])
                .with_context(|| format!("Failed to update existing rows in '{}'", table))?;
        }

        let insert_sql = sql::build_anti_join_insert(table, &spec.primary_key, &columns);
        tracing::debug!("Inserting new rows: {}", insert_sql);
        summary.rows_inserted = tx
            .execute(&insert_sql, [])
            .with_context(|| format!("Failed to insert new rows into '{}'", table))?;

        summary.rules = apply_rules(&tx, table, &spec.rules)?;

        tx.execute(&sql::build_drop_staging(table), [])
            .with_context(|| format!("Failed to drop staging table for '{}'", table))?;
        tx.commit()
            .with_context(|| format!("Failed to commit update of '{}'", table))?;

        tracing::info!(
            "Updated '{}': {} rows patched, {} inserted ({} filtered, {} duplicates)",
            table,
            summary.rows_updated,
            summary.rows_inserted,
            summary.rows_filtered,
            summary.duplicates_removed
        );

        Ok(summary)
    }

    /// Count rows and duplicated key tuples in a table.
    pub fn verify(&self, spec: &TableSpec) -> Result<VerifyReport> {
        let table = spec.name.as_str();
        if !reader::table_exists(self.conn, table)? {
            bail!("Table '{}' does not exist", table);
        }

        let row_count = reader::get_table_row_count(self.conn, table)?;
        let duplicate_keys: i64 = self
            .conn
            .query_row(
                &sql::build_duplicate_key_count(table, &spec.primary_key),
                [],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to check key uniqueness of '{}'", table))?;

        Ok(VerifyReport {
            table: table.to_string(),
            row_count,
            duplicate_keys: duplicate_keys as usize,
        })
    }

    /// The target must exist, carry the declared key, and have every dataset column.
    fn check_target(&self, dataset: &Dataset, spec: &TableSpec) -> Result<()> {
        let table = spec.name.as_str();
        if !reader::table_exists(self.conn, table)? {
            bail!(
                "Table '{}' does not exist; create it first (run with --update false)",
                table
            );
        }

        let existing_key = reader::get_primary_key_columns(self.conn, table)?;
        if existing_key != spec.primary_key {
            bail!(
                "Primary key mismatch for '{}': table has ({}), configuration declares ({})",
                table,
                existing_key.join(", "),
                spec.primary_key.join(", ")
            );
        }

        let known: HashSet<String> = reader::get_table_columns(self.conn, table)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let unknown: Vec<String> = dataset
            .column_names()
            .into_iter()
            .filter(|c| !known.contains(c))
            .collect();
        if !unknown.is_empty() {
            bail!(
                "Dataset columns not present in '{}': {}",
                table,
                unknown.join(", ")
            );
        }

        Ok(())
    }
}

/// Key and foreign key columns must be present in the dataset.
fn check_dataset_columns(dataset: &Dataset, spec: &TableSpec) -> Result<()> {
    dataset
        .column_indexes(&spec.primary_key)
        .with_context(|| format!("Primary key column missing from dataset for '{}'", spec.name))?;

    let fk_columns: Vec<String> = spec.foreign_keys.iter().map(|fk| fk.column.clone()).collect();
    dataset
        .column_indexes(&fk_columns)
        .with_context(|| format!("Foreign key column missing from dataset for '{}'", spec.name))?;

    Ok(())
}

/// Drop rows whose foreign key values have no match in the referenced table.
///
/// NULL values never match. Returns the number of rows dropped.
fn filter_foreign_keys(conn: &Connection, dataset: &mut Dataset, spec: &TableSpec) -> Result<usize> {
    let mut dropped = 0;

    for fk in &spec.foreign_keys {
        if fk.references == spec.name {
            tracing::debug!("Skipping self-referencing foreign key on '{}'", spec.name);
            continue;
        }
        if !reader::table_exists(conn, &fk.references)? {
            bail!(
                "Table '{}' references '{}', which has not been loaded yet",
                spec.name,
                fk.references
            );
        }

        let referenced = reader::get_table_columns(conn, &fk.references)?
            .into_iter()
            .find(|c| c.name == fk.referenced_column())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Table '{}' has no column '{}' referenced by '{}'",
                    fk.references,
                    fk.referenced_column(),
                    spec.name
                )
            })?;
        let affinity = KeyAffinity::from_declared_type(&referenced.declared_type);

        let known = reader::read_column_keys(conn, &fk.references, fk.referenced_column(), affinity)?;
        let idx = dataset
            .column_index(&fk.column)
            .ok_or_else(|| anyhow::anyhow!("Foreign key column '{}' missing from dataset", fk.column))?;

        let removed = dataset.retain_rows(|row| {
            affinity.key(&row[idx]).map_or(false, |key| known.contains(&key))
        });

        if removed > 0 {
            tracing::info!(
                "Dropped {} rows from '{}' with no matching {}.{}",
                removed,
                spec.name,
                fk.references,
                fk.referenced_column()
            );
        }
        dropped += removed;
    }

    Ok(dropped)
}

/// Insert every dataset row into `target` (already quoted).
fn insert_rows(conn: &Connection, target: &str, dataset: &Dataset) -> Result<usize> {
    let insert_sql = sql::build_insert_row(target, &dataset.column_names());
    let mut stmt = conn
        .prepare(&insert_sql)
        .with_context(|| format!("Failed to prepare insert into {}", target))?;

    let mut inserted = 0;
    for row in dataset.rows() {
        inserted += stmt
            .execute(params_from_iter(row.iter()))
            .with_context(|| format!("Failed to insert row into {}", target))?;
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_mode_from_update_flag() {
        assert_eq!(LoadMode::from_update_flag(true), LoadMode::Update);
        assert_eq!(LoadMode::from_update_flag(false), LoadMode::Create);
    }

    #[test]
    fn test_verify_report_consistency() {
        let report = VerifyReport {
            table: "ppts".to_string(),
            row_count: 10,
            duplicate_keys: 0,
        };
        assert!(report.is_consistent());

        let report = VerifyReport {
            duplicate_keys: 2,
            ..report
        };
        assert!(!report.is_consistent());
    }

    #[test]
    fn test_summary_serializes_mode() {
        let summary = LoadSummary::new("ppts", LoadMode::Create, 3);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["mode"], "create");
        assert_eq!(json["rows_received"], 3);
    }
}
