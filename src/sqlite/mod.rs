// ABOUTME: SQLite connection setup for the warehouse database
// ABOUTME: Opens the store with foreign keys enforced

pub mod reader;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// Open (or create) the warehouse database.
///
/// Enables `foreign_keys` so the constraints declared at table creation are
/// enforced by SQLite as well as by the loader's own filtering.
///
/// # Examples
///
/// ```no_run
/// # use warehouse_loader::sqlite::open_sqlite;
/// # fn example() -> anyhow::Result<()> {
/// let conn = open_sqlite("warehouse.db")?;
/// # Ok(())
/// # }
/// ```
pub fn open_sqlite(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            bail!(
                "Database directory {} does not exist",
                parent.display()
            );
        }
    }

    tracing::debug!("Opening SQLite database {}", path.display());

    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("Failed to enable foreign key enforcement")?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_sqlite_enables_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_sqlite(dir.path().join("warehouse.db")).unwrap();
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_open_sqlite_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = open_sqlite(dir.path().join("missing").join("warehouse.db"));
        assert!(result.is_err());
    }
}
