// ABOUTME: Statement builders for table creation, staging, and key-based merge
// ABOUTME: Pure string builders over validated identifiers, tested in isolation

use crate::config::ForeignKey;
use crate::dataset::Column;
use crate::utils::{quote_ident, quote_ident_list};

/// Name of the temp table holding one batch during an update.
pub fn staging_table_name(table: &str) -> String {
    format!("staging_{}", table)
}

/// Schema-qualified, quoted reference to the staging table.
pub fn staging_ref(table: &str) -> String {
    format!("temp.{}", quote_ident(&staging_table_name(table)))
}

/// Build the `CREATE TABLE` statement for a target table.
///
/// Generates a statement like:
/// ```sql
/// CREATE TABLE IF NOT EXISTS "teams" (
///   "member_id" INTEGER, "team" TEXT, "start_date" DATETIME,
///   PRIMARY KEY ("member_id", "team", "start_date"),
///   FOREIGN KEY ("member_id") REFERENCES "ppts" ("member_id")
/// )
/// ```
pub fn build_create_table(
    table: &str,
    columns: &[Column],
    primary_key: &[String],
    foreign_keys: &[ForeignKey],
) -> String {
    let mut parts: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type()))
        .collect();

    parts.push(format!("PRIMARY KEY ({})", quote_ident_list(primary_key)));

    for fk in foreign_keys {
        parts.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_ident(&fk.column),
            quote_ident(&fk.references),
            quote_ident(fk.referenced_column())
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        parts.join(", ")
    )
}

/// Build the `CREATE TEMP TABLE` statement for a batch's staging table.
pub fn build_create_staging(table: &str, columns: &[Column]) -> String {
    let cols: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type()))
        .collect();

    format!("CREATE TEMP TABLE {} ({})", staging_ref(table), cols.join(", "))
}

/// Build the statement dropping a batch's staging table.
pub fn build_drop_staging(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", staging_ref(table))
}

/// Build a single-row parameterized insert: `INSERT INTO t (a, b) VALUES (?1, ?2)`.
///
/// `target` must already be quoted (see [`quote_ident`] and [`staging_ref`]).
pub fn build_insert_row(target: &str, columns: &[String]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        target,
        quote_ident_list(columns),
        placeholders.join(", ")
    )
}

/// Key equality predicate between two aliases: `a."k1" = b."k1" AND a."k2" = b."k2"`.
fn key_match(left: &str, right: &str, primary_key: &[String]) -> String {
    primary_key
        .iter()
        .map(|k| format!("{left}.{col} = {right}.{col}", col = quote_ident(k)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Build the correlated update that patches rows whose key exists in staging.
///
/// Each column in `set_columns` is overwritten with the staging row's value
/// for the same key. Returns `None` when there is nothing to overwrite.
///
/// ```sql
/// UPDATE "t" SET "c" = (SELECT s."c" FROM temp."staging_t" AS s WHERE s."k" = "t"."k")
/// WHERE EXISTS (SELECT 1 FROM temp."staging_t" AS s WHERE s."k" = "t"."k")
/// ```
pub fn build_correlated_update(
    table: &str,
    primary_key: &[String],
    set_columns: &[String],
) -> Option<String> {
    if set_columns.is_empty() {
        return None;
    }

    let target = quote_ident(table);
    let staging = staging_ref(table);
    let matches = key_match("s", &target, primary_key);

    let assignments: Vec<String> = set_columns
        .iter()
        .map(|c| {
            format!(
                "{col} = (SELECT s.{col} FROM {staging} AS s WHERE {matches})",
                col = quote_ident(c),
            )
        })
        .collect();

    Some(format!(
        "UPDATE {target} SET {} WHERE EXISTS (SELECT 1 FROM {staging} AS s WHERE {matches})",
        assignments.join(", ")
    ))
}

/// Build the anti-join insert adding staging rows whose key is absent from the target.
///
/// ```sql
/// INSERT INTO "t" ("k", "c") SELECT s."k", s."c" FROM temp."staging_t" AS s
/// WHERE NOT EXISTS (SELECT 1 FROM "t" AS f WHERE f."k" = s."k")
/// ```
pub fn build_anti_join_insert(table: &str, primary_key: &[String], columns: &[String]) -> String {
    let selected: Vec<String> = columns
        .iter()
        .map(|c| format!("s.{}", quote_ident(c)))
        .collect();

    format!(
        "INSERT INTO {target} ({cols}) SELECT {selected} FROM {staging} AS s \
         WHERE NOT EXISTS (SELECT 1 FROM {target} AS f WHERE {matches})",
        target = quote_ident(table),
        cols = quote_ident_list(columns),
        selected = selected.join(", "),
        staging = staging_ref(table),
        matches = key_match("f", "s", primary_key),
    )
}

/// Build a query counting key tuples that occur more than once.
pub fn build_duplicate_key_count(table: &str, primary_key: &[String]) -> String {
    let keys = quote_ident_list(primary_key);
    format!(
        "SELECT COUNT(*) FROM (SELECT {keys} FROM {} GROUP BY {keys} HAVING COUNT(*) > 1)",
        quote_ident(table)
    )
}
