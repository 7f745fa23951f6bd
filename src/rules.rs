// ABOUTME: Post-merge rules keeping temporal history tables consistent
// ABOUTME: Supersedes older address rows and closes open-ended assignments

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::sql::staging_ref;
use crate::utils::{quote_ident, validate_identifier, validate_table_name};

fn default_member_column() -> String {
    "member_id".to_string()
}

fn default_enrollment_table() -> String {
    "enrollment".to_string()
}

fn default_disenrollment_column() -> String {
    "disenrollment_date".to_string()
}

/// A table-specific invariant applied after the merge, while the staging
/// table still holds the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeRule {
    /// Rows for a member in the batch whose `date_column` precedes that
    /// member's latest batch date get `flag_column = 0`.
    SupersedeOnDate {
        #[serde(default = "default_member_column")]
        member_column: String,
        date_column: String,
        flag_column: String,
    },
    /// Open rows (`end_column IS NULL`) for a member in the batch are closed
    /// at the earliest batch start that follows their own start.
    CloseOpenRange {
        #[serde(default = "default_member_column")]
        member_column: String,
        start_column: String,
        end_column: String,
    },
    /// Open rows for members who are disenrolled (a disenrollment date and no
    /// open enrollment) are closed at the latest disenrollment date.
    CloseOnDisenrollment {
        #[serde(default = "default_member_column")]
        member_column: String,
        end_column: String,
        #[serde(default = "default_enrollment_table")]
        enrollment_table: String,
        #[serde(default = "default_disenrollment_column")]
        disenrollment_column: String,
    },
}

impl MergeRule {
    pub fn supersede_on_date(date_column: &str, flag_column: &str) -> Self {
        MergeRule::SupersedeOnDate {
            member_column: default_member_column(),
            date_column: date_column.to_string(),
            flag_column: flag_column.to_string(),
        }
    }

    pub fn close_open_range(start_column: &str, end_column: &str) -> Self {
        MergeRule::CloseOpenRange {
            member_column: default_member_column(),
            start_column: start_column.to_string(),
            end_column: end_column.to_string(),
        }
    }

    pub fn close_on_disenrollment(end_column: &str) -> Self {
        MergeRule::CloseOnDisenrollment {
            member_column: default_member_column(),
            end_column: end_column.to_string(),
            enrollment_table: default_enrollment_table(),
            disenrollment_column: default_disenrollment_column(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MergeRule::SupersedeOnDate { .. } => "supersede_on_date",
            MergeRule::CloseOpenRange { .. } => "close_open_range",
            MergeRule::CloseOnDisenrollment { .. } => "close_on_disenrollment",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            MergeRule::SupersedeOnDate {
                member_column,
                date_column,
                flag_column,
            } => {
                validate_identifier(member_column)?;
                validate_identifier(date_column)?;
                validate_identifier(flag_column)?;
            }
            MergeRule::CloseOpenRange {
                member_column,
                start_column,
                end_column,
            } => {
                validate_identifier(member_column)?;
                validate_identifier(start_column)?;
                validate_identifier(end_column)?;
            }
            MergeRule::CloseOnDisenrollment {
                member_column,
                end_column,
                enrollment_table,
                disenrollment_column,
            } => {
                validate_identifier(member_column)?;
                validate_identifier(end_column)?;
                validate_table_name(enrollment_table)?;
                validate_identifier(disenrollment_column)?;
            }
        }
        Ok(())
    }

    /// Build the statement applying this rule to `table`.
    pub fn build_sql(&self, table: &str) -> String {
        let target = quote_ident(table);
        let staging = staging_ref(table);

        match self {
            MergeRule::SupersedeOnDate {
                member_column,
                date_column,
                flag_column,
            } => {
                let member = quote_ident(member_column);
                let date = quote_ident(date_column);
                let flag = quote_ident(flag_column);
                format!(
                    "UPDATE {target} SET {flag} = 0 \
                     WHERE ({target}.{flag} IS NULL OR {target}.{flag} <> 0) \
                     AND {target}.{date} < (SELECT MAX(s.{date}) FROM {staging} AS s \
                     WHERE s.{member} = {target}.{member})"
                )
            }
            MergeRule::CloseOpenRange {
                member_column,
                start_column,
                end_column,
            } => {
                let member = quote_ident(member_column);
                let start = quote_ident(start_column);
                let end = quote_ident(end_column);
                let later = format!(
                    "FROM {staging} AS s WHERE s.{member} = {target}.{member} \
                     AND s.{start} > {target}.{start}"
                );
                format!(
                    "UPDATE {target} SET {end} = (SELECT MIN(s.{start}) {later}) \
                     WHERE {target}.{end} IS NULL AND EXISTS (SELECT 1 {later})"
                )
            }
            MergeRule::CloseOnDisenrollment {
                member_column,
                end_column,
                enrollment_table,
                disenrollment_column,
            } => {
                let member = quote_ident(member_column);
                let end = quote_ident(end_column);
                let enrollment = quote_ident(enrollment_table);
                let disenrolled = quote_ident(disenrollment_column);
                format!(
                    "UPDATE {target} SET {end} = (SELECT MAX(e.{disenrolled}) FROM {enrollment} AS e \
                     WHERE e.{member} = {target}.{member}) \
                     WHERE {target}.{end} IS NULL \
                     AND EXISTS (SELECT 1 FROM {enrollment} AS e \
                     WHERE e.{member} = {target}.{member} AND e.{disenrolled} IS NOT NULL) \
                     AND NOT EXISTS (SELECT 1 FROM {enrollment} AS e \
                     WHERE e.{member} = {target}.{member} AND e.{disenrolled} IS NULL)"
                )
            }
        }
    }
}

/// Outcome of applying one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    pub rule: &'static str,
    pub rows_changed: usize,
    pub skipped: bool,
}

/// Apply `rules` to `table` in declaration order.
///
/// Must run while the batch's staging table exists.
pub fn apply_rules(conn: &Connection, table: &str, rules: &[MergeRule]) -> Result<Vec<RuleOutcome>> {
    let mut outcomes = Vec::with_capacity(rules.len());

    for rule in rules {
        if let MergeRule::CloseOnDisenrollment {
            enrollment_table, ..
        } = rule
        {
            if !crate::sqlite::reader::table_exists(conn, enrollment_table)? {
                tracing::warn!(
                    "Skipping {} on '{}': table '{}' does not exist",
                    rule.name(),
                    table,
                    enrollment_table
                );
                outcomes.push(RuleOutcome {
                    rule: rule.name(),
                    rows_changed: 0,
                    skipped: true,
                });
                continue;
            }
        }

        let sql = rule.build_sql(table);
        tracing::debug!("Applying {} to '{}': {}", rule.name(), table, sql);

        let rows_changed = conn
            .execute(&sql, [])
            .with_context(|| format!("Failed to apply {} to '{}'", rule.name(), table))?;

        tracing::info!(
            "Rule {} changed {} rows in '{}'",
            rule.name(),
            rows_changed,
            table
        );
        outcomes.push(RuleOutcome {
            rule: rule.name(),
            rows_changed,
            skipped: false,
        });
    }

    Ok(outcomes)
}
