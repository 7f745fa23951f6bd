// ABOUTME: Identifier validation and quoting helpers for generated SQL
// ABOUTME: Every table and column name passes through here before formatting

use anyhow::{bail, Result};

/// Maximum identifier length accepted for tables and columns.
///
/// SQLite itself has no hard limit; this keeps generated statements readable
/// and matches what the downstream dashboards can display.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a table or column identifier
///
/// Identifiers are interpolated into generated SQL (they cannot be bound as
/// parameters), so only plain ASCII names are accepted:
///
/// - non-empty, at most [`MAX_IDENTIFIER_LEN`] characters
/// - first character is a letter or underscore
/// - remaining characters are letters, digits, or underscores
/// - must not start with `sqlite_` (reserved for SQLite internals)
///
/// # Examples
///
/// ```
/// # use warehouse_loader::utils::validate_identifier;
/// # fn example() -> anyhow::Result<()> {
/// validate_identifier("member_id")?;
/// validate_identifier("_staging")?;
///
/// assert!(validate_identifier("123abc").is_err());
/// assert!(validate_identifier("as-of").is_err());
/// assert!(validate_identifier("ppts; DROP TABLE ppts; --").is_err());
/// # Ok(())
/// # }
/// ```
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.trim().is_empty() {
        bail!("Identifier cannot be empty or whitespace-only");
    }

    if identifier.len() > MAX_IDENTIFIER_LEN {
        bail!(
            "Identifier '{}' exceeds maximum length of {} characters (got {})",
            sanitize_identifier(identifier),
            MAX_IDENTIFIER_LEN,
            identifier.len()
        );
    }

    let mut chars = identifier.chars();
    if let Some(first_char) = chars.next() {
        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            bail!(
                "Identifier '{}' must start with a letter or underscore, not '{}'",
                sanitize_identifier(identifier),
                first_char
            );
        }
    }

    for (i, c) in identifier.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            bail!(
                "Identifier '{}' contains invalid character '{}' at position {}. \
                 Only letters, digits, and underscores are allowed",
                sanitize_identifier(identifier),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            );
        }
    }

    if identifier.to_ascii_lowercase().starts_with("sqlite_") {
        bail!(
            "Identifier '{}' uses the reserved 'sqlite_' prefix",
            sanitize_identifier(identifier)
        );
    }

    Ok(())
}

/// Validate a table name, adding the table context to the error message.
pub fn validate_table_name(table: &str) -> Result<()> {
    validate_identifier(table).map_err(|e| anyhow::anyhow!("Invalid table name: {}", e))
}

/// Sanitize an identifier for display in logs and error messages
///
/// Removes control characters and limits length to 100 characters.
///
/// ```
/// # use warehouse_loader::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("addresses"), "addresses");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote an identifier (table, column) for SQLite
///
/// Assumes the identifier has already been validated. Escapes embedded quotes
/// and wraps the identifier in double quotes.
///
/// ```
/// # use warehouse_loader::utils::quote_ident;
/// assert_eq!(quote_ident("teams"), "\"teams\"");
/// assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
/// ```
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Quote and join a list of identifiers with `", "`.
pub fn quote_ident_list(identifiers: &[String]) -> String {
    identifiers
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("member_id").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("Teams2").is_ok());
    }

    #[test]
    fn test_validate_identifier_invalid() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("   ").is_err());
        assert!(validate_identifier("1table").is_err());
        assert!(validate_identifier("as of").is_err());
        assert!(validate_identifier("members\"; DROP TABLE x; --").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_identifier_rejects_sqlite_prefix() {
        let err = validate_identifier("sqlite_master").unwrap_err();
        assert!(err.to_string().contains("reserved"));
        assert!(validate_identifier("SQLITE_sequence").is_err());
    }

    #[test]
    fn test_validate_table_name_context() {
        let err = validate_table_name("bad name").unwrap_err();
        assert!(err.to_string().contains("Invalid table name"));
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("normal_table"), "normal_table");
        assert_eq!(sanitize_identifier("table\x00name"), "tablename");

        let long_name = "a".repeat(200);
        assert_eq!(sanitize_identifier(&long_name).len(), 100);
    }

    #[test]
    fn test_quote_ident_list() {
        let cols = vec!["member_id".to_string(), "start_date".to_string()];
        assert_eq!(quote_ident_list(&cols), "\"member_id\", \"start_date\"");
    }
}
