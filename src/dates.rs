// ABOUTME: Date parsing and normalization to the SQL text form stored in SQLite
// ABOUTME: Canonical dates sort correctly under SQLite's text comparison

use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%m-%d-%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

/// Text stored for every DateTime value.
pub const SQL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Returns true for the spellings exports use for a missing date.
pub fn is_missing(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("nat")
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("null")
}

/// Parse a date or datetime string in any of the accepted export formats.
pub fn parse_datetime(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(d.and_time(NaiveTime::MIN));
        }
    }

    bail!("unrecognized date '{}'", trimmed)
}

/// Normalize a raw date string to `YYYY-MM-DD`, dropping any time of day.
///
/// Every DateTime value is stored in this one form, so text comparisons in
/// the merge rules order dates correctly. Returns `Ok(None)` for missing values.
pub fn normalize(raw: &str) -> Result<Option<String>> {
    if is_missing(raw) {
        return Ok(None);
    }
    parse_datetime(raw).map(|dt| Some(dt.format(SQL_DATE_FORMAT).to_string()))
}

/// Whether a column name marks it as holding dates.
pub fn is_date_column_name(name: &str) -> bool {
    name.to_ascii_lowercase().contains("date")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_us_format() {
        assert_eq!(
            normalize("03/07/2021").unwrap(),
            Some("2021-03-07".to_string())
        );
    }

    #[test]
    fn test_normalize_drops_time() {
        assert_eq!(
            normalize("2021-03-07 14:30:00").unwrap(),
            Some("2021-03-07".to_string())
        );
        assert_eq!(
            normalize("3/7/2021 2:30 PM").unwrap(),
            Some("2021-03-07".to_string())
        );
    }

    #[test]
    fn test_missing_values() {
        assert_eq!(normalize("").unwrap(), None);
        assert_eq!(normalize("NaT").unwrap(), None);
        assert_eq!(normalize("  ").unwrap(), None);
    }

    #[test]
    fn test_unrecognized_date() {
        let err = normalize("yesterday").unwrap_err();
        assert!(err.to_string().contains("unrecognized date"));
    }

    #[test]
    fn test_is_date_column_name() {
        assert!(is_date_column_name("start_date"));
        assert!(is_date_column_name("DisenrollmentDate"));
        assert!(!is_date_column_name("as_of"));
    }
}
