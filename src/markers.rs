// ABOUTME: Completion markers: one empty file per finished pipeline step
// ABOUTME: Flushing appends each marker to the update log and removes it

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the marker for `step` on `date`: `<step>_<YYYY-MM-DD>.txt`.
pub fn marker_file_name(step: &str, date: NaiveDate) -> String {
    format!("{}_{}.txt", step, date.format("%Y-%m-%d"))
}

/// Create the (empty) marker file for `step`, creating `dir` if needed.
///
/// Opening in append mode makes repeated calls harmless.
pub fn write_marker(dir: &Path, step: &str, date: NaiveDate) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create marker directory {}", dir.display()))?;

    let path = dir.join(marker_file_name(step, date));
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to write marker {}", path.display()))?;

    tracing::debug!("Wrote marker {}", path.display());
    Ok(path)
}

/// Marker for today's date in local time.
pub fn write_marker_today(dir: &Path, step: &str) -> Result<PathBuf> {
    write_marker(dir, step, chrono::Local::now().date_naive())
}

/// Move every marker in `dir` into the update log.
///
/// Each marker becomes one log line: the file stem with `_` replaced by `,`
/// (e.g. `teams,2024-01-31`). Returns how many were flushed.
/// A missing marker directory flushes nothing.
pub fn flush_markers(dir: &Path, log_path: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list marker directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    if entries.is_empty() {
        return Ok(0);
    }

    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
    }
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open update log {}", log_path.display()))?;

    let mut flushed = 0;
    for path in entries {
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => {
                tracing::warn!("Skipping marker with non-UTF-8 name: {}", path.display());
                continue;
            }
        };
        writeln!(log, "{}", stem.replace('_', ","))
            .with_context(|| format!("Failed to append to {}", log_path.display()))?;
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove marker {}", path.display()))?;
        flushed += 1;
    }

    tracing::info!("Flushed {} markers into {}", flushed, log_path.display());
    Ok(flushed)
}
