// ABOUTME: TOML loader configuration: database location and per-table specs
// ABOUTME: TableSpec carries keys, foreign keys, column types and merge rules

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset::ColumnType;
use crate::rules::MergeRule;
use crate::utils::{sanitize_identifier, validate_identifier, validate_table_name};

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "warehouse-loader.toml";

/// A foreign key declaration.
///
/// Incoming rows whose `column` value has no match in
/// `references.references_column` are dropped before load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references: String,
    #[serde(default)]
    pub references_column: Option<String>,
}

impl ForeignKey {
    pub fn new(column: &str, references: &str, references_column: &str) -> Self {
        Self {
            column: column.to_string(),
            references: references.to_string(),
            references_column: Some(references_column.to_string()),
        }
    }

    /// Referenced column, defaulting to the local column name.
    pub fn referenced_column(&self) -> &str {
        self.references_column.as_deref().unwrap_or(&self.column)
    }
}

/// Description of one target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Columns never overwritten when a row is updated in place.
    #[serde(default)]
    pub preserve_columns: Vec<String>,
    /// Declared column types for CSV ingestion. Undeclared columns are inferred.
    #[serde(default)]
    pub columns: HashMap<String, ColumnType>,
    /// Extra date columns whose names do not contain "date".
    #[serde(default)]
    pub date_columns: Vec<String>,
    #[serde(default)]
    pub rules: Vec<MergeRule>,
}

impl TableSpec {
    pub fn new(name: &str, primary_key: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
            foreign_keys: Vec::new(),
            preserve_columns: Vec::new(),
            columns: HashMap::new(),
            date_columns: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn with_preserved(mut self, column: &str) -> Self {
        self.preserve_columns.push(column.to_string());
        self
    }

    pub fn with_rule(mut self, rule: MergeRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_column(mut self, column: &str, column_type: ColumnType) -> Self {
        self.columns.insert(column.to_string(), column_type);
        self
    }

    /// Columns a correlated update may overwrite, in dataset order.
    pub fn updatable_columns(&self, dataset_columns: &[String]) -> Vec<String> {
        dataset_columns
            .iter()
            .filter(|c| !self.primary_key.contains(c) && !self.preserve_columns.contains(c))
            .cloned()
            .collect()
    }

    /// Check names and internal consistency.
    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.name)?;

        if self.primary_key.is_empty() {
            bail!("Table '{}' must declare at least one primary key column", self.name);
        }

        let mut seen = HashSet::new();
        for col in &self.primary_key {
            validate_identifier(col)
                .with_context(|| format!("Invalid primary key column in '{}'", self.name))?;
            if !seen.insert(col) {
                bail!(
                    "Primary key column '{}' listed twice in '{}'",
                    sanitize_identifier(col),
                    self.name
                );
            }
        }

        for fk in &self.foreign_keys {
            validate_identifier(&fk.column)
                .with_context(|| format!("Invalid foreign key column in '{}'", self.name))?;
            validate_table_name(&fk.references)?;
            validate_identifier(fk.referenced_column())
                .with_context(|| format!("Invalid referenced column in '{}'", self.name))?;
        }

        for col in &self.preserve_columns {
            validate_identifier(col)?;
            if self.primary_key.contains(col) {
                bail!(
                    "Column '{}' in '{}' cannot be both a primary key and preserved",
                    col,
                    self.name
                );
            }
        }

        for col in self.columns.keys().chain(self.date_columns.iter()) {
            validate_identifier(col)
                .with_context(|| format!("Invalid column declaration in '{}'", self.name))?;
        }

        for rule in &self.rules {
            rule.validate()
                .with_context(|| format!("Invalid merge rule on '{}'", self.name))?;
        }

        Ok(())
    }
}

/// Top-level loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub database: PathBuf,
    #[serde(default = "default_marker_dir")]
    pub marker_dir: PathBuf,
    #[serde(default = "default_update_log")]
    pub update_log: PathBuf,
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

fn default_marker_dir() -> PathBuf {
    PathBuf::from("logs/update")
}

fn default_update_log() -> PathBuf {
    PathBuf::from("logs/update_log.txt")
}

impl LoaderConfig {
    /// Parse and validate a config from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: LoaderConfig =
            toml::from_str(contents).context("Failed to parse loader configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, resolving relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        if let Some(base) = path.parent() {
            config.database = resolve(base, &config.database);
            config.marker_dir = resolve(base, &config.marker_dir);
            config.update_log = resolve(base, &config.update_log);
        }

        tracing::debug!(
            "Loaded config from {} ({} tables)",
            path.display(),
            config.tables.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            if !names.insert(table.name.as_str()) {
                bail!("Table '{}' is configured more than once", table.name);
            }
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&TableSpec> {
        self.tables.iter().find(|t| t.name == name).ok_or_else(|| {
            anyhow::anyhow!(
                "Table '{}' is not configured. Known tables: {}",
                sanitize_identifier(name),
                self.tables
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || base.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Default config path: `./warehouse-loader.toml`, falling back to
/// `~/.warehouse-loader/warehouse-loader.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Ok(local);
    }
    let home_dir =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home_dir.join(".warehouse-loader").join(DEFAULT_CONFIG_FILE))
}
