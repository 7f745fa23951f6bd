// ABOUTME: CLI entry point for warehouse-loader
// ABOUTME: Parses commands and routes to the reconciler, verifier and marker handling

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use warehouse_loader::config::{default_config_path, LoaderConfig};
use warehouse_loader::reconciler::{LoadMode, Reconciler};
use warehouse_loader::{ingest, markers, sqlite};

#[derive(Parser)]
#[command(name = "warehouse-loader")]
#[command(about = "Load cleaned EHR exports into the SQLite data warehouse", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the loader configuration (defaults to ./warehouse-loader.toml)
    #[arg(long, global = true, env = "WAREHOUSE_LOADER_CONFIG")]
    config: Option<PathBuf>,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a cleaned CSV export into a configured table
    Load {
        /// Configured table name
        #[arg(long)]
        table: String,
        /// Cleaned CSV export
        #[arg(long)]
        input: PathBuf,
        /// Merge into the existing table (true) or create it (false)
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        update: bool,
        /// Do not write a completion marker
        #[arg(long)]
        no_marker: bool,
        /// Print the load summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a table for duplicated primary keys
    Verify {
        #[arg(long)]
        table: String,
    },
    /// List configured tables and their keys
    Tables,
    /// Move completion markers into the update log
    FlushMarkers,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = LoaderConfig::load(&config_path)?;

    match cli.command {
        Commands::Load {
            table,
            input,
            update,
            no_marker,
            json,
        } => {
            let spec = config.table(&table)?;
            let dataset = ingest::ingest_csv_from_path(&input, spec)
                .with_context(|| format!("Failed to read {}", input.display()))?;

            let mut conn = sqlite::open_sqlite(&config.database)?;
            let summary = Reconciler::new(&mut conn).load(
                dataset,
                spec,
                LoadMode::from_update_flag(update),
            )?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let verb = match summary.mode {
                    LoadMode::Create => "created",
                    LoadMode::Update => "updated",
                };
                println!(
                    "{} {}: {} inserted, {} patched, {} filtered, {} duplicates",
                    summary.table,
                    verb,
                    summary.rows_inserted,
                    summary.rows_updated,
                    summary.rows_filtered,
                    summary.duplicates_removed
                );
            }

            if !no_marker {
                markers::write_marker_today(&config.marker_dir, &spec.name)?;
            }
            Ok(())
        }
        Commands::Verify { table } => {
            let spec = config.table(&table)?;
            let mut conn = sqlite::open_sqlite(&config.database)?;
            let report = Reconciler::new(&mut conn).verify(spec)?;

            println!(
                "{}: {} rows, {} duplicated keys",
                report.table, report.row_count, report.duplicate_keys
            );
            if !report.is_consistent() {
                anyhow::bail!("Table '{}' has duplicated primary keys", report.table);
            }
            Ok(())
        }
        Commands::Tables => {
            for spec in &config.tables {
                let references: Vec<String> = spec
                    .foreign_keys
                    .iter()
                    .map(|fk| format!("{} -> {}.{}", fk.column, fk.references, fk.referenced_column()))
                    .collect();
                println!(
                    "{} ({}){}",
                    spec.name,
                    spec.primary_key.join(", "),
                    if references.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", references.join("; "))
                    }
                );
            }
            Ok(())
        }
        Commands::FlushMarkers => {
            let flushed = markers::flush_markers(&config.marker_dir, &config.update_log)?;
            println!("Flushed {} markers", flushed);
            Ok(())
        }
    }
}
