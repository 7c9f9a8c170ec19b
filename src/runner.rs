//! High-level runner API for the staging loader.
//!
//! This module provides the public interface: it reads the database settings,
//! opens the shared connection pool, wires the normalizer, staging loader and
//! warehouse merge together, and runs a batch over a folder of extracts.
//!
//! This is the primary API for external callers and for the CLI.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config;
use crate::coordination::{Coordinator, SourceMap, StagingLoader, StoredProcedureMerge};
use crate::db::Pool;
use crate::db::pool::{PoolArgsBuilder, pool as connect_pool};
use crate::formats::{DelimitedConfig, Normalizer};

pub use crate::config::{ConfigError, DEFAULT_BATCH_SIZE, DbSettings};
pub use crate::coordination::{BatchOutcome, FileReport, FileStatus};
pub use crate::telemetry::{BatchEvent, BatchStats};

/// Arguments for preparing a batch pipeline
#[derive(Debug, Clone)]
pub struct RunArgs {
    /// Database settings; read from the environment when `None`
    pub settings: Option<DbSettings>,

    /// Rows per INSERT statement
    pub batch_size: usize,

    /// Field delimiter of the raw files
    pub delimiter: u8,

    /// Warehouse merge procedure; `DW_MERGE_PROCEDURE` or the default when `None`
    pub merge_procedure: Option<String>,

    /// Receives progress events while batches run
    pub events: Option<mpsc::UnboundedSender<BatchEvent>>,

    // Test-only: inject a pre-created pool (for SQLite testing)
    #[cfg(test)]
    pub test_pool: Option<Pool>,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            settings: None,
            batch_size: DEFAULT_BATCH_SIZE,
            delimiter: b',',
            merge_procedure: None,
            events: None,
            #[cfg(test)]
            test_pool: None,
        }
    }
}

/// A connected pipeline, ready to run batches one at a time
pub struct Pipeline {
    coordinator: Coordinator,
}

impl Pipeline {
    /// Run one batch over `folder`; never fails, see [`BatchOutcome`]
    pub async fn run(&self, folder: impl AsRef<Path>) -> BatchOutcome {
        self.coordinator.run_batch(folder.as_ref()).await
    }

    /// Expected file names and their staging tables, in load order
    pub fn expected_files(&self) -> Vec<(String, String)> {
        self.coordinator
            .sources()
            .entries()
            .iter()
            .map(|s| (s.file_name.clone(), s.table_name.clone()))
            .collect()
    }
}

async fn open_pool(args: &RunArgs) -> Result<Pool> {
    #[cfg(test)]
    if let Some(pool) = &args.test_pool {
        return Ok(pool.clone());
    }

    let settings = match &args.settings {
        Some(settings) => settings.clone(),
        None => DbSettings::from_env().context("Configuration error")?,
    };

    let pool_args = PoolArgsBuilder::default()
        .url(settings.connection_url())
        .build()?;
    connect_pool(pool_args).await
}

/// Validate configuration, connect, and wire up the pipeline
///
/// Any error here is a configuration error: nothing has been read or loaded.
pub async fn prepare(args: RunArgs) -> Result<Pipeline> {
    let pool = open_pool(&args).await?;

    let procedure = args
        .merge_procedure
        .clone()
        .unwrap_or_else(config::merge_procedure_from_env);
    let merge = StoredProcedureMerge::new(pool.clone(), procedure)
        .context("Invalid warehouse merge procedure name")?;
    let staging = StagingLoader::new(pool).with_batch_size(args.batch_size);

    let normalizer = Normalizer::new(DelimitedConfig {
        delimiter: args.delimiter,
        ..DelimitedConfig::csv()
    });

    let mut coordinator = Coordinator::new(SourceMap::olist()?, Arc::new(staging), Arc::new(merge))
        .with_normalizer(normalizer);
    if let Some(events) = args.events {
        coordinator = coordinator.with_events(events);
    }

    Ok(Pipeline { coordinator })
}

/// Run a full batch over `folder` using settings from the environment
///
/// This is the single entry point for interactive callers: it always returns
/// a `(success, message)` pair, including for configuration errors.
///
/// # Example
///
/// ```no_run
/// use olist_staging_loader::runner::run_olist_etl;
///
/// # async fn example() {
/// let (success, message) = run_olist_etl("/data/olist/raw").await;
/// println!("{} {}", if success { "OK" } else { "FAILED" }, message);
/// # }
/// ```
pub async fn run_olist_etl(folder: impl AsRef<Path>) -> (bool, String) {
    match prepare(RunArgs::default()).await {
        Ok(pipeline) => pipeline.run(folder).await.into_pair(),
        Err(e) => (false, format!("ETL process FAILED: {:#}", e)),
    }
}

/// Render batch events as a progress bar until the sender side closes
///
/// Returns the final aggregated stats once the channel drains.
pub fn spawn_progress(mut events: mpsc::UnboundedReceiver<BatchEvent>) -> JoinHandle<BatchStats> {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] Files: [{bar:30.cyan/blue}] {pos}/{len} | {msg}")
    {
        bar.set_style(style.progress_chars("=>-"));
    }

    tokio::spawn(async move {
        let mut stats = BatchStats::new();

        while let Some(event) = events.recv().await {
            stats.update(&event);

            bar.set_length(stats.total_files as u64);
            bar.set_position(stats.files_done as u64);
            match &event {
                BatchEvent::FileSkipped { file_name, reason } => {
                    bar.set_message(format!("skipped {} ({})", file_name, reason));
                }
                BatchEvent::TableLoaded { table_name, rows } => {
                    bar.set_message(format!("{} rows -> {}", rows, table_name));
                }
                BatchEvent::TableFailed { table_name } => {
                    bar.set_message(format!("failed loading {}", table_name));
                }
                BatchEvent::MergeStarted => bar.set_message("running warehouse merge"),
                BatchEvent::BatchStarted { .. } | BatchEvent::BatchFinished { .. } => {}
            }
        }

        bar.finish_with_message(format!(
            "{} tables loaded, {} files skipped, {} rows",
            stats.tables_loaded, stats.files_skipped, stats.rows_loaded
        ));
        stats
    })
}

/// Result of a configuration and connectivity check
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckReport {
    /// (staging table, exists)
    pub tables: Vec<(String, bool)>,
    /// (expected file, present in the folder); empty when no folder was given
    pub files: Vec<(String, bool)>,
}

impl CheckReport {
    pub fn all_tables_present(&self) -> bool {
        self.tables.iter().all(|(_, exists)| *exists)
    }
}

/// Connect and report which staging tables exist and which expected files are
/// present, without loading anything
pub async fn check(args: RunArgs, folder: Option<PathBuf>) -> Result<CheckReport> {
    let pool = open_pool(&args).await?;
    let sources = SourceMap::olist()?;

    let mut tables = Vec::with_capacity(sources.len());
    for source in sources.entries() {
        let columns = pool
            .fetch_column_names(&source.table_name)
            .await
            .with_context(|| format!("Failed to inspect table {}", source.table_name))?;
        tables.push((source.table_name.clone(), !columns.is_empty()));
    }

    let mut files = Vec::new();
    if let Some(folder) = folder {
        for source in sources.entries() {
            let present = tokio::fs::try_exists(folder.join(&source.file_name))
                .await
                .unwrap_or(false);
            files.push((source.file_name.clone(), present));
        }
    }

    Ok(CheckReport { tables, files })
}
