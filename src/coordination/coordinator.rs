use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::loader::{LoadError, StagingTarget};
use super::merge::{MergeError, WarehouseMerge};
use super::sources::{SourceFile, SourceMap};
use crate::formats::{NormalizeError, Normalizer};
use crate::telemetry::BatchEvent;

/// What happened to one expected file during a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Loaded { rows: u64, duplicates_dropped: usize },
    Missing,
    Unreadable { reason: String },
    Empty,
    Failed { cause: String },
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file_name: String,
    pub table_name: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// Result of one batch run
///
/// `success` and `message` are the caller-facing contract; the rest is detail
/// for display.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub batch_id: String,
    pub success: bool,
    pub message: String,
    pub started_at: String,
    pub duration_secs: f64,
    pub merge_invoked: bool,
    pub files: Vec<FileReport>,
}

impl BatchOutcome {
    pub fn into_pair(self) -> (bool, String) {
        (self.success, self.message)
    }

    pub fn tables_loaded(&self) -> impl Iterator<Item = &FileReport> {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Loaded { .. }))
    }
}

/// Conditions that end a batch as failed
#[derive(Debug, Error)]
enum BatchFailure {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// The Coordinator runs one batch: every expected file is normalized and
/// replaces its staging table, then the warehouse merge runs once.
pub struct Coordinator {
    sources: SourceMap,
    normalizer: Normalizer,
    staging: Arc<dyn StagingTarget>,
    merge: Arc<dyn WarehouseMerge>,
    events: Option<mpsc::UnboundedSender<BatchEvent>>,
}

impl Coordinator {
    pub fn new(
        sources: SourceMap,
        staging: Arc<dyn StagingTarget>,
        merge: Arc<dyn WarehouseMerge>,
    ) -> Self {
        Self {
            sources,
            normalizer: Normalizer::default(),
            staging,
            merge,
            events: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Send progress events to `events` while batches run
    pub fn with_events(mut self, events: mpsc::UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.events {
            // A closed receiver only means nobody is watching
            let _ = tx.send(event);
        }
    }

    /// Run the batch over `folder`
    ///
    /// Never fails: every outcome, including load and merge failures, is
    /// reported through the returned [`BatchOutcome`].
    pub async fn run_batch(&self, folder: &Path) -> BatchOutcome {
        let start_instant = Instant::now();
        let started_at = Utc::now().to_rfc3339();
        let batch_id = Uuid::new_v4().to_string();

        info!(
            "=== Starting Olist ETL batch from folder: {} ===",
            folder.display()
        );
        self.emit(BatchEvent::BatchStarted {
            total_files: self.sources.len(),
        });

        let mut files: Vec<FileReport> = self
            .sources
            .entries()
            .iter()
            .map(|source| FileReport {
                file_name: source.file_name.clone(),
                table_name: source.table_name.clone(),
                status: FileStatus::NotAttempted,
            })
            .collect();
        let mut merge_invoked = false;

        let result = self.process(folder, &mut files, &mut merge_invoked).await;

        let (success, message) = match result {
            Ok(()) => (
                true,
                format!(
                    "ETL completed successfully for raw folder: {}",
                    folder.display()
                ),
            ),
            Err(failure) => {
                let message = format!("ETL process FAILED: {}", failure);
                error!("{}", message);
                (false, message)
            }
        };

        self.emit(BatchEvent::BatchFinished { success });

        BatchOutcome {
            batch_id,
            success,
            message,
            started_at,
            duration_secs: start_instant.elapsed().as_secs_f64(),
            merge_invoked,
            files,
        }
    }

    async fn process(
        &self,
        folder: &Path,
        files: &mut [FileReport],
        merge_invoked: &mut bool,
    ) -> Result<(), BatchFailure> {
        let is_dir = tokio::fs::metadata(folder)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        if is_dir {
            for (source, report) in self.sources.entries().iter().zip(files.iter_mut()) {
                match self.process_file(folder, source).await {
                    Ok(status) => report.status = status,
                    Err(e) => {
                        report.status = FileStatus::Failed {
                            cause: e.cause.to_string(),
                        };
                        return Err(e.into());
                    }
                }
            }
        } else {
            // No folder means none of the files exist
            warn!(
                "[WARN] Raw folder {} not found, every file will be skipped",
                folder.display()
            );
            for (source, report) in self.sources.entries().iter().zip(files.iter_mut()) {
                self.skipped(source, "file not found");
                report.status = FileStatus::Missing;
            }
        }

        info!("Staging done, starting warehouse merge: {}", self.merge.name());
        self.emit(BatchEvent::MergeStarted);
        *merge_invoked = true;
        self.merge.merge().await?;

        Ok(())
    }

    /// Normalize and load one file; only a load failure is returned as an error
    async fn process_file(&self, folder: &Path, source: &SourceFile) -> Result<FileStatus, LoadError> {
        let path = folder.join(&source.file_name);

        let normalized = match self.normalizer.normalize(&path).await {
            Ok(normalized) => normalized,
            Err(NormalizeError::Missing { .. }) => {
                warn!("[WARN] File not found: {}, skipping...", path.display());
                self.skipped(source, "file not found");
                return Ok(FileStatus::Missing);
            }
            Err(NormalizeError::Read { path, cause }) => {
                warn!(
                    "[WARN] Could not read {}: {}, skipping...",
                    path.display(),
                    cause
                );
                let reason = cause.to_string();
                self.skipped(source, &reason);
                return Ok(FileStatus::Unreadable { reason });
            }
        };

        if normalized.dataset.is_empty() {
            info!("[SKIP] No data to load for {}", source.file_name);
            self.skipped(source, "no data rows");
            return Ok(FileStatus::Empty);
        }

        match self
            .staging
            .replace(&normalized.dataset, &source.table_name)
            .await
        {
            Ok(rows) => {
                self.emit(BatchEvent::TableLoaded {
                    table_name: source.table_name.clone(),
                    rows,
                });
                Ok(FileStatus::Loaded {
                    rows,
                    duplicates_dropped: normalized.report.duplicates_dropped,
                })
            }
            Err(e) => {
                self.emit(BatchEvent::TableFailed {
                    table_name: source.table_name.clone(),
                });
                Err(e)
            }
        }
    }

    fn skipped(&self, source: &SourceFile, reason: &str) {
        self.emit(BatchEvent::FileSkipped {
            file_name: source.file_name.clone(),
            reason: reason.to_string(),
        });
    }
}
