/// Progress events sent from the orchestrator to whoever renders the batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// Batch started over a folder with this many expected files
    BatchStarted { total_files: usize },
    /// A file was skipped (missing, unreadable or empty)
    FileSkipped { file_name: String, reason: String },
    /// A staging table was replaced
    TableLoaded { table_name: String, rows: u64 },
    /// A staging table could not be replaced; the batch stops
    TableFailed { table_name: String },
    /// The warehouse merge is running
    MergeStarted,
    /// The batch reached a terminal state
    BatchFinished { success: bool },
}

/// Statistics aggregated from batch events
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchStats {
    pub total_files: usize,
    pub files_done: usize,
    pub tables_loaded: usize,
    pub files_skipped: usize,
    pub rows_loaded: u64,
    pub merge_started: bool,
    pub finished: Option<bool>,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a batch event
    pub fn update(&mut self, event: &BatchEvent) {
        match event {
            BatchEvent::BatchStarted { total_files } => {
                self.total_files = *total_files;
            }
            BatchEvent::FileSkipped { .. } => {
                self.files_done += 1;
                self.files_skipped += 1;
            }
            BatchEvent::TableLoaded { rows, .. } => {
                self.files_done += 1;
                self.tables_loaded += 1;
                self.rows_loaded += rows;
            }
            BatchEvent::TableFailed { .. } => {
                self.files_done += 1;
            }
            BatchEvent::MergeStarted => {
                self.merge_started = true;
            }
            BatchEvent::BatchFinished { success } => {
                self.finished = Some(*success);
            }
        }
    }
}
