use clap::{Parser, Subcommand};
use olist_staging_loader::runner::{
    BatchOutcome, DEFAULT_BATCH_SIZE, FileStatus, RunArgs, check, prepare, spawn_progress,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;

const EXIT_BATCH_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Clone)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Load the raw Olist extracts into staging and run the warehouse merge
    Run {
        /// Folder holding the raw Olist CSV files
        #[arg(short, long)]
        folder: PathBuf,

        /// Rows per INSERT statement
        #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Field delimiter of the raw files
        #[arg(short, long, default_value_t = ',')]
        delimiter: char,

        /// Stored procedure that merges staging into the warehouse (default: $DW_MERGE_PROCEDURE)
        #[arg(short, long)]
        procedure: Option<String>,

        /// Quiet mode - minimal output, only show summary
        #[arg(short, long)]
        quiet: bool,

        /// Print the batch summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check database settings, staging tables and (optionally) the raw folder
    Check {
        /// Folder holding the raw Olist CSV files
        #[arg(short, long)]
        folder: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match args.command {
        Command::Run {
            folder,
            batch_size,
            delimiter,
            procedure,
            quiet,
            json,
        } => {
            init_tracing(quiet || json);
            if !delimiter.is_ascii() {
                eprintln!("Configuration error: delimiter must be a single ASCII character");
                return ExitCode::from(EXIT_CONFIG);
            }
            let args = RunArgs {
                batch_size,
                delimiter: delimiter as u8,
                merge_procedure: procedure,
                ..Default::default()
            };
            run_command(folder, args, quiet || json, json).await
        }
        Command::Check { folder } => {
            init_tracing(false);
            check_command(folder).await
        }
    }
}

fn init_tracing(quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let default = if quiet {
        "olist_staging_loader=warn,sqlx=warn"
    } else {
        "olist_staging_loader=info,sqlx=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run_command(folder: PathBuf, mut args: RunArgs, quiet: bool, json: bool) -> ExitCode {
    if !quiet {
        println!("Olist Staging Loader");
        println!("====================");
        println!("Folder: {}", folder.display());
        println!("Batch size: {}", args.batch_size);
        println!();
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    args.events = (!quiet).then_some(events_tx);

    let pipeline = match prepare(args).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let progress = (!quiet).then(|| spawn_progress(events_rx));
    let outcome = pipeline.run(&folder).await;

    // Dropping the pipeline closes the event channel so the progress task can finish
    drop(pipeline);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    if json {
        match serde_json::to_string_pretty(&outcome) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to render summary: {}", e),
        }
    } else {
        print_summary(&outcome);
    }

    if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_BATCH_FAILED)
    }
}

fn print_summary(outcome: &BatchOutcome) {
    println!();
    println!("Batch Summary");
    println!("=============");
    println!("Batch ID: {}", outcome.batch_id);
    println!("Started: {}", outcome.started_at);
    for file in &outcome.files {
        let status = match &file.status {
            FileStatus::Loaded {
                rows,
                duplicates_dropped,
            } => format!(
                "loaded {} rows ({} duplicates dropped)",
                rows, duplicates_dropped
            ),
            FileStatus::Missing => "missing, skipped".to_string(),
            FileStatus::Unreadable { reason } => format!("unreadable, skipped: {}", reason),
            FileStatus::Empty => "no data, skipped".to_string(),
            FileStatus::Failed { cause } => format!("FAILED: {}", cause),
            FileStatus::NotAttempted => "not attempted".to_string(),
        };
        println!("  {:<45} -> {:<28} {}", file.file_name, file.table_name, status);
    }
    println!(
        "Warehouse merge: {}",
        if outcome.merge_invoked { "invoked" } else { "not invoked" }
    );
    println!("Duration: {:.2}s", outcome.duration_secs);
    println!();
    println!("{}", outcome.message);
}

async fn check_command(folder: Option<PathBuf>) -> ExitCode {
    let report = match check(RunArgs::default(), folder).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    println!("Staging tables:");
    for (table, exists) in &report.tables {
        println!("  {:<32} {}", table, if *exists { "ok" } else { "MISSING" });
    }
    if !report.files.is_empty() {
        println!("Raw files:");
        for (file, present) in &report.files {
            println!("  {:<45} {}", file, if *present { "present" } else { "absent" });
        }
    }

    if report.all_tables_present() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_BATCH_FAILED)
    }
}
