use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use sheet_ingest::infer::process_workbook;
use sheet_ingest::io::{dump, load_workbook};
use sheet_ingest::store::{CacheEviction, RevisionStore};
use sheet_ingest::{IngestConfig, IngestError, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB: &str = "revisions.sqlite";

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging().and_then(|()| run(cli)) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "sheet_ingest=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| IngestError::Logging(error.to_string()))
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Dump(args) => execute_dump(args),
        Command::Inspect(args) => execute_inspect(args),
        Command::Store { db, action } => execute_store(&db, action),
        Command::Cache { db, action } => execute_cache(&db, action),
    }
}

fn load_config(args: &WorkbookArgs) -> Result<IngestConfig> {
    let config = match &args.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };
    Ok(match args.early_stop {
        Some(rows) => config.with_early_stop(Some(rows)),
        None => config,
    })
}

fn execute_dump(args: DumpArgs) -> Result<()> {
    let config = load_config(&args.workbook)?;
    let mut workbook = load_workbook(&args.workbook.input)?;
    let report = process_workbook(&mut workbook, &config);
    let written = dump::dump_report(&report, &args.out_dir)?;
    info!(
        files = written.len(),
        skipped = report.skipped_sheets.len(),
        failed = report.failed_sheets.len(),
        "dump complete"
    );
    Ok(())
}

fn execute_inspect(args: WorkbookArgs) -> Result<()> {
    let config = load_config(&args)?;
    let mut workbook = load_workbook(&args.input)?;
    let report = process_workbook(&mut workbook, &config);

    for outcome in &report.outcomes {
        let keyed = outcome
            .records
            .iter()
            .filter(|record| record.document_key.is_some())
            .count();
        println!(
            "{}\t{}\trows {:?}\trecords {}\tkeyed {}\theaders {}",
            outcome.sheet_name,
            outcome.sheet_type,
            outcome.header.header_rows,
            outcome.total_items(),
            keyed,
            outcome.headers.join(" | ")
        );
    }
    for name in &report.skipped_sheets {
        println!("{name}\tskipped (hidden)");
    }
    for (name, error) in &report.failed_sheets {
        println!("{name}\tfailed: {error}");
    }
    Ok(())
}

fn execute_store(db: &Path, action: StoreAction) -> Result<()> {
    let store = RevisionStore::open(db)?;
    match action {
        StoreAction::Stats => {
            let stats = store.statistics()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        StoreAction::List { dataset } => {
            let records = match dataset {
                Some(dataset_id) => store.documents_for_dataset(&dataset_id)?.into_values().collect(),
                None => store.all_documents()?,
            };
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        StoreAction::Delete { key, dataset } => {
            let removed = store.delete_document(&key, &dataset)?;
            println!("removed {removed} document(s)");
        }
        StoreAction::Reset { confirm } => {
            if !confirm {
                return Err(IngestError::Refused(
                    "pass --confirm to reset the revision store".into(),
                ));
            }
            let removed = store.reset()?;
            println!("removed {removed} document(s)");
        }
    }
    Ok(())
}

fn execute_cache(db: &Path, action: CacheAction) -> Result<()> {
    let store = RevisionStore::open(db)?;
    match action {
        CacheAction::Clean { days, all, db_only } => {
            let eviction = if all {
                CacheEviction::All
            } else {
                CacheEviction::OlderThanDays(days)
            };
            let removed = store.clear_download_cache(eviction, !db_only)?;
            println!("removed {removed} cache entr{}", if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Infer document registers from Excel workbooks and track ingested revisions."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write one `<sheet>.processed.json` per visible sheet.
    Dump(DumpArgs),
    /// Print the inferred type, header and record count of every sheet.
    Inspect(WorkbookArgs),
    /// Query or maintain the revision store.
    Store {
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
        #[command(subcommand)]
        action: StoreAction,
    },
    /// Maintain the download cache.
    Cache {
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Args)]
struct WorkbookArgs {
    /// Workbook to read.
    #[arg(long)]
    input: PathBuf,

    /// JSON file overriding keyword tables and limits.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop scanning a sheet after this many consecutive empty rows.
    #[arg(long)]
    early_stop: Option<u32>,
}

#[derive(Args)]
struct DumpArgs {
    #[command(flatten)]
    workbook: WorkbookArgs,

    /// Directory receiving the JSON files.
    #[arg(long, default_value = "processed")]
    out_dir: PathBuf,
}

#[derive(Subcommand)]
enum StoreAction {
    /// Document counts per container and cache totals.
    Stats,
    /// List stored documents, optionally for one container.
    List {
        #[arg(long)]
        dataset: Option<String>,
    },
    /// Delete one document by exact key.
    Delete {
        #[arg(long)]
        key: String,
        #[arg(long)]
        dataset: String,
    },
    /// Remove every stored document.
    Reset {
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Evict download-cache entries.
    Clean {
        /// Evict entries not used within this many days.
        #[arg(long, default_value_t = 7)]
        days: u32,
        /// Evict every entry regardless of age.
        #[arg(long, conflicts_with = "days")]
        all: bool,
        /// Keep the downloaded files; only remove database rows.
        #[arg(long)]
        db_only: bool,
    },
}
