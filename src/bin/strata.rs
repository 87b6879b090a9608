//! Binary entry point for the Strata administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use strata::{Registry, ResourceConfig, RevisionInfo, RevisioningKind, Session, SessionStats};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    version,
    about = "Administrative CLI for Strata resources",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a resource directory
    Init {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, value_enum, default_value_t = RevisioningArg::Incremental)]
        revisioning: RevisioningArg,
        #[arg(long, value_name = "N", help = "Fragments a page may be rebuilt from")]
        restore: Option<u32>,
    },
    /// Show configuration, latest revision and cache counters
    Info {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// List committed revisions
    Log {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Print the value stored under a node key
    Get {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        key: u64,
        #[arg(long, help = "Revision to read (defaults to the latest)")]
        revision: Option<u64>,
    },
    /// Store a value under a node key and commit a new revision
    Put {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        key: u64,
        value: String,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RevisioningArg {
    FullDump,
    Incremental,
    Differential,
    SlidingSnapshot,
}

impl From<RevisioningArg> for RevisioningKind {
    fn from(value: RevisioningArg) -> Self {
        match value {
            RevisioningArg::FullDump => RevisioningKind::FullDump,
            RevisioningArg::Incremental => RevisioningKind::Incremental,
            RevisioningArg::Differential => RevisioningKind::Differential,
            RevisioningArg::SlidingSnapshot => RevisioningKind::SlidingSnapshot,
        }
    }
}

#[derive(Serialize)]
struct InfoReport {
    dir: String,
    config: ResourceConfig,
    stats: SessionStats,
}

#[derive(Serialize)]
struct GetReport {
    key: u64,
    revision: u64,
    value: Option<String>,
}

#[derive(Serialize)]
struct PutReport {
    key: u64,
    revision: u64,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let registry = Registry::new();

    match cli.command {
        Command::Init {
            dir,
            revisioning,
            restore,
        } => {
            let mut config = ResourceConfig::new().with_revisioning(revisioning.into());
            if let Some(restore) = restore {
                config = config.with_revisions_to_restore(restore);
            }
            let session = registry.create_resource(&dir, config)?;
            let report = info_report(&dir, &session);
            emit(cli.format, &report, || print_info_text(&report))?;
        }
        Command::Info { dir } => {
            let session = registry.open_resource(&dir)?;
            let report = info_report(&dir, &session);
            emit(cli.format, &report, || print_info_text(&report))?;
        }
        Command::Log { dir } => {
            let session = registry.open_resource(&dir)?;
            let revisions = session.revisions()?;
            emit(cli.format, &revisions, || print_log_text(&revisions))?;
        }
        Command::Get { dir, key, revision } => {
            let session = registry.open_resource(&dir)?;
            let rtx = match revision {
                Some(rev) => session.begin_read(rev)?,
                None => session.begin_read_latest()?,
            };
            let value = rtx
                .get_node(key)?
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
            let report = GetReport {
                key,
                revision: rtx.revision().0,
                value,
            };
            emit(cli.format, &report, || match &report.value {
                Some(value) => println!("{value}"),
                None => println!("(none)"),
            })?;
        }
        Command::Put { dir, key, value } => {
            let session = registry.open_resource(&dir)?;
            let mut wtx = session.begin_write()?;
            wtx.set_node(key, value.as_bytes())?;
            let revision = wtx.commit()?;
            let report = PutReport {
                key,
                revision: revision.0,
            };
            emit(cli.format, &report, || {
                println!("committed revision {}", report.revision)
            })?;
        }
    }
    registry.close_all()?;
    Ok(())
}

fn info_report(dir: &std::path::Path, session: &Session) -> InfoReport {
    InfoReport {
        dir: dir.display().to_string(),
        config: session.config().clone(),
        stats: session.stats(),
    }
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_info_text(report: &InfoReport) {
    println!("Resource: {}", report.dir);
    println!(
        "  revisioning={} revisions_to_restore={}",
        report.config.revisioning, report.config.revisions_to_restore
    );
    println!(
        "  cache_pages={} reader_pool_size={} txn_page_cache={}",
        report.config.cache_pages, report.config.reader_pool_size, report.config.txn_page_cache
    );
    println!("  latest_revision={}", report.stats.latest_revision);
    println!(
        "Cache: hits={} misses={} evictions={} resident={}",
        report.stats.cache.hits,
        report.stats.cache.misses,
        report.stats.cache.evictions,
        report.stats.cache.resident
    );
}

fn print_log_text(revisions: &[RevisionInfo]) {
    for info in revisions {
        let max_key = info
            .max_node_key
            .map_or_else(|| "-".to_string(), |k| k.to_string());
        println!(
            "r{:<6} ts={} size={} max_key={}",
            info.revision, info.timestamp_ms, info.revision_size, max_key
        );
    }
}
