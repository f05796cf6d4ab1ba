//! # datezip CLI - dated backups for a workspace
//!
//! Command-line front end for the datezip engine.
//!
//! ## Usage
//! ```bash
//! # Initialize a store in the current directory
//! datezip init
//!
//! # Back up (auto decides FULL or INC)
//! datezip backup
//! datezip backup --full
//!
//! # Inspect
//! datezip list
//! datezip history --files src/main.rs --from 20240216_000000
//! datezip show 20240216_143000 src/main.rs
//!
//! # Roll back one file, or the whole project
//! datezip restore 20240216_143000 --files src/main.rs
//! datezip restore 20240216_143000 --prune
//!
//! # Prune old chains
//! datezip cleanup --keep-full 3 --keep-days 30
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use datezip::retention::plan_cleanup;
use datezip::utils::format_bytes;
use datezip::{
    BackupMode, CompressionStrategy, Datezip, DatezipBuilder, DatezipError, HistoryQuery, RestoreRequest,
    RestoreType, RetentionPolicy, Timestamp, DEFAULT_STORE_DIR,
};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// datezip - chained full and incremental backups for a workspace
#[derive(Parser)]
#[command(name = "datezip")]
#[command(version)]
#[command(about = "Point-in-time backup and restore for a project workspace")]
#[command(long_about = None)]
struct Cli {
    /// Workspace directory (defaults to current)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Store directory (defaults to <path>/.datezip)
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// How long to wait for another backup or cleanup, e.g. "5s"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    lock_wait: Option<Duration>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a store
    Init {
        /// Section compression
        #[arg(long, value_enum, default_value = "adaptive")]
        compression: CompressionMode,

        /// Ignore patterns (gitignore syntax)
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Archive file prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Archive file extension
        #[arg(long)]
        extension: Option<String>,
    },

    /// Create a backup
    #[command(alias = "b")]
    Backup {
        /// Start a new chain
        #[arg(long, conflicts_with = "inc")]
        full: bool,

        /// Extend the active chain
        #[arg(long)]
        inc: bool,

        /// Show a spinner
        #[arg(long)]
        progress: bool,
    },

    /// List archives
    #[command(alias = "ls")]
    List {
        /// Show size and chain details
        #[arg(short, long)]
        detailed: bool,
    },

    /// Show per-file change history
    History {
        /// Only these paths
        #[arg(long, value_delimiter = ',')]
        files: Vec<String>,

        /// Inclusive lower bound (YYYYMMDD_HHMMSS)
        #[arg(long, value_parser = parse_timestamp)]
        from: Option<Timestamp>,

        /// Inclusive upper bound (YYYYMMDD_HHMMSS)
        #[arg(long, value_parser = parse_timestamp)]
        to: Option<Timestamp>,
    },

    /// Print a file as of a timestamp without touching the workspace
    Show {
        /// Archive timestamp
        #[arg(value_parser = parse_timestamp)]
        timestamp: Timestamp,

        /// Workspace-relative path
        file: String,
    },

    /// Restore files as of a timestamp
    #[command(alias = "rs")]
    Restore {
        /// Archive timestamp
        #[arg(value_parser = parse_timestamp)]
        timestamp: Timestamp,

        /// Only these paths
        #[arg(long, value_delimiter = ',')]
        files: Vec<String>,

        /// Output directory (defaults to the workspace)
        #[arg(long)]
        dest: Option<PathBuf>,

        /// e: fold the chain, j: just this archive
        #[arg(long = "type", value_enum, default_value = "e")]
        restore_type: RestoreMode,

        /// Delete files absent from the restored state
        #[arg(long, conflicts_with = "files")]
        prune: bool,
    },

    /// Remove old chains
    Cleanup {
        /// Newest chains to keep regardless of age
        #[arg(long)]
        keep_full: Option<usize>,

        /// Remove other chains at least this many days old
        #[arg(long)]
        keep_days: Option<u32>,

        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Show store status
    Status,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CompressionMode {
    None,
    Fast,
    Adaptive,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum RestoreMode {
    E,
    J,
}

fn parse_timestamp(s: &str) -> std::result::Result<Timestamp, String> {
    s.parse().map_err(|e: DatezipError| e.to_string())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("datezip=debug"))
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_writer(std::io::stderr)
            .init();
    }

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<DatezipError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Workspace and store locations plus per-invocation overrides
struct Context {
    root: PathBuf,
    store: PathBuf,
    lock_wait: Option<Duration>,
}

impl Context {
    fn builder(&self) -> DatezipBuilder {
        let builder = DatezipBuilder::new();
        match self.lock_wait {
            Some(wait) => builder.lock_wait(wait),
            None => builder,
        }
    }

    fn open(&self) -> Result<Datezip> {
        Ok(self.builder().open(self.root.clone(), self.store.clone())?)
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let store = cli.store.unwrap_or_else(|| root.join(DEFAULT_STORE_DIR));
    let ctx = Context {
        root,
        store,
        lock_wait: cli.lock_wait,
    };

    match cli.command {
        Commands::Init {
            compression,
            ignore,
            prefix,
            extension,
        } => cmd_init(&ctx, compression, ignore, prefix, extension),
        Commands::Backup { full, inc, progress } => {
            let mode = match (full, inc) {
                (true, _) => BackupMode::Full,
                (_, true) => BackupMode::Inc,
                _ => BackupMode::Auto,
            };
            cmd_backup(&ctx, mode, progress)
        }
        Commands::List { detailed } => cmd_list(&ctx, detailed),
        Commands::History { files, from, to } => cmd_history(&ctx, files, from, to),
        Commands::Show { timestamp, file } => cmd_show(&ctx, timestamp, &file),
        Commands::Restore {
            timestamp,
            files,
            dest,
            restore_type,
            prune,
        } => cmd_restore(&ctx, timestamp, files, dest, restore_type, prune),
        Commands::Cleanup {
            keep_full,
            keep_days,
            dry_run,
        } => cmd_cleanup(&ctx, keep_full, keep_days, dry_run),
        Commands::Status => cmd_status(&ctx),
    }
}

fn cmd_init(
    ctx: &Context,
    compression: CompressionMode,
    ignore: Vec<String>,
    prefix: Option<String>,
    extension: Option<String>,
) -> Result<()> {
    println!("{}", "Initializing datezip...".blue().bold());

    let compression = match compression {
        CompressionMode::None => CompressionStrategy::None,
        CompressionMode::Fast => CompressionStrategy::Fast,
        CompressionMode::Adaptive => CompressionStrategy::default(),
    };
    let mut builder = ctx.builder().compression_strategy(compression).ignore_patterns(ignore);
    if prefix.is_some() || extension.is_some() {
        builder = builder.naming(
            prefix.unwrap_or_else(|| "datezip".to_string()),
            extension.unwrap_or_else(|| "dzip".to_string()),
        );
    }
    builder.init(ctx.root.clone(), ctx.store.clone())?;

    println!("{} Initialized datezip store", "✓".green().bold());
    println!("  Workspace: {}", ctx.root.display().to_string().cyan());
    println!("  Store: {}", ctx.store.display().to_string().cyan());
    println!("\nNext steps:");
    println!("  - Create your first backup: {}", "datezip backup --full".yellow());
    println!("  - See what changed: {}", "datezip history".yellow());
    Ok(())
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn cmd_backup(ctx: &Context, mode: BackupMode, show_progress: bool) -> Result<()> {
    let datezip = ctx.open()?;
    let start = Instant::now();
    let progress = show_progress.then(|| spinner("Scanning workspace..."));

    let report = datezip.create_backup(mode);
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let report = report?;

    println!("{} Created {}", "✓".green().bold(), report.archive.file_name.yellow().bold());
    if let Some(pred) = report.predecessor {
        println!("  Predecessor: {}", pred.to_string().dimmed());
    }
    println!("  Stored: {} files ({})", report.files_stored.to_string().cyan(), format_bytes(report.bytes_stored).cyan());
    if report.files_deleted > 0 {
        println!("  Deleted: {} files", report.files_deleted.to_string().yellow());
    }
    println!("  Archive size: {}", format_bytes(report.archive.size_bytes).cyan());
    println!("  Time: {}", format_duration(start.elapsed()).to_string().cyan());
    Ok(())
}

fn cmd_list(ctx: &Context, detailed: bool) -> Result<()> {
    let datezip = ctx.open()?;
    let index = datezip.index()?;
    if index.is_empty() {
        println!("{}", "No backups found.".yellow());
        return Ok(());
    }

    for (n, archive) in index.archives().iter().enumerate() {
        println!("[{}] {}", n + 1, archive.file_name);
        if detailed {
            let chain = match index.chain_of(archive.timestamp) {
                Some(chain) => format!("chain {}", chain.ordinal() + 1),
                None => "orphan".red().to_string(),
            };
            println!("    {} | {}", format_bytes(archive.size_bytes).dimmed(), chain.dimmed());
        }
    }
    Ok(())
}

fn cmd_history(ctx: &Context, files: Vec<String>, from: Option<Timestamp>, to: Option<Timestamp>) -> Result<()> {
    let datezip = ctx.open()?;
    let mut query = HistoryQuery::new();
    if !files.is_empty() {
        query = query.files(files);
    }
    if let Some(from) = from {
        query = query.from(from);
    }
    if let Some(to) = to {
        query = query.to(to);
    }

    let entries = datezip.get_history(&query)?;
    if entries.is_empty() {
        eprintln!("{}", "No history entries.".yellow());
    }
    for entry in entries {
        println!("{}", entry);
    }
    Ok(())
}

fn cmd_show(ctx: &Context, timestamp: Timestamp, file: &str) -> Result<()> {
    let datezip = ctx.open()?;
    let content = datezip.read_file_at(timestamp, file)?;
    print!("{}", String::from_utf8_lossy(&content));
    Ok(())
}

fn cmd_restore(
    ctx: &Context,
    timestamp: Timestamp,
    files: Vec<String>,
    dest: Option<PathBuf>,
    restore_type: RestoreMode,
    prune: bool,
) -> Result<()> {
    let datezip = ctx.open()?;
    let restore_type = match restore_type {
        RestoreMode::E => RestoreType::Everything,
        RestoreMode::J => RestoreType::Just,
    };
    let mut request = RestoreRequest::new(timestamp).restore_type(restore_type).prune(prune);
    if !files.is_empty() {
        request = request.files(files);
    }
    if let Some(dest) = dest {
        request = request.destination(dest);
    }

    println!("{} {} ({})", "Restoring".blue().bold(), timestamp.to_string().yellow(), restore_type);
    let result = datezip.restore(&request)?;

    println!("{} Restored {} files", "✓".green().bold(), result.files_restored.to_string().cyan());
    if result.files_removed > 0 {
        println!("  Removed: {} files", result.files_removed.to_string().yellow());
    }
    println!("  Written: {}", format_bytes(result.bytes_written).cyan());
    println!("  Destination: {}", result.destination.display());
    println!("  Time: {}", format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan());
    Ok(())
}

fn cmd_cleanup(ctx: &Context, keep_full: Option<usize>, keep_days: Option<u32>, dry_run: bool) -> Result<()> {
    let datezip = ctx.open()?;
    let defaults = datezip.config().retention;
    let policy = RetentionPolicy {
        keep_full: keep_full.unwrap_or(defaults.keep_full),
        keep_days: keep_days.unwrap_or(defaults.keep_days),
    };

    if dry_run {
        let plan = plan_cleanup(&datezip.index()?, &policy, Timestamp::now());
        if plan.is_empty() {
            println!("{}", "Nothing to remove.".green());
            return Ok(());
        }
        println!("{}", "Would remove:".blue().bold());
        for archive in plan.chains.iter().flatten().chain(plan.orphans.iter()) {
            println!("  {}", archive.file_name);
        }
        println!("\n{}", format!("{} chains kept", plan.chains_kept).dimmed());
        return Ok(());
    }

    let report = datezip.cleanup(&policy)?;
    if report.removed.is_empty() {
        println!("{}", "Nothing to remove.".green());
    } else {
        for archive in &report.removed {
            println!("  {} {}", "-".red(), archive.file_name);
        }
        println!(
            "{} Removed {} archives ({} chains), reclaimed {}",
            "✓".green().bold(),
            report.removed.len(),
            report.chains_removed,
            format_bytes(report.bytes_reclaimed).cyan()
        );
    }
    println!("  Chains kept: {}", report.chains_kept);
    Ok(())
}

fn cmd_status(ctx: &Context) -> Result<()> {
    let datezip = ctx.open()?;
    let status = datezip.status()?;

    println!("{}", "datezip status:".blue().bold());
    println!();
    match status.head {
        Some(head) => {
            println!("{}", "Active chain:".bold());
            println!("  Full: {}", head.full.to_string().yellow());
            println!("  Head: {}", head.head.to_string().yellow());
            println!("  Incrementals: {}", head.incrementals);
        }
        None => println!("{}", "No backups yet".yellow()),
    }

    println!("\n{}", "Store:".bold());
    println!("  Location: {}", status.store.display());
    println!("  Archives: {} in {} chains", status.archives, status.chains);
    if status.orphans > 0 {
        println!("  Orphans: {}", status.orphans.to_string().red());
    }
    println!("  Archive bytes: {}", format_bytes(status.archive_bytes));
    println!("  Size on disk: {}", format_bytes(status.store_bytes));
    Ok(())
}
