//! mneme CLI tool
//!
//! Command-line interface for syncing and serving a mneme knowledge
//! repository.
//!
//! ## Commands
//!
//! - `sync [--watch] [--full]`: reconcile the tree with the index
//! - `status`: show what a sync would do, without applying it
//! - `serve`: run the HTTP facade
//!
//! ## Exit codes
//!
//! - 0: success
//! - 1: user error (bad path, validation)
//! - 2: sync completed but some files failed
//! - 3: unrecoverable (cannot open store)

use clap::{Parser, Subcommand};
use mneme_core::{
    api::{router, AppState},
    config::ProjectConfig,
    error::MnemeError,
    store::db_init,
    sync::{watch::{WatchEvent, WatchService}, SyncReport, SyncService},
};
use std::{path::PathBuf, process::ExitCode, sync::Arc};

#[derive(Parser)]
#[command(name = "mneme")]
#[command(author, version, about = "A file-native knowledge graph over markdown notes", long_about = None)]
struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the markdown tree with the index
    Sync {
        /// Show every touched path instead of a one-line summary
        #[arg(short, long)]
        verbose: bool,

        /// Keep watching for changes after the initial pass
        #[arg(short, long)]
        watch: bool,

        /// Also rebuild the search index from the store
        #[arg(long)]
        full: bool,
    },

    /// Show pending changes without applying them
    Status {
        /// Show every pending path
        #[arg(short, long)]
        verbose: bool,
    },

    /// Serve the HTTP facade
    Serve {
        /// Port to bind on 127.0.0.1
        #[arg(long, default_value_t = 8765)]
        port: u16,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let root = cli
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    if !root.is_dir() {
        eprintln!("Error: {:?} is not a directory", root);
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: cannot start runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli, root)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli, root: PathBuf) -> Result<ExitCode, MnemeError> {
    let config = ProjectConfig::load(&root)?;
    let pool = db_init(&config.database_path()).await?;
    let sync = Arc::new(SyncService::new(config, pool));

    match cli.command {
        Commands::Sync {
            verbose,
            watch,
            full,
        } => {
            if full {
                sync.full_reindex().await?;
            }
            let report = sync.sync().await?;
            display_report(&report, verbose);
            if watch {
                run_watch(sync, verbose).await?;
                return Ok(ExitCode::SUCCESS);
            }
            if report.failed.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }
        Commands::Status { verbose } => {
            let report = sync.status().await?;
            display_report(&report, verbose);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Serve { port } => {
            let state = AppState::new(sync);
            let app = router(state);
            let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| MnemeError::Io(format!("cannot bind {addr}: {e}")))?;
            println!("Serving on http://{addr}");
            axum::serve(listener, app.into_make_service())
                .await
                .map_err(|e| MnemeError::Io(format!("server error: {e}")))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_watch(sync: Arc<SyncService>, verbose: bool) -> Result<(), MnemeError> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<WatchEvent>();
    let service = WatchService::start(sync, tx)?;
    println!("Watching for changes (ctrl-c to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            event = rx.recv() => {
                match event {
                    Some(WatchEvent::Synced(report)) => display_report(&report, verbose),
                    Some(WatchEvent::Failed(error)) => eprintln!("Sync failed: {error}"),
                    None => break,
                }
            }
        }
    }
    service.stop();
    Ok(())
}

fn display_report(report: &SyncReport, verbose: bool) {
    if report.total_changes() == 0 && report.failed.is_empty() {
        println!("Everything up to date");
        return;
    }

    let mut changes = Vec::new();
    if !report.new.is_empty() {
        changes.push(format!("{} new", report.new.len()));
    }
    if !report.modified.is_empty() {
        changes.push(format!("{} modified", report.modified.len()));
    }
    if !report.moves.is_empty() {
        changes.push(format!("{} moved", report.moves.len()));
    }
    if !report.deleted.is_empty() {
        changes.push(format!("{} deleted", report.deleted.len()));
    }
    if !report.failed.is_empty() {
        changes.push(format!("{} failed", report.failed.len()));
    }
    println!(
        "Synced {} files ({})",
        report.total_changes(),
        changes.join(", ")
    );

    if verbose {
        for path in &report.new {
            let checksum = report.checksums.get(path).map(String::as_str).unwrap_or("");
            println!("  created  {path} ({})", &checksum[..checksum.len().min(8)]);
        }
        for path in &report.modified {
            let checksum = report.checksums.get(path).map(String::as_str).unwrap_or("");
            println!("  modified {path} ({})", &checksum[..checksum.len().min(8)]);
        }
        for (old, new) in &report.moves {
            println!("  moved    {old} -> {new}");
        }
        for path in &report.deleted {
            println!("  deleted  {path}");
        }
        for failure in &report.failed {
            println!("  failed   {} ({})", failure.path, failure.error);
        }
        for path in &report.pending {
            println!("  pending  {path}");
        }
    }
}
