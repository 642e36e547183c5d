//! Terminal front end for a savepoint store kept in a single JSON file.
//!
//! Every subcommand opens the store fresh over a [`FileBackend`] in
//! `--data-dir`, runs one operation, and exits. Destructive commands
//! (`import`, `clear`) require `--yes`; writes are shielded from ctrl-c so
//! an interrupt changes the exit code without cancelling the operation
//! mid-flight.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use savepoint_core::clock::SystemClock;
use savepoint_core::snapshot::{self, Snapshot};
use savepoint_store::store::backends::FileBackend;
use savepoint_store::store::format_bytes;
use savepoint_store::{LoadOptions, PersistentStore, RemoveOptions, SaveOptions, StoreConfig};

const STORE_FILE: &str = "savepoint.json";

#[derive(Parser)]
#[command(
    name = "savepoint",
    version,
    about = "Inspect and manage a savepoint data store"
)]
struct Cli {
    /// Directory holding the store file.
    #[arg(
        long,
        global = true,
        env = "SAVEPOINT_DATA_DIR",
        default_value = ".",
        value_name = "DIR"
    )]
    data_dir: PathBuf,

    /// Key prefix namespacing this store inside the file.
    #[arg(long, global = true, value_name = "PREFIX")]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a snapshot of every record to a JSON file.
    Export {
        /// Output file; defaults to a date-stamped name in the working
        /// directory.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Replace the store's records with a snapshot's contents.
    Import {
        /// Snapshot file produced by `export`.
        #[arg(long, value_name = "FILE")]
        file: PathBuf,

        /// Confirm the destructive restore.
        #[arg(long)]
        yes: bool,
    },

    /// Probe the backing storage and report store health.
    Health,

    /// Summarize stored bytes and record counts.
    Usage,

    /// List every stored key.
    List,

    /// Print the payload stored under KEY.
    Get { key: String },

    /// Store a JSON payload under KEY.
    Set { key: String, payload: String },

    /// Delete the record stored under KEY.
    Remove {
        key: String,

        /// Also delete the key's rotated backups.
        #[arg(long)]
        backups: bool,
    },

    /// Delete every record under the store prefix.
    Clear {
        /// Confirm the destructive wipe.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("savepoint=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let store = open_store(&cli.data_dir, cli.prefix.clone())?;

    match cli.command {
        Commands::Export { out } => export(&store, out),
        Commands::Import { file, yes } => import(store, &file, yes).await,
        Commands::Health => Ok(health(&store)),
        Commands::Usage => Ok(usage(&store)),
        Commands::List => list(&store),
        Commands::Get { key } => get(&store, &key),
        Commands::Set { key, payload } => set(store, key, &payload).await,
        Commands::Remove { key, backups } => Ok(remove(&store, &key, backups)),
        Commands::Clear { yes } => clear(&store, yes),
    }
}

fn open_store(data_dir: &Path, prefix: Option<String>) -> anyhow::Result<Arc<PersistentStore>> {
    let path = data_dir.join(STORE_FILE);
    let backend = Arc::new(
        FileBackend::open(&path)
            .with_context(|| format!("cannot open store file {}", path.display()))?,
    );
    let mut config = StoreConfig::default();
    if let Some(prefix) = prefix {
        config.key_prefix = prefix;
    }
    Ok(Arc::new(PersistentStore::new(
        backend,
        config,
        Arc::new(SystemClock::new()),
    )))
}

// --- Commands ---

fn export(store: &PersistentStore, out: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let taken = store.export_all()?;
    let path = out.unwrap_or_else(|| PathBuf::from(snapshot::suggested_filename(Utc::now())));
    fs::write(&path, taken.encode_pretty()?)
        .with_context(|| format!("cannot write snapshot to {}", path.display()))?;
    println!("exported {} keys to {}", taken.len(), path.display());
    Ok(ExitCode::SUCCESS)
}

async fn import(store: Arc<PersistentStore>, file: &Path, yes: bool) -> anyhow::Result<ExitCode> {
    let raw = fs::read_to_string(file)
        .with_context(|| format!("cannot read snapshot file {}", file.display()))?;
    let parsed = Snapshot::decode(&raw).context("snapshot file is not valid JSON")?;
    if !parsed.verify() {
        bail!("snapshot checksum mismatch; refusing to import");
    }
    if !yes {
        bail!("import replaces every record under the prefix; rerun with --yes to confirm");
    }

    let count = parsed.len();
    let (imported, interrupted) = guarded(
        async move { store.import_all(&parsed).await },
        shutdown_signal(),
    )
    .await?;

    if imported {
        println!("imported {count} keys");
    } else {
        eprintln!("import failed; previous records were restored where possible");
    }
    Ok(finish(imported, interrupted))
}

fn health(store: &PersistentStore) -> ExitCode {
    let report = store.health_check();
    println!(
        "status: {}",
        if report.healthy { "healthy" } else { "unhealthy" }
    );
    println!("pending changes: {}", report.pending_changes);
    println!(
        "auto-save: {}",
        if report.auto_save_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    for issue in &report.issues {
        println!("issue: {issue}");
    }
    if report.healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn usage(store: &PersistentStore) -> ExitCode {
    let summary = store.usage();
    println!(
        "used: {} across {} primary, {} backup, {} meta records",
        format_bytes(summary.used_bytes),
        summary.primary_records,
        summary.backup_records,
        summary.meta_records
    );
    match (summary.capacity_bytes, summary.percent_used()) {
        (Some(capacity), Some(percent)) => {
            println!("capacity: {} ({percent:.1}% used)", format_bytes(capacity));
        }
        _ => println!("capacity: unbounded"),
    }
    ExitCode::SUCCESS
}

fn list(store: &PersistentStore) -> anyhow::Result<ExitCode> {
    for key in store.logical_keys()? {
        println!("{key}");
    }
    Ok(ExitCode::SUCCESS)
}

fn get(store: &PersistentStore, key: &str) -> anyhow::Result<ExitCode> {
    let payload = store.load(key, LoadOptions::default());
    if payload.is_null() {
        eprintln!("no readable record under {key}");
        return Ok(ExitCode::FAILURE);
    }
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(ExitCode::SUCCESS)
}

async fn set(store: Arc<PersistentStore>, key: String, payload: &str) -> anyhow::Result<ExitCode> {
    let value: Value = serde_json::from_str(payload).context("payload is not valid JSON")?;

    let shown = key.clone();
    let (saved, interrupted) = guarded(
        async move { store.save(&key, value, SaveOptions::default()).await },
        shutdown_signal(),
    )
    .await?;

    if saved {
        println!("saved {shown}");
    } else {
        eprintln!("save failed for {shown}; the key is parked as pending");
    }
    Ok(finish(saved, interrupted))
}

fn remove(store: &PersistentStore, key: &str, backups: bool) -> ExitCode {
    let removed = store.remove(
        key,
        RemoveOptions {
            remove_backups: backups,
        },
    );
    if removed {
        println!("removed {key}");
        ExitCode::SUCCESS
    } else {
        eprintln!("some deletions failed for {key}");
        ExitCode::FAILURE
    }
}

fn clear(store: &PersistentStore, yes: bool) -> anyhow::Result<ExitCode> {
    if !yes {
        bail!("clear deletes every record under the prefix; rerun with --yes to confirm");
    }
    let removed = store.clear_all();
    println!("cleared {removed} entries");
    Ok(ExitCode::SUCCESS)
}

// --- Interrupt handling ---

/// Runs `operation` on its own task and reports whether ctrl-c arrived.
///
/// The operation always runs to completion; an interrupt never cancels it
/// mid-write, it only flips the flag so the caller can exit with the
/// conventional signal status. Multi-record writes keep their rollback
/// behavior intact because the future is never dropped part-way.
async fn guarded<F, S>(operation: F, interrupt: S) -> anyhow::Result<(F::Output, bool)>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
    S: Future<Output = ()>,
{
    let mut handle = tokio::spawn(operation);
    tokio::select! {
        finished = &mut handle => Ok((finished.context("store operation panicked")?, false)),
        () = interrupt => {
            eprintln!("interrupt received; letting the in-flight write finish");
            let finished = handle.await.context("store operation panicked")?;
            Ok((finished, true))
        }
    }
}

/// Exit code for a guarded command: 130 when interrupted, otherwise the
/// operation's own outcome.
fn finish(ok: bool, interrupted: bool) -> ExitCode {
    if interrupted {
        ExitCode::from(130)
    } else if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        // With no signal hook the operation must run to completion.
        std::future::pending::<()>().await;
    }
}
