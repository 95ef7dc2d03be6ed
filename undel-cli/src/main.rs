/*!
Undel CLI - inspect, verify and sweep undo-event archives.

The archive is the compressed event log written by
[`undel_core::EventArchive`]. `sweep` expires every scheduled event whose
deadline has passed and writes the archive back; with `--watch` it keeps doing
so on a fixed interval until interrupted.
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tabled::{Table, Tabled};
use tracing::{debug, error, info};
use undel_core::{
    DeletionUndoManager, EventArchive, GzipCompressor, LocalFileStorage, MemoryDatabase,
    TypeRegistry, UndoConfig, UndoError, UndoEvent, UndoState,
};
use undel_retry::{permanent_error, sweep_backoff_policy, transient_error, with_custom_backoff};

const DEFAULT_ARCHIVE_PATH: &str = "./undel-events.json.gz";

#[derive(Parser)]
#[command(name = "undel")]
#[command(about = "Inspect and maintain undel undo-event archives")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Event archive to operate on
    #[arg(short, long, global = true, env = "UNDEL_ARCHIVE_PATH")]
    archive: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List undo events
    List {
        /// Only events in this state (scheduled, restored, expired, failed)
        #[arg(short, long)]
        state: Option<UndoState>,
    },
    /// Show one undo event
    Show {
        /// Undo token
        token: String,
        /// Print the stored snapshot as JSON
        #[arg(long)]
        snapshot: bool,
    },
    /// Verify the archive hash and every event's snapshot digest
    Verify,
    /// Expire scheduled events whose undo window has closed
    Sweep {
        /// Sweep as of this instant (RFC 3339) instead of now
        #[arg(long, conflicts_with = "watch")]
        now: Option<DateTime<Utc>>,
        /// Keep sweeping until interrupted
        #[arg(short, long)]
        watch: bool,
        /// Seconds between sweeps in watch mode
        #[arg(short, long, default_value_t = 60, env = "UNDEL_SWEEP_INTERVAL")]
        interval: u64,
        /// Print Prometheus metrics after a one-shot sweep
        #[arg(long)]
        metrics: bool,
    },
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Token")]
    token: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Deleted by")]
    deleted_by: String,
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Expires")]
    expires_at: String,
}

impl From<&UndoEvent> for EventRow {
    fn from(event: &UndoEvent) -> Self {
        Self {
            token: event.token(),
            resource: format!("{}#{}", event.resource_type, event.resource_id),
            label: event.metadata.resource_label.clone(),
            state: event.state.to_string(),
            deleted_by: event.deleted_by.clone().unwrap_or_else(|| "-".to_string()),
            created_at: format_timestamp(event.created_at),
            expires_at: format_timestamp(event.expires_at),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let archive_path = resolve_archive_path(cli.archive.clone())?;

    match cli.command {
        Commands::List { state } => list_events(&archive_path, state)?,
        Commands::Show { token, snapshot } => show_event(&archive_path, &token, snapshot)?,
        Commands::Verify => verify_archive(&archive_path)?,
        Commands::Sweep {
            now,
            watch,
            interval,
            metrics,
        } => {
            if watch {
                watch_sweep(archive_path, Duration::from_secs(interval.max(1))).await?;
            } else {
                let expired = sweep_once(&archive_path, now.unwrap_or_else(Utc::now))?;
                println!("Expired {expired} undo event(s)");
                if metrics {
                    print!("{}", undel_core::observability::gather_metrics()?);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// `--archive` / `UNDEL_ARCHIVE_PATH`, then the engine config, then the default
fn resolve_archive_path(flag: Option<PathBuf>) -> Result<PathBuf, anyhow::Error> {
    if let Some(path) = flag {
        return Ok(path);
    }
    let config = UndoConfig::from_env().context("invalid undel configuration")?;
    Ok(config
        .archive_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARCHIVE_PATH)))
}

fn open_archive() -> EventArchive<LocalFileStorage, GzipCompressor> {
    EventArchive::new(LocalFileStorage::new(), GzipCompressor::new())
}

fn load_events(path: &Path) -> Result<Vec<UndoEvent>, UndoError> {
    let archive = open_archive();
    let key = path.to_string_lossy();
    if !archive.exists(&key) {
        return Ok(Vec::new());
    }
    let (_, events) = archive.load_events(&key)?;
    Ok(events)
}

fn list_events(path: &Path, state: Option<UndoState>) -> Result<(), anyhow::Error> {
    info!("Listing undo events from {}", path.display());

    let events = load_events(path)?;
    let rows: Vec<EventRow> = events
        .iter()
        .filter(|event| state.map_or(true, |s| event.state == s))
        .map(EventRow::from)
        .collect();

    if rows.is_empty() {
        println!("No undo events found");
    } else {
        println!("{}", Table::new(rows));
    }
    Ok(())
}

fn show_event(path: &Path, token: &str, with_snapshot: bool) -> Result<(), anyhow::Error> {
    let events = load_events(path)?;
    let event = events
        .iter()
        .find(|event| event.token() == token.trim())
        .ok_or_else(|| UndoError::NotFound(token.to_string()))?;

    println!("Undo Event:");
    println!("  Token: {}", event.token());
    println!("  Resource: {}#{}", event.resource_type, event.resource_id);
    println!("  Label: {}", event.metadata.resource_label);
    println!("  DOM id: {}", event.metadata.resource_dom_id);
    println!("  Toast: {}", event.metadata.toast_message);
    println!("  State: {}", event.state);
    if let Some(reason) = &event.failure_reason {
        println!("  Failure: {reason}");
    }
    if let Some(actor) = &event.deleted_by {
        println!("  Deleted by: {actor}");
    }
    println!("  Created: {}", format_timestamp(event.created_at));
    println!("  Expires: {}", format_timestamp(event.expires_at));
    println!("  Snapshot digest: {}", event.snapshot_digest);
    println!("  Snapshot nodes: {}", event.snapshot.node_count());
    for (entity_type, count) in event.snapshot.type_counts() {
        println!("    {entity_type}: {count}");
    }

    if with_snapshot {
        println!("{}", serde_json::to_string_pretty(&event.snapshot)?);
    }
    Ok(())
}

fn verify_archive(path: &Path) -> Result<(), anyhow::Error> {
    info!("Verifying archive: {}", path.display());

    match open_archive().verify(&path.to_string_lossy()) {
        Ok(metadata) => {
            println!(
                "✓ Archive is valid: {} event(s), hash {}",
                metadata.event_count, metadata.content_hash
            );
            Ok(())
        }
        Err(UndoError::IntegrityCheckFailed { expected, actual }) => {
            error!("✗ Integrity check failed:");
            error!("  Expected hash: {}", expected);
            error!("  Actual hash: {}", actual);
            Err(anyhow::anyhow!("Integrity check failed"))
        }
        Err(e) => {
            error!("✗ Failed to verify archive: {}", e);
            Err(e.into())
        }
    }
}

/// Expire due events in the archive at `path` and write it back.
///
/// Returns how many events were expired; a missing archive expires nothing.
fn sweep_once(path: &Path, now: DateTime<Utc>) -> Result<usize, UndoError> {
    let archive = open_archive();
    let key = path.to_string_lossy();
    if !archive.exists(&key) {
        debug!("No archive at {}; nothing to sweep", path.display());
        return Ok(0);
    }

    let (_, events) = archive.load_events(&key)?;
    let registry = Arc::new(TypeRegistry::new());
    let database = MemoryDatabase::new(Arc::clone(&registry));
    database.import_events(events)?;

    let manager = DeletionUndoManager::new(registry, database);
    let expired = manager.finalize_expired(now)?;
    if expired > 0 {
        archive.save_events(&manager.events()?, &key)?;
    }
    Ok(expired)
}

async fn watch_sweep(path: PathBuf, interval: Duration) -> Result<(), anyhow::Error> {
    info!(
        archive = %path.display(),
        interval_secs = interval.as_secs(),
        "Undo sweep started"
    );

    let path = Arc::new(path);
    let mut ticker = tokio::time::interval(interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Undo sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                let path = Arc::clone(&path);
                let result = with_custom_backoff("undo_sweep", sweep_backoff_policy(interval), move |_attempt| {
                    let path = Arc::clone(&path);
                    Box::pin(async move {
                        sweep_once(&path, Utc::now()).map_err(|e| {
                            if e.is_transient() {
                                transient_error!("undo_sweep", e)
                            } else {
                                permanent_error!("undo_sweep", e)
                            }
                        })
                    })
                })
                .await;

                match result {
                    Ok(expired) if expired > 0 => info!(expired, "Undo sweep: expired events"),
                    Ok(_) => debug!("Undo sweep: nothing due"),
                    Err(e) => error!(error = %e, "Undo sweep failed"),
                }
            }
        }
    }
    Ok(())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
