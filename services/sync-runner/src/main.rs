//! Station telemetry sync runner.
//!
//! Periodically synchronizes weather-station telemetry from remote
//! metadata-driven HTTP APIs into the canonical observation store:
//! - Per-connection poll intervals with safe re-invocation (idempotent writes)
//! - Per-station sync cursors persisted across restarts
//! - HTTP status API for monitoring and metadata browsing

mod config;
mod scheduler;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use storage::{MemorySink, PgObservationStore, SqliteCursorStore};
use sync_core::{MetadataResolver, SourceRegistry, SyncEngine, DEFAULT_STATION_CONCURRENCY};
use telemetry_common::{CursorStore, ObservationSink};

use scheduler::Scheduler;
use server::ServerState;

#[derive(Parser, Debug)]
#[command(name = "sync-runner")]
#[command(about = "Station telemetry synchronization runner")]
struct Args {
    /// Run once and exit (vs continuous polling)
    #[arg(long)]
    once: bool,

    /// Specific connection id to sync (default: all configured)
    #[arg(short, long)]
    connection: Option<i64>,

    /// Configuration directory (contains connections/*.yaml)
    #[arg(long, env = "CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Directory for the sync cursor database
    #[arg(long, default_value = "/data/sync-runner")]
    state_dir: PathBuf,

    /// PostgreSQL URL for the observation store
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Keep records in memory instead of PostgreSQL (no DATABASE_URL needed)
    #[arg(long)]
    dry_run: bool,

    /// Disable the sync cursor store (re-request full history every run)
    #[arg(long)]
    no_cursor: bool,

    /// Maximum station links synced concurrently per connection
    #[arg(long, default_value_t = DEFAULT_STATION_CONCURRENCY)]
    max_concurrent_stations: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Port for status HTTP server
    #[arg(long, env = "STATUS_PORT", default_value = "8082")]
    status_port: u16,

    /// Disable status HTTP server
    #[arg(long)]
    no_status_server: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting station telemetry sync runner");

    // Load connection configurations
    let configs = config::load_connection_configs(&args.config_dir)?;
    if configs.is_empty() {
        warn!("No enabled connections configured, nothing to sync");
    }

    // Observation sink: PostgreSQL unless dry-running
    let pg_store: Option<Arc<PgObservationStore>> = if args.dry_run {
        None
    } else {
        let database_url = args
            .database_url
            .as_deref()
            .context("DATABASE_URL is required unless --dry-run is set")?;
        let store = PgObservationStore::connect(database_url).await?;
        store.migrate().await?;
        Some(Arc::new(store))
    };

    let sink: Arc<dyn ObservationSink> = match &pg_store {
        Some(store) => store.clone(),
        None => {
            info!("Dry run: observation records stay in memory");
            Arc::new(MemorySink::new())
        }
    };

    // Sync cursor store
    let cursors: Option<Arc<dyn CursorStore>> = if args.no_cursor {
        warn!("Cursor store disabled: configured start dates are re-requested on every run");
        None
    } else {
        let path = args.state_dir.join("sync_state.db");
        Some(Arc::new(SqliteCursorStore::open(&path).await?))
    };

    // Build the engine
    let engine = Arc::new(
        SyncEngine::new(
            SourceRegistry::with_defaults(),
            MetadataResolver::new(),
            sink,
            cursors,
        )
        .with_station_concurrency(args.max_concurrent_stations),
    );

    let scheduler = Scheduler::new(engine.clone(), configs.clone());

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start status server (unless disabled or in --once mode)
    if !args.no_status_server && !args.once {
        let server_state = Arc::new(ServerState {
            engine: engine.clone(),
            configs: configs.clone(),
            reports: scheduler.reports_handle(),
        });
        let status_port = args.status_port;
        tokio::spawn(async move {
            if let Err(e) = server::run_server(server_state, status_port).await {
                tracing::error!(error = %e, "Status server failed");
            }
        });
    }

    if args.once {
        // Single run mode
        info!("Running single sync cycle");

        if let Some(connection_id) = args.connection {
            scheduler.run_connection(connection_id).await?;
        } else {
            scheduler.run_all().await?;
        }

        // Report stored totals per connection
        if let Some(store) = &pg_store {
            for config in &configs {
                let count = store.count_for_connection(config.connection.id).await?;
                info!(
                    connection = %config.connection.name,
                    stored_records = count,
                    "Connection store totals"
                );
            }
        }
    } else {
        // Continuous polling mode
        info!("Starting continuous polling");

        // Handle Ctrl+C
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            shutdown_tx_clone.send(()).ok();
        });

        scheduler.run_forever(shutdown_tx.subscribe()).await?;
    }

    info!("Sync session complete");

    Ok(())
}
