//! Sync scheduler with per-connection polling.
//!
//! The engine itself performs no scheduling and no retries; this loop is the
//! external invoker. Re-invoking a connection is always safe because the
//! engine's writes are idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use sync_core::{SyncEngine, SyncReport};

use crate::config::ConnectionConfig;

/// Seconds between scheduler ticks while polling.
const TICK_INTERVAL_SECS: u64 = 10;

/// Scheduler coordinating sync runs across connections.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    configs: Vec<ConnectionConfig>,
    /// Last report per connection, for the status API.
    reports: Arc<RwLock<HashMap<i64, SyncReport>>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, configs: Vec<ConnectionConfig>) -> Self {
        Self {
            engine,
            configs,
            reports: Arc::new(RwLock::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// Handle to the per-connection report map for the status API.
    pub fn reports_handle(&self) -> Arc<RwLock<HashMap<i64, SyncReport>>> {
        self.reports.clone()
    }

    /// Token that aborts in-flight runs between stations.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a single sync cycle for all connections.
    pub async fn run_all(&self) -> Result<()> {
        for config in &self.configs {
            if let Err(e) = self.run_connection(config.connection.id).await {
                error!(
                    connection = %config.connection.name,
                    error = %e,
                    "Connection sync failed"
                );
            }
        }
        Ok(())
    }

    /// Run a single sync cycle for a specific connection.
    #[instrument(skip(self))]
    pub async fn run_connection(&self, connection_id: i64) -> Result<()> {
        let config = self
            .configs
            .iter()
            .find(|c| c.connection.id == connection_id)
            .context("Connection not found")?;

        let report = self
            .engine
            .run_sync(&config.connection, &self.cancel)
            .await
            .with_context(|| format!("Sync failed for {}", config.connection.name))?;

        info!(
            connection = %config.connection.name,
            records = report.records_total(),
            failed_stations = report.failed_stations(),
            "Connection sync complete"
        );

        self.reports
            .write()
            .await
            .insert(connection_id, report);

        Ok(())
    }

    /// Run continuously, polling each connection at its configured interval.
    pub async fn run_forever(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut last_poll: HashMap<i64, std::time::Instant> = HashMap::new();

        loop {
            for config in &self.configs {
                let interval = Duration::from_secs(config.poll_interval_secs);
                let due = match last_poll.get(&config.connection.id) {
                    None => true,
                    Some(t) => t.elapsed() >= interval,
                };

                if due {
                    info!(connection = %config.connection.name, "Running scheduled sync");

                    if let Err(e) = self.run_connection(config.connection.id).await {
                        error!(
                            connection = %config.connection.name,
                            error = %e,
                            "Scheduled sync failed"
                        );
                    }

                    last_poll.insert(config.connection.id, std::time::Instant::now());
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down scheduler");
                    self.cancel.cancel();
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(TICK_INTERVAL_SECS)) => {
                    // Continue polling
                }
            }
        }

        Ok(())
    }
}
