//! Remote metadata taxonomy and its per-connection cache.
//!
//! The taxonomy changes rarely, so one `get_context` call per connection is
//! cached for an hour. A cached value with no stations is never trusted: it
//! is treated as a miss and refetched (defensive against cold or partially
//! populated entries). Entries are replaced whole — a reader always sees a
//! complete context or none.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use telemetry_common::SyncResult;

use crate::config::Connection;
use crate::source::TelemetrySource;

/// Default time-to-live for cached contexts.
pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(3600);

/// A temporal/sampling category for observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Granularity {
    pub code: String,
    pub label: String,
}

/// One observation kind the remote service can report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub code: String,
    pub label: String,
    pub unit: String,
    pub granularity: String,
}

/// A remote station and the observation codes it reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

impl Station {
    pub fn reports(&self, obs_code: &str) -> bool {
        self.observations.iter().any(|c| c == obs_code)
    }
}

/// An observation annotated with how many stations report it.
#[derive(Debug, Clone, Serialize)]
pub struct RankedObservation {
    pub code: String,
    pub label: String,
    pub unit: String,
    pub station_count: usize,
}

/// The full station/observation/granularity taxonomy of one connection.
///
/// Built by a single remote call and shared read-only across a sync run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataContext {
    pub granularities: Vec<Granularity>,
    pub observations: Vec<Observation>,
    pub stations: Vec<Station>,
}

impl MetadataContext {
    /// Whether this context is too empty to be trusted from cache.
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Observations of one granularity, annotated with the count of stations
    /// reporting them and sorted descending by that count. Ties keep source
    /// order (the sort is stable).
    pub fn observations_for_granularity(&self, gran_code: &str) -> Vec<RankedObservation> {
        let mut ranked: Vec<RankedObservation> = self
            .observations
            .iter()
            .filter(|obs| obs.granularity == gran_code)
            .map(|obs| RankedObservation {
                code: obs.code.clone(),
                label: obs.label.clone(),
                unit: obs.unit.clone(),
                station_count: self
                    .stations
                    .iter()
                    .filter(|s| s.reports(&obs.code))
                    .count(),
            })
            .collect();

        ranked.sort_by(|a, b| b.station_count.cmp(&a.station_count));
        ranked
    }

    /// Stations reporting the given observation, in source order.
    pub fn stations_with_observation(&self, obs_code: &str) -> Vec<&Station> {
        self.stations.iter().filter(|s| s.reports(obs_code)).collect()
    }

    /// First granularity with the given code; absence is not an error.
    pub fn granularity_by_code(&self, code: &str) -> Option<&Granularity> {
        self.granularities.iter().find(|g| g.code == code)
    }

    /// First observation with the given code; absence is not an error.
    pub fn observation_by_code(&self, code: &str) -> Option<&Observation> {
        self.observations.iter().find(|o| o.code == code)
    }

    /// The station with the given external code, if the context knows it.
    pub fn station_by_code(&self, code: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.code == code)
    }
}

struct CachedContext {
    context: Arc<MetadataContext>,
    fetched_at: Instant,
}

/// Resolves metadata contexts with a per-connection TTL cache.
///
/// Concurrent readers are fine; a refresh for one connection replaces only
/// that connection's entry.
pub struct MetadataResolver {
    entries: RwLock<HashMap<i64, CachedContext>>,
    ttl: Duration,
}

impl MetadataResolver {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CONTEXT_TTL)
    }

    /// TTL injection point for tests.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// The context for a connection, from cache when fresh and non-empty,
    /// otherwise refetched from the source. There is no partial
    /// invalidation: a hit is accepted in full or refetched in full.
    pub async fn context(
        &self,
        connection: &Connection,
        source: &dyn TelemetrySource,
    ) -> SyncResult<Arc<MetadataContext>> {
        if let Some(context) = self.cached(connection.id).await {
            debug!(connection = %connection.name, "Metadata context cache hit");
            return Ok(context);
        }

        let context = Arc::new(source.fetch_context().await?);
        info!(
            connection = %connection.name,
            stations = context.stations.len(),
            observations = context.observations.len(),
            "Fetched metadata context"
        );

        let mut entries = self.entries.write().await;
        entries.insert(
            connection.id,
            CachedContext {
                context: context.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(context)
    }

    async fn cached(&self, connection_id: i64) -> Option<Arc<MetadataContext>> {
        let entries = self.entries.read().await;
        let entry = entries.get(&connection_id)?;

        if entry.fetched_at.elapsed() > self.ttl {
            return None;
        }
        // A hit with no stations is never trusted.
        if entry.context.is_empty() {
            return None;
        }

        Some(entry.context.clone())
    }

    /// Drop one connection's cache entry.
    pub async fn invalidate(&self, connection_id: i64) {
        self.entries.write().await.remove(&connection_id);
    }
}

impl Default for MetadataResolver {
    fn default() -> Self {
        Self::new()
    }
}
