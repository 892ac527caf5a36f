//! Synchronization orchestration across a connection's station links.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use telemetry_common::{CursorStore, ObservationSink, SyncResult};

use crate::config::{Connection, StationLink, VariableMapping};
use crate::fetch;
use crate::mapping;
use crate::metadata::{MetadataContext, MetadataResolver};
use crate::normalize;
use crate::source::{SourceRegistry, TelemetrySource};
use crate::window;

/// Default number of station links processed concurrently per connection.
pub const DEFAULT_STATION_CONCURRENCY: usize = 4;

/// Why a station was skipped without fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    Cancelled,
}

/// Terminal state of one station link in a run.
///
/// Failed stations are recorded explicitly — a missing entry would be
/// indistinguishable from a station that was never configured.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StationOutcome {
    Synced { records: u64 },
    Skipped { reason: SkipReason },
    Failed { message: String },
}

/// Terminal state of a whole connection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConnectionOutcome {
    /// The run completed; individual stations may still have failed.
    Completed {
        stations: BTreeMap<i64, StationOutcome>,
    },
    /// Nothing to ingest: the connection has no variable mappings.
    NoMappings,
}

/// Result of one `run_sync` invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub connection_id: i64,
    pub connection_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: ConnectionOutcome,
}

impl SyncReport {
    /// Total records upserted across stations.
    pub fn records_total(&self) -> u64 {
        match &self.outcome {
            ConnectionOutcome::Completed { stations } => stations
                .values()
                .map(|o| match o {
                    StationOutcome::Synced { records } => *records,
                    _ => 0,
                })
                .sum(),
            ConnectionOutcome::NoMappings => 0,
        }
    }

    /// Number of stations that failed.
    pub fn failed_stations(&self) -> usize {
        match &self.outcome {
            ConnectionOutcome::Completed { stations } => stations
                .values()
                .filter(|o| matches!(o, StationOutcome::Failed { .. }))
                .count(),
            ConnectionOutcome::NoMappings => 0,
        }
    }
}

/// The synchronization engine: one callable unit of work per connection.
///
/// What invokes it periodically is external — the engine performs no
/// scheduling and no retries of its own. Re-invoking it is always safe
/// because every write is idempotent.
pub struct SyncEngine {
    registry: SourceRegistry,
    resolver: MetadataResolver,
    sink: Arc<dyn ObservationSink>,
    cursors: Option<Arc<dyn CursorStore>>,
    station_concurrency: usize,
}

impl SyncEngine {
    pub fn new(
        registry: SourceRegistry,
        resolver: MetadataResolver,
        sink: Arc<dyn ObservationSink>,
        cursors: Option<Arc<dyn CursorStore>>,
    ) -> Self {
        Self {
            registry,
            resolver,
            sink,
            cursors,
            station_concurrency: DEFAULT_STATION_CONCURRENCY,
        }
    }

    pub fn with_station_concurrency(mut self, concurrency: usize) -> Self {
        self.station_concurrency = concurrency.max(1);
        self
    }

    /// Run one synchronization pass for a connection.
    ///
    /// Fails only when the source cannot be constructed or metadata
    /// resolution fails — nothing can proceed without the taxonomy. All
    /// per-station failures are caught and recorded in the report.
    pub async fn run_sync(
        &self,
        connection: &Connection,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let started_at = Utc::now();

        let mappings = mapping::resolve(connection);
        if mappings.is_empty() {
            warn!(
                connection = %connection.name,
                "No variable mappings configured, nothing to ingest"
            );
            return Ok(SyncReport {
                connection_id: connection.id,
                connection_name: connection.name.clone(),
                started_at,
                finished_at: Utc::now(),
                outcome: ConnectionOutcome::NoMappings,
            });
        }

        info!(
            connection = %connection.name,
            stations = connection.station_links.len(),
            mappings = mappings.len(),
            "Starting sync run"
        );

        let source = self.registry.create(connection)?;
        let context = self.resolver.context(connection, source.as_ref()).await?;

        let outcomes: Vec<(i64, StationOutcome)> = stream::iter(&connection.station_links)
            .map(|link| {
                let source = source.clone();
                let context = context.clone();
                async move {
                    let outcome = self
                        .station_outcome(connection, link, mappings, &context, source.as_ref(), cancel)
                        .await;
                    (link.station_id, outcome)
                }
            })
            .buffer_unordered(self.station_concurrency)
            .collect()
            .await;

        let stations: BTreeMap<i64, StationOutcome> = outcomes.into_iter().collect();
        let report = SyncReport {
            connection_id: connection.id,
            connection_name: connection.name.clone(),
            started_at,
            finished_at: Utc::now(),
            outcome: ConnectionOutcome::Completed { stations },
        };

        info!(
            connection = %connection.name,
            records = report.records_total(),
            failed_stations = report.failed_stations(),
            "Sync run complete"
        );

        Ok(report)
    }

    /// The metadata context for a connection (cached), for status surfaces.
    pub async fn metadata(&self, connection: &Connection) -> SyncResult<Arc<MetadataContext>> {
        let source = self.registry.create(connection)?;
        self.resolver.context(connection, source.as_ref()).await
    }

    /// The remote service's log payload for a time range.
    pub async fn remote_logs(
        &self,
        connection: &Connection,
        from: &str,
        to: &str,
    ) -> SyncResult<serde_json::Value> {
        let source = self.registry.create(connection)?;
        source.fetch_logs(from, to).await
    }

    async fn station_outcome(
        &self,
        connection: &Connection,
        link: &StationLink,
        mappings: &[VariableMapping],
        context: &MetadataContext,
        source: &dyn TelemetrySource,
        cancel: &CancellationToken,
    ) -> StationOutcome {
        if !link.enabled {
            debug!(station = %link.name, "Station link is disabled, skipping");
            return StationOutcome::Skipped {
                reason: SkipReason::Disabled,
            };
        }

        // Aborts take effect between stations, never mid-batch.
        if cancel.is_cancelled() {
            info!(station = %link.name, "Run cancelled before station fetch");
            return StationOutcome::Skipped {
                reason: SkipReason::Cancelled,
            };
        }

        match self
            .sync_station(connection, link, mappings, context, source)
            .await
        {
            Ok(records) => StationOutcome::Synced { records },
            Err(e) => {
                error!(
                    connection = %connection.name,
                    station = %link.name,
                    error = %e,
                    "Station sync failed"
                );
                StationOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn sync_station(
        &self,
        connection: &Connection,
        link: &StationLink,
        mappings: &[VariableMapping],
        context: &MetadataContext,
        source: &dyn TelemetrySource,
    ) -> SyncResult<u64> {
        let station = context.station_by_code(&link.source_station_code);
        if station.is_none() {
            // The remote may know more stations than its context advertises;
            // request the full mapped set and let the response decide.
            warn!(
                station = %link.name,
                code = %link.source_station_code,
                "Station code not present in metadata context"
            );
        }

        let codes = mapping::request_codes(mappings, station);
        if codes.is_empty() {
            debug!(
                station = %link.name,
                "Station reports none of the mapped observations"
            );
            return Ok(0);
        }

        let cursor = match &self.cursors {
            Some(cursors) => cursors.last_synced(connection.id, link.station_id).await?,
            None => None,
        };

        let window = window::compute_window(link, cursor, Utc::now())?;
        let rows = fetch::fetch_rows(source, link, &codes, &window).await?;
        let records = normalize::normalize_rows(&rows, mappings, link, connection.id);

        let count = if records.is_empty() {
            0
        } else {
            self.sink.bulk_upsert(&records).await?
        };

        // The cursor only moves after the window's batch is safely stored;
        // an empty window still completes and advances it.
        if let Some(cursors) = &self.cursors {
            cursors
                .advance(connection.id, link.station_id, window.end_utc())
                .await?;
        }

        debug!(
            station = %link.name,
            records = count,
            "Station sync complete"
        );

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use storage::{MemorySink, SqliteCursorStore};
    use telemetry_common::{SyncError, SyncWindow, Unit};

    use crate::client::DataResponse;
    use crate::config::SOURCE_TYPE_STATION_HTTP;
    use crate::metadata::MetadataContext;
    use crate::source::SourceFactory;

    struct FakeSource {
        context: MetadataContext,
        /// Station code -> raw get_data payload.
        data: std::collections::HashMap<String, String>,
        fetch_calls: AtomicUsize,
        fail_stations: Vec<String>,
        fail_context: bool,
    }

    impl FakeSource {
        fn new(context_json: &str) -> Self {
            Self {
                context: serde_json::from_str(context_json).unwrap(),
                data: std::collections::HashMap::new(),
                fetch_calls: AtomicUsize::new(0),
                fail_stations: Vec::new(),
                fail_context: false,
            }
        }

        fn with_data(mut self, station_code: &str, body: &str) -> Self {
            self.data.insert(station_code.to_string(), body.to_string());
            self
        }
    }

    #[async_trait]
    impl TelemetrySource for FakeSource {
        async fn fetch_context(&self) -> SyncResult<MetadataContext> {
            if self.fail_context {
                return Err(SyncError::RemoteUnavailable("context down".to_string()));
            }
            Ok(self.context.clone())
        }

        async fn fetch_observations(
            &self,
            station_code: &str,
            _observation_codes: &[String],
            _window: &SyncWindow,
        ) -> SyncResult<DataResponse> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_stations.iter().any(|s| s == station_code) {
                return Err(SyncError::RemoteUnavailable(format!(
                    "station {} unreachable",
                    station_code
                )));
            }
            let body = self
                .data
                .get(station_code)
                .cloned()
                .unwrap_or_else(|| "{}".to_string());
            Ok(serde_json::from_str(&body).unwrap())
        }

        async fn fetch_logs(&self, _from: &str, _to: &str) -> SyncResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    struct FakeFactory(Arc<FakeSource>);

    impl SourceFactory for FakeFactory {
        fn create(&self, _connection: &Connection) -> SyncResult<Arc<dyn TelemetrySource>> {
            Ok(self.0.clone())
        }
    }

    const CONTEXT: &str = r#"{
        "granularities": [{"code": "H", "label": "Hourly"}],
        "observations": [
            {"code": "TEMP", "label": "Air temperature", "unit": "celsius", "granularity": "H"},
            {"code": "HUM", "label": "Relative humidity", "unit": "percent", "granularity": "H"}
        ],
        "stations": [
            {"code": "1001", "name": "North Ridge", "observations": ["TEMP", "HUM"]},
            {"code": "1002", "name": "South Gate", "observations": ["TEMP", "HUM"]}
        ]
    }"#;

    fn link(station_id: i64, code: &str) -> StationLink {
        StationLink {
            station_id,
            name: format!("station-{}", station_id),
            source_station_code: code.to_string(),
            timezone: "UTC".to_string(),
            start_date: None,
            enabled: true,
        }
    }

    fn mapping(parameter: &str, code: &str, from: Unit, to: Unit) -> VariableMapping {
        VariableMapping {
            parameter: parameter.to_string(),
            parameter_unit: to,
            source_code: code.to_string(),
            source_unit: from,
        }
    }

    fn connection(links: Vec<StationLink>, mappings: Vec<VariableMapping>) -> Connection {
        Connection {
            id: 1,
            name: "test-network".to_string(),
            source_type: SOURCE_TYPE_STATION_HTTP.to_string(),
            base_url: "https://example.com/rest".to_string(),
            api_token: "t".to_string(),
            enabled: true,
            variable_mappings: mappings,
            station_links: links,
        }
    }

    fn engine_with(
        source: Arc<FakeSource>,
        sink: Arc<MemorySink>,
        cursors: Option<Arc<dyn CursorStore>>,
    ) -> SyncEngine {
        let mut registry = SourceRegistry::new();
        registry.register(SOURCE_TYPE_STATION_HTTP, Arc::new(FakeFactory(source)));
        SyncEngine::new(
            registry,
            MetadataResolver::with_ttl(Duration::from_secs(60)),
            sink,
            cursors,
        )
    }

    fn temp_hum_mappings() -> Vec<VariableMapping> {
        vec![
            mapping("air_temperature", "TEMP", Unit::Celsius, Unit::Celsius),
            mapping("relative_humidity", "HUM", Unit::Percent, Unit::Percent),
        ]
    }

    #[tokio::test]
    async fn test_end_to_end_two_temp_records_no_hum_rows() {
        let source = Arc::new(FakeSource::new(CONTEXT).with_data(
            "1001",
            r#"{
                "TEMP": [
                    {"date": "2024-01-15T10:00:00", "value": 21.0},
                    {"date": "2024-01-15T11:00:00", "value": 22.5}
                ],
                "HUM": []
            }"#,
        ));
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(source.clone(), sink.clone(), None);
        let conn = connection(vec![link(101, "1001")], temp_hum_mappings());

        let report = engine.run_sync(&conn, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.records_total(), 2);
        assert_eq!(report.failed_stations(), 0);

        let stored = sink.records().await;
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|r| r.parameter == "air_temperature"));
        assert!(stored.iter().all(|r| r.station_id == 101));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let source = Arc::new(FakeSource::new(CONTEXT).with_data(
            "1001",
            r#"{"TEMP": [{"date": "2024-01-15T10:00:00", "value": 21.0}]}"#,
        ));
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(source.clone(), sink.clone(), None);
        let conn = connection(vec![link(101, "1001")], temp_hum_mappings());

        engine.run_sync(&conn, &CancellationToken::new()).await.unwrap();
        let first = sink.records().await;
        engine.run_sync(&conn, &CancellationToken::new()).await.unwrap();
        let second = sink.records().await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_no_mappings_issues_no_fetches() {
        let source = Arc::new(FakeSource::new(CONTEXT));
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(source.clone(), sink.clone(), None);
        let conn = connection(vec![link(101, "1001")], Vec::new());

        let report = engine.run_sync(&conn, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.outcome, ConnectionOutcome::NoMappings);
        assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.len().await, 0);
    }

    #[tokio::test]
    async fn test_station_failure_does_not_abort_siblings() {
        let mut fake = FakeSource::new(CONTEXT).with_data(
            "1002",
            r#"{"TEMP": [{"date": "2024-01-15T10:00:00", "value": 19.5}]}"#,
        );
        fake.fail_stations.push("1001".to_string());
        let source = Arc::new(fake);
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(source, sink.clone(), None);
        let conn = connection(
            vec![link(101, "1001"), link(102, "1002")],
            temp_hum_mappings(),
        );

        let report = engine.run_sync(&conn, &CancellationToken::new()).await.unwrap();

        let ConnectionOutcome::Completed { stations } = &report.outcome else {
            panic!("expected completed outcome");
        };
        assert!(matches!(stations[&101], StationOutcome::Failed { .. }));
        assert_eq!(stations[&102], StationOutcome::Synced { records: 1 });
        assert_eq!(sink.len().await, 1);
    }

    #[tokio::test]
    async fn test_metadata_failure_aborts_connection() {
        let mut fake = FakeSource::new(CONTEXT);
        fake.fail_context = true;
        let source = Arc::new(fake);
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(source, sink, None);
        let conn = connection(vec![link(101, "1001")], temp_hum_mappings());

        let err = engine.run_sync(&conn, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn test_disabled_station_skipped() {
        let source = Arc::new(FakeSource::new(CONTEXT));
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(source.clone(), sink, None);
        let mut disabled = link(101, "1001");
        disabled.enabled = false;
        let conn = connection(vec![disabled], temp_hum_mappings());

        let report = engine.run_sync(&conn, &CancellationToken::new()).await.unwrap();

        let ConnectionOutcome::Completed { stations } = &report.outcome else {
            panic!("expected completed outcome");
        };
        assert_eq!(
            stations[&101],
            StationOutcome::Skipped {
                reason: SkipReason::Disabled
            }
        );
        assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_stations() {
        let source = Arc::new(FakeSource::new(CONTEXT));
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(source.clone(), sink, None);
        let conn = connection(vec![link(101, "1001")], temp_hum_mappings());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = engine.run_sync(&conn, &cancel).await.unwrap();

        let ConnectionOutcome::Completed { stations } = &report.outcome else {
            panic!("expected completed outcome");
        };
        assert_eq!(
            stations[&101],
            StationOutcome::Skipped {
                reason: SkipReason::Cancelled
            }
        );
        assert_eq!(source.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cursor_advances_after_successful_run() {
        let source = Arc::new(FakeSource::new(CONTEXT).with_data(
            "1001",
            r#"{"TEMP": [{"date": "2024-01-15T10:00:00", "value": 21.0}]}"#,
        ));
        let sink = Arc::new(MemorySink::new());
        let cursors: Arc<dyn CursorStore> =
            Arc::new(SqliteCursorStore::open_memory().await.unwrap());
        let engine = engine_with(source, sink, Some(cursors.clone()));
        let conn = connection(vec![link(101, "1001")], temp_hum_mappings());

        assert!(cursors.last_synced(1, 101).await.unwrap().is_none());
        engine.run_sync(&conn, &CancellationToken::new()).await.unwrap();

        let cursor = cursors.last_synced(1, 101).await.unwrap().unwrap();
        // The cursor lands on a truncated hour boundary.
        assert_eq!(cursor.timestamp() % 3600, 0);
    }

    #[tokio::test]
    async fn test_cursor_not_advanced_for_failed_station() {
        let mut fake = FakeSource::new(CONTEXT);
        fake.fail_stations.push("1001".to_string());
        let source = Arc::new(fake);
        let sink = Arc::new(MemorySink::new());
        let cursors: Arc<dyn CursorStore> =
            Arc::new(SqliteCursorStore::open_memory().await.unwrap());
        let engine = engine_with(source, sink, Some(cursors.clone()));
        let conn = connection(vec![link(101, "1001")], temp_hum_mappings());

        let report = engine.run_sync(&conn, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.failed_stations(), 1);
        assert!(cursors.last_synced(1, 101).await.unwrap().is_none());
    }

    #[test]
    fn test_report_serialization_shape() {
        let report = SyncReport {
            connection_id: 1,
            connection_name: "test".to_string(),
            started_at: Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 5).unwrap(),
            outcome: ConnectionOutcome::Completed {
                stations: BTreeMap::from([
                    (101, StationOutcome::Synced { records: 2 }),
                    (
                        102,
                        StationOutcome::Failed {
                            message: "station 1002 unreachable".to_string(),
                        },
                    ),
                ]),
            },
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["stations"]["101"]["status"], "synced");
        assert_eq!(json["stations"]["101"]["records"], 2);
        assert_eq!(json["stations"]["102"]["status"], "failed");
    }
}
