//! Telemetry source capability trait and the registry that selects an
//! implementation by connection type tag.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use telemetry_common::{SyncError, SyncResult, SyncWindow};

use crate::client::{DataResponse, StationApi, DEFAULT_REQUEST_TIMEOUT};
use crate::config::{Connection, SOURCE_TYPE_STATION_HTTP};
use crate::metadata::MetadataContext;

/// Capabilities a telemetry source must provide to the engine.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Fetch the full metadata taxonomy.
    async fn fetch_context(&self) -> SyncResult<MetadataContext>;

    /// Fetch raw observations for one station over a local-time window,
    /// batching all requested codes into a single call.
    async fn fetch_observations(
        &self,
        station_code: &str,
        observation_codes: &[String],
        window: &SyncWindow,
    ) -> SyncResult<DataResponse>;

    /// Fetch the remote service's opaque log payload.
    async fn fetch_logs(&self, from: &str, to: &str) -> SyncResult<serde_json::Value>;
}

#[async_trait]
impl TelemetrySource for StationApi {
    async fn fetch_context(&self) -> SyncResult<MetadataContext> {
        self.get_context().await
    }

    async fn fetch_observations(
        &self,
        station_code: &str,
        observation_codes: &[String],
        window: &SyncWindow,
    ) -> SyncResult<DataResponse> {
        self.get_data(
            station_code,
            observation_codes,
            &window.format_start(),
            &window.format_end(),
        )
        .await
    }

    async fn fetch_logs(&self, from: &str, to: &str) -> SyncResult<serde_json::Value> {
        self.get_logs(from, to).await
    }
}

/// Builds a source for a connection.
pub trait SourceFactory: Send + Sync {
    fn create(&self, connection: &Connection) -> SyncResult<Arc<dyn TelemetrySource>>;
}

struct HttpSourceFactory;

impl SourceFactory for HttpSourceFactory {
    fn create(&self, connection: &Connection) -> SyncResult<Arc<dyn TelemetrySource>> {
        let api = StationApi::new(
            &connection.base_url,
            &connection.api_token,
            DEFAULT_REQUEST_TIMEOUT,
        )?;
        Ok(Arc::new(api))
    }
}

/// Source implementations keyed by connection `source_type` tag.
pub struct SourceRegistry {
    factories: HashMap<String, Arc<dyn SourceFactory>>,
}

impl SourceRegistry {
    /// An empty registry with no sources.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The registry with all built-in sources.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SOURCE_TYPE_STATION_HTTP, Arc::new(HttpSourceFactory));
        registry
    }

    pub fn register(&mut self, source_type: &str, factory: Arc<dyn SourceFactory>) {
        self.factories.insert(source_type.to_string(), factory);
    }

    /// Create the source for a connection, dispatching on its type tag.
    pub fn create(&self, connection: &Connection) -> SyncResult<Arc<dyn TelemetrySource>> {
        let factory = self
            .factories
            .get(&connection.source_type)
            .ok_or_else(|| SyncError::UnknownSourceType(connection.source_type.clone()))?;
        factory.create(connection)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
