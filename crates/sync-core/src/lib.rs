//! Station telemetry synchronization engine.
//!
//! Reconciles three independently-evolving inputs — the remote taxonomy,
//! operator-configured variable mappings, and local sync state — into
//! normalized, deduplicated observation records:
//!
//! - Metadata resolution with a per-connection TTL cache
//! - Per-station time-window computation in station-local time
//! - Batched remote data retrieval
//! - Parameter/unit mapping and normalization to UTC
//! - Idempotent persistence through the `ObservationSink` seam
//!
//! The engine exposes a single callable unit of work per connection
//! ([`SyncEngine::run_sync`]); scheduling and retries belong to the caller.

pub mod client;
pub mod config;
pub mod fetch;
pub mod mapping;
pub mod metadata;
pub mod normalize;
pub mod orchestrator;
pub mod source;
pub mod window;

// Re-exports
pub use client::{DataPoint, DataResponse, RawValue, StationApi};
pub use config::{Connection, StationLink, VariableMapping, SOURCE_TYPE_STATION_HTTP};
pub use metadata::{
    Granularity, MetadataContext, MetadataResolver, Observation, RankedObservation, Station,
};
pub use orchestrator::{
    ConnectionOutcome, SkipReason, StationOutcome, SyncEngine, SyncReport,
    DEFAULT_STATION_CONCURRENCY,
};
pub use source::{SourceFactory, SourceRegistry, TelemetrySource};
pub use window::compute_window;
