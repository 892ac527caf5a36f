//! Canonical observation records and the storage trait seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SyncResult;

/// A normalized station observation.
///
/// `time` is always UTC; `value` is always in the canonical parameter's
/// native unit. "No reading" is represented by the absence of a record,
/// never by a null value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRecord {
    pub station_id: i64,
    pub parameter: String,
    pub connection_id: i64,
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl ObservationRecord {
    /// The uniqueness key enforced by the upsert engine.
    pub fn key(&self) -> (i64, &str, DateTime<Utc>, i64) {
        (self.station_id, &self.parameter, self.time, self.connection_id)
    }
}

/// Sink for normalized records with idempotent conflict resolution.
///
/// A write matching an existing (station, parameter, time, connection) key
/// overwrites only the value; all other fields are immutable once written.
/// One call per station batch — implementations must make retrying the same
/// batch safe.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    /// Persist a batch of records, returning the number submitted.
    async fn bulk_upsert(&self, records: &[ObservationRecord]) -> SyncResult<u64>;
}

/// Per-station sync position, advanced only after a successful upsert batch.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// The end of the last successfully synced window, if any.
    async fn last_synced(
        &self,
        connection_id: i64,
        station_id: i64,
    ) -> SyncResult<Option<DateTime<Utc>>>;

    /// Record a successfully synced window end.
    async fn advance(
        &self,
        connection_id: i64,
        station_id: i64,
        to: DateTime<Utc>,
    ) -> SyncResult<()>;
}
