//! Observation record store using PostgreSQL.
//!
//! The uniqueness invariant — at most one record per (station, parameter,
//! time, connection) — lives here, in the upsert, not in the in-memory
//! model. A conflicting write overwrites only the value; every other field
//! is immutable once first written, so reissuing a window's batch after a
//! partial failure converges on the same final state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder};
use tracing::{debug, info};

use telemetry_common::{ObservationRecord, ObservationSink, SyncError, SyncResult};

/// Rows per INSERT statement. Five binds per row keeps a chunk well under
/// the Postgres bind-parameter limit.
const UPSERT_CHUNK_SIZE: usize = 1000;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS observation_records (
    station_id BIGINT NOT NULL,
    parameter TEXT NOT NULL,
    connection_id BIGINT NOT NULL,
    observed_at TIMESTAMPTZ NOT NULL,
    value DOUBLE PRECISION NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (station_id, parameter, observed_at, connection_id)
);

CREATE INDEX IF NOT EXISTS idx_observation_records_connection
    ON observation_records(connection_id, observed_at);

CREATE INDEX IF NOT EXISTS idx_observation_records_station_time
    ON observation_records(station_id, observed_at)
"#;

/// PostgreSQL-backed observation store.
pub struct PgObservationStore {
    pool: PgPool,
}

impl PgObservationStore {
    /// Connect to the database.
    pub async fn connect(database_url: &str) -> SyncResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| SyncError::Database(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Apply the schema.
    pub async fn migrate(&self) -> SyncResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| SyncError::Database(format!("Migration failed: {}", e)))?;
            }
        }

        info!("Observation store schema is up to date");
        Ok(())
    }

    /// Count stored records for a connection.
    pub async fn count_for_connection(&self, connection_id: i64) -> SyncResult<u64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM observation_records WHERE connection_id = $1")
                .bind(connection_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.0 as u64)
    }

}

#[async_trait]
impl ObservationSink for PgObservationStore {
    async fn bulk_upsert(&self, records: &[ObservationRecord]) -> SyncResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        for chunk in records.chunks(UPSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO observation_records \
                 (station_id, parameter, connection_id, observed_at, value) ",
            );

            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.station_id)
                    .push_bind(&record.parameter)
                    .push_bind(record.connection_id)
                    .push_bind(record.time)
                    .push_bind(record.value);
            });

            builder.push(
                " ON CONFLICT (station_id, parameter, observed_at, connection_id) \
                 DO UPDATE SET value = EXCLUDED.value",
            );

            builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| SyncError::Database(format!("Bulk upsert failed: {}", e)))?;
        }

        debug!(records = records.len(), "Upserted observation batch");
        Ok(records.len() as u64)
    }
}

/// In-memory observation sink for tests and dry runs.
///
/// Applies the same conflict semantics as the Postgres store: the
/// (station, parameter, time, connection) key is unique and a conflicting
/// write replaces only the value.
#[derive(Default)]
pub struct MemorySink {
    records: tokio::sync::Mutex<std::collections::BTreeMap<MemoryKey, f64>>,
}

type MemoryKey = (i64, String, DateTime<Utc>, i64);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored records, in key order.
    pub async fn records(&self) -> Vec<ObservationRecord> {
        self.records
            .lock()
            .await
            .iter()
            .map(
                |((station_id, parameter, time, connection_id), value)| ObservationRecord {
                    station_id: *station_id,
                    parameter: parameter.clone(),
                    connection_id: *connection_id,
                    time: *time,
                    value: *value,
                },
            )
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl ObservationSink for MemorySink {
    async fn bulk_upsert(&self, records: &[ObservationRecord]) -> SyncResult<u64> {
        let mut stored = self.records.lock().await;
        for record in records {
            stored.insert(
                (
                    record.station_id,
                    record.parameter.clone(),
                    record.time,
                    record.connection_id,
                ),
                record.value,
            );
        }
        Ok(records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(station_id: i64, parameter: &str, hour: u32, value: f64) -> ObservationRecord {
        ObservationRecord {
            station_id,
            parameter: parameter.to_string(),
            connection_id: 1,
            time: Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap(),
            value,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_stores_records() {
        let sink = MemorySink::new();
        let count = sink
            .bulk_upsert(&[
                record(101, "air_temperature", 10, 21.0),
                record(101, "air_temperature", 11, 22.5),
            ])
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(sink.len().await, 2);
    }

    #[tokio::test]
    async fn test_memory_sink_conflict_overwrites_value_only() {
        let sink = MemorySink::new();
        sink.bulk_upsert(&[record(101, "air_temperature", 10, 21.0)])
            .await
            .unwrap();
        sink.bulk_upsert(&[record(101, "air_temperature", 10, 19.5)])
            .await
            .unwrap();

        let stored = sink.records().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, 19.5);
    }

    #[tokio::test]
    async fn test_memory_sink_retry_converges() {
        let sink = MemorySink::new();
        let batch = vec![
            record(101, "air_temperature", 10, 21.0),
            record(101, "relative_humidity", 10, 80.0),
        ];

        sink.bulk_upsert(&batch).await.unwrap();
        let first = sink.records().await;
        sink.bulk_upsert(&batch).await.unwrap();
        let second = sink.records().await;

        assert_eq!(first, second);
    }
}
