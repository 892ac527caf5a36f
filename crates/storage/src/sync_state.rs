//! Sync cursor persistence using SQLite with sqlx.
//!
//! Tracks the end of the last successfully synced window per
//! (connection, station) so a configured start_date is only the low-water
//! mark for the first run instead of being re-requested forever.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use telemetry_common::{CursorStore, SyncResult};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sync_cursors (
    connection_id INTEGER NOT NULL,
    station_id INTEGER NOT NULL,
    last_synced_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (connection_id, station_id)
)
"#;

/// Manages sync cursor persistence.
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    /// Open or create the cursor database at the given path.
    pub async fn open(path: &Path) -> SyncResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| telemetry_common::SyncError::Database(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        info!(path = %path.display(), "Opened sync cursor database");

        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> SyncResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Drop the cursor for one station, forcing a full re-sync from its
    /// configured start_date on the next run.
    pub async fn reset(&self, connection_id: i64, station_id: i64) -> SyncResult<()> {
        sqlx::query("DELETE FROM sync_cursors WHERE connection_id = ? AND station_id = ?")
            .bind(connection_id)
            .bind(station_id)
            .execute(&self.pool)
            .await?;

        debug!(
            connection_id = connection_id,
            station_id = station_id,
            "Reset sync cursor"
        );
        Ok(())
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn last_synced(
        &self,
        connection_id: i64,
        station_id: i64,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT last_synced_at FROM sync_cursors WHERE connection_id = ? AND station_id = ?",
        )
        .bind(connection_id)
        .bind(station_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(s,)| {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .ok()
        }))
    }

    async fn advance(
        &self,
        connection_id: i64,
        station_id: i64,
        to: DateTime<Utc>,
    ) -> SyncResult<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO sync_cursors (connection_id, station_id, last_synced_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (connection_id, station_id)
            DO UPDATE SET last_synced_at = excluded.last_synced_at,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(connection_id)
        .bind(station_id)
        .bind(to.to_rfc3339())
        .bind(&now)
        .execute(&self.pool)
        .await?;

        debug!(
            connection_id = connection_id,
            station_id = station_id,
            to = %to,
            "Advanced sync cursor"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_cursor_roundtrip() {
        let store = SqliteCursorStore::open_memory().await.unwrap();

        assert!(store.last_synced(1, 101).await.unwrap().is_none());

        let to = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        store.advance(1, 101, to).await.unwrap();

        assert_eq!(store.last_synced(1, 101).await.unwrap(), Some(to));
    }

    #[tokio::test]
    async fn test_advance_overwrites() {
        let store = SqliteCursorStore::open_memory().await.unwrap();

        let first = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap();
        store.advance(1, 101, first).await.unwrap();
        store.advance(1, 101, second).await.unwrap();

        assert_eq!(store.last_synced(1, 101).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_cursors_are_per_station() {
        let store = SqliteCursorStore::open_memory().await.unwrap();

        let to = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        store.advance(1, 101, to).await.unwrap();

        assert!(store.last_synced(1, 102).await.unwrap().is_none());
        assert!(store.last_synced(2, 101).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_cursor() {
        let store = SqliteCursorStore::open_memory().await.unwrap();

        let to = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        store.advance(1, 101, to).await.unwrap();
        store.reset(1, 101).await.unwrap();

        assert!(store.last_synced(1, 101).await.unwrap().is_none());
    }
}
