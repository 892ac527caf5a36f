//! Storage for the station-telemetry services.
//!
//! Provides:
//! - PostgreSQL for canonical observation records (idempotent bulk upsert)
//! - SQLite for per-station sync cursors
//! - An in-memory sink for tests and dry runs

pub mod observations;
pub mod sync_state;

pub use observations::{MemorySink, PgObservationStore};
pub use sync_state::SqliteCursorStore;
