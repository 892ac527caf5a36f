//! Common types and utilities shared across the station-telemetry services.

pub mod error;
pub mod observation;
pub mod time;
pub mod units;

pub use error::{SyncError, SyncResult};
pub use observation::{CursorStore, ObservationRecord, ObservationSink};
pub use time::SyncWindow;
pub use units::{Dimension, Unit};
