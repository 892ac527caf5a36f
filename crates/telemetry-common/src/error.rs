//! Error types for station-telemetry services.

use thiserror::Error;

/// Result type alias using SyncError.
pub type SyncResult<T> = Result<T, SyncError>;

/// Primary error type for synchronization operations.
#[derive(Debug, Error)]
pub enum SyncError {
    // === Remote API Errors ===
    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Malformed remote response: {0}")]
    MalformedResponse(String),

    // === Mapping / Normalization Errors ===
    #[error("Cannot convert value {value} from {from} to {to}")]
    UnconvertibleUnit {
        value: f64,
        from: String,
        to: String,
    },

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("No variable mappings configured for connection: {0}")]
    NoMappings(String),

    #[error("Record is missing a timestamp: {0}")]
    MissingTimestamp(String),

    // === Configuration Errors ===
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Unknown source type: {0}")]
    UnknownSourceType(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Storage Errors ===
    #[error("Database error: {0}")]
    Database(String),
}

// Conversion from common error types
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts are treated identically to transport failures.
        SyncError::RemoteUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::MalformedResponse(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}
