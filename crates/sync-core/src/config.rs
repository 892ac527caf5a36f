//! Read-only configuration objects consumed by the sync engine.
//!
//! These are produced by an operator-facing configuration surface and are
//! immutable for the duration of a sync run.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::warn;

use telemetry_common::{SyncError, SyncResult, Unit};

/// Source type tag for the built-in metadata-driven HTTP API source.
pub const SOURCE_TYPE_STATION_HTTP: &str = "station_http";

fn default_source_type() -> String {
    SOURCE_TYPE_STATION_HTTP.to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Configuration for one remote telemetry source.
#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    pub id: i64,
    pub name: String,
    /// Engine variant tag, dispatched through the source registry.
    #[serde(default = "default_source_type")]
    pub source_type: String,
    pub base_url: String,
    pub api_token: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub variable_mappings: Vec<VariableMapping>,
    #[serde(default)]
    pub station_links: Vec<StationLink>,
}

/// Correspondence between an externally-reported parameter and a canonical one.
#[derive(Debug, Clone, Deserialize)]
pub struct VariableMapping {
    /// Canonical parameter name, e.g. "air_temperature".
    pub parameter: String,
    /// The canonical parameter's native unit.
    pub parameter_unit: Unit,
    /// Parameter code as reported by the remote API.
    pub source_code: String,
    /// Unit the remote API reports values in.
    pub source_unit: Unit,
}

/// Binding between a canonical station entity and its external station code.
#[derive(Debug, Clone, Deserialize)]
pub struct StationLink {
    pub station_id: i64,
    pub name: String,
    pub source_station_code: String,
    /// IANA timezone used by the station for recording observations.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Optional low-water mark for the first collection window. Select a past
    /// date to include historical data; leave unset for realtime-only.
    #[serde(default)]
    pub start_date: Option<NaiveDateTime>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl StationLink {
    /// The station timezone. Unresolvable names are rejected at config load;
    /// past that point an unparseable value falls back to UTC.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }
}

impl Connection {
    /// Validate a connection at configuration-load time.
    ///
    /// Sync runs assume these invariants hold, so violations are rejected
    /// here rather than surfacing mid-run.
    pub fn validate(&self, now: DateTime<Utc>) -> SyncResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::InvalidConfig(format!(
                "connection {}: base_url is empty",
                self.name
            )));
        }

        for link in &self.station_links {
            let tz: Tz = link.timezone.parse().map_err(|_| {
                SyncError::UnknownTimezone(format!(
                    "station {}: {}",
                    link.name, link.timezone
                ))
            })?;

            if let Some(start_date) = link.start_date {
                let localized = tz
                    .from_local_datetime(&start_date)
                    .earliest()
                    .ok_or_else(|| {
                        SyncError::InvalidConfig(format!(
                            "station {}: start_date {} does not exist in {}",
                            link.name, start_date, link.timezone
                        ))
                    })?;
                if localized.with_timezone(&Utc) > now {
                    return Err(SyncError::InvalidConfig(format!(
                        "station {}: start_date {} is in the future",
                        link.name, start_date
                    )));
                }
            }
        }

        // Duplicate external codes resolve last-write-wins during
        // normalization; surface them so the operator can clean up.
        let mut seen = std::collections::HashSet::new();
        for mapping in &self.variable_mappings {
            if !seen.insert(mapping.source_code.as_str()) {
                warn!(
                    connection = %self.name,
                    source_code = %mapping.source_code,
                    "Duplicate variable mapping for source code; the last mapping wins"
                );
            }
        }

        Ok(())
    }
}
