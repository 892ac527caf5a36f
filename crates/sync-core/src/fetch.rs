//! Per-station observation retrieval.
//!
//! The remote returns one list of points per observation code; the engine
//! works row-wise, so the response is pivoted into timestamped rows keyed by
//! code. Points without a usable timestamp are dropped with a diagnostic,
//! never treated as fatal.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use telemetry_common::{SyncResult, SyncWindow};

use crate::client::DataResponse;
use crate::config::StationLink;
use crate::source::TelemetrySource;

/// One local-time instant and the raw values reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// Naive local time in the station's configured timezone.
    pub timestamp: NaiveDateTime,
    /// Observation code to raw value. Codes with no reading are absent.
    pub values: HashMap<String, f64>,
}

/// Fetch raw observation rows for one station over a window.
///
/// Issues exactly one remote call carrying the full code set.
pub async fn fetch_rows(
    source: &dyn TelemetrySource,
    link: &StationLink,
    codes: &[String],
    window: &SyncWindow,
) -> SyncResult<Vec<RawRow>> {
    let response = source
        .fetch_observations(&link.source_station_code, codes, window)
        .await?;

    let rows = pivot_rows(&link.source_station_code, response);
    debug!(
        station = %link.source_station_code,
        rows = rows.len(),
        from = %window.format_start(),
        to = %window.format_end(),
        "Fetched observation rows"
    );

    Ok(rows)
}

/// Pivot the per-code response into rows ordered by timestamp.
pub fn pivot_rows(station_code: &str, response: DataResponse) -> Vec<RawRow> {
    let mut by_time: BTreeMap<NaiveDateTime, HashMap<String, f64>> = BTreeMap::new();

    for (code, points) in response {
        for point in points {
            let timestamp = match point.timestamp() {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(
                        station = %station_code,
                        code = %code,
                        error = %e,
                        "Dropping record without usable timestamp"
                    );
                    continue;
                }
            };

            // Null or non-numeric values are "no reading", not an error.
            if let Some(value) = point.value.as_f64() {
                by_time.entry(timestamp).or_default().insert(code.clone(), value);
            }
        }
    }

    by_time
        .into_iter()
        .map(|(timestamp, values)| RawRow { timestamp, values })
        .collect()
}
