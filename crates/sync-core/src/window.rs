//! Per-station sync window computation.
//!
//! The calculator holds no persisted state of its own: the caller passes the
//! cursor (last successfully synced window end) when one exists. Without a
//! cursor, a configured `start_date` makes every run re-request the entire
//! history from that date — that is the source behavior for connections
//! running with the cursor store disabled, not an oversight.

use chrono::{DateTime, Duration, TimeZone, Utc};

use telemetry_common::time::truncate_to_hour;
use telemetry_common::{SyncResult, SyncWindow};

use crate::config::StationLink;

/// Compute the `[start, end)` request window for one station.
///
/// `end` is the current local time at the station, truncated to the top of
/// the hour so only fully-elapsed hourly buckets are requested. `start` is
/// the cursor when present, else the configured `start_date`, else one hour
/// before `end`. A degenerate window (`start >= end`) extends `end` by one
/// hour so the range is never empty.
pub fn compute_window(
    link: &StationLink,
    cursor: Option<DateTime<Utc>>,
    now_utc: DateTime<Utc>,
) -> SyncResult<SyncWindow> {
    let tz = link.tz();

    let mut end = truncate_to_hour(now_utc.with_timezone(&tz));

    let start = match cursor {
        Some(cursor) => cursor.with_timezone(&tz),
        None => match link.start_date {
            Some(start_date) => tz
                .from_local_datetime(&start_date)
                .earliest()
                // A start_date inside a DST gap has no local representation;
                // reading it as UTC keeps the window well-formed.
                .unwrap_or_else(|| tz.from_utc_datetime(&start_date)),
            None => end - Duration::hours(1),
        },
    };

    if start >= end {
        end = start + Duration::hours(1);
    }

    Ok(SyncWindow::new(start, end))
}
