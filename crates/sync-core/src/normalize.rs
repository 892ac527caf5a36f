//! Unit conversion and normalization of raw rows into canonical records.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use telemetry_common::{ObservationRecord, Unit};

use crate::config::{StationLink, VariableMapping};
use crate::fetch::RawRow;

/// Normalize raw rows into canonical observation records.
///
/// For each row and each mapping in order: a code absent from the row is "no
/// reading" and produces nothing; a value whose source unit differs from the
/// canonical unit is converted; timestamps are read as naive local time in
/// the station's timezone and normalized to UTC. Records collect into a map
/// keyed by (time, parameter), so duplicate mappings for one external code
/// resolve last-write-wins in mapping order.
pub fn normalize_rows(
    rows: &[RawRow],
    mappings: &[VariableMapping],
    link: &StationLink,
    connection_id: i64,
) -> Vec<ObservationRecord> {
    let tz = link.tz();
    let mut records: BTreeMap<(DateTime<Utc>, String), f64> = BTreeMap::new();

    for row in rows {
        let time = match tz.from_local_datetime(&row.timestamp).earliest() {
            Some(local) => local.with_timezone(&Utc),
            None => {
                // Local time inside a DST gap has no instant to normalize to.
                warn!(
                    station = %link.source_station_code,
                    timestamp = %row.timestamp,
                    timezone = %link.timezone,
                    "Dropping row with nonexistent local time"
                );
                continue;
            }
        };

        for mapping in mappings {
            let raw = match row.values.get(&mapping.source_code) {
                Some(raw) => *raw,
                None => continue,
            };

            let value = match Unit::convert(raw, mapping.source_unit, mapping.parameter_unit) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        station = %link.source_station_code,
                        parameter = %mapping.parameter,
                        error = %e,
                        "Dropping unconvertible value"
                    );
                    continue;
                }
            };

            records.insert((time, mapping.parameter.clone()), value);
        }
    }

    records
        .into_iter()
        .map(|((time, parameter), value)| ObservationRecord {
            station_id: link.station_id,
            parameter,
            connection_id,
            time,
            value,
        })
        .collect()
}
