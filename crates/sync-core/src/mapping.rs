//! Variable mapping resolution.
//!
//! Pure configuration reads — no network, no cache. A connection with an
//! empty mapping list has nothing to ingest; the orchestrator reports that
//! explicitly instead of running and producing an ambiguous zero.

use tracing::debug;

use crate::config::{Connection, VariableMapping};
use crate::metadata::Station;

/// The ordered mapping list configured for a connection.
pub fn resolve(connection: &Connection) -> &[VariableMapping] {
    &connection.variable_mappings
}

/// The external codes to request for one station: mapped codes intersected
/// with the station's advertised observation set (when the metadata context
/// knows the station), deduplicated, in mapping order.
pub fn request_codes(
    mappings: &[VariableMapping],
    station: Option<&Station>,
) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();

    for mapping in mappings {
        if codes.iter().any(|c| c == &mapping.source_code) {
            continue;
        }
        if let Some(station) = station {
            if !station.reports(&mapping.source_code) {
                debug!(
                    station = %station.code,
                    code = %mapping.source_code,
                    "Station does not report mapped observation, not requesting"
                );
                continue;
            }
        }
        codes.push(mapping.source_code.clone());
    }

    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_common::Unit;

    fn mapping(parameter: &str, code: &str) -> VariableMapping {
        VariableMapping {
            parameter: parameter.to_string(),
            parameter_unit: Unit::Celsius,
            source_code: code.to_string(),
            source_unit: Unit::Celsius,
        }
    }

    fn station(codes: &[&str]) -> Station {
        Station {
            code: "1001".to_string(),
            name: "North Ridge".to_string(),
            observations: codes.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_codes_intersect_station_observations() {
        let mappings = vec![mapping("air_temperature", "TEMP"), mapping("humidity", "HUM")];
        let station = station(&["TEMP"]);

        assert_eq!(request_codes(&mappings, Some(&station)), vec!["TEMP"]);
    }

    #[test]
    fn test_unknown_station_requests_all_mapped_codes() {
        let mappings = vec![mapping("air_temperature", "TEMP"), mapping("humidity", "HUM")];

        assert_eq!(request_codes(&mappings, None), vec!["TEMP", "HUM"]);
    }

    #[test]
    fn test_duplicate_codes_requested_once() {
        let mappings = vec![
            mapping("air_temperature", "TEMP"),
            mapping("soil_temperature", "TEMP"),
        ];

        assert_eq!(request_codes(&mappings, None), vec!["TEMP"]);
    }
}
