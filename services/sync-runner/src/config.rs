//! Configuration loading for connection sync schedules.
//!
//! Loads connection configurations from YAML files in config/connections/

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use sync_core::Connection;

/// Root configuration loaded from a connection YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub connection: Connection,
    /// Seconds between sync runs for this connection.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    300
}

impl ConnectionConfig {
    /// Load a connection configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ConnectionConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .connection
            .validate(Utc::now())
            .with_context(|| format!("Invalid connection config: {}", path.display()))?;

        debug!(
            connection = %config.connection.name,
            path = %path.display(),
            "Loaded connection config"
        );
        Ok(config)
    }
}

/// Load all enabled connection configurations from a directory.
pub fn load_connection_configs(config_dir: &Path) -> Result<Vec<ConnectionConfig>> {
    let connections_dir = config_dir.join("connections");

    if !connections_dir.exists() {
        warn!(path = %connections_dir.display(), "Connections config directory not found");
        return Ok(Vec::new());
    }

    let mut configs: Vec<ConnectionConfig> = Vec::new();

    for entry in std::fs::read_dir(&connections_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            match ConnectionConfig::load(&path) {
                Ok(config) => {
                    if !config.connection.enabled {
                        debug!(
                            connection = %config.connection.name,
                            "Skipping disabled connection"
                        );
                        continue;
                    }
                    if configs
                        .iter()
                        .any(|c| c.connection.id == config.connection.id)
                    {
                        warn!(
                            connection = %config.connection.name,
                            id = config.connection.id,
                            "Duplicate connection id, skipping"
                        );
                        continue;
                    }
                    info!(
                        connection = %config.connection.name,
                        stations = config.connection.station_links.len(),
                        mappings = config.connection.variable_mappings.len(),
                        "Loaded connection configuration"
                    );
                    configs.push(config);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load connection config");
                }
            }
        }
    }

    info!(count = configs.len(), "Loaded connection configurations");
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
connection:
  id: 1
  name: "sahel-network"
  base_url: "https://telemetry.example.com/rest"
  api_token: "secret-token"
  variable_mappings:
    - parameter: air_temperature
      parameter_unit: celsius
      source_code: TEMP
      source_unit: fahrenheit
    - parameter: relative_humidity
      parameter_unit: percent
      source_code: HUM
      source_unit: percent
  station_links:
    - station_id: 101
      name: "north-ridge"
      source_station_code: "1001"
      timezone: Africa/Dakar
      start_date: 2024-01-01T00:00:00
    - station_id: 102
      name: "south-gate"
      source_station_code: "1002"
      enabled: false
poll_interval_secs: 600
"#;

    #[test]
    fn test_parse_connection_config() {
        let config: ConnectionConfig = serde_yaml::from_str(SAMPLE_YAML).unwrap();

        assert_eq!(config.connection.id, 1);
        assert_eq!(config.connection.name, "sahel-network");
        assert_eq!(config.connection.source_type, "station_http");
        assert_eq!(config.connection.variable_mappings.len(), 2);
        assert_eq!(config.poll_interval_secs, 600);

        let link = &config.connection.station_links[0];
        assert_eq!(link.timezone, "Africa/Dakar");
        assert!(link.start_date.is_some());
        assert!(link.enabled);
        assert!(!config.connection.station_links[1].enabled);
        // Timezone defaults to UTC when unset.
        assert_eq!(config.connection.station_links[1].timezone, "UTC");
    }

    #[test]
    fn test_poll_interval_defaults() {
        let yaml = r#"
connection:
  id: 2
  name: "minimal"
  base_url: "https://telemetry.example.com/rest"
  api_token: "t"
"#;
        let config: ConnectionConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.poll_interval_secs, 300);
        assert!(config.connection.variable_mappings.is_empty());
    }

    #[test]
    fn test_load_dir_skips_broken_and_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let connections = dir.path().join("connections");
        std::fs::create_dir_all(&connections).unwrap();

        std::fs::write(connections.join("good.yaml"), SAMPLE_YAML).unwrap();
        std::fs::write(connections.join("broken.yaml"), "connection: [not a map").unwrap();
        std::fs::write(
            connections.join("disabled.yaml"),
            r#"
connection:
  id: 3
  name: "disabled-network"
  base_url: "https://telemetry.example.com/rest"
  api_token: "t"
  enabled: false
"#,
        )
        .unwrap();

        let configs = load_connection_configs(dir.path()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].connection.name, "sahel-network");
    }
}
