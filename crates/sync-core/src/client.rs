//! HTTP client for the remote station telemetry API.
//!
//! The remote service is metadata-driven JSON-over-HTTP: `get_context`
//! returns the full station/observation/granularity taxonomy, `get_data`
//! returns raw observations for one station over a local-time window, and
//! `get_logs` returns an opaque log payload. Every request carries the
//! access token in the body.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use telemetry_common::time::API_TIME_FORMAT;
use telemetry_common::{SyncError, SyncResult};

use crate::metadata::MetadataContext;

/// Default per-request timeout. A timeout is treated identically to a
/// transport failure for the affected station only.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A raw value as the remote reports it: a number, a numeric string, or
/// null for "no reading".
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Null,
}

impl RawValue {
    /// Numeric view of the value. Empty or non-numeric text and explicit
    /// nulls all read as "no reading".
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Number(v) => Some(*v),
            RawValue::Text(s) => s.trim().parse().ok(),
            RawValue::Null => None,
        }
    }
}

/// One timestamped value for one observation code.
#[derive(Debug, Clone, Deserialize)]
pub struct DataPoint {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default = "null_value")]
    pub value: RawValue,
}

fn null_value() -> RawValue {
    RawValue::Null
}

impl DataPoint {
    /// Parse the local-time timestamp, failing on absent or unparseable dates.
    pub fn timestamp(&self) -> SyncResult<NaiveDateTime> {
        let date = self
            .date
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| SyncError::MissingTimestamp(format!("{:?}", self)))?;

        NaiveDateTime::parse_from_str(date, API_TIME_FORMAT)
            .map_err(|_| SyncError::MissingTimestamp(date.to_string()))
    }
}

/// Raw `get_data` response: observation code to its list of points.
pub type DataResponse = HashMap<String, Vec<DataPoint>>;

/// Client for one connection's remote API.
pub struct StationApi {
    client: Client,
    base_url: String,
    token: String,
}

impl StationApi {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SyncError::RemoteUnavailable(format!("client build failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn post(&self, endpoint: &str, mut body: serde_json::Value) -> SyncResult<String> {
        body["token"] = json!(self.token);
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::RemoteUnavailable(format!(
                "{} returned {}",
                endpoint, status
            )));
        }

        Ok(response.text().await?)
    }

    /// Fetch the full metadata taxonomy.
    pub async fn get_context(&self) -> SyncResult<MetadataContext> {
        let body = self.post("get_context", json!({})).await?;
        let context: MetadataContext = serde_json::from_str(&body)?;
        Ok(context)
    }

    /// Fetch raw observations for one station over a local-time window.
    ///
    /// All requested codes go in a single call (comma-joined), not one call
    /// per parameter.
    pub async fn get_data(
        &self,
        station_code: &str,
        observation_codes: &[String],
        from: &str,
        to: &str,
    ) -> SyncResult<DataResponse> {
        let body = self
            .post(
                "get_data",
                json!({
                    "station": station_code,
                    "observations": observation_codes.join(","),
                    "from": from,
                    "to": to,
                }),
            )
            .await?;

        let data: DataResponse = serde_json::from_str(&body)?;
        Ok(data)
    }

    /// Fetch the remote service's log payload for a time range. The payload
    /// is opaque to the engine and surfaced as-is.
    pub async fn get_logs(&self, from: &str, to: &str) -> SyncResult<serde_json::Value> {
        let body = self
            .post("get_logs", json!({ "from": from, "to": to }))
            .await?;

        let logs: serde_json::Value = serde_json::from_str(&body)?;
        Ok(logs)
    }
}
