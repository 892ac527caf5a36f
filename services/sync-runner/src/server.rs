//! HTTP server for sync status and metadata browsing.
//!
//! Provides endpoints for:
//! - Overall sync status per connection
//! - Metadata browsing: granularities, observations per granularity
//!   (ranked by reporting-station count), stations per observation
//! - Remote service log retrieval

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use sync_core::{Connection, RankedObservation, Station, SyncEngine, SyncReport};
use telemetry_common::SyncError;

use crate::config::ConnectionConfig;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub connections: Vec<ConnectionStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub id: i64,
    pub name: String,
    pub poll_interval_secs: u64,
    pub stations: usize,
    pub mappings: usize,
    pub last_report: Option<SyncReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GranularitiesResponse {
    pub connection_id: i64,
    pub granularities: Vec<sync_core::Granularity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GranularityObservationsResponse {
    pub connection_id: i64,
    pub granularity: sync_core::Granularity,
    pub observations: Vec<RankedObservation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservationStationsResponse {
    pub connection_id: i64,
    pub observation: sync_core::Observation,
    pub stations: Vec<Station>,
}

// ============================================================================
// Query Parameters
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub from: String,
    pub to: String,
}

// ============================================================================
// Shared State
// ============================================================================

pub struct ServerState {
    pub engine: Arc<SyncEngine>,
    pub configs: Vec<ConnectionConfig>,
    pub reports: Arc<RwLock<HashMap<i64, SyncReport>>>,
}

impl ServerState {
    fn connection(&self, id: i64) -> Option<&Connection> {
        self.configs
            .iter()
            .map(|c| &c.connection)
            .find(|c| c.id == id)
    }
}

fn error_response(error: SyncError) -> axum::response::Response {
    let status = match &error {
        SyncError::RemoteUnavailable(_) => StatusCode::BAD_GATEWAY,
        SyncError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}

fn not_found(what: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("{} not found", what) })),
    )
        .into_response()
}

// ============================================================================
// Router
// ============================================================================

/// Create the status API router.
pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route(
            "/connections/:id/granularities",
            get(granularities_handler),
        )
        .route(
            "/connections/:id/granularities/:code/observations",
            get(granularity_observations_handler),
        )
        .route(
            "/connections/:id/observations/:code/stations",
            get(observation_stations_handler),
        )
        .route("/connections/:id/logs", get(logs_handler))
        .layer(cors)
        .layer(Extension(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "sync-runner".to_string(),
    })
}

/// GET /status - Per-connection sync status
async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    let reports = state.reports.read().await;

    let connections = state
        .configs
        .iter()
        .map(|config| ConnectionStatus {
            id: config.connection.id,
            name: config.connection.name.clone(),
            poll_interval_secs: config.poll_interval_secs,
            stations: config.connection.station_links.len(),
            mappings: config.connection.variable_mappings.len(),
            last_report: reports.get(&config.connection.id).cloned(),
        })
        .collect();

    Json(StatusResponse {
        service: "sync-runner".to_string(),
        connections,
    })
}

/// GET /connections/:id/granularities - The remote taxonomy's granularities
async fn granularities_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let Some(connection) = state.connection(id) else {
        return not_found("connection");
    };

    match state.engine.metadata(connection).await {
        Ok(context) => Json(GranularitiesResponse {
            connection_id: id,
            granularities: context.granularities.clone(),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /connections/:id/granularities/:code/observations - Observations of a
/// granularity, ranked by how many stations report them
async fn granularity_observations_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Path((id, code)): Path<(i64, String)>,
) -> impl IntoResponse {
    let Some(connection) = state.connection(id) else {
        return not_found("connection");
    };

    match state.engine.metadata(connection).await {
        Ok(context) => {
            let Some(granularity) = context.granularity_by_code(&code) else {
                return not_found("granularity");
            };
            Json(GranularityObservationsResponse {
                connection_id: id,
                granularity: granularity.clone(),
                observations: context.observations_for_granularity(&code),
            })
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /connections/:id/observations/:code/stations - Stations reporting an
/// observation, in source order
async fn observation_stations_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Path((id, code)): Path<(i64, String)>,
) -> impl IntoResponse {
    let Some(connection) = state.connection(id) else {
        return not_found("connection");
    };

    match state.engine.metadata(connection).await {
        Ok(context) => {
            let Some(observation) = context.observation_by_code(&code) else {
                return not_found("observation");
            };
            Json(ObservationStationsResponse {
                connection_id: id,
                observation: observation.clone(),
                stations: context
                    .stations_with_observation(&code)
                    .into_iter()
                    .cloned()
                    .collect(),
            })
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /connections/:id/logs?from=..&to=.. - Remote service log payload
async fn logs_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Path(id): Path<i64>,
    Query(params): Query<LogsQuery>,
) -> impl IntoResponse {
    let Some(connection) = state.connection(id) else {
        return not_found("connection");
    };

    match state
        .engine
        .remote_logs(connection, &params.from, &params.to)
        .await
    {
        Ok(logs) => Json(logs).into_response(),
        Err(e) => error_response(e),
    }
}

/// Run the status server on the given port.
pub async fn run_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let router = create_router(state);
    let addr = format!("0.0.0.0:{}", port);

    info!(addr = %addr, "Starting status server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
