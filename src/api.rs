//! HTTP+JSON interface.
//!
//! - `POST /api/routes/safest`: safest route with scored alternatives
//! - `POST /api/routes/debug-crime-check`: does the route pass near a point
//! - `POST /api/routes/debug-route`: route with per-edge cost breakdown
//! - `POST /api/routes/debug-crime-impact`: edges a hypothetical report would penalize
//! - `GET /api/network`, `GET /health`

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::alternatives::StopReason;
use crate::diagnostics::{EdgeDiagnostic, EdgeImpact};
use crate::engine::{RouteEngine, RouteOutcome};
use crate::error::Error;
use crate::model::{Coordinate, CrimeType, RouteRequest, TravelMode};
use crate::path::EdgeRecord;

pub struct AppState {
    pub engine: Arc<RouteEngine>,
    pub request_timeout: Duration,
}

pub fn create_router(engine: Arc<RouteEngine>) -> Router {
    let request_timeout = Duration::from_millis(engine.config().server.request_timeout_ms);
    let state = Arc::new(AppState {
        engine,
        request_timeout,
    });

    // Allows the map UI to call the API from another origin
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/network", get(network_info))
        .route("/api/routes/safest", post(safest_route))
        .route("/api/routes/debug-crime-check", post(debug_crime_check))
        .route("/api/routes/debug-route", post(debug_route))
        .route("/api/routes/debug-crime-impact", post(debug_crime_impact))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// --- API DTOs ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequestDto {
    pub start_lat: f64,
    pub start_lng: f64,
    pub end_lat: f64,
    pub end_lng: f64,
    pub network_type: TravelMode,
}

impl From<&RouteRequestDto> for RouteRequest {
    fn from(dto: &RouteRequestDto) -> Self {
        RouteRequest {
            start: Coordinate::new(dto.start_lat, dto.start_lng),
            end: Coordinate::new(dto.end_lat, dto.end_lng),
            mode: dto.network_type,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrimeCheckDto {
    pub crime_lat: f64,
    pub crime_lng: f64,
    #[serde(flatten)]
    pub route: RouteRequestDto,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrimeImpactDto {
    pub crime_lat: f64,
    pub crime_lng: f64,
    #[serde(default = "default_crime_type")]
    pub crime_type: CrimeType,
}

fn default_crime_type() -> CrimeType {
    CrimeType::Other
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub base_cost: f64,
    pub risk_cost: f64,
    pub total_cost: f64,
    pub edge_count: usize,
    pub crime_count: usize,
    pub start_snap_m: f64,
    pub end_snap_m: f64,
    pub network_version: u64,
    /// Why alternative generation ended; `budget` means it was cut short
    pub alternatives_stop: StopReason,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    pub route: Vec<Coordinate>,
    pub edge_weights: Vec<EdgeRecord>,
    /// Primary followed by every candidate the alternative search produced
    pub all_paths: Vec<Vec<EdgeRecord>>,
    pub all_path_scores: Vec<f64>,
    pub alt_paths: Vec<Vec<EdgeRecord>>,
    pub alt_path_scores: Vec<f64>,
    pub summary: RouteSummary,
}

impl From<&RouteOutcome> for RouteResponse {
    fn from(outcome: &RouteOutcome) -> Self {
        let network = &outcome.network.network;
        let primary = &outcome.primary;
        let candidates = std::iter::once(primary).chain(&outcome.alternatives.considered);

        RouteResponse {
            route: primary.points.clone(),
            edge_weights: primary.edge_records(network),
            all_paths: candidates.clone().map(|p| p.edge_records(network)).collect(),
            all_path_scores: candidates.map(|p| p.score()).collect(),
            alt_paths: outcome
                .alternatives
                .accepted
                .iter()
                .map(|p| p.edge_records(network))
                .collect(),
            alt_path_scores: outcome.alternatives.accepted.iter().map(|p| p.score()).collect(),
            summary: RouteSummary {
                base_cost: primary.base_cost,
                risk_cost: primary.risk_cost,
                total_cost: primary.total_cost(),
                edge_count: primary.len(),
                crime_count: outcome.crime_count,
                start_snap_m: outcome.start.distance_m,
                end_snap_m: outcome.goal.distance_m,
                network_version: outcome.network.version,
                alternatives_stop: outcome.alternatives.stop,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrimeCheckResponse {
    /// "yes" when the route passes within the proximity threshold
    pub result: &'static str,
    pub closest_distance_m: f64,
    #[serde(flatten)]
    pub route: RouteResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugRouteResponse {
    pub edges: Vec<EdgeDiagnostic>,
    #[serde(flatten)]
    pub route: RouteResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrimeImpactResponse {
    pub edges: Vec<EdgeImpact>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkResponse {
    pub version: u64,
    pub nodes: usize,
    pub edges: usize,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub reason: &'static str,
    pub message: String,
}

/// Failure body; `route` is always empty so the map UI can render it as-is.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub route: Vec<Coordinate>,
    pub error: ErrorBody,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::InvalidRequest(_)
            | Error::InvalidCoordinates(_)
            | Error::NoNetworkNearby { .. } => StatusCode::BAD_REQUEST,
            Error::NoPathFound => StatusCode::NOT_FOUND,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::UpstreamDataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidData(_) | Error::InvalidConfig(_) | Error::IoError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("Request failed: {e}");
        } else {
            warn!("Request rejected: {e}");
        }
        ApiError {
            status,
            body: ErrorBody {
                reason: e.reason(),
                message: e.to_string(),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidRequest(rejection.body_text()).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            route: Vec::new(),
            error: self.body,
        };
        (self.status, Json(body)).into_response()
    }
}

// --- Handlers ---

/// Runs `job` on the blocking pool under the request timeout.
async fn run_blocking<T, F>(state: &AppState, job: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&RouteEngine) -> Result<T, Error> + Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    let task = tokio::task::spawn_blocking(move || job(&engine));
    match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(result)) => result.map_err(ApiError::from),
        Ok(Err(join)) => Err(Error::InvalidData(format!("route worker failed: {join}")).into()),
        Err(_) => Err(Error::Timeout { expanded: 0 }.into()),
    }
}

async fn network_info(State(state): State<Arc<AppState>>) -> Json<NetworkResponse> {
    let info = state.engine.network_info();
    Json(NetworkResponse {
        version: info.version,
        nodes: info.nodes,
        edges: info.edges,
        loaded_at: info.loaded_at,
    })
}

async fn safest_route(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RouteRequestDto>, JsonRejection>,
) -> Result<Json<RouteResponse>, ApiError> {
    let Json(payload) = payload?;
    let request = RouteRequest::from(&payload);
    let outcome = run_blocking(&state, move |engine| engine.compute_safest_route(&request)).await?;
    Ok(Json(RouteResponse::from(&outcome)))
}

async fn debug_crime_check(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CrimeCheckDto>, JsonRejection>,
) -> Result<Json<CrimeCheckResponse>, ApiError> {
    let Json(payload) = payload?;
    let request = RouteRequest::from(&payload.route);
    let crime = Coordinate::new(payload.crime_lat, payload.crime_lng);
    let outcome = run_blocking(&state, move |engine| {
        engine.debug_crime_proximity(crime, &request)
    })
    .await?;
    Ok(Json(CrimeCheckResponse {
        result: if outcome.verdict.near { "yes" } else { "no" },
        closest_distance_m: outcome.verdict.closest_distance_m,
        route: RouteResponse::from(&outcome.route),
    }))
}

async fn debug_route(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RouteRequestDto>, JsonRejection>,
) -> Result<Json<DebugRouteResponse>, ApiError> {
    let Json(payload) = payload?;
    let request = RouteRequest::from(&payload);
    let explanation = run_blocking(&state, move |engine| engine.explain_route(&request)).await?;
    Ok(Json(DebugRouteResponse {
        route: RouteResponse::from(&explanation.route),
        edges: explanation.edges,
    }))
}

async fn debug_crime_impact(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CrimeImpactDto>, JsonRejection>,
) -> Result<Json<CrimeImpactResponse>, ApiError> {
    let Json(payload) = payload?;
    let point = Coordinate::new(payload.crime_lat, payload.crime_lng);
    let crime_type = payload.crime_type;
    let edges = run_blocking(&state, move |engine| engine.crime_impact(point, crime_type)).await?;
    Ok(Json(CrimeImpactResponse { edges }))
}
