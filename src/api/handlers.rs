use crate::api::errors::{ApiError, ErrorBody};
use crate::api::AppState;
use crate::metrics::MetricsSnapshot;
use crate::models::ModelInfo;
use crate::types::portfolio::PortfolioSummary;
use crate::types::request::ScoreRequest;
use crate::types::score::ScoreResult;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "risk-scoring-service";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: SERVICE_NAME,
    })
}

/// Ready once a model is active
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.active_version() {
        Some(version) => (
            StatusCode::OK,
            Json(json!({ "ready": true, "service": SERVICE_NAME, "model_version": version })),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "service": SERVICE_NAME })),
        ),
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidBody(e.to_string()))
}

pub async fn score(State(state): State<AppState>, body: Bytes) -> Result<Json<ScoreResult>, ApiError> {
    let request: ScoreRequest = parse_body(&body)?;
    let result = state.engine.score(request).await?;
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchItem {
    Ok(ScoreResult),
    Error(ErrorBody),
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub processed: usize,
    pub results: Vec<BatchItem>,
}

pub async fn score_batch(State(state): State<AppState>, body: Bytes) -> Result<Json<BatchResponse>, ApiError> {
    let requests: Vec<ScoreRequest> = parse_body(&body)?;
    info!(count = requests.len(), "Batch scoring request");

    let results: Vec<BatchItem> = state
        .engine
        .score_batch(requests)
        .await?
        .into_iter()
        .map(|outcome| match outcome {
            Ok(result) => BatchItem::Ok(result),
            Err(e) => BatchItem::Error(ApiError::from(e).body()),
        })
        .collect();

    Ok(Json(BatchResponse {
        processed: results.len(),
        results,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PortfolioQuery {
    pub id: Option<String>,
}

pub async fn portfolio_summary(
    State(state): State<AppState>,
    Query(query): Query<PortfolioQuery>,
) -> Result<Json<PortfolioSummary>, ApiError> {
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or(ApiError::MissingParameter("id"))?;
    let summary = state.aggregator.get_summary(&id)?;
    Ok(Json(summary.as_ref().clone()))
}

/// Enqueue a raw event for asynchronous validation and application
pub async fn ingest_event(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse, ApiError> {
    match state.events.try_send(body) {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))),
        Err(TrySendError::Full(_)) => {
            warn!("Event queue full, rejecting event");
            Err(ApiError::QueueFull)
        }
        Err(TrySendError::Closed(_)) => Err(ApiError::IngestClosed),
    }
}

pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    Json(state.registry.list())
}

pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
