//! HTTP surface

mod errors;
mod handlers;

pub use errors::{ApiError, ErrorBody};
pub use handlers::{BatchItem, BatchResponse, HealthResponse, SERVICE_NAME};

use crate::engine::ScoringEngine;
use crate::metrics::ServiceMetrics;
use crate::models::ModelRegistry;
use crate::portfolio::PortfolioAggregator;
use axum::{
    body::Bytes,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ScoringEngine>,
    pub aggregator: Arc<PortfolioAggregator>,
    pub registry: Arc<ModelRegistry>,
    pub metrics: Arc<ServiceMetrics>,
    /// Raw event bodies awaiting the ingestor
    pub events: mpsc::Sender<Bytes>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/risk/score", post(handlers::score))
        .route("/risk/score/batch", post(handlers::score_batch))
        .route("/risk/portfolio", get(handlers::portfolio_summary))
        .route("/risk/event", post(handlers::ingest_event))
        .route("/risk/models", get(handlers::list_models))
        .route("/metrics", get(handlers::get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
