//! Risk Scoring Service Library
//!
//! Real-time entity risk scoring against versioned models, with asynchronous
//! risk-event ingestion feeding rolling portfolio summaries.

pub mod api;
pub mod config;
pub mod consumer;
pub mod dedupe;
pub mod engine;
pub mod error;
pub mod feature_extractor;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod portfolio;
pub mod producer;
pub mod types;

pub use config::AppConfig;
pub use consumer::EventConsumer;
pub use engine::ScoringEngine;
pub use feature_extractor::FeatureExtractor;
pub use ingest::{EventIngestor, EventSource, IngestOutcome};
pub use models::{ModelLoader, ModelRegistry};
pub use portfolio::PortfolioAggregator;
pub use producer::OutboundPublisher;
pub use types::{
    event::RiskEvent, portfolio::PortfolioSummary, request::ScoreRequest, score::ScoreResult,
};
