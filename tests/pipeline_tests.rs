//! End-to-end scoring and ingestion behaviour through the library API.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use risk_scoring_service::config::ScoringConfig;
use risk_scoring_service::ingest::{EventIngestor, EventSource, IngestOutcome};
use risk_scoring_service::metrics::ServiceMetrics;
use risk_scoring_service::models::{ModelLoader, ModelRegistry};
use risk_scoring_service::portfolio::PortfolioAggregator;
use risk_scoring_service::types::request::{EntityKind, ScoreRequest};
use risk_scoring_service::types::score::RiskTier;
use risk_scoring_service::ScoringEngine;
use serde_json::json;
use tokio::sync::mpsc;

struct Pipeline {
    engine: Arc<ScoringEngine>,
    ingestor: EventIngestor,
    aggregator: Arc<PortfolioAggregator>,
}

fn pipeline() -> Pipeline {
    let registry = Arc::new(ModelRegistry::new());
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("models");
    for model in ModelLoader::new().load_dir(dir).unwrap() {
        registry.register(model).unwrap();
    }
    registry.activate("baseline-linear-v1").unwrap();

    let metrics = Arc::new(ServiceMetrics::new());
    let aggregator = Arc::new(PortfolioAggregator::new());
    let (dead_letter_tx, _) = mpsc::channel(1);
    let ingestor = EventIngestor::new(aggregator.clone(), dead_letter_tx, metrics.clone());
    let engine = Arc::new(ScoringEngine::new(
        registry,
        aggregator.clone(),
        metrics,
        &ScoringConfig::default(),
    ));

    Pipeline {
        engine,
        ingestor,
        aggregator,
    }
}

fn company(id: &str, revenue: f64, incidents: f64) -> ScoreRequest {
    ScoreRequest::new(id, EntityKind::Company)
        .with_attribute("revenue", revenue)
        .with_attribute("priorIncidents", incidents)
        .with_portfolio("book")
}

fn event(event_id: &str, entity_id: &str, severity: f64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event_id": event_id,
        "entity_id": entity_id,
        "event_type": "sanction_hit",
        "portfolio_id": "book",
        "payload": {"severity": severity},
    }))
    .unwrap()
}

#[tokio::test]
async fn events_raise_subsequent_scores() {
    let p = pipeline();

    let before = p.engine.score(company("ACME", 1_000_000.0, 0.0)).await.unwrap();

    assert_eq!(p.ingestor.handle(EventSource::Nats, &event("e1", "ACME", 4.0)), IngestOutcome::Applied);
    assert_eq!(p.ingestor.handle(EventSource::Nats, &event("e2", "ACME", 4.0)), IngestOutcome::Applied);

    let after = p.engine.score(company("ACME", 1_000_000.0, 0.0)).await.unwrap();
    assert!(after.score > before.score, "{} <= {}", after.score, before.score);

    // redelivery leaves the next score unchanged
    assert_eq!(p.ingestor.handle(EventSource::Nats, &event("e2", "ACME", 4.0)), IngestOutcome::Duplicate);
    let again = p.engine.score(company("ACME", 1_000_000.0, 0.0)).await.unwrap();
    assert_eq!(again.score, after.score);
}

#[tokio::test]
async fn pinned_version_is_reported() {
    let p = pipeline();
    let result = p
        .engine
        .score(company("ACME", 1_000_000.0, 2.0).with_model_version("gbt-v2"))
        .await
        .unwrap();

    assert_eq!(result.model_version, "gbt-v2");
    assert_eq!(result.tier, p.engine.thresholds().tier_for(result.score));
}

#[tokio::test]
async fn score_is_monotonic_in_incidents() {
    let p = pipeline();
    let mut previous = 0.0;
    for incidents in 0..6 {
        let result = p
            .engine
            .score(company(&format!("co-{}", incidents), 250_000.0, incidents as f64))
            .await
            .unwrap();
        assert!(result.score >= previous);
        previous = result.score;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scores_and_events_converge() {
    let p = pipeline();

    let mut handles = Vec::new();
    for i in 0..64 {
        let engine = p.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .score(company(&format!("co-{}", i), 10_000.0 * (i + 1) as f64, (i % 4) as f64))
                .await
        }));
    }

    let events: Vec<Bytes> = (0..64)
        .flat_map(|i| {
            let payload = Bytes::from(event(&format!("e{}", i), &format!("co-{}", i), 1.0));
            [payload.clone(), payload]
        })
        .collect();
    let ingestor = p.ingestor.clone();
    let ingest = tokio::spawn(async move {
        ingestor
            .run(EventSource::Nats, futures::stream::iter(events))
            .await;
    });

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    ingest.await.unwrap();

    let summary = p.aggregator.get_summary("book").unwrap();
    assert_eq!(summary.entity_count, 64);
    assert_eq!(summary.event_count, 64);

    let tier_total: u64 = summary.tier_distribution.values().sum();
    assert_eq!(tier_total, 64);

    let max = results.iter().map(|r| r.score).fold(0.0, f64::max);
    assert_eq!(summary.max_score, max);

    let low = results.iter().filter(|r| r.tier == RiskTier::Low).count() as u64;
    assert_eq!(summary.tier_distribution[&RiskTier::Low], low);
}
