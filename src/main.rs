//! Risk Scoring Service - Main Entry Point
//!
//! Serves synchronous risk scores over HTTP and folds risk events from NATS
//! and HTTP into rolling portfolio summaries.

use anyhow::{Context, Result};
use risk_scoring_service::{
    api::{self, AppState},
    config::{AppConfig, LoggingConfig},
    consumer::EventConsumer,
    ingest::{EventIngestor, EventSource},
    metrics::{MetricsReporter, ServiceMetrics},
    models::{ModelLoader, ModelRegistry},
    portfolio::PortfolioAggregator,
    producer::{self, OutboundPublisher},
    ScoringEngine,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("risk_scoring_service={}", logging.level).parse()?)
        .add_directive("tower_http=info".parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting Risk Scoring Service");
    info!(
        "Scoring budget: {}ms, tiers: medium>={:.2}, high>={:.2}, critical>={}",
        config.scoring.budget_ms,
        config.scoring.thresholds.medium(),
        config.scoring.thresholds.high(),
        config
            .scoring
            .thresholds
            .critical()
            .map(|c| format!("{:.2}", c))
            .unwrap_or_else(|| "-".to_string())
    );

    let metrics = Arc::new(ServiceMetrics::new());

    // Load and register models
    let registry = Arc::new(ModelRegistry::new());
    for model in ModelLoader::new().load_dir(&config.models.dir)? {
        registry.register(model)?;
    }
    if let Some(version) = &config.models.active_version {
        registry
            .activate(version)
            .with_context(|| format!("Configured active model '{}' is not loaded", version))?;
    }
    info!(
        active = ?registry.active_version(),
        models = registry.list().len(),
        "Model registry initialized"
    );

    let aggregator = Arc::new(PortfolioAggregator::with_dedupe_window(
        config.ingest.dedupe_window,
    ));

    // Outbound channels
    let (dead_letter_tx, dead_letter_rx) = mpsc::channel(config.ingest.dead_letter_capacity);
    let (alert_tx, alert_rx) = mpsc::channel(config.ingest.alert_capacity);
    let (event_tx, event_rx) = mpsc::channel(config.ingest.channel_capacity);

    // Connect to NATS when enabled
    let client = if config.nats.enabled {
        let client = async_nats::connect(&config.nats.url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
        info!("Connected to NATS at {}", config.nats.url);
        Some(client)
    } else {
        warn!("NATS disabled; events are accepted over HTTP only");
        None
    };

    let publisher = client.as_ref().map(|c| {
        OutboundPublisher::new(
            c.clone(),
            &config.nats.dead_letter_subject,
            &config.nats.alerts_subject,
        )
    });
    tokio::spawn(producer::forward_dead_letters(publisher.clone(), dead_letter_rx));
    tokio::spawn(producer::forward_alerts(publisher, alert_rx));

    // Event ingestion
    let ingestor = EventIngestor::new(aggregator.clone(), dead_letter_tx, metrics.clone());

    let http_ingestor = ingestor.clone();
    tokio::spawn(async move {
        http_ingestor
            .run(EventSource::Http, ReceiverStream::new(event_rx))
            .await;
    });

    if let Some(client) = &client {
        let consumer = EventConsumer::new(client.clone(), &config.nats.events_subject);
        let stream = consumer.subscribe().await?;
        info!("Listening for events on: {}", consumer.subject());
        let nats_ingestor = ingestor.clone();
        tokio::spawn(async move {
            nats_ingestor.run(EventSource::Nats, stream).await;
            error!("NATS event subscription ended");
        });
    }

    // Start metrics reporter
    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let engine = Arc::new(
        ScoringEngine::new(registry.clone(), aggregator.clone(), metrics.clone(), &config.scoring)
            .with_alerts(alert_tx),
    );

    let state = AppState {
        engine,
        aggregator,
        registry,
        metrics: metrics.clone(),
        events: event_tx,
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("HTTP server listening on {}", config.server.bind);

    axum::serve(listener, api::app(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
        .context("HTTP server failed")?;

    // Print final summary
    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}
