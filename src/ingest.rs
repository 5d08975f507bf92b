//! Event ingestion: validation, dead-lettering and idempotent application.

use crate::error::MalformedEvent;
use crate::metrics::ServiceMetrics;
use crate::portfolio::{EventOutcome, PortfolioAggregator};
use crate::types::event::RiskEvent;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Where an event payload arrived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Http,
    Nats,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Http => f.write_str("http"),
            EventSource::Nats => f.write_str("nats"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied,
    Duplicate,
    DeadLettered,
}

/// A payload that could not be parsed into a `RiskEvent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Raw payload, lossily decoded as UTF-8
    pub payload: String,
    pub reason: String,
    pub source: EventSource,
    pub received_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(payload: &[u8], reason: &MalformedEvent, source: EventSource) -> Self {
        Self {
            payload: String::from_utf8_lossy(payload).into_owned(),
            reason: reason.to_string(),
            source,
            received_at: Utc::now(),
        }
    }
}

/// Validates raw event payloads and folds valid ones into the aggregator
#[derive(Clone)]
pub struct EventIngestor {
    aggregator: Arc<PortfolioAggregator>,
    dead_letters: mpsc::Sender<DeadLetter>,
    metrics: Arc<ServiceMetrics>,
}

impl EventIngestor {
    pub fn new(
        aggregator: Arc<PortfolioAggregator>,
        dead_letters: mpsc::Sender<DeadLetter>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            aggregator,
            dead_letters,
            metrics,
        }
    }

    /// Handle one payload. Never fails: malformed payloads are dead-lettered.
    pub fn handle(&self, source: EventSource, payload: &[u8]) -> IngestOutcome {
        let outcome = match RiskEvent::from_slice(payload) {
            Ok(event) => match self.aggregator.apply_event(&event) {
                EventOutcome::Applied => {
                    debug!(
                        event_id = %event.event_id,
                        entity_id = %event.entity_id,
                        event_type = %event.event_type,
                        source = %source,
                        "Event applied"
                    );
                    IngestOutcome::Applied
                }
                EventOutcome::Duplicate => {
                    debug!(
                        event_id = %event.event_id,
                        entity_id = %event.entity_id,
                        "Duplicate event ignored"
                    );
                    IngestOutcome::Duplicate
                }
            },
            Err(reason) => {
                warn!(source = %source, reason = %reason, bytes = payload.len(), "Malformed event, dead-lettering");
                self.dead_letter(DeadLetter::new(payload, &reason, source));
                IngestOutcome::DeadLettered
            }
        };

        self.metrics.record_ingest(outcome);
        outcome
    }

    fn dead_letter(&self, letter: DeadLetter) {
        if let Err(e) = self.dead_letters.try_send(letter) {
            self.metrics.record_dead_letter_dropped();
            warn!(error = %e, "Dead-letter channel unavailable, dropping malformed event");
        }
    }

    /// Consume `stream` until it ends
    pub async fn run<S>(&self, source: EventSource, mut stream: S)
    where
        S: Stream<Item = Bytes> + Unpin,
    {
        info!(source = %source, "Event ingestion started");
        let mut processed: u64 = 0;

        while let Some(payload) = stream.next().await {
            self.handle(source, &payload);
            processed += 1;

            // Log progress every 1000 events
            if processed % 1000 == 0 {
                info!(source = %source, processed = processed, "Ingestion milestone");
            }
        }

        info!(source = %source, processed = processed, "Event stream ended");
    }
}
