//! Test Risk Event Producer
//!
//! Generates and publishes synthetic risk events to NATS, including
//! redeliveries and malformed payloads, for exercising the ingestion path.

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

const EVENT_TYPES: &[&str] = &[
    "incident",
    "adverse_media",
    "sanction_hit",
    "payment_default",
    "ownership_change",
];

/// Event generator for testing
struct EventGenerator {
    rng: rand::rngs::ThreadRng,
    event_counter: u64,
    entities: u32,
    portfolios: u32,
    last: Option<Value>,
}

impl EventGenerator {
    fn new(entities: u32, portfolios: u32) -> Self {
        Self {
            rng: rand::thread_rng(),
            event_counter: 0,
            entities: entities.max(1),
            portfolios: portfolios.max(1),
            last: None,
        }
    }

    /// Generate a well-formed event
    fn generate_valid(&mut self) -> Value {
        self.event_counter += 1;
        let entity = self.rng.gen_range(0..self.entities);
        let event_type = EVENT_TYPES[self.rng.gen_range(0..EVENT_TYPES.len())];
        let severity = match event_type {
            "sanction_hit" => self.rng.gen_range(5.0..10.0),
            "incident" | "payment_default" => self.rng.gen_range(1.0..5.0),
            _ => self.rng.gen_range(0.0..2.0),
        };

        let event = json!({
            "event_id": format!("evt_{:012}", self.event_counter),
            "entity_id": format!("entity_{:05}", entity),
            "event_type": event_type,
            "portfolio_id": format!("portfolio_{}", entity % self.portfolios),
            "occurred_at": Utc::now(),
            "payload": {
                "severity": severity,
                "source": "event-producer",
            },
        });
        self.last = Some(event.clone());
        event
    }

    /// Re-send the previous event, as an at-least-once broker would
    fn generate_duplicate(&mut self) -> Value {
        match self.last.clone() {
            Some(event) => event,
            None => self.generate_valid(),
        }
    }

    /// Generate a payload the service must dead-letter
    fn generate_malformed(&mut self) -> Value {
        self.event_counter += 1;
        match self.rng.gen_range(0..3) {
            0 => json!({
                "event_id": format!("evt_{:012}", self.event_counter),
                "event_type": "incident",
            }),
            1 => json!({
                "event_id": format!("evt_{:012}", self.event_counter),
                "entity_id": "entity_00000",
                "event_type": "incident",
                "payload": {"severity": -3.0},
            }),
            _ => json!(["not", "an", "event"]),
        }
    }

    fn next_event(&mut self, duplicate_rate: f64, malformed_rate: f64) -> (Value, &'static str) {
        let roll: f64 = self.rng.gen();
        if roll < malformed_rate {
            (self.generate_malformed(), "malformed")
        } else if roll < malformed_rate + duplicate_rate {
            (self.generate_duplicate(), "duplicate")
        } else {
            (self.generate_valid(), "valid")
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    valid: u64,
    duplicate: u64,
    malformed: u64,
}

impl Tally {
    fn add(&mut self, kind: &str) {
        match kind {
            "duplicate" => self.duplicate += 1,
            "malformed" => self.malformed += 1,
            _ => self.valid += 1,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("risk_event_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Risk Event Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("risk.events");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let duplicate_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let malformed_rate: f64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(0.05);
    let delay_ms: u64 = args.get(6).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        duplicate_rate = duplicate_rate,
        malformed_rate = malformed_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let mut generator = EventGenerator::new(200, 5);

    // Connect to NATS
    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(&mut generator, count, duplicate_rate, malformed_rate, delay_ms).await;
        }
    };

    info!("Starting to publish {} events...", count);
    let mut tally = Tally::default();

    for i in 0..count {
        let (event, kind) = generator.next_event(duplicate_rate, malformed_rate);
        tally.add(kind);

        let payload = serde_json::to_vec(&event)?;
        client.publish(subject.to_string(), payload.into()).await?;

        if (i + 1) % 10 == 0 {
            info!(
                "Published {}/{} events ({} valid, {} duplicate, {} malformed)",
                i + 1,
                count,
                tally.valid,
                tally.duplicate,
                tally.malformed
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    client.flush().await?;
    info!(
        "Completed! Published {} events ({} valid, {} duplicate, {} malformed)",
        count, tally.valid, tally.duplicate, tally.malformed
    );

    Ok(())
}

async fn run_dry_mode(
    generator: &mut EventGenerator,
    count: u64,
    duplicate_rate: f64,
    malformed_rate: f64,
    delay_ms: u64,
) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    for i in 0..count {
        let (event, kind) = generator.next_event(duplicate_rate, malformed_rate);
        let json = serde_json::to_string_pretty(&event)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample {} event {}:\n{}", kind, i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
