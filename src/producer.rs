//! NATS publishing for dead letters and score alerts

use crate::ingest::DeadLetter;
use crate::types::score::ScoreResult;
use anyhow::Result;
use async_nats::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Publisher for outbound service messages
#[derive(Clone)]
pub struct OutboundPublisher {
    client: Client,
    dead_letter_subject: String,
    alerts_subject: String,
}

impl OutboundPublisher {
    pub fn new(client: Client, dead_letter_subject: &str, alerts_subject: &str) -> Self {
        Self {
            client,
            dead_letter_subject: dead_letter_subject.to_string(),
            alerts_subject: alerts_subject.to_string(),
        }
    }

    async fn publish<T: Serialize>(&self, subject: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.client
            .publish(subject.to_string(), payload.into())
            .await?;
        Ok(())
    }

    pub async fn publish_dead_letter(&self, letter: &DeadLetter) -> Result<()> {
        self.publish(&self.dead_letter_subject, letter).await?;
        debug!(reason = %letter.reason, source = %letter.source, "Published dead letter");
        Ok(())
    }

    pub async fn publish_alert(&self, result: &ScoreResult) -> Result<()> {
        self.publish(&self.alerts_subject, result).await?;
        debug!(
            score_id = %result.score_id,
            entity_id = %result.entity_id,
            score = result.score,
            tier = %result.tier,
            "Published score alert"
        );
        Ok(())
    }
}

/// Drain the dead-letter channel until every sender is gone. Without a
/// publisher, dead letters are only logged.
pub async fn forward_dead_letters(
    publisher: Option<OutboundPublisher>,
    mut dead_letters: mpsc::Receiver<DeadLetter>,
) -> u64 {
    let mut forwarded = 0;
    while let Some(letter) = dead_letters.recv().await {
        match &publisher {
            Some(publisher) => {
                if let Err(e) = publisher.publish_dead_letter(&letter).await {
                    error!(reason = %letter.reason, error = %e, "Failed to publish dead letter");
                }
            }
            None => warn!(
                reason = %letter.reason,
                source = %letter.source,
                payload = %letter.payload,
                "Dead letter"
            ),
        }
        forwarded += 1;
    }
    info!(forwarded = forwarded, "Dead-letter channel closed");
    forwarded
}

/// Drain the alert channel until every sender is gone. Without a publisher,
/// alerts are only logged.
pub async fn forward_alerts(
    publisher: Option<OutboundPublisher>,
    mut alerts: mpsc::Receiver<ScoreResult>,
) -> u64 {
    let mut forwarded = 0;
    while let Some(result) = alerts.recv().await {
        match &publisher {
            Some(publisher) => {
                if let Err(e) = publisher.publish_alert(&result).await {
                    error!(score_id = %result.score_id, error = %e, "Failed to publish score alert");
                } else {
                    info!(
                        entity_id = %result.entity_id,
                        score = result.score,
                        tier = %result.tier,
                        "Score alert published"
                    );
                }
            }
            None => info!(
                entity_id = %result.entity_id,
                score = result.score,
                tier = %result.tier,
                "Score alert"
            ),
        }
        forwarded += 1;
    }
    info!(forwarded = forwarded, "Alert channel closed");
    forwarded
}
