//! Scoring engine: extraction, inference, normalization and tiering under a
//! hard latency budget.

use crate::config::ScoringConfig;
use crate::error::{ModelError, ScoringError};
use crate::feature_extractor::FeatureExtractor;
use crate::metrics::ServiceMetrics;
use crate::models::{ModelRegistry, RiskModel};
use crate::portfolio::PortfolioAggregator;
use crate::types::request::ScoreRequest;
use crate::types::score::{RiskTier, ScoreResult, TierThresholds};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Number of contributing features reported per result
const MAX_FACTORS: usize = 3;

struct Prediction {
    raw: f64,
    contributions: Vec<(String, f64)>,
}

pub struct ScoringEngine {
    registry: Arc<ModelRegistry>,
    aggregator: Arc<PortfolioAggregator>,
    metrics: Arc<ServiceMetrics>,
    thresholds: TierThresholds,
    budget: Duration,
    alert_tier: RiskTier,
    batch_limit: usize,
    alerts: Option<mpsc::Sender<ScoreResult>>,
}

impl ScoringEngine {
    pub fn new(
        registry: Arc<ModelRegistry>,
        aggregator: Arc<PortfolioAggregator>,
        metrics: Arc<ServiceMetrics>,
        config: &ScoringConfig,
    ) -> Self {
        Self {
            registry,
            aggregator,
            metrics,
            thresholds: config.thresholds.clone(),
            budget: config.budget(),
            alert_tier: config.alert_tier,
            batch_limit: config.batch_limit,
            alerts: None,
        }
    }

    /// Hand results at or above the alert tier to `alerts`
    pub fn with_alerts(mut self, alerts: mpsc::Sender<ScoreResult>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }

    pub fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    /// Score one request. Nothing is recorded unless scoring succeeds.
    pub async fn score(&self, request: ScoreRequest) -> Result<ScoreResult, ScoringError> {
        let started = Instant::now();
        let entity_id = request.entity_id.clone();

        match self.compute(request).await {
            Ok(result) => {
                self.aggregator.apply_score(&result);
                self.metrics
                    .record_score(&result.model_version, started.elapsed(), result.score, result.tier);
                self.publish_alert(&result);

                debug!(
                    entity_id = %result.entity_id,
                    score = result.score,
                    tier = %result.tier,
                    model = %result.model_version,
                    latency_us = started.elapsed().as_micros() as u64,
                    "Entity scored"
                );
                Ok(result)
            }
            Err(e) => {
                self.metrics.record_failure(e.kind(), started.elapsed());
                warn!(entity_id = %entity_id, kind = e.kind(), error = %e, "Scoring failed");
                Err(e)
            }
        }
    }

    /// Score several requests concurrently, returning one outcome per request
    /// in input order
    pub async fn score_batch(
        &self,
        requests: Vec<ScoreRequest>,
    ) -> Result<Vec<Result<ScoreResult, ScoringError>>, ScoringError> {
        if requests.len() > self.batch_limit {
            return Err(ScoringError::InvalidRequest(format!(
                "batch of {} exceeds the limit of {}",
                requests.len(),
                self.batch_limit
            )));
        }
        Ok(futures::future::join_all(requests.into_iter().map(|r| self.score(r))).await)
    }

    async fn compute(&self, mut request: ScoreRequest) -> Result<ScoreResult, ScoringError> {
        request.normalize_ids();
        if request.entity_id.is_empty() {
            return Err(ScoringError::InvalidRequest(
                "entity_id must not be empty".to_string(),
            ));
        }

        let model = self.registry.get_active(request.model_version.as_deref())?;
        let snapshot = self.aggregator.entity_snapshot(&request.entity_id);
        let request = Arc::new(request);

        let registry = self.registry.clone();
        let task_model = model.clone();
        let task_request = request.clone();
        let computation = tokio::task::spawn_blocking(move || -> Result<Prediction, ScoringError> {
            let features = FeatureExtractor::new().extract(
                task_model.schema(),
                &task_request,
                snapshot.as_ref(),
            )?;
            let raw = registry.predict(task_model.as_ref(), &features)?;
            let contributions = task_model.contributions(&features);
            Ok(Prediction { raw, contributions })
        });

        // Dropping the handle on timeout detaches the blocking task; its
        // result is discarded.
        let prediction = match tokio::time::timeout(self.budget, computation).await {
            Err(_) => {
                return Err(ScoringError::Timeout {
                    budget_ms: self.budget.as_millis() as u64,
                })
            }
            Ok(Err(join_error)) => return Err(ScoringError::Internal(join_error.to_string())),
            Ok(Ok(prediction)) => prediction?,
        };

        let score = normalize(model.as_ref(), prediction.raw)?;
        let tier = self.thresholds.tier_for(score);

        Ok(ScoreResult {
            score_id: uuid::Uuid::new_v4().to_string(),
            entity_id: request.entity_id.clone(),
            entity_kind: request.entity_kind,
            portfolio_id: request.portfolio_id.clone(),
            score,
            tier,
            model_version: model.version().to_string(),
            factors: top_factors(prediction.contributions),
            scored_at: Utc::now(),
        })
    }

    fn publish_alert(&self, result: &ScoreResult) {
        let Some(alerts) = &self.alerts else {
            return;
        };
        if result.tier < self.alert_tier {
            return;
        }
        if let Err(e) = alerts.try_send(result.clone()) {
            self.metrics.record_alert_dropped();
            warn!(entity_id = %result.entity_id, tier = %result.tier, error = %e, "Dropping score alert");
        }
    }
}

fn normalize(model: &dyn RiskModel, raw: f64) -> Result<f64, ScoringError> {
    model.scale().normalize(raw).ok_or_else(|| {
        ScoringError::Model(ModelError::InvalidOutput {
            version: model.version().to_string(),
            value: raw,
        })
    })
}

/// Names of the features that pushed the score up the most
fn top_factors(mut contributions: Vec<(String, f64)>) -> Vec<String> {
    contributions.retain(|(_, c)| *c > 0.0);
    contributions.sort_by(|a, b| b.1.total_cmp(&a.1));
    contributions
        .into_iter()
        .take(MAX_FACTORS)
        .map(|(name, _)| name)
        .collect()
}
