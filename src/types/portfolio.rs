//! Portfolio and entity read models produced by the aggregator

use crate::types::score::RiskTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate view over the latest score of every member entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub portfolio_id: String,
    /// Number of member entities with a score
    pub entity_count: u64,
    pub mean_score: f64,
    pub max_score: f64,
    pub tier_distribution: BTreeMap<RiskTier, u64>,
    /// Distinct events applied to members of this portfolio
    pub event_count: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub updated_at: DateTime<Utc>,
}

impl PortfolioSummary {
    pub fn empty(portfolio_id: impl Into<String>) -> Self {
        Self {
            portfolio_id: portfolio_id.into(),
            entity_count: 0,
            mean_score: 0.0,
            max_score: 0.0,
            tier_distribution: RiskTier::ALL.iter().map(|t| (*t, 0)).collect(),
            event_count: 0,
            events_by_type: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Per-entity signals consumed by the feature extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub event_count: u64,
    pub severity_total: f64,
    pub last_score: Option<f64>,
    pub last_event_at: Option<DateTime<Utc>>,
}
