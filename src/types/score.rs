//! Score result and risk tier data structures

use crate::error::ThresholdError;
use crate::types::request::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk tier classification, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [
        RiskTier::Low,
        RiskTier::Medium,
        RiskTier::High,
        RiskTier::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
            RiskTier::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawTierThresholds {
    medium: f64,
    high: f64,
    #[serde(default)]
    critical: Option<f64>,
}

/// Ordered lower bounds for each tier above `Low`.
///
/// Bounds lie in `[0, 1]` and are monotonically non-decreasing. Equal bounds
/// are allowed and leave the lower tier empty. Without a `critical` bound the
/// table tops out at `High`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTierThresholds")]
pub struct TierThresholds {
    medium: f64,
    high: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    critical: Option<f64>,
}

impl TryFrom<RawTierThresholds> for TierThresholds {
    type Error = ThresholdError;

    fn try_from(raw: RawTierThresholds) -> Result<Self, Self::Error> {
        TierThresholds::new(raw.medium, raw.high, raw.critical)
    }
}

impl TierThresholds {
    /// Build a threshold table, rejecting out-of-range or decreasing bounds
    pub fn new(medium: f64, high: f64, critical: Option<f64>) -> Result<Self, ThresholdError> {
        let bounds = [
            (RiskTier::Medium, Some(medium)),
            (RiskTier::High, Some(high)),
            (RiskTier::Critical, critical),
        ];

        let mut previous: Option<(RiskTier, f64)> = None;
        for (tier, bound) in bounds {
            let Some(bound) = bound else { continue };
            if !bound.is_finite() || !(0.0..=1.0).contains(&bound) {
                return Err(ThresholdError::OutOfRange { tier, bound });
            }
            if let Some((lower_tier, lower_bound)) = previous {
                if bound < lower_bound {
                    return Err(ThresholdError::NotMonotonic {
                        lower_tier,
                        lower_bound,
                        tier,
                        bound,
                    });
                }
            }
            previous = Some((tier, bound));
        }

        Ok(Self {
            medium,
            high,
            critical,
        })
    }

    /// Map a normalized score onto its tier
    pub fn tier_for(&self, score: f64) -> RiskTier {
        match self.critical {
            Some(critical) if score >= critical => RiskTier::Critical,
            _ if score >= self.high => RiskTier::High,
            _ if score >= self.medium => RiskTier::Medium,
            _ => RiskTier::Low,
        }
    }

    pub fn medium(&self) -> f64 {
        self.medium
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn critical(&self) -> Option<f64> {
        self.critical
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            medium: 0.3,
            high: 0.7,
            critical: Some(0.9),
        }
    }
}

/// Outcome of scoring a single entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Unique result identifier
    pub score_id: String,

    pub entity_id: String,

    pub entity_kind: EntityKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_id: Option<String>,

    /// Normalized risk score (0.0 - 1.0)
    pub score: f64,

    /// Tier derived from `score` and the active threshold table
    pub tier: RiskTier,

    /// Model version that produced the score
    pub model_version: String,

    /// Features that contributed most to the score
    #[serde(default)]
    pub factors: Vec<String>,

    pub scored_at: DateTime<Utc>,
}
