//! Error types for the scoring and ingestion paths

use crate::types::score::RiskTier;
use thiserror::Error;

/// Request attributes do not satisfy a model's feature schema
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaMismatch {
    #[error("feature '{feature}' requires attribute '{attribute}'")]
    MissingAttribute { feature: String, attribute: String },

    #[error("feature '{feature}' expects attribute '{attribute}' as {expected}, got {found}")]
    WrongType {
        feature: String,
        attribute: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("feature '{feature}' has no level for '{value}' in attribute '{attribute}'")]
    UnknownCategory {
        feature: String,
        attribute: String,
        value: String,
    },

    #[error("feature '{feature}' produced a non-finite value from {value}")]
    InvalidValue { feature: String, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("no model available for version {}", .version.as_deref().unwrap_or("<active>"))]
    Unavailable { version: Option<String> },

    #[error("model version '{0}' is already registered")]
    DuplicateVersion(String),

    #[error("model version '{0}' is active and cannot be retired")]
    RetireActive(String),

    #[error("invalid definition for model '{version}': {reason}")]
    InvalidDefinition { version: String, reason: String },

    #[error("feature vector built for '{actual}' passed to model '{expected}'")]
    VersionMismatch { expected: String, actual: String },

    #[error("model '{version}' expects {expected} features, got {actual}")]
    FeatureShape {
        version: String,
        expected: usize,
        actual: usize,
    },

    #[error("model '{version}' produced a non-finite score ({value})")]
    InvalidOutput { version: String, value: f64 },

    #[error("inference failed for model '{version}': {reason}")]
    Inference { version: String, reason: String },
}

impl ModelError {
    pub fn invalid(version: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            version: version.into(),
            reason: reason.into(),
        }
    }
}

/// Failures surfaced at the scoring engine boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("invalid score request: {0}")]
    InvalidRequest(String),

    #[error("feature extraction failed: {0}")]
    Extraction(#[from] SchemaMismatch),

    #[error("model unavailable: {}", .version.as_deref().unwrap_or("no active version"))]
    ModelUnavailable { version: Option<String> },

    #[error("scoring exceeded its {budget_ms}ms budget")]
    Timeout { budget_ms: u64 },

    #[error(transparent)]
    Model(ModelError),

    #[error("internal scoring failure: {0}")]
    Internal(String),
}

impl From<ModelError> for ScoringError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Unavailable { version } => ScoringError::ModelUnavailable { version },
            other => ScoringError::Model(other),
        }
    }
}

impl ScoringError {
    /// Stable label used for metrics and error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            ScoringError::InvalidRequest(_) => "invalid_request",
            ScoringError::Extraction(_) => "schema_mismatch",
            ScoringError::ModelUnavailable { .. } => "model_unavailable",
            ScoringError::Timeout { .. } => "scoring_timeout",
            ScoringError::Model(_) => "model_error",
            ScoringError::Internal(_) => "internal_error",
        }
    }
}

/// Event payload could not be turned into a `RiskEvent`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedEvent {
    #[error("undecodable event: {0}")]
    Decode(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("payload must be a JSON object")]
    PayloadNotObject,

    #[error("severity must be a non-negative number, got {0}")]
    InvalidSeverity(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregatorError {
    #[error("unknown portfolio '{0}'")]
    UnknownPortfolio(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThresholdError {
    #[error("{tier} threshold {bound} is outside [0, 1]")]
    OutOfRange { tier: RiskTier, bound: f64 },

    #[error("{tier} threshold {bound} is below {lower_tier} threshold {lower_bound}")]
    NotMonotonic {
        lower_tier: RiskTier,
        lower_bound: f64,
        tier: RiskTier,
        bound: f64,
    },
}
