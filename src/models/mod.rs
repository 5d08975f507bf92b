//! Risk model variants and the versioned registry that serves them

pub mod ensemble;
pub mod linear;
pub mod loader;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod registry;
pub mod tree;

use crate::error::ModelError;
use crate::feature_extractor::{FeatureSchema, FeatureVector};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use ensemble::EnsembleModel;
pub use linear::LinearModel;
pub use loader::{ModelDescriptor, ModelLoader, ModelParams};
pub use registry::{ModelInfo, ModelRegistry};
pub use tree::GradientBoostedModel;

/// How a model's raw output maps onto `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreScale {
    /// Log-odds, passed through the logistic function
    #[default]
    Logit,
    /// Already a probability, clamped into range
    Probability,
}

impl ScoreScale {
    /// Returns `None` for non-finite raw output
    pub fn normalize(&self, raw: f64) -> Option<f64> {
        if !raw.is_finite() {
            return None;
        }
        let score = match self {
            ScoreScale::Logit => 1.0 / (1.0 + (-raw).exp()),
            ScoreScale::Probability => raw,
        };
        Some(score.clamp(0.0, 1.0))
    }
}

/// Capability shared by every model variant: predict a raw score from a
/// fixed-shape feature vector. Implementations are immutable once built.
pub trait RiskModel: Send + Sync + fmt::Debug {
    fn kind(&self) -> &'static str;

    fn schema(&self) -> &FeatureSchema;

    fn scale(&self) -> ScoreScale;

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError>;

    /// Per-feature contribution to the raw score, where the model can say
    fn contributions(&self, _features: &FeatureVector) -> Vec<(String, f64)> {
        Vec::new()
    }

    fn version(&self) -> &str {
        self.schema().version()
    }
}

pub(crate) fn check_width(schema: &FeatureSchema, features: &FeatureVector) -> Result<(), ModelError> {
    if features.len() != schema.feature_count() {
        return Err(ModelError::FeatureShape {
            version: schema.version().to_string(),
            expected: schema.feature_count(),
            actual: features.len(),
        });
    }
    Ok(())
}
