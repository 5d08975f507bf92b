//! Model descriptor loading.
//!
//! A descriptor is a JSON document naming a version, its feature schema and
//! the model parameters:
//!
//! ```json
//! {
//!   "version": "baseline-linear-v1",
//!   "features": [{"name": "log_revenue", "source": {"attribute": "revenue"}, "transform": {"type": "log1p"}}],
//!   "model": {"kind": "linear", "intercept": -1.2, "weights": {"log_revenue": -0.05}}
//! }
//! ```

use crate::error::ModelError;
use crate::feature_extractor::{FeatureSchema, FeatureSpec};
use crate::models::ensemble::EnsembleModel;
use crate::models::linear::LinearModel;
use crate::models::tree::{GradientBoostedModel, TreeSpec};
use crate::models::{RiskModel, ScoreScale};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct ModelDescriptor {
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub features: Vec<FeatureSpec>,
    pub model: ModelParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelParams {
    Linear {
        intercept: f64,
        weights: BTreeMap<String, f64>,
        #[serde(default)]
        scale: ScoreScale,
    },
    GradientBoosted {
        #[serde(default)]
        base_score: f64,
        trees: Vec<TreeSpec>,
        #[serde(default)]
        scale: ScoreScale,
    },
    Ensemble {
        members: Vec<EnsembleMember>,
    },
    #[cfg(feature = "onnx")]
    Onnx {
        /// Relative paths resolve against the descriptor's directory
        path: PathBuf,
        #[serde(default)]
        output: Option<String>,
        #[serde(default = "default_onnx_threads")]
        threads: usize,
    },
}

#[cfg(feature = "onnx")]
fn default_onnx_threads() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnsembleMember {
    pub weight: f64,
    pub model: ModelParams,
}

/// Loader for model descriptors
#[derive(Debug, Default)]
pub struct ModelLoader;

impl ModelLoader {
    pub fn new() -> Self {
        Self
    }

    /// Build a model from a parsed descriptor
    pub fn build(&self, descriptor: &ModelDescriptor, base_dir: &Path) -> Result<Arc<dyn RiskModel>, ModelError> {
        let schema = FeatureSchema::new(descriptor.version.clone(), descriptor.features.clone())?;
        Self::build_params(&schema, &descriptor.model, base_dir)
    }

    fn build_params(
        schema: &FeatureSchema,
        params: &ModelParams,
        base_dir: &Path,
    ) -> Result<Arc<dyn RiskModel>, ModelError> {
        let model: Arc<dyn RiskModel> = match params {
            ModelParams::Linear {
                intercept,
                weights,
                scale,
            } => Arc::new(LinearModel::new(schema.clone(), *intercept, weights, *scale)?),
            ModelParams::GradientBoosted {
                base_score,
                trees,
                scale,
            } => Arc::new(GradientBoostedModel::new(
                schema.clone(),
                *base_score,
                trees,
                *scale,
            )?),
            ModelParams::Ensemble { members } => {
                let members = members
                    .iter()
                    .map(|m| Ok((m.weight, Self::build_params(schema, &m.model, base_dir)?)))
                    .collect::<Result<Vec<_>, ModelError>>()?;
                Arc::new(EnsembleModel::new(schema.clone(), members)?)
            }
            #[cfg(feature = "onnx")]
            ModelParams::Onnx {
                path,
                output,
                threads,
            } => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                Arc::new(crate::models::onnx::OnnxModel::load(
                    schema.clone(),
                    &path,
                    output.as_deref(),
                    *threads,
                )?)
            }
        };
        Ok(model)
    }

    /// Load a single descriptor file
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<Arc<dyn RiskModel>> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model descriptor {}", path.display()))?;
        let descriptor: ModelDescriptor = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse model descriptor {}", path.display()))?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let model = self.build(&descriptor, base_dir)?;

        info!(
            model = %model.version(),
            kind = model.kind(),
            features = model.schema().feature_count(),
            path = %path.display(),
            "Model loaded successfully"
        );
        Ok(model)
    }

    /// Load every `*.json` descriptor in a directory, in file name order.
    /// Descriptors that fail to load are skipped with a warning.
    pub fn load_dir<P: AsRef<Path>>(&self, models_dir: P) -> Result<Vec<Arc<dyn RiskModel>>> {
        let models_dir = models_dir.as_ref();

        let mut paths: Vec<PathBuf> = std::fs::read_dir(models_dir)
            .with_context(|| format!("Failed to read models directory {}", models_dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut models = Vec::with_capacity(paths.len());
        for path in &paths {
            match self.load_file(path) {
                Ok(model) => models.push(model),
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{:#}", e), "Failed to load model, skipping");
                }
            }
        }

        if models.is_empty() {
            anyhow::bail!("No models loaded from {}", models_dir.display());
        }

        info!(
            count = models.len(),
            "Loaded {} models from {}",
            models.len(),
            models_dir.display()
        );

        Ok(models)
    }
}
