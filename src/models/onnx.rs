//! ONNX Runtime model, enabled with the `onnx` feature

use crate::error::ModelError;
use crate::feature_extractor::{FeatureSchema, FeatureVector};
use crate::models::{check_width, RiskModel, ScoreScale};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Classifier exported to ONNX that emits class probabilities
pub struct OnnxModel {
    schema: FeatureSchema,
    /// `Session::run` needs exclusive access
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxModel")
            .field("version", &self.schema.version())
            .field("input", &self.input_name)
            .field("output", &self.output_name)
            .finish()
    }
}

impl OnnxModel {
    pub fn load(
        schema: FeatureSchema,
        path: &Path,
        output: Option<&str>,
        threads: usize,
    ) -> Result<Self, ModelError> {
        let version = schema.version().to_string();
        let fail = |e: ort::Error| ModelError::invalid(version.clone(), e.to_string());

        info!(model = %version, path = %path.display(), threads = threads, "Loading ONNX model");

        let session = Session::builder()
            .map_err(fail)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(fail)?
            .with_intra_threads(threads.max(1))
            .map_err(fail)?
            .commit_from_file(path)
            .map_err(fail)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = match output {
            Some(name) => name.to_string(),
            None => session
                .outputs
                .iter()
                .find(|o| o.name.contains("prob"))
                .or_else(|| session.outputs.last())
                .map(|o| o.name.clone())
                .unwrap_or_else(|| "probabilities".to_string()),
        };

        info!(
            model = %version,
            input = %input_name,
            output = %output_name,
            "ONNX model loaded"
        );

        Ok(Self {
            schema,
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }

    fn inference_error(&self, reason: impl ToString) -> ModelError {
        ModelError::Inference {
            version: self.schema.version().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Positive-class probability from a `[batch, classes]`, `[classes]` or
/// `[batch, 1]` tensor
fn positive_class_probability(dims: &[i64], data: &[f32]) -> Option<f64> {
    let classes = match dims {
        [_, classes] | [classes] => *classes,
        _ => return data.last().map(|v| *v as f64),
    };
    match classes {
        c if c >= 2 => data.get(1).map(|v| *v as f64),
        1 => data.first().map(|v| *v as f64),
        _ => None,
    }
}

impl RiskModel for OnnxModel {
    fn kind(&self) -> &'static str {
        "onnx"
    }

    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn scale(&self) -> ScoreScale {
        ScoreScale::Probability
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        check_width(&self.schema, features)?;

        let input: Vec<f32> = features.values().iter().map(|v| *v as f32).collect();
        let shape = vec![1_i64, input.len() as i64];
        let tensor = Tensor::from_array((shape, input)).map_err(|e| self.inference_error(e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| self.inference_error(format!("session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| self.inference_error(e))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| self.inference_error(format!("missing output '{}'", self.output_name)))?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| self.inference_error(e))?;
        let dims: Vec<i64> = shape.iter().copied().collect();

        let probability = positive_class_probability(&dims, data)
            .ok_or_else(|| self.inference_error("empty probability tensor"))?;

        debug!(model = %self.schema.version(), probability = probability, "ONNX inference complete");
        Ok(probability)
    }
}
