//! Linear baseline model (logistic regression by default)

use crate::error::ModelError;
use crate::feature_extractor::{FeatureSchema, FeatureVector};
use crate::models::{check_width, RiskModel, ScoreScale};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct LinearModel {
    schema: FeatureSchema,
    intercept: f64,
    /// Aligned with the schema's feature order
    weights: Vec<f64>,
    scale: ScoreScale,
}

impl LinearModel {
    /// Build from weights keyed by feature name. Every schema feature needs a
    /// weight and every weight must name a schema feature.
    pub fn new(
        schema: FeatureSchema,
        intercept: f64,
        weights: &BTreeMap<String, f64>,
        scale: ScoreScale,
    ) -> Result<Self, ModelError> {
        let version = schema.version().to_string();

        if !intercept.is_finite() {
            return Err(ModelError::invalid(version, "intercept is not finite"));
        }
        if let Some(unknown) = weights
            .keys()
            .find(|name| !schema.feature_names().contains(name))
        {
            return Err(ModelError::invalid(
                version,
                format!("weight for unknown feature '{}'", unknown),
            ));
        }

        let mut aligned = Vec::with_capacity(schema.feature_count());
        for name in schema.feature_names() {
            match weights.get(name) {
                Some(w) if w.is_finite() => aligned.push(*w),
                Some(_) => {
                    return Err(ModelError::invalid(
                        version,
                        format!("weight for '{}' is not finite", name),
                    ))
                }
                None => {
                    return Err(ModelError::invalid(
                        version,
                        format!("missing weight for feature '{}'", name),
                    ))
                }
            }
        }

        Ok(Self {
            schema,
            intercept,
            weights: aligned,
            scale,
        })
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl RiskModel for LinearModel {
    fn kind(&self) -> &'static str {
        "linear"
    }

    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn scale(&self) -> ScoreScale {
        self.scale
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        check_width(&self.schema, features)?;
        let dot: f64 = self
            .weights
            .iter()
            .zip(features.values())
            .map(|(w, x)| w * x)
            .sum();
        Ok(self.intercept + dot)
    }

    fn contributions(&self, features: &FeatureVector) -> Vec<(String, f64)> {
        features
            .iter()
            .zip(&self.weights)
            .map(|((name, x), w)| (name.to_string(), w * x))
            .collect()
    }
}
