//! Weighted ensemble over member models sharing one feature schema

use crate::error::ModelError;
use crate::feature_extractor::{FeatureSchema, FeatureVector};
use crate::models::{check_width, RiskModel, ScoreScale};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Combines member probabilities into a single probability.
///
/// Each member's raw output is normalized through its own scale before the
/// weighted average, so logit and probability members can be mixed.
#[derive(Debug)]
pub struct EnsembleModel {
    schema: FeatureSchema,
    members: Vec<(f64, Arc<dyn RiskModel>)>,
    total_weight: f64,
}

impl EnsembleModel {
    pub fn new(
        schema: FeatureSchema,
        members: Vec<(f64, Arc<dyn RiskModel>)>,
    ) -> Result<Self, ModelError> {
        if members.is_empty() {
            return Err(ModelError::invalid(schema.version(), "ensemble has no members"));
        }
        for (idx, (weight, member)) in members.iter().enumerate() {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(ModelError::invalid(
                    schema.version(),
                    format!("member {} weight must be positive", idx),
                ));
            }
            if member.schema().feature_names() != schema.feature_names() {
                return Err(ModelError::invalid(
                    schema.version(),
                    format!("member {} uses a different feature schema", idx),
                ));
            }
        }

        let total_weight: f64 = members.iter().map(|(w, _)| w).sum();
        Ok(Self {
            schema,
            members,
            total_weight,
        })
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

impl RiskModel for EnsembleModel {
    fn kind(&self) -> &'static str {
        "ensemble"
    }

    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn scale(&self) -> ScoreScale {
        ScoreScale::Probability
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        check_width(&self.schema, features)?;

        let mut weighted_sum = 0.0;
        for (weight, member) in &self.members {
            let raw = member.predict(features)?;
            let probability =
                member
                    .scale()
                    .normalize(raw)
                    .ok_or_else(|| ModelError::InvalidOutput {
                        version: self.schema.version().to_string(),
                        value: raw,
                    })?;
            weighted_sum += probability * weight;
        }

        Ok((weighted_sum / self.total_weight).clamp(0.0, 1.0))
    }

    fn contributions(&self, features: &FeatureVector) -> Vec<(String, f64)> {
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for (weight, member) in &self.members {
            for (name, value) in member.contributions(features) {
                *totals.entry(name).or_insert(0.0) += value * weight / self.total_weight;
            }
        }
        totals.into_iter().collect()
    }
}
