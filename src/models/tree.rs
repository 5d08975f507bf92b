//! Gradient-boosted decision tree ensemble.
//!
//! Trees are stored as flat node arrays. A split sends a sample left when its
//! feature value is strictly below the threshold. Child indices must point
//! forward, which rules out cycles and bounds every walk by the tree size.

use crate::error::ModelError;
use crate::feature_extractor::{FeatureSchema, FeatureVector};
use crate::models::{check_width, RiskModel, ScoreScale};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node as written in a model descriptor, with the split feature by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Split {
        feature: String,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSpec {
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(f64),
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn build(schema: &FeatureSchema, index: usize, spec: &TreeSpec) -> Result<Self, ModelError> {
        let invalid = |reason: String| ModelError::invalid(schema.version(), format!("tree {}: {}", index, reason));

        if spec.nodes.is_empty() {
            return Err(invalid("no nodes".to_string()));
        }

        let mut nodes = Vec::with_capacity(spec.nodes.len());
        for (at, node) in spec.nodes.iter().enumerate() {
            let built = match node {
                NodeSpec::Leaf { value } => {
                    if !value.is_finite() {
                        return Err(invalid(format!("leaf {} is not finite", at)));
                    }
                    Node::Leaf(*value)
                }
                NodeSpec::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let feature_idx = schema
                        .feature_names()
                        .iter()
                        .position(|n| n == feature)
                        .ok_or_else(|| invalid(format!("unknown split feature '{}'", feature)))?;
                    if !threshold.is_finite() {
                        return Err(invalid(format!("threshold at node {} is not finite", at)));
                    }
                    for child in [*left, *right] {
                        if child <= at || child >= spec.nodes.len() {
                            return Err(invalid(format!("node {} has invalid child {}", at, child)));
                        }
                    }
                    Node::Split {
                        feature: feature_idx,
                        threshold: *threshold,
                        left: *left,
                        right: *right,
                    }
                }
            };
            nodes.push(built);
        }

        Ok(Self { nodes })
    }

    /// Walk from the root, returning the leaf value and the split features
    /// visited on the way.
    fn walk(&self, values: &[f64], path: &mut Vec<usize>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    path.push(feature);
                    idx = if values[feature] < threshold { left } else { right };
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradientBoostedModel {
    schema: FeatureSchema,
    base_score: f64,
    trees: Vec<Tree>,
    scale: ScoreScale,
}

impl GradientBoostedModel {
    pub fn new(
        schema: FeatureSchema,
        base_score: f64,
        trees: &[TreeSpec],
        scale: ScoreScale,
    ) -> Result<Self, ModelError> {
        if !base_score.is_finite() {
            return Err(ModelError::invalid(schema.version(), "base score is not finite"));
        }
        if trees.is_empty() {
            return Err(ModelError::invalid(schema.version(), "ensemble has no trees"));
        }

        let trees = trees
            .iter()
            .enumerate()
            .map(|(i, spec)| Tree::build(&schema, i, spec))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            schema,
            base_score,
            trees,
            scale,
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl RiskModel for GradientBoostedModel {
    fn kind(&self) -> &'static str {
        "gradient_boosted"
    }

    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn scale(&self) -> ScoreScale {
        self.scale
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        check_width(&self.schema, features)?;
        let mut path = Vec::new();
        let margin: f64 = self
            .trees
            .iter()
            .map(|tree| {
                path.clear();
                tree.walk(features.values(), &mut path)
            })
            .sum();
        Ok(self.base_score + margin)
    }

    /// Each tree's leaf value is split evenly across the features on its
    /// decision path.
    fn contributions(&self, features: &FeatureVector) -> Vec<(String, f64)> {
        if features.len() != self.schema.feature_count() {
            return Vec::new();
        }

        let mut totals: BTreeMap<usize, f64> = BTreeMap::new();
        let mut path = Vec::new();
        for tree in &self.trees {
            path.clear();
            let leaf = tree.walk(features.values(), &mut path);
            if path.is_empty() {
                continue;
            }
            let share = leaf / path.len() as f64;
            for feature in &path {
                *totals.entry(*feature).or_insert(0.0) += share;
            }
        }

        totals
            .into_iter()
            .map(|(idx, value)| (self.schema.feature_names()[idx].clone(), value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::{FeatureExtractor, FeatureSpec};
    use crate::types::request::{EntityKind, ScoreRequest};

    fn schema() -> FeatureSchema {
        FeatureSchema::new(
            "gbt-test",
            vec![
                FeatureSpec::attribute("incidents", "incidents"),
                FeatureSpec::attribute("leverage", "leverage"),
            ],
        )
        .unwrap()
    }

    fn stump(feature: &str, threshold: f64, low: f64, high: f64) -> TreeSpec {
        TreeSpec {
            nodes: vec![
                NodeSpec::Split {
                    feature: feature.to_string(),
                    threshold,
                    left: 1,
                    right: 2,
                },
                NodeSpec::Leaf { value: low },
                NodeSpec::Leaf { value: high },
            ],
        }
    }

    fn features(incidents: f64, leverage: f64) -> FeatureVector {
        let request = ScoreRequest::new("e", EntityKind::Company)
            .with_attribute("incidents", incidents)
            .with_attribute("leverage", leverage);
        FeatureExtractor::new()
            .extract(&schema(), &request, None)
            .unwrap()
    }

    #[test]
    fn test_tree_prediction() {
        let model = GradientBoostedModel::new(
            schema(),
            -1.0,
            &[stump("incidents", 1.0, -0.5, 1.5), stump("leverage", 3.0, 0.0, 0.75)],
            ScoreScale::Logit,
        )
        .unwrap();

        assert_eq!(model.predict(&features(0.0, 1.0)).unwrap(), -1.5);
        assert_eq!(model.predict(&features(2.0, 1.0)).unwrap(), 0.5);
        assert_eq!(model.predict(&features(2.0, 3.0)).unwrap(), 1.25);
    }

    #[test]
    fn test_tree_contributions() {
        let model = GradientBoostedModel::new(
            schema(),
            0.0,
            &[stump("incidents", 1.0, -0.5, 1.5)],
            ScoreScale::Logit,
        )
        .unwrap();

        let contributions = model.contributions(&features(5.0, 0.0));
        assert_eq!(contributions, vec![("incidents".to_string(), 1.5)]);
    }

    #[test]
    fn test_backward_child_rejected() {
        let looping = TreeSpec {
            nodes: vec![
                NodeSpec::Split {
                    feature: "incidents".to_string(),
                    threshold: 1.0,
                    left: 0,
                    right: 1,
                },
                NodeSpec::Leaf { value: 0.0 },
            ],
        };
        let err = GradientBoostedModel::new(schema(), 0.0, &[looping], ScoreScale::Logit).unwrap_err();
        assert!(matches!(err, ModelError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_unknown_split_feature_rejected() {
        let err = GradientBoostedModel::new(
            schema(),
            0.0,
            &[stump("revenue", 1.0, 0.0, 1.0)],
            ScoreScale::Logit,
        )
        .unwrap_err();
        assert!(err.to_string().contains("revenue"));
    }

    #[test]
    fn test_node_json() {
        let json = r#"{"nodes": [
            {"feature": "incidents", "threshold": 1.0, "left": 1, "right": 2},
            {"value": -0.5},
            {"value": 1.5}
        ]}"#;
        let tree: TreeSpec = serde_json::from_str(json).unwrap();
        assert_eq!(tree, stump("incidents", 1.0, -0.5, 1.5));
    }
}
