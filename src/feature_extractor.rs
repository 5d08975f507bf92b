//! Feature extraction for risk model inference.
//!
//! Every model version declares a `FeatureSchema`: an ordered list of named
//! features, each read from a request attribute, the entity kind, or a signal
//! accumulated from risk events. Extraction is a pure function of the request,
//! the schema and an optional entity snapshot.

use crate::error::{ModelError, SchemaMismatch};
use crate::types::portfolio::EntitySnapshot;
use crate::types::request::{AttributeValue, EntityKind, ScoreRequest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Per-entity signal maintained by the portfolio aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySignal {
    EventCount,
    SeverityTotal,
    PreviousScore,
}

impl EntitySignal {
    fn read(&self, snapshot: &EntitySnapshot) -> Option<f64> {
        match self {
            EntitySignal::EventCount => Some(snapshot.event_count as f64),
            EntitySignal::SeverityTotal => Some(snapshot.severity_total),
            EntitySignal::PreviousScore => snapshot.last_score,
        }
    }
}

/// Where a feature's raw value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    /// Request attribute by key
    Attribute(String),
    /// 1.0 when the request's entity kind matches, else 0.0
    EntityKind(EntityKind),
    /// Value from the entity snapshot
    Signal(EntitySignal),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    #[default]
    Identity,
    /// Sign-preserving `ln(1 + |x|)`
    Log1p,
    /// 1.0 for any non-zero value
    Indicator,
    Clamp { min: f64, max: f64 },
    /// Text attribute mapped through a lookup table
    Category { levels: BTreeMap<String, f64> },
}

impl Transform {
    fn apply_numeric(&self, x: f64) -> f64 {
        match self {
            Transform::Identity | Transform::Category { .. } => x,
            Transform::Log1p => x.signum() * x.abs().ln_1p(),
            Transform::Indicator => {
                if x != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Transform::Clamp { min, max } => x.clamp(*min, *max),
        }
    }

    fn expected_type(&self) -> &'static str {
        match self {
            Transform::Category { .. } => "text",
            _ => "number",
        }
    }
}

/// Declaration of a single model input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub source: FeatureSource,
    #[serde(default)]
    pub transform: Transform,
    /// Value used, untransformed, when the input is absent. A feature without
    /// a default is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
}

impl FeatureSpec {
    pub fn attribute(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: FeatureSource::Attribute(key.into()),
            transform: Transform::Identity,
            default: None,
        }
    }

    pub fn signal(name: impl Into<String>, signal: EntitySignal) -> Self {
        Self {
            name: name.into(),
            source: FeatureSource::Signal(signal),
            transform: Transform::Identity,
            default: None,
        }
    }

    pub fn entity_kind(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            source: FeatureSource::EntityKind(kind),
            transform: Transform::Identity,
            default: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_default(mut self, default: f64) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && matches!(self.source, FeatureSource::Attribute(_))
    }
}

/// Ordered, validated feature declarations for one model version
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    version: String,
    specs: Vec<FeatureSpec>,
    names: Arc<[String]>,
}

impl FeatureSchema {
    pub fn new(version: impl Into<String>, specs: Vec<FeatureSpec>) -> Result<Self, ModelError> {
        let version = version.into();
        if specs.is_empty() {
            return Err(ModelError::invalid(version, "feature schema is empty"));
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.name.trim().is_empty() {
                return Err(ModelError::invalid(version, "feature name is empty"));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ModelError::invalid(
                    version,
                    format!("duplicate feature '{}'", spec.name),
                ));
            }
            if let Some(default) = spec.default {
                if !default.is_finite() {
                    return Err(ModelError::invalid(
                        version,
                        format!("feature '{}' has a non-finite default", spec.name),
                    ));
                }
            }
            match &spec.transform {
                Transform::Clamp { min, max } if !(min <= max) => {
                    return Err(ModelError::invalid(
                        version,
                        format!("feature '{}' clamp bounds are inverted", spec.name),
                    ));
                }
                Transform::Category { levels } if levels.values().any(|v| !v.is_finite()) => {
                    return Err(ModelError::invalid(
                        version,
                        format!("feature '{}' has a non-finite category level", spec.name),
                    ));
                }
                _ => {}
            }
        }

        let names: Arc<[String]> = specs.iter().map(|s| s.name.clone()).collect();
        Ok(Self {
            version,
            specs,
            names,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn specs(&self) -> &[FeatureSpec] {
        &self.specs
    }

    /// Number of features produced
    pub fn feature_count(&self) -> usize {
        self.specs.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.names
    }
}

/// Ordered numeric inputs for one model version
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    model_version: String,
    names: Arc<[String]>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// Feature extractor that transforms score requests into model input features.
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the features declared by `schema`.
    ///
    /// Fails on the first required attribute that is absent or carries the
    /// wrong type. Optional inputs fall back to their declared default.
    pub fn extract(
        &self,
        schema: &FeatureSchema,
        request: &ScoreRequest,
        snapshot: Option<&EntitySnapshot>,
    ) -> Result<FeatureVector, SchemaMismatch> {
        let mut values = Vec::with_capacity(schema.feature_count());

        for spec in schema.specs() {
            let value = match &spec.source {
                FeatureSource::Attribute(key) => Self::extract_attribute(spec, key, request)?,
                FeatureSource::EntityKind(kind) => {
                    if request.entity_kind == *kind {
                        1.0
                    } else {
                        0.0
                    }
                }
                FeatureSource::Signal(signal) => match snapshot.and_then(|s| signal.read(s)) {
                    Some(raw) => spec.transform.apply_numeric(raw),
                    None => spec.default.unwrap_or(0.0),
                },
            };

            if !value.is_finite() {
                return Err(SchemaMismatch::InvalidValue {
                    feature: spec.name.clone(),
                    value,
                });
            }
            values.push(value);
        }

        Ok(FeatureVector {
            model_version: schema.version.clone(),
            names: schema.names.clone(),
            values,
        })
    }

    fn extract_attribute(
        spec: &FeatureSpec,
        key: &str,
        request: &ScoreRequest,
    ) -> Result<f64, SchemaMismatch> {
        let Some(value) = request.attribute(key) else {
            return spec.default.ok_or_else(|| SchemaMismatch::MissingAttribute {
                feature: spec.name.clone(),
                attribute: key.to_string(),
            });
        };

        let wrong_type = || SchemaMismatch::WrongType {
            feature: spec.name.clone(),
            attribute: key.to_string(),
            expected: spec.transform.expected_type(),
            found: value.type_name(),
        };

        match (&spec.transform, value) {
            (Transform::Category { levels }, AttributeValue::Text(text)) => levels
                .get(text.as_str())
                .copied()
                .or(spec.default)
                .ok_or_else(|| SchemaMismatch::UnknownCategory {
                    feature: spec.name.clone(),
                    attribute: key.to_string(),
                    value: text.clone(),
                }),
            (Transform::Category { .. }, _) => Err(wrong_type()),
            (transform, AttributeValue::Number(n)) => Ok(transform.apply_numeric(*n)),
            (transform, AttributeValue::Bool(b)) => {
                Ok(transform.apply_numeric(if *b { 1.0 } else { 0.0 }))
            }
            (_, _) => Err(wrong_type()),
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company_schema() -> FeatureSchema {
        FeatureSchema::new(
            "test-v1",
            vec![
                FeatureSpec::attribute("log_revenue", "revenue").with_transform(Transform::Log1p),
                FeatureSpec::attribute("prior_incidents", "priorIncidents").with_default(0.0),
                FeatureSpec::entity_kind("is_company", EntityKind::Company),
                FeatureSpec::attribute("sector", "sector")
                    .with_transform(Transform::Category {
                        levels: BTreeMap::from([
                            ("retail".to_string(), 0.2),
                            ("crypto".to_string(), 0.9),
                        ]),
                    })
                    .with_default(0.5),
                FeatureSpec::signal("event_count", EntitySignal::EventCount),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_feature_extraction() {
        let extractor = FeatureExtractor::new();
        let schema = company_schema();
        let request = ScoreRequest::new("ACME", EntityKind::Company)
            .with_attribute("revenue", 1_000_000.0)
            .with_attribute("sector", "crypto");

        let features = extractor.extract(&schema, &request, None).unwrap();

        assert_eq!(features.len(), schema.feature_count());
        assert_eq!(features.model_version(), "test-v1");
        assert!((features.get("log_revenue").unwrap() - 1_000_001f64.ln()).abs() < 1e-9);
        assert_eq!(features.get("prior_incidents"), Some(0.0));
        assert_eq!(features.get("is_company"), Some(1.0));
        assert_eq!(features.get("sector"), Some(0.9));
        assert_eq!(features.get("event_count"), Some(0.0));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = FeatureExtractor::new();
        let schema = company_schema();
        let request = ScoreRequest::new("ACME", EntityKind::Company).with_attribute("revenue", 42.0);
        let snapshot = EntitySnapshot {
            event_count: 3,
            ..Default::default()
        };

        let a = extractor.extract(&schema, &request, Some(&snapshot)).unwrap();
        let b = extractor.extract(&schema, &request, Some(&snapshot)).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.get("event_count"), Some(3.0));
    }

    #[test]
    fn test_missing_required_attribute() {
        let extractor = FeatureExtractor::new();
        let request = ScoreRequest::new("ACME", EntityKind::Company);

        let err = extractor
            .extract(&company_schema(), &request, None)
            .unwrap_err();

        assert_eq!(
            err,
            SchemaMismatch::MissingAttribute {
                feature: "log_revenue".to_string(),
                attribute: "revenue".to_string(),
            }
        );
    }

    #[test]
    fn test_wrong_attribute_type() {
        let extractor = FeatureExtractor::new();
        let request = ScoreRequest::new("ACME", EntityKind::Company).with_attribute("revenue", "lots");

        let err = extractor
            .extract(&company_schema(), &request, None)
            .unwrap_err();

        assert!(matches!(
            err,
            SchemaMismatch::WrongType {
                expected: "number",
                found: "text",
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_category_falls_back_to_default() {
        let extractor = FeatureExtractor::new();
        let request = ScoreRequest::new("ACME", EntityKind::Company)
            .with_attribute("revenue", 10.0)
            .with_attribute("sector", "mining");

        let features = extractor.extract(&company_schema(), &request, None).unwrap();
        assert_eq!(features.get("sector"), Some(0.5));
    }

    #[test]
    fn test_unknown_category_without_default() {
        let schema = FeatureSchema::new(
            "cat",
            vec![FeatureSpec::attribute("country", "country").with_transform(Transform::Category {
                levels: BTreeMap::from([("GB".to_string(), 0.1)]),
            })],
        )
        .unwrap();
        let request = ScoreRequest::new("p1", EntityKind::Person).with_attribute("country", "XX");

        let err = FeatureExtractor::new()
            .extract(&schema, &request, None)
            .unwrap_err();
        assert!(matches!(err, SchemaMismatch::UnknownCategory { .. }));
    }

    #[test]
    fn test_transforms() {
        let signed = Transform::Log1p.apply_numeric(-(std::f64::consts::E - 1.0));
        assert!((signed + 1.0).abs() < 1e-12);
        assert_eq!(Transform::Indicator.apply_numeric(-3.0), 1.0);
        assert_eq!(Transform::Indicator.apply_numeric(0.0), 0.0);
        assert_eq!(Transform::Clamp { min: 0.0, max: 5.0 }.apply_numeric(9.0), 5.0);
    }

    #[test]
    fn test_schema_validation() {
        assert!(FeatureSchema::new("empty", vec![]).is_err());

        let dup = FeatureSchema::new(
            "dup",
            vec![
                FeatureSpec::attribute("a", "x"),
                FeatureSpec::attribute("a", "y"),
            ],
        );
        assert!(matches!(dup, Err(ModelError::InvalidDefinition { .. })));

        let inverted = FeatureSchema::new(
            "clamp",
            vec![FeatureSpec::attribute("a", "x").with_transform(Transform::Clamp { min: 2.0, max: 1.0 })],
        );
        assert!(inverted.is_err());
    }

    #[test]
    fn test_feature_spec_json() {
        let json = r#"{
            "name": "sector_risk",
            "source": {"attribute": "sector"},
            "transform": {"type": "category", "levels": {"retail": 0.2}},
            "default": 0.5
        }"#;
        let spec: FeatureSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.source, FeatureSource::Attribute("sector".to_string()));
        assert!(!spec.is_required());

        let signal: FeatureSpec =
            serde_json::from_str(r#"{"name": "events", "source": {"signal": "event_count"}}"#).unwrap();
        assert_eq!(signal.source, FeatureSource::Signal(EntitySignal::EventCount));
        assert_eq!(signal.transform, Transform::Identity);
    }
}
