//! Score request data structures

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of entity being scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Company,
    Person,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Company => f.write_str("company"),
            EntityKind::Person => f.write_str("person"),
        }
    }
}

/// A single attribute value carried by a score request.
///
/// `null` is accepted on the wire and treated the same as an absent key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    /// Short type name used in schema mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Null => "null",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Number(_) => "number",
            AttributeValue::Text(_) => "text",
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

/// Represents an entity to be scored for risk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    /// Unique entity identifier
    pub entity_id: String,

    /// Company or person
    pub entity_kind: EntityKind,

    /// Raw attributes, interpreted through the model's feature schema
    #[serde(default)]
    pub attributes: HashMap<String, AttributeValue>,

    /// Portfolio the entity is aggregated under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_id: Option<String>,

    /// Pin a specific registered model version instead of the active one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl ScoreRequest {
    /// Create a request with no attributes
    pub fn new(entity_id: impl Into<String>, entity_kind: EntityKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_kind,
            attributes: HashMap::new(),
            portfolio_id: None,
            model_version: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_portfolio(mut self, portfolio_id: impl Into<String>) -> Self {
        self.portfolio_id = Some(portfolio_id.into());
        self
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    /// Trim surrounding whitespace from the ids, as event parsing does, and
    /// drop a blank portfolio id
    pub fn normalize_ids(&mut self) {
        if self.entity_id.trim().len() != self.entity_id.len() {
            self.entity_id = self.entity_id.trim().to_string();
        }
        self.portfolio_id = self
            .portfolio_id
            .take()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
    }

    /// Look up an attribute, treating `null` as absent
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        match self.attributes.get(key) {
            Some(AttributeValue::Null) | None => None,
            Some(value) => Some(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialization() {
        let json = r#"{
            "entity_id": "ACME",
            "entity_kind": "company",
            "attributes": {"revenue": 1000000, "sector": "retail", "listed": true, "note": null},
            "portfolio_id": "emea"
        }"#;

        let request: ScoreRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.entity_id, "ACME");
        assert_eq!(request.entity_kind, EntityKind::Company);
        assert_eq!(
            request.attribute("revenue"),
            Some(&AttributeValue::Number(1_000_000.0))
        );
        assert_eq!(request.attribute("listed"), Some(&AttributeValue::Bool(true)));
        assert_eq!(
            request.attribute("sector"),
            Some(&AttributeValue::Text("retail".to_string()))
        );
        assert_eq!(request.attribute("note"), None);
        assert_eq!(request.portfolio_id.as_deref(), Some("emea"));
        assert!(request.model_version.is_none());
    }

    #[test]
    fn test_normalize_ids() {
        let mut request = ScoreRequest::new(" ACME \t", EntityKind::Company).with_portfolio("  ");
        request.normalize_ids();
        assert_eq!(request.entity_id, "ACME");
        assert!(request.portfolio_id.is_none());

        let mut request = ScoreRequest::new("ACME", EntityKind::Company).with_portfolio(" emea ");
        request.normalize_ids();
        assert_eq!(request.portfolio_id.as_deref(), Some("emea"));
    }

    #[test]
    fn test_unknown_entity_kind_rejected() {
        let json = r#"{"entity_id": "x", "entity_kind": "trust"}"#;
        assert!(serde_json::from_str::<ScoreRequest>(json).is_err());
    }
}
