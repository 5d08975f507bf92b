//! Risk event data structures

use crate::error::MalformedEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Severity assumed when an event payload does not carry one
pub const DEFAULT_SEVERITY: f64 = 1.0;

/// A validated risk-relevant event for a single entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    /// Producer-assigned identifier, unique per entity
    pub event_id: String,

    pub entity_id: String,

    /// Free-form event category (e.g. "incident", "sanction_hit")
    pub event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_id: Option<String>,

    #[serde(default)]
    pub payload: Map<String, Value>,

    /// Producer timestamp, if supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,

    /// Assigned when the event is parsed at ingestion
    pub ingested_at: DateTime<Utc>,
}

/// Wire shape before validation; every field is optional so that missing
/// identifiers surface as `MalformedEvent` rather than a serde error.
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    portfolio_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    occurred_at: Option<DateTime<Utc>>,
}

fn required(field: &'static str, value: Option<String>) -> Result<String, MalformedEvent> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(MalformedEvent::MissingField(field)),
    }
}

impl RiskEvent {
    /// Parse and validate an event from raw broker bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MalformedEvent> {
        let wire: WireEvent =
            serde_json::from_slice(bytes).map_err(|e| MalformedEvent::Decode(e.to_string()))?;
        Self::from_wire(wire, Utc::now())
    }

    fn from_wire(wire: WireEvent, ingested_at: DateTime<Utc>) -> Result<Self, MalformedEvent> {
        let event_id = required("event_id", wire.event_id)?;
        let entity_id = required("entity_id", wire.entity_id)?;
        let event_type = required("event_type", wire.event_type)?;

        let payload = match wire.payload {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(MalformedEvent::PayloadNotObject),
        };

        if let Some(severity) = payload.get("severity") {
            match severity.as_f64() {
                Some(s) if s.is_finite() && s >= 0.0 => {}
                _ => return Err(MalformedEvent::InvalidSeverity(severity.to_string())),
            }
        }

        let portfolio_id = wire
            .portfolio_id
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            event_id,
            entity_id,
            event_type,
            portfolio_id,
            payload,
            occurred_at: wire.occurred_at,
            ingested_at,
        })
    }

    /// Severity carried in the payload, validated at parse time
    pub fn severity(&self) -> f64 {
        self.payload
            .get("severity")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_SEVERITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parsing() {
        let raw = br#"{
            "event_id": "evt-1",
            "entity_id": "ACME",
            "event_type": "incident",
            "portfolio_id": "emea",
            "payload": {"severity": 2.5, "source": "news"}
        }"#;

        let event = RiskEvent::from_slice(raw).unwrap();

        assert_eq!(event.event_id, "evt-1");
        assert_eq!(event.entity_id, "ACME");
        assert_eq!(event.portfolio_id.as_deref(), Some("emea"));
        assert_eq!(event.severity(), 2.5);
    }

    #[test]
    fn test_default_severity() {
        let raw = br#"{"event_id": "e", "entity_id": "x", "event_type": "incident"}"#;
        let event = RiskEvent::from_slice(raw).unwrap();
        assert_eq!(event.severity(), DEFAULT_SEVERITY);
        assert!(event.payload.is_empty());
    }

    #[test]
    fn test_missing_entity_id() {
        let raw = br#"{"event_id": "e", "event_type": "incident"}"#;
        assert_eq!(
            RiskEvent::from_slice(raw).unwrap_err(),
            MalformedEvent::MissingField("entity_id")
        );

        let blank = br#"{"event_id": "e", "entity_id": "  ", "event_type": "incident"}"#;
        assert_eq!(
            RiskEvent::from_slice(blank).unwrap_err(),
            MalformedEvent::MissingField("entity_id")
        );
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(matches!(
            RiskEvent::from_slice(b"not json"),
            Err(MalformedEvent::Decode(_))
        ));

        let list_payload = br#"{"event_id": "e", "entity_id": "x", "event_type": "t", "payload": [1]}"#;
        assert_eq!(
            RiskEvent::from_slice(list_payload).unwrap_err(),
            MalformedEvent::PayloadNotObject
        );

        let negative = br#"{"event_id": "e", "entity_id": "x", "event_type": "t", "payload": {"severity": -1}}"#;
        assert!(matches!(
            RiskEvent::from_slice(negative),
            Err(MalformedEvent::InvalidSeverity(_))
        ));
    }
}
