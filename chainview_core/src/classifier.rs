//! Message classifier - tags each inbound frame with its protocol variant.
//!
//! The protocol is closed: a frame is a session identifier, a final summary,
//! or a tick. Anything else is malformed and must not reach the accumulator.

use crate::model::{SessionId, SummaryMessage, TickMessage};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Discriminant value of a session identifier frame.
pub const SESSION_ID_TYPE: &str = "simulation_id";

/// Discriminant value of a final summary frame.
pub const FINAL_SUMMARY_TYPE: &str = "final_summary";

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SessionIdentifier(SessionId),
    Summary(SummaryMessage),
    Tick(TickMessage),
}

impl Inbound {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::SessionIdentifier(_) => "session_identifier",
            Inbound::Summary(_) => "summary",
            Inbound::Tick(_) => "tick",
        }
    }
}

/// Why a frame could not be classified.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Malformed {
    #[error("frame is not JSON: {0}")]
    NotJson(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame matches no known message shape")]
    Unrecognized,

    #[error("invalid {kind} message: {reason}")]
    InvalidShape { kind: &'static str, reason: String },
}

#[derive(Deserialize)]
struct SessionIdPayload {
    id: String,
}

/// Classifies one raw text frame.
pub fn classify(frame: &str) -> Result<Inbound, Malformed> {
    let value: Value = serde_json::from_str(frame).map_err(|e| Malformed::NotJson(e.to_string()))?;
    classify_value(value)
}

/// Classifies one decoded payload.
///
/// Priority: session identifier, then final summary, then tick (any object
/// carrying `agents`).
pub fn classify_value(value: Value) -> Result<Inbound, Malformed> {
    let object = value.as_object().ok_or(Malformed::NotAnObject)?;

    let discriminant = object.get("type").and_then(Value::as_str);

    if discriminant == Some(SESSION_ID_TYPE) {
        let payload: SessionIdPayload = decode("session_identifier", value)?;
        return Ok(Inbound::SessionIdentifier(SessionId(payload.id)));
    }

    if discriminant == Some(FINAL_SUMMARY_TYPE) {
        return decode("summary", value).map(Inbound::Summary);
    }

    if object.contains_key("agents") {
        return decode("tick", value).map(Inbound::Tick);
    }

    Err(Malformed::Unrecognized)
}

fn decode<T: serde::de::DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, Malformed> {
    serde_json::from_value(value).map_err(|e| Malformed::InvalidShape {
        kind,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agents() -> Value {
        let state = json!({ "inventory": 100, "placed_order_amount": 20, "backlog": 0, "cost": 100 });
        json!({ "Retailer": state, "Wholesaler": state, "Distributor": state, "Factory": state })
    }

    #[test]
    fn test_session_identifier() {
        let inbound = classify(r#"{"type":"simulation_id","id":"abc"}"#).unwrap();
        assert_eq!(inbound, Inbound::SessionIdentifier(SessionId::new("abc")));
    }

    #[test]
    fn test_summary() {
        let raw = json!({
            "type": "final_summary",
            "title": "Simulation Complete",
            "summary_text": "Costs were contained.",
            "total_cost_data": [{ "name": "Retailer", "cost": 1200 }],
            "inventory_stability_data": [{ "week": 0, "inventory": 100 }],
            "cost_breakdown_data": [{ "name": "Holding Cost", "value": 900 }]
        });

        match classify_value(raw).unwrap() {
            Inbound::Summary(summary) => {
                assert_eq!(summary.title, "Simulation Complete");
                assert_eq!(summary.total_cost_data.len(), 1);
            }
            other => panic!("expected summary, got {}", other.kind()),
        }
    }

    #[test]
    fn test_tick() {
        let raw = json!({ "week": 1, "agents": agents() });
        assert_eq!(classify_value(raw).unwrap().kind(), "tick");
    }

    #[test]
    fn test_discriminant_wins_over_agents() {
        // A session identifier that happens to carry `agents` is still an identifier.
        let raw = json!({ "type": "simulation_id", "id": "s1", "agents": agents() });
        assert_eq!(classify_value(raw).unwrap().kind(), "session_identifier");
    }

    #[test]
    fn test_unknown_type_with_agents_is_tick() {
        let raw = json!({ "type": "tick", "week": 3, "agents": agents() });
        assert_eq!(classify_value(raw).unwrap().kind(), "tick");
    }

    #[test]
    fn test_tick_with_float_quantities() {
        let state = r#"{"inventory":100.0,"placed_order_amount":20.0,"backlog":0.0,"cost":100.0}"#;
        let frame = format!(
            r#"{{"week":1,"agents":{{"Retailer":{state},"Wholesaler":{state},"Distributor":{state},"Factory":{state}}}}}"#
        );

        let Ok(Inbound::Tick(tick)) = classify(&frame) else {
            panic!("float quantities must classify as a tick");
        };
        assert_eq!(tick.agents.retailer.inventory, 100);
        assert_eq!(tick.agents.factory.placed_order_amount, 20);
    }

    #[test]
    fn test_malformed_payloads() {
        assert_eq!(classify(r#"{"foo":1}"#), Err(Malformed::Unrecognized));
        assert_eq!(classify("[1,2,3]"), Err(Malformed::NotAnObject));
        assert!(matches!(classify("not json"), Err(Malformed::NotJson(_))));
        assert!(matches!(
            classify(r#"{"type":"simulation_id"}"#),
            Err(Malformed::InvalidShape { kind: "session_identifier", .. })
        ));
        assert!(matches!(
            classify(r#"{"week":1,"agents":{}}"#),
            Err(Malformed::InvalidShape { kind: "tick", .. })
        ));
    }
}
