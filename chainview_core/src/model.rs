//! Wire-level data shapes for one simulation run.
//!
//! Every type here mirrors a JSON object emitted by the remote simulation.
//! Values are immutable once received; the accumulator only ever appends them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four fixed participants of the supply chain, downstream first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Retailer,
    Wholesaler,
    Distributor,
    Factory,
}

impl Role {
    /// All roles in chain order (customer side first).
    pub const ALL: [Role; 4] = [Role::Retailer, Role::Wholesaler, Role::Distributor, Role::Factory];

    /// Returns the role's wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Role::Retailer => "Retailer",
            Role::Wholesaler => "Wholesaler",
            Role::Distributor => "Distributor",
            Role::Factory => "Factory",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown role: {s}"))
    }
}

/// Decision policy the remote simulation uses for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentMode {
    /// Fixed order-up-to heuristic
    Rule,
    /// Learned policy
    Ai,
}

impl std::str::FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RULE" => Ok(AgentMode::Rule),
            "AI" => Ok(AgentMode::Ai),
            _ => Err(format!("Unknown agent mode: {s} (expected RULE or AI)")),
        }
    }
}

/// One participant's metrics at a tick.
///
/// Non-negativity is not enforced; values are displayed as received.
/// Quantities are whole units; a float on the wire is rounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(deserialize_with = "whole_number::deserialize")]
    pub inventory: i64,
    #[serde(deserialize_with = "whole_number::deserialize")]
    pub placed_order_amount: i64,
    #[serde(deserialize_with = "whole_number::deserialize")]
    pub backlog: i64,
    pub cost: f64,
}

/// Metrics for all four roles at one tick.
///
/// Every role is required: a payload missing any of them fails to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    #[serde(rename = "Retailer")]
    pub retailer: AgentState,
    #[serde(rename = "Wholesaler")]
    pub wholesaler: AgentState,
    #[serde(rename = "Distributor")]
    pub distributor: AgentState,
    #[serde(rename = "Factory")]
    pub factory: AgentState,
}

impl AgentSnapshot {
    /// Returns the state for a role.
    pub fn get(&self, role: Role) -> &AgentState {
        match role {
            Role::Retailer => &self.retailer,
            Role::Wholesaler => &self.wholesaler,
            Role::Distributor => &self.distributor,
            Role::Factory => &self.factory,
        }
    }

    /// Iterates roles in chain order.
    pub fn iter(&self) -> impl Iterator<Item = (Role, &AgentState)> + '_ {
        Role::ALL.into_iter().map(move |role| (role, self.get(role)))
    }
}

/// Severity of an advisory event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Narrative attached to a tick.
///
/// The remote reports week `-1` for events raised outside the tick loop
/// (disruption commentary); the value is kept as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(deserialize_with = "whole_number::deserialize")]
    pub week: i64,
    #[serde(rename = "type")]
    pub severity: Severity,
    pub text: String,
}

/// One simulated period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickMessage {
    #[serde(deserialize_with = "whole_number::deserialize")]
    pub week: i64,
    pub agents: AgentSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<EventMessage>>,
}

impl TickMessage {
    /// Events carried by this tick, in order.
    pub fn events(&self) -> &[EventMessage] {
        self.events.as_deref().unwrap_or(&[])
    }
}

/// Server-issued token addressing one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Total cost accrued by one role over the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub name: String,
    pub cost: f64,
}

/// Retailer inventory at one week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryPoint {
    #[serde(deserialize_with = "whole_number::deserialize")]
    pub week: i64,
    #[serde(deserialize_with = "whole_number::deserialize")]
    pub inventory: i64,
}

/// One slice of the retailer's cost breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub name: String,
    pub value: f64,
}

/// Terminal report for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMessage {
    pub title: String,
    pub summary_text: String,
    #[serde(default)]
    pub total_cost_data: Vec<CostEntry>,
    #[serde(default)]
    pub inventory_stability_data: Vec<InventoryPoint>,
    #[serde(default)]
    pub cost_breakdown_data: Vec<BreakdownEntry>,
}

/// Reads any JSON number as a whole `i64`.
mod whole_number {
    use serde::de::{Error, Unexpected};
    use serde::{Deserialize, Deserializer};
    use serde_json::Number;

    const RANGE: &str = "a number within the i64 range";

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let number = Number::deserialize(deserializer)?;
        if let Some(value) = number.as_i64() {
            return Ok(value);
        }
        if let Some(value) = number.as_u64() {
            return Err(D::Error::invalid_value(Unexpected::Unsigned(value), &RANGE));
        }

        let value = number.as_f64().unwrap_or(f64::NAN);
        let rounded = value.round();
        // i64::MAX is not exactly representable; the bound is exclusive.
        if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded < i64::MAX as f64 {
            Ok(rounded as i64)
        } else {
            Err(D::Error::invalid_value(Unexpected::Float(value), &RANGE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent(inventory: i64) -> serde_json::Value {
        json!({ "inventory": inventory, "placed_order_amount": 20, "backlog": 0, "cost": 100 })
    }

    #[test]
    fn test_tick_decodes_full_snapshot() {
        let raw = json!({
            "week": 4,
            "agents": {
                "Retailer": agent(90),
                "Wholesaler": agent(100),
                "Distributor": agent(110),
                "Factory": agent(120),
            },
            "events": [{ "week": 4, "type": "WARNING", "text": "orders rising" }]
        });

        let tick: TickMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(tick.week, 4);
        assert_eq!(tick.agents.get(Role::Distributor).inventory, 110);
        assert_eq!(tick.events()[0].severity, Severity::Warning);
        assert!(tick.analysis.is_none());
    }

    #[test]
    fn test_float_quantities_are_accepted() {
        let state = json!({ "inventory": 100.0, "placed_order_amount": 19.6, "backlog": -0.0, "cost": 12.5 });
        let raw = json!({
            "week": 3.0,
            "agents": { "Retailer": state, "Wholesaler": state, "Distributor": state, "Factory": state },
            "events": [{ "week": -1.0, "type": "INFO", "text": "spike" }]
        });

        let tick: TickMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(tick.week, 3);
        assert_eq!(tick.agents.retailer.inventory, 100);
        assert_eq!(tick.agents.retailer.placed_order_amount, 20);
        assert_eq!(tick.agents.retailer.backlog, 0);
        assert_eq!(tick.events()[0].week, -1);
    }

    #[test]
    fn test_out_of_range_quantity_is_rejected() {
        let raw = json!({ "inventory": u64::MAX, "placed_order_amount": 0, "backlog": 0, "cost": 0 });
        assert!(serde_json::from_value::<AgentState>(raw).is_err());

        let raw = json!({ "inventory": 1e300, "placed_order_amount": 0, "backlog": 0, "cost": 0 });
        assert!(serde_json::from_value::<AgentState>(raw).is_err());

        let raw = json!({ "inventory": "100", "placed_order_amount": 0, "backlog": 0, "cost": 0 });
        assert!(serde_json::from_value::<AgentState>(raw).is_err());
    }

    #[test]
    fn test_partial_snapshot_is_rejected() {
        let raw = json!({
            "week": 1,
            "agents": { "Retailer": agent(1), "Wholesaler": agent(1), "Distributor": agent(1) }
        });

        assert!(serde_json::from_value::<TickMessage>(raw).is_err());
    }

    #[test]
    fn test_null_events_decode_as_none() {
        let raw = json!({
            "week": 2,
            "agents": {
                "Retailer": agent(1), "Wholesaler": agent(1),
                "Distributor": agent(1), "Factory": agent(1),
            },
            "events": null
        });

        let tick: TickMessage = serde_json::from_value(raw).unwrap();
        assert!(tick.events().is_empty());
    }

    #[test]
    fn test_role_and_mode_parsing() {
        assert_eq!("wholesaler".parse::<Role>().unwrap(), Role::Wholesaler);
        assert!("Warehouse".parse::<Role>().is_err());
        assert_eq!("ai".parse::<AgentMode>().unwrap(), AgentMode::Ai);
        assert_eq!(serde_json::to_value(AgentMode::Ai).unwrap(), json!("AI"));
        assert_eq!(serde_json::to_value(AgentMode::Rule).unwrap(), json!("RULE"));
    }

    #[test]
    fn test_snapshot_iterates_in_chain_order() {
        let raw = json!({
            "Retailer": agent(1), "Wholesaler": agent(2),
            "Distributor": agent(3), "Factory": agent(4),
        });
        let snapshot: AgentSnapshot = serde_json::from_value(raw).unwrap();

        let order: Vec<(Role, i64)> = snapshot.iter().map(|(r, s)| (r, s.inventory)).collect();
        assert_eq!(
            order,
            vec![(Role::Retailer, 1), (Role::Wholesaler, 2), (Role::Distributor, 3), (Role::Factory, 4)]
        );
    }
}
