//! Derived view - read-only projections over session state.
//!
//! Rendering collaborators receive a [`SessionView`] snapshot and compute
//! everything they display from it; nothing here mutates state.

use crate::accumulator::SessionState;
use crate::connection::ConnectionStatus;
use crate::model::{Role, Severity, TickMessage};
use std::collections::BTreeMap;

/// Counters kept by the session actor alongside the state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames that changed state
    pub frames_applied: u64,
    /// Frames discarded by the classifier
    pub malformed_discarded: u64,
    /// Frames rejected as belonging to a superseded run
    pub stale_rejected: u64,
    /// Successful handshakes after the first one
    pub reconnects: u64,
    /// The connection manager stopped retrying
    pub gave_up: bool,
}

/// A consistent snapshot handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: SessionState,
    pub status: ConnectionStatus,
    pub stats: SessionStats,
}

/// Placed order amounts of every role at one week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPoint {
    pub week: i64,
    pub orders: BTreeMap<Role, i64>,
}

/// Headline numbers for one role at the latest tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kpi {
    pub role: Role,
    pub inventory: i64,
    pub backlog: i64,
}

/// Last received tick, if any.
pub fn latest_tick(state: &SessionState) -> Option<&TickMessage> {
    state.tick_history().last()
}

/// A run is in progress when it has been acknowledged and not yet summarised.
pub fn is_running(state: &SessionState) -> bool {
    state.session_id().is_some() && state.summary().is_none()
}

pub fn connection_status_text(status: ConnectionStatus) -> &'static str {
    status.text()
}

/// Per-week order amounts, the series behind the bullwhip chart.
pub fn order_series(state: &SessionState) -> Vec<OrderPoint> {
    state
        .tick_history()
        .iter()
        .map(|tick| OrderPoint {
            week: tick.week,
            orders: tick
                .agents
                .iter()
                .map(|(role, agent)| (role, agent.placed_order_amount))
                .collect(),
        })
        .collect()
}

/// Inventory and backlog per role at the latest tick; empty before the
/// first tick.
pub fn kpis(state: &SessionState) -> Vec<Kpi> {
    latest_tick(state)
        .map(|tick| {
            tick.agents
                .iter()
                .map(|(role, agent)| Kpi {
                    role,
                    inventory: agent.inventory,
                    backlog: agent.backlog,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Sum of per-tick cost for every role over the received history.
pub fn total_cost_by_role(state: &SessionState) -> BTreeMap<Role, f64> {
    let mut totals: BTreeMap<Role, f64> = Role::ALL.into_iter().map(|role| (role, 0.0)).collect();
    for tick in state.tick_history() {
        for (role, agent) in tick.agents.iter() {
            *totals.entry(role).or_default() += agent.cost;
        }
    }
    totals
}

/// Number of logged events per severity.
pub fn events_by_severity(state: &SessionState) -> BTreeMap<Severity, usize> {
    let mut counts = BTreeMap::new();
    for event in state.event_log() {
        *counts.entry(event.severity).or_insert(0) += 1;
    }
    counts
}

impl SessionView {
    pub fn latest_tick(&self) -> Option<&TickMessage> {
        latest_tick(&self.state)
    }

    pub fn is_running(&self) -> bool {
        is_running(&self.state)
    }

    pub fn connection_status_text(&self) -> &'static str {
        connection_status_text(self.status)
    }

    pub fn order_series(&self) -> Vec<OrderPoint> {
        order_series(&self.state)
    }

    pub fn kpis(&self) -> Vec<Kpi> {
        kpis(&self.state)
    }

    pub fn total_cost_by_role(&self) -> BTreeMap<Role, f64> {
        total_cost_by_role(&self.state)
    }

    pub fn events_by_severity(&self) -> BTreeMap<Severity, usize> {
        events_by_severity(&self.state)
    }
}
