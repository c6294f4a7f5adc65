//! JSON exporter for scenario runs.
//!
//! Writes the final session snapshot of a scenario in the shape the
//! dashboard consumes: per-week order series, KPIs, cost totals and the
//! event log.

use crate::runner::{ScenarioMetrics, ScenarioResult};
use chainview_core::model::EventMessage;
use chainview_core::{AnomalyKind, SessionView};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;

/// Placed orders of every role at one week.
#[derive(Debug, Clone, Serialize)]
pub struct OrderFrame {
    pub week: i64,
    pub orders: BTreeMap<String, i64>,
}

/// Latest inventory and backlog of one role.
#[derive(Debug, Clone, Serialize)]
pub struct KpiFrame {
    pub role: String,
    pub inventory: i64,
    pub backlog: i64,
}

/// A flagged break in week progression.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyFrame {
    pub index: usize,
    pub previous_week: i64,
    pub received_week: i64,
    pub kind: AnomalyKind,
}

/// Snapshot section of an export.
#[derive(Debug, Clone, Serialize)]
pub struct SessionFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: String,
    pub running: bool,
    pub orders: Vec<OrderFrame>,
    pub kpis: Vec<KpiFrame>,
    pub total_cost: BTreeMap<String, f64>,
    pub events: Vec<EventMessage>,
    pub events_by_severity: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<AnomalyFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_title: Option<String>,
}

impl SessionFrame {
    pub fn from_view(view: &SessionView) -> Self {
        Self {
            session_id: view.state.session_id().map(|id| id.to_string()),
            status: view.connection_status_text().to_string(),
            running: view.is_running(),
            orders: view
                .order_series()
                .into_iter()
                .map(|point| OrderFrame {
                    week: point.week,
                    orders: point
                        .orders
                        .into_iter()
                        .map(|(role, amount)| (role.name().to_string(), amount))
                        .collect(),
                })
                .collect(),
            kpis: view
                .kpis()
                .into_iter()
                .map(|kpi| KpiFrame {
                    role: kpi.role.name().to_string(),
                    inventory: kpi.inventory,
                    backlog: kpi.backlog,
                })
                .collect(),
            total_cost: view
                .total_cost_by_role()
                .into_iter()
                .map(|(role, cost)| (role.name().to_string(), cost))
                .collect(),
            events: view.state.event_log().to_vec(),
            events_by_severity: view
                .events_by_severity()
                .into_iter()
                .map(|(severity, count)| (format!("{severity:?}").to_uppercase(), count))
                .collect(),
            anomalies: view
                .state
                .anomalies()
                .iter()
                .map(|a| AnomalyFrame {
                    index: a.index,
                    previous_week: a.previous_week,
                    received_week: a.received_week,
                    kind: a.kind,
                })
                .collect(),
            summary_title: view.state.summary().map(|s| s.title.clone()),
        }
    }
}

/// Complete scenario export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Virtual time consumed in seconds
    pub virtual_time_secs: f64,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionFrame>,
}

impl SimExport {
    /// Builds an export from a finished scenario.
    pub fn from_result(result: &ScenarioResult) -> Self {
        Self {
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            virtual_time_secs: result.virtual_time_secs,
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            metrics: result.metrics.clone(),
            session: result.view.as_ref().map(SessionFrame::from_view),
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
