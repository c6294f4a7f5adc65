//! State accumulator - folds classified messages into session state.
//!
//! `SessionState` is append-only between resets. The reducer never reorders,
//! deduplicates or drops frames under the default policy; the transport gives
//! no ordering guarantee across reconnects, so tolerance is the contract.

use crate::classifier::Inbound;
use crate::model::{EventMessage, SessionId, SummaryMessage, TickMessage};
use serde::{Deserialize, Serialize};

/// How frames that may belong to a superseded run are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Append everything in arrival order.
    #[default]
    Tolerant,
    /// Reject ticks and summaries that arrive after a start command and
    /// before that run's session identifier.
    Strict,
}

impl std::str::FromStr for StalePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tolerant" => Ok(StalePolicy::Tolerant),
            "strict" => Ok(StalePolicy::Strict),
            _ => Err(format!("Unknown stale policy: {s} (expected tolerant or strict)")),
        }
    }
}

/// A week value that broke the expected `+1` progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekAnomaly {
    /// Position of the offending tick in `tick_history`
    pub index: usize,
    pub previous_week: i64,
    pub received_week: i64,
    pub kind: AnomalyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Week did not increase
    NonMonotonic,
    /// Week skipped ahead by more than one
    Gap,
}

/// Result of applying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { anomaly: Option<WeekAnomaly> },
    /// Rejected under `StalePolicy::Strict`
    Stale,
}

/// Accumulated state of the current session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    session_id: Option<SessionId>,
    tick_history: Vec<TickMessage>,
    event_log: Vec<EventMessage>,
    summary: Option<SummaryMessage>,
    anomalies: Vec<WeekAnomaly>,
    awaiting_ack: bool,
    policy: StalePolicy,
}

impl SessionState {
    /// Creates an empty state with the tolerant policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty state with the given policy.
    pub fn with_policy(policy: StalePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn tick_history(&self) -> &[TickMessage] {
        &self.tick_history
    }

    pub fn event_log(&self) -> &[EventMessage] {
        &self.event_log
    }

    pub fn summary(&self) -> Option<&SummaryMessage> {
        self.summary.as_ref()
    }

    pub fn anomalies(&self) -> &[WeekAnomaly] {
        &self.anomalies
    }

    /// True between a start command and the matching session identifier.
    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    pub fn policy(&self) -> StalePolicy {
        self.policy
    }

    /// Applies one classified message in place.
    pub fn apply(&mut self, message: Inbound) -> ApplyOutcome {
        match message {
            Inbound::SessionIdentifier(id) => {
                self.session_id = Some(id);
                self.awaiting_ack = false;
                ApplyOutcome::Applied { anomaly: None }
            }
            Inbound::Tick(tick) => {
                if self.rejects_stale() {
                    return ApplyOutcome::Stale;
                }
                let anomaly = self.check_week(tick.week);
                if let Some(anomaly) = anomaly {
                    self.anomalies.push(anomaly);
                }
                self.event_log.extend(tick.events().iter().cloned());
                self.tick_history.push(tick);
                ApplyOutcome::Applied { anomaly }
            }
            Inbound::Summary(summary) => {
                if self.rejects_stale() {
                    return ApplyOutcome::Stale;
                }
                self.summary = Some(summary);
                ApplyOutcome::Applied { anomaly: None }
            }
        }
    }

    /// Clears run data for a new start command.
    ///
    /// The session id survives until the new run's identifier arrives.
    pub fn begin_run(&mut self) {
        self.tick_history.clear();
        self.event_log.clear();
        self.summary = None;
        self.anomalies.clear();
        self.awaiting_ack = true;
    }

    /// Forgets the session id after the connection dropped.
    pub fn connection_lost(&mut self) {
        self.session_id = None;
    }

    fn rejects_stale(&self) -> bool {
        self.policy == StalePolicy::Strict && self.awaiting_ack
    }

    fn check_week(&self, received_week: i64) -> Option<WeekAnomaly> {
        let previous_week = self.tick_history.last()?.week;
        let kind = if received_week <= previous_week {
            AnomalyKind::NonMonotonic
        } else if received_week > previous_week.saturating_add(1) {
            AnomalyKind::Gap
        } else {
            return None;
        };

        Some(WeekAnomaly {
            index: self.tick_history.len(),
            previous_week,
            received_week,
            kind,
        })
    }
}

/// Pure form of [`SessionState::apply`].
pub fn reduce(mut state: SessionState, message: Inbound) -> SessionState {
    state.apply(message);
    state
}
