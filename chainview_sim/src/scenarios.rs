//! Fault scenarios for the synchronization engine.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SYNC-001: one clean run from start to summary
    HappyPath,

    /// SYNC-002: connection dropped mid-run, restarted on the new connection
    ReconnectMidRun,

    /// SYNC-003: garbage frames interleaved with a clean run
    MalformedNoise,

    /// SYNC-004: frames of the previous run arriving after a restart
    StaleAfterRestart,

    /// SYNC-005: repeated, skipped and reversed weeks
    NonMonotonicWeeks,

    /// SYNC-006: disruption before and after the session is known
    DisruptionWithoutSession,

    /// SYNC-007: endpoint never accepts; reconnects must stop
    CircuitBreaker,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::HappyPath,
            ScenarioId::ReconnectMidRun,
            ScenarioId::MalformedNoise,
            ScenarioId::StaleAfterRestart,
            ScenarioId::NonMonotonicWeeks,
            ScenarioId::DisruptionWithoutSession,
            ScenarioId::CircuitBreaker,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::HappyPath => "happy_path",
            ScenarioId::ReconnectMidRun => "reconnect_mid_run",
            ScenarioId::MalformedNoise => "malformed_noise",
            ScenarioId::StaleAfterRestart => "stale_after_restart",
            ScenarioId::NonMonotonicWeeks => "non_monotonic_weeks",
            ScenarioId::DisruptionWithoutSession => "disruption_without_session",
            ScenarioId::CircuitBreaker => "circuit_breaker",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::HappyPath => "Start, acknowledge, stream every week, summarise",
            ScenarioId::ReconnectMidRun => "Drop the link mid-run, verify session id cleared and restart",
            ScenarioId::MalformedNoise => "Interleave seeded garbage frames, verify state untouched by them",
            ScenarioId::StaleAfterRestart => "Strict policy rejects old-run frames before the new ack",
            ScenarioId::NonMonotonicWeeks => "Weeks arrive out of order, kept in arrival order and flagged",
            ScenarioId::DisruptionWithoutSession => "Disruption is a no-op until a session id exists",
            ScenarioId::CircuitBreaker => "Refused handshakes back off on the virtual clock, then give up",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "happy_path" | "happypath" | "sync-001" => Ok(ScenarioId::HappyPath),
            "reconnect_mid_run" | "reconnect" | "sync-002" => Ok(ScenarioId::ReconnectMidRun),
            "malformed_noise" | "malformed" | "sync-003" => Ok(ScenarioId::MalformedNoise),
            "stale_after_restart" | "stale" | "sync-004" => Ok(ScenarioId::StaleAfterRestart),
            "non_monotonic_weeks" | "non_monotonic" | "sync-005" => Ok(ScenarioId::NonMonotonicWeeks),
            "disruption_without_session" | "disruption" | "sync-006" => Ok(ScenarioId::DisruptionWithoutSession),
            "circuit_breaker" | "breaker" | "sync-007" => Ok(ScenarioId::CircuitBreaker),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("SYNC-004".parse::<ScenarioId>(), Ok(ScenarioId::StaleAfterRestart));
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }
}
