//! Scenario runner - drives the real session actor against a scripted remote.
//!
//! Each scenario builds a fresh `SimContext`, an in-memory transport and a
//! recording request channel, spawns the session through
//! `chainview_core::spawn_session`, then plays the server side of the link
//! and checks the resulting snapshots.

use crate::context::SimContext;
use crate::network::{LinkFault, RecordingRequestChannel, ServerLink, SimConnector, SimListener, SimNetwork};
use crate::oracle::{Oracle, OFF_CYCLE_WEEK};
use crate::scenarios::ScenarioId;

use chainview_core::{
    spawn_session, AgentConfig, AgentMode, AnomalyKind, ClientConfig, ConnectionStatus, DisruptOutcome, Disruption,
    ReconnectPolicy, Role, SessionHandle, SessionView, Severity, StalePolicy, SyncError,
};
use chainview_env::SyncContext;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Endpoint the simulated client is configured with.
pub const SIM_WEBSOCKET_URL: &str = "ws://sim.local:8001/ws/simulation";

/// Why a scenario failed.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Session error: {0}")]
    Session(#[from] SyncError),

    #[error("Frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Simulated server: {0}")]
    Server(&'static str),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Virtual time consumed, in seconds
    pub virtual_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Counters collected during the run
    pub metrics: ScenarioMetrics,

    /// Final session snapshot, when the actor was still reachable
    pub view: Option<SessionView>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub ticks_received: u64,
    pub frames_applied: u64,
    pub malformed_discarded: u64,
    pub stale_rejected: u64,
    pub reconnects: u64,
    pub anomalies: u64,
    pub connect_attempts: u64,
    pub requests_sent: u64,
}

/// Runs fault scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Weeks per scripted run
    weeks: u32,

    /// Wall-clock bound on any single wait
    wait_timeout: Duration,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            weeks: 12,
            wait_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the weeks per run (at least 2).
    pub fn with_weeks(mut self, weeks: u32) -> Self {
        self.weeks = weeks.max(2);
        self
    }

    /// Sets the wall-clock bound on waits.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario on a fresh current-thread runtime.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build();
        match runtime {
            Ok(runtime) => runtime.block_on(self.run_async(scenario)),
            Err(err) => self.failed(scenario, ScenarioError::Runtime(err)),
        }
    }

    /// Runs a scenario on the current runtime.
    pub async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut harness = match self.harness_for(scenario) {
            Ok(harness) => harness,
            Err(err) => return self.failed(scenario, err),
        };
        let outcome = match scenario {
            ScenarioId::HappyPath => self.run_happy_path(&mut harness).await,
            ScenarioId::ReconnectMidRun => self.run_reconnect_mid_run(&mut harness).await,
            ScenarioId::MalformedNoise => self.run_malformed_noise(&mut harness).await,
            ScenarioId::StaleAfterRestart => self.run_stale_after_restart(&mut harness).await,
            ScenarioId::NonMonotonicWeeks => self.run_non_monotonic_weeks(&mut harness).await,
            ScenarioId::DisruptionWithoutSession => self.run_disruption_without_session(&mut harness).await,
            ScenarioId::CircuitBreaker => self.run_circuit_breaker(&mut harness).await,
        };

        let view = harness.handle.snapshot().await.ok();
        let _ = harness.handle.shutdown().await;

        let metrics = harness.metrics(view.as_ref());
        let (passed, failure_reason) = match outcome {
            Ok(()) => (true, None),
            Err(err) => (false, Some(err.to_string())),
        };

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            virtual_time_secs: harness.context.now().as_secs_f64(),
            failure_reason,
            metrics,
            view,
        }
    }

    fn failed(&self, scenario: ScenarioId, err: ScenarioError) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            virtual_time_secs: 0.0,
            failure_reason: Some(err.to_string()),
            metrics: ScenarioMetrics::default(),
            view: None,
        }
    }

    fn harness_for(&self, scenario: ScenarioId) -> Result<Harness, ScenarioError> {
        let base = ClientConfig::new(SIM_WEBSOCKET_URL)?;

        Ok(match scenario {
            ScenarioId::StaleAfterRestart => {
                Harness::new(self, base.with_stale_policy(StalePolicy::Strict), SimNetwork::reliable())
            }
            ScenarioId::CircuitBreaker => Harness::new(
                self,
                base.with_reconnect(ReconnectPolicy::default().with_max_attempts(Some(5))),
                SimNetwork::with_plan(Vec::new(), LinkFault::Refuse),
            ),
            _ => Harness::new(self, base, SimNetwork::reliable()),
        })
    }

    /// SYNC-001: HappyPath - one clean run.
    ///
    /// **Assertion**: history equals the oracle's ticks; summary is terminal.
    async fn run_happy_path(&self, h: &mut Harness) -> Result<(), ScenarioError> {
        info!("SYNC-001: HappyPath");

        let mut link = h.accept().await?;
        let config = AgentConfig::default().with(Role::Retailer, AgentMode::Ai);
        h.handle.start(config.clone(), i64::from(self.weeks)).await?;
        h.expect_start(&mut link, self.weeks).await?;

        let mut oracle = Oracle::new(self.seed, format!("run-{}", self.seed), config);
        link.send(oracle.session_frame());
        h.wait_for("acknowledgement", |v| v.is_running()).await?;

        for _ in 0..self.weeks {
            link.send(oracle.step_frame()?);
        }
        link.send(oracle.summary_frame()?);

        let view = h.wait_for("summary", |v| v.state.summary().is_some()).await?;
        ensure(!view.is_running(), || "still running after summary".to_string())?;
        ensure(view.state.tick_history() == oracle.emitted(), || {
            "tick history diverged from oracle".to_string()
        })?;

        let expected_events: usize = oracle.emitted().iter().map(|t| t.events().len()).sum();
        ensure(view.state.event_log().len() == expected_events, || {
            format!("event log has {} entries, expected {expected_events}", view.state.event_log().len())
        })?;

        let totals = view.total_cost_by_role();
        for entry in &oracle.summary().total_cost_data {
            let role: Role = entry.name.parse().map_err(ScenarioError::Assertion)?;
            ensure(totals.get(&role) == Some(&entry.cost), || {
                format!("derived cost for {role} does not match summary")
            })?;
        }
        Ok(())
    }

    /// SYNC-002: ReconnectMidRun - link dropped at a seeded week.
    ///
    /// **Assertion**: session id cleared on close, history retained until the
    /// restart, start issued while down is delivered on the new link.
    async fn run_reconnect_mid_run(&self, h: &mut Harness) -> Result<(), ScenarioError> {
        info!("SYNC-002: ReconnectMidRun");

        let mut link = h.accept().await?;
        h.handle.start(AgentConfig::default(), i64::from(self.weeks)).await?;
        h.expect_start(&mut link, self.weeks).await?;

        let mut first = Oracle::new(self.seed, "run-a", AgentConfig::default());
        link.send(first.session_frame());
        let cut = 1 + h.context.gen_below(u64::from(self.weeks) - 1) as usize;
        for _ in 0..cut {
            link.send(first.step_frame()?);
        }
        h.wait_for("ticks before cut", |v| v.state.tick_history().len() == cut)
            .await?;

        debug!(cut, "dropping link");
        drop(link);

        let view = h.wait_for("session id cleared", |v| v.state.session_id().is_none()).await?;
        ensure(view.state.tick_history().len() == cut, || {
            "history must survive a connection loss".to_string()
        })?;

        h.handle.start(AgentConfig::default(), i64::from(self.weeks)).await?;
        let mut link = h.accept().await?;
        h.expect_start(&mut link, self.weeks).await?;

        let view = h.wait_for("reopen", |v| v.status == ConnectionStatus::Open).await?;
        ensure(view.stats.reconnects == 1, || format!("expected 1 reconnect, saw {}", view.stats.reconnects))?;
        ensure(view.state.tick_history().is_empty(), || "restart must clear history".to_string())?;

        let mut second = Oracle::new(self.seed.wrapping_add(1), "run-b", AgentConfig::default());
        link.send(second.session_frame());
        for _ in 0..self.weeks {
            link.send(second.step_frame()?);
        }
        link.send(second.summary_frame()?);

        let view = h.wait_for("second summary", |v| v.state.summary().is_some()).await?;
        ensure(view.state.tick_history() == second.emitted(), || {
            "restarted history diverged from oracle".to_string()
        })?;
        ensure(view.state.session_id().map(|id| id.as_str()) == Some("run-b"), || {
            "session id not taken from the new run".to_string()
        })?;
        ensure(h.context.now() >= Duration::from_millis(500), || {
            "reconnect skipped the backoff delay".to_string()
        })?;
        Ok(())
    }

    /// SYNC-003: MalformedNoise - seeded garbage between valid frames.
    ///
    /// **Assertion**: every garbage frame is counted and nothing else changes.
    async fn run_malformed_noise(&self, h: &mut Harness) -> Result<(), ScenarioError> {
        info!("SYNC-003: MalformedNoise");

        const GARBAGE: [&str; 8] = [
            "not json",
            "[1,2,3]",
            "42",
            r#"{"foo":1}"#,
            r#"{"agents":"nope"}"#,
            r#"{"week":3,"agents":{"Retailer":{}}}"#,
            r#"{"type":"simulation_id"}"#,
            r#"{"type":"final_summary","title":3}"#,
        ];

        let mut link = h.accept().await?;
        h.handle.start(AgentConfig::default(), i64::from(self.weeks)).await?;
        h.expect_start(&mut link, self.weeks).await?;

        let mut oracle = Oracle::new(self.seed, "noisy", AgentConfig::default());
        link.send(oracle.session_frame());

        let mut injected = 0u64;
        for _ in 0..self.weeks {
            while h.context.gen_below(3) == 0 {
                link.send(GARBAGE[h.context.gen_below(GARBAGE.len() as u64) as usize]);
                injected += 1;
            }
            link.send(oracle.step_frame()?);
        }
        link.send(GARBAGE[0]);
        injected += 1;
        link.send(oracle.summary_frame()?);

        let view = h.wait_for("summary", |v| v.state.summary().is_some()).await?;
        ensure(view.stats.malformed_discarded == injected, || {
            format!("discarded {} of {injected} garbage frames", view.stats.malformed_discarded)
        })?;
        ensure(view.state.tick_history() == oracle.emitted(), || {
            "garbage leaked into history".to_string()
        })?;
        ensure(view.state.session_id().map(|id| id.as_str()) == Some("noisy"), || {
            "garbage replaced the session id".to_string()
        })?;
        Ok(())
    }

    /// SYNC-004: StaleAfterRestart - old-run frames after a restart.
    ///
    /// **Assertion**: under the strict policy the old frames are rejected and
    /// only the new run is accumulated.
    async fn run_stale_after_restart(&self, h: &mut Harness) -> Result<(), ScenarioError> {
        info!("SYNC-004: StaleAfterRestart");

        let mut link = h.accept().await?;
        h.handle.start(AgentConfig::default(), i64::from(self.weeks)).await?;
        h.expect_start(&mut link, self.weeks).await?;

        let mut old = Oracle::new(self.seed, "old", AgentConfig::default());
        link.send(old.session_frame());
        for _ in 0..3 {
            link.send(old.step_frame()?);
        }
        h.wait_for("old run ticks", |v| v.state.tick_history().len() == 3).await?;

        h.handle.start(AgentConfig::default(), i64::from(self.weeks)).await?;
        h.expect_start(&mut link, self.weeks).await?;

        // The remote has not noticed the restart yet.
        link.send(old.step_frame()?);
        link.send(old.step_frame()?);
        link.send(old.summary_frame()?);

        let mut new = Oracle::new(self.seed.wrapping_add(1), "new", AgentConfig::default());
        link.send(new.session_frame());
        for _ in 0..self.weeks {
            link.send(new.step_frame()?);
        }
        link.send(new.summary_frame()?);

        let view = h
            .wait_for("new summary", |v| {
                v.state.summary().is_some() && v.state.session_id().map(|id| id.as_str()) == Some("new")
            })
            .await?;
        ensure(view.stats.stale_rejected == 3, || {
            format!("expected 3 stale frames, saw {}", view.stats.stale_rejected)
        })?;
        ensure(view.state.tick_history() == new.emitted(), || {
            "stale ticks leaked into the new run".to_string()
        })?;
        Ok(())
    }

    /// SYNC-005: NonMonotonicWeeks - repeated, skipped and reversed weeks.
    ///
    /// **Assertion**: arrival order kept, every break flagged.
    async fn run_non_monotonic_weeks(&self, h: &mut Harness) -> Result<(), ScenarioError> {
        info!("SYNC-005: NonMonotonicWeeks");

        const WEEKS: [i64; 6] = [1, 2, 2, 5, 4, 6];
        const EXPECTED: [(usize, AnomalyKind); 4] = [
            (2, AnomalyKind::NonMonotonic),
            (3, AnomalyKind::Gap),
            (4, AnomalyKind::NonMonotonic),
            (5, AnomalyKind::Gap),
        ];

        let mut link = h.accept().await?;
        h.handle.start(AgentConfig::default(), WEEKS.len() as i64).await?;
        h.expect_start(&mut link, WEEKS.len() as u32).await?;

        let mut oracle = Oracle::new(self.seed, "jumbled", AgentConfig::default());
        link.send(oracle.session_frame());
        for week in WEEKS {
            let mut tick = oracle.step();
            tick.week = week;
            link.send(serde_json::to_string(&tick)?);
        }

        let view = h
            .wait_for("jumbled ticks", |v| v.state.tick_history().len() == WEEKS.len())
            .await?;
        let received: Vec<i64> = view.state.tick_history().iter().map(|t| t.week).collect();
        ensure(received == WEEKS, || format!("weeks reordered: {received:?}"))?;

        let flagged: Vec<(usize, AnomalyKind)> = view.state.anomalies().iter().map(|a| (a.index, a.kind)).collect();
        ensure(flagged == EXPECTED, || format!("unexpected anomalies: {flagged:?}"))?;
        Ok(())
    }

    /// SYNC-006: DisruptionWithoutSession - the disruption gate.
    ///
    /// **Assertion**: nothing is posted before the acknowledgement; afterwards
    /// one request reaches the derived address and its commentary arrives.
    async fn run_disruption_without_session(&self, h: &mut Harness) -> Result<(), ScenarioError> {
        info!("SYNC-006: DisruptionWithoutSession");

        let mut link = h.accept().await?;
        h.handle.start(AgentConfig::default(), i64::from(self.weeks)).await?;
        h.expect_start(&mut link, self.weeks).await?;

        let outcome = h.handle.disrupt(Disruption::default_demand_spike()).await?;
        ensure(outcome == DisruptOutcome::Skipped, || format!("expected skip, got {outcome:?}"))?;
        ensure(h.requests.requests().is_empty(), || "request sent without session".to_string())?;

        let mut oracle = Oracle::new(self.seed, "spiky", AgentConfig::default());
        link.send(oracle.session_frame());
        link.send(oracle.step_frame()?);
        h.wait_for("acknowledgement", |v| v.state.tick_history().len() == 1).await?;

        let outcome = h.handle.disrupt(Disruption::default_demand_spike()).await?;
        ensure(matches!(outcome, DisruptOutcome::Delivered { status: 200, .. }), || {
            format!("expected delivery, got {outcome:?}")
        })?;

        let requests = h.requests.requests();
        ensure(requests.len() == 1, || format!("expected 1 request, saw {}", requests.len()))?;
        ensure(requests[0].url == "http://sim.local:8001/simulation/spiky/disrupt", || {
            format!("wrong address {}", requests[0].url)
        })?;
        ensure(
            requests[0].body == serde_json::json!({ "type": "DEMAND_SPIKE", "value": 80, "duration": 3 }),
            || format!("wrong body {}", requests[0].body),
        )?;

        oracle.inject(Disruption::default_demand_spike());
        for _ in 1..self.weeks {
            link.send(oracle.step_frame()?);
        }
        link.send(oracle.summary_frame()?);

        let view = h.wait_for("summary", |v| v.state.summary().is_some()).await?;
        let critical = view.events_by_severity().get(&Severity::Critical).copied().unwrap_or(0);
        ensure(critical == 1, || format!("expected 1 critical event, saw {critical}"))?;
        ensure(
            view.state.event_log().iter().any(|e| e.week == OFF_CYCLE_WEEK),
            || "disruption commentary lost its off-cycle week".to_string(),
        )?;
        Ok(())
    }

    /// SYNC-007: CircuitBreaker - the endpoint never accepts.
    ///
    /// **Assertion**: exactly the configured number of attempts, with the
    /// backoff schedule visible on the virtual clock; a later start is refused.
    async fn run_circuit_breaker(&self, h: &mut Harness) -> Result<(), ScenarioError> {
        info!("SYNC-007: CircuitBreaker");

        let view = h.wait_for("circuit breaker", |v| v.stats.gave_up).await?;
        ensure(view.status == ConnectionStatus::Closed, || format!("status {:?}", view.status))?;
        ensure(h.connector.attempts() == 5, || {
            format!("expected 5 attempts, saw {}", h.connector.attempts())
        })?;

        // 0.5s + 1s + 2s + 4s between five attempts
        ensure(h.context.now() == Duration::from_millis(7500), || {
            format!("unexpected virtual time {:?}", h.context.now())
        })?;

        match h.handle.start(AgentConfig::default(), i64::from(self.weeks)).await {
            Err(SyncError::ConnectionUnavailable(_)) => Ok(()),
            other => Err(ScenarioError::Assertion(format!("start after give-up: {other:?}"))),
        }
    }
}

/// Per-scenario wiring.
struct Harness {
    context: Arc<SimContext>,
    connector: Arc<SimConnector>,
    listener: SimListener,
    requests: Arc<RecordingRequestChannel>,
    handle: SessionHandle,
    wait: Duration,
}

impl Harness {
    fn new(runner: &ScenarioRunner, config: ClientConfig, network: (Arc<SimConnector>, SimListener)) -> Self {
        let (connector, listener) = network;
        let context = SimContext::shared(runner.seed);
        let requests = Arc::new(RecordingRequestChannel::new());
        let handle = spawn_session(
            Arc::clone(&context),
            Arc::clone(&connector),
            Arc::clone(&requests),
            &config,
        );

        Self {
            context,
            connector,
            listener,
            requests,
            handle,
            wait: runner.wait_timeout,
        }
    }

    async fn accept(&mut self) -> Result<ServerLink, ScenarioError> {
        tokio::time::timeout(self.wait, self.listener.accept())
            .await
            .map_err(|_| ScenarioError::Timeout("connection"))?
            .ok_or(ScenarioError::Server("connector dropped"))
    }

    async fn wait_for<F>(&self, what: &'static str, predicate: F) -> Result<SessionView, ScenarioError>
    where
        F: Fn(&SessionView) -> bool,
    {
        let view = tokio::time::timeout(self.wait, self.handle.wait_until(predicate))
            .await
            .map_err(|_| ScenarioError::Timeout(what))??;
        Ok(view)
    }

    /// Reads the client's start frame and checks its shape.
    async fn expect_start(&self, link: &mut ServerLink, weeks: u32) -> Result<(), ScenarioError> {
        let frame = tokio::time::timeout(self.wait, link.recv())
            .await
            .map_err(|_| ScenarioError::Timeout("start frame"))?
            .ok_or(ScenarioError::Server("client closed before starting"))?;

        let value: serde_json::Value = serde_json::from_str(&frame)?;
        ensure(value["type"] == "start_simulation", || format!("unexpected frame {frame}"))?;
        ensure(value["weeks"] == weeks, || format!("start frame asked for {}", value["weeks"]))?;
        ensure(value["config"].is_object(), || "start frame without config".to_string())?;
        Ok(())
    }

    fn metrics(&self, view: Option<&SessionView>) -> ScenarioMetrics {
        let mut metrics = ScenarioMetrics {
            connect_attempts: self.connector.attempts(),
            requests_sent: self.requests.requests().len() as u64,
            ..ScenarioMetrics::default()
        };
        if let Some(view) = view {
            metrics.ticks_received = view.state.tick_history().len() as u64;
            metrics.frames_applied = view.stats.frames_applied;
            metrics.malformed_discarded = view.stats.malformed_discarded;
            metrics.stale_rejected = view.stats.stale_rejected;
            metrics.reconnects = view.stats.reconnects;
            metrics.anomalies = view.state.anomalies().len() as u64;
        }
        metrics
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::Assertion(message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_scenarios_pass() {
        let runner = ScenarioRunner::new(42).with_weeks(8);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {:?}",
                scenario,
                result.failure_reason
            );
        }
    }

    #[test]
    fn test_scenarios_across_seeds() {
        for seed in [1, 7, 1234] {
            let runner = ScenarioRunner::new(seed).with_weeks(5);
            for scenario in [ScenarioId::ReconnectMidRun, ScenarioId::MalformedNoise] {
                let result = runner.run(scenario);
                assert!(result.passed, "{scenario} seed={seed}: {:?}", result.failure_reason);
            }
        }
    }

    #[test]
    fn test_circuit_breaker_metrics() {
        let result = ScenarioRunner::new(3).run(ScenarioId::CircuitBreaker);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.connect_attempts, 5);
        assert_eq!(result.virtual_time_secs, 7.5);
    }
}
