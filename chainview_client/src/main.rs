//! ChainView client - follows a live supply-chain simulation from the terminal.
//!
//! Connects to the streaming endpoint, starts one run, logs every week as it
//! arrives and prints the final summary:
//! - Endpoint from `--url`, `CHAINVIEW_WEBSOCKET_URL` or the local default
//! - Optional demand spike injected once a given week has been seen
//! - Restarts the run when the connection drops before the summary
//! - Exits after the summary, on Ctrl-C, or when reconnects are exhausted

use anyhow::{bail, Context, Result};
use chainview_core::commands::AgentConfig;
use chainview_core::{
    parse_weeks, spawn_session, AgentMode, ClientConfig, ConnectionStatus, DisruptOutcome, Disruption,
    ReconnectPolicy, Role, SessionHandle, SessionView, StalePolicy,
};
use chainview_env::{HttpRequestChannel, TokioContext, WsConnector};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// ChainView live simulation client
#[derive(Parser, Debug)]
#[command(name = "chainview")]
#[command(about = "Run and follow a live supply-chain simulation", long_about = None)]
struct Args {
    /// Streaming endpoint (overrides CHAINVIEW_WEBSOCKET_URL)
    #[arg(short, long)]
    url: Option<String>,

    /// Weeks to simulate; invalid values fall back to 50
    #[arg(short, long, default_value = "50")]
    weeks: String,

    /// Roles driven by the AI policy (comma separated)
    #[arg(long, value_delimiter = ',')]
    ai: Vec<Role>,

    /// Inject the default demand spike once this week has been received
    #[arg(long)]
    disrupt_at_week: Option<i64>,

    /// Frames from a superseded run: tolerant or strict
    #[arg(long, default_value = "tolerant")]
    stale_policy: StalePolicy,

    /// Consecutive failed connections before giving up (0 = never)
    #[arg(long, default_value = "10")]
    max_reconnects: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let config = match &args.url {
        Some(url) => ClientConfig::new(url.as_str())?,
        None => ClientConfig::from_env()?,
    };
    let max_attempts = (args.max_reconnects > 0).then_some(args.max_reconnects);
    let config = config
        .with_reconnect(ReconnectPolicy::default().with_max_attempts(max_attempts))
        .with_stale_policy(args.stale_policy);

    let mut agents = AgentConfig::default();
    for role in &args.ai {
        agents.set(*role, AgentMode::Ai);
    }
    let weeks = parse_weeks(&args.weeks);

    info!("ChainView client v{}", env!("CARGO_PKG_VERSION"));
    info!(url = %config.websocket_url, weeks, "connecting");

    let requests = HttpRequestChannel::new(config.request_timeout)?;
    let handle = spawn_session(
        TokioContext::shared(),
        Arc::new(WsConnector::new(config.handshake_timeout)),
        Arc::new(requests),
        &config,
    );

    let outcome = tokio::select! {
        result = follow_run(&handle, agents, weeks, args.disrupt_at_week) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            Ok(())
        }
    };

    let _ = handle.shutdown().await;
    outcome
}

/// What to do after observing a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Wait,
    Start,
    Restart,
    Finished,
}

/// Tracks the one run this client drives.
///
/// The remote ends a run when its connection drops, so a run that loses its
/// connection before the summary is started again on the next one.
#[derive(Debug, Default)]
struct RunTracker {
    started: bool,
    interrupted: bool,
}

impl RunTracker {
    fn observe(&mut self, view: &SessionView) -> Step {
        if self.started {
            if view.state.summary().is_some() {
                return Step::Finished;
            }
            if view.status != ConnectionStatus::Open {
                self.started = false;
                self.interrupted = true;
            }
            return Step::Wait;
        }

        if view.status != ConnectionStatus::Open {
            return Step::Wait;
        }
        self.started = true;
        if std::mem::take(&mut self.interrupted) {
            Step::Restart
        } else {
            Step::Start
        }
    }
}

/// Starts one run once connected and logs it until the summary arrives.
async fn follow_run(handle: &SessionHandle, agents: AgentConfig, weeks: u32, disrupt_at_week: Option<i64>) -> Result<()> {
    let mut updates = handle.subscribe(256).await?;

    let mut run = RunTracker::default();
    let mut disrupted = false;
    let mut seen_ticks = 0;
    let mut seen_events = 0;
    let mut last_status = ConnectionStatus::Uninstantiated;
    let mut view = next_view(&mut updates).await?;

    loop {
        if view.stats.gave_up {
            bail!("gave up after repeated connection failures");
        }

        if view.status != last_status {
            info!(status = view.connection_status_text(), "connection");
            last_status = view.status;
        }

        let step = run.observe(&view);
        match step {
            Step::Start => handle.start(agents.clone(), i64::from(weeks)).await?,
            Step::Restart => {
                warn!("run interrupted by a lost connection, starting again");
                disrupted = false;
                handle.start(agents.clone(), i64::from(weeks)).await?;
            }
            Step::Finished | Step::Wait => {}
        }

        let history = view.state.tick_history();
        // A restart clears the history
        if history.len() < seen_ticks {
            seen_ticks = 0;
            seen_events = 0;
        }
        for tick in &history[seen_ticks..] {
            let retailer = tick.agents.get(Role::Retailer);
            info!(
                week = tick.week,
                retailer_inventory = retailer.inventory,
                retailer_backlog = retailer.backlog,
                "week received"
            );
        }
        seen_ticks = history.len();

        let events = view.state.event_log();
        for event in &events[seen_events.min(events.len())..] {
            info!(week = event.week, severity = ?event.severity, "{}", event.text);
        }
        seen_events = events.len();

        if let Some(at) = disrupt_at_week {
            let reached = view.latest_tick().map_or(false, |tick| tick.week >= at);
            if !disrupted && reached && view.is_running() {
                disrupted = true;
                match handle.disrupt(Disruption::default_demand_spike()).await? {
                    DisruptOutcome::Delivered { session_id, .. } => info!(session = %session_id, "disruption injected"),
                    DisruptOutcome::Failed { reason, .. } => warn!(%reason, "disruption failed"),
                    DisruptOutcome::Skipped => warn!("disruption skipped, no session"),
                }
            }
        }

        if step == Step::Finished {
            report(&view);
            return Ok(());
        }

        view = next_view(&mut updates).await?;
    }
}

async fn next_view(updates: &mut mpsc::Receiver<SessionView>) -> Result<SessionView> {
    match updates.recv().await {
        Some(view) => Ok(view),
        None => {
            error!("session stopped unexpectedly");
            bail!("session actor stopped")
        }
    }
}

fn report(view: &SessionView) {
    let Some(summary) = view.state.summary() else {
        return;
    };

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("{}", summary.title);
    info!("{}", summary.summary_text);
    for (role, cost) in view.total_cost_by_role() {
        info!(role = %role, cost, "total cost");
    }
    for kpi in view.kpis() {
        info!(role = %kpi.role, inventory = kpi.inventory, backlog = kpi.backlog, "final position");
    }
    for (severity, count) in view.events_by_severity() {
        info!(severity = ?severity, count, "events");
    }
    if !view.state.anomalies().is_empty() {
        warn!(count = view.state.anomalies().len(), "week sequence anomalies observed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainview_core::{classify, SessionState};

    fn view(status: ConnectionStatus, finished: bool) -> SessionView {
        let mut state = SessionState::new();
        if finished {
            let summary = classify(
                r#"{"type":"final_summary","title":"Simulation Complete","summary_text":"done"}"#,
            )
            .unwrap();
            let _ = state.apply(summary);
        }
        SessionView {
            state,
            status,
            stats: Default::default(),
        }
    }

    #[test]
    fn test_starts_once_when_open() {
        let mut run = RunTracker::default();
        assert_eq!(run.observe(&view(ConnectionStatus::Connecting, false)), Step::Wait);
        assert_eq!(run.observe(&view(ConnectionStatus::Open, false)), Step::Start);
        assert_eq!(run.observe(&view(ConnectionStatus::Open, false)), Step::Wait);
        assert_eq!(run.observe(&view(ConnectionStatus::Open, true)), Step::Finished);
    }

    #[test]
    fn test_restarts_after_mid_run_disconnect() {
        let mut run = RunTracker::default();
        assert_eq!(run.observe(&view(ConnectionStatus::Open, false)), Step::Start);
        assert_eq!(run.observe(&view(ConnectionStatus::Closed, false)), Step::Wait);
        assert_eq!(run.observe(&view(ConnectionStatus::Connecting, false)), Step::Wait);
        assert_eq!(run.observe(&view(ConnectionStatus::Open, false)), Step::Restart);
        assert_eq!(run.observe(&view(ConnectionStatus::Open, false)), Step::Wait);
    }

    #[test]
    fn test_summary_before_start_is_ignored() {
        // A summary left over from another client's run does not end ours.
        let mut run = RunTracker::default();
        assert_eq!(run.observe(&view(ConnectionStatus::Connecting, true)), Step::Wait);
        assert_eq!(run.observe(&view(ConnectionStatus::Open, false)), Step::Start);
    }
}
