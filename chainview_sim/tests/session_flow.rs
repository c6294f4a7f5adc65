//! End-to-end session flows over the simulated transport.

use chainview_core::commands::AgentConfig;
use chainview_core::{
    spawn_session, AgentMode, ClientConfig, ConnectionStatus, DisruptOutcome, Disruption, ReconnectPolicy, Role,
    SessionHandle, SessionView,
};
use chainview_sim::{Oracle, RecordingRequestChannel, ServerLink, SimContext, SimListener, SimNetwork, SIM_WEBSOCKET_URL};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn session(requests: Arc<RecordingRequestChannel>) -> (SessionHandle, SimListener) {
    let (connector, listener) = SimNetwork::reliable();
    let config = ClientConfig::new(SIM_WEBSOCKET_URL).unwrap();
    let handle = spawn_session(SimContext::shared(11), connector, requests, &config);
    (handle, listener)
}

async fn accept(listener: &mut SimListener) -> ServerLink {
    tokio::time::timeout(WAIT, listener.accept()).await.unwrap().unwrap()
}

async fn wait(handle: &SessionHandle, predicate: impl Fn(&SessionView) -> bool) -> SessionView {
    tokio::time::timeout(WAIT, handle.wait_until(predicate))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_ten_week_run_with_ai_retailer() {
    let (handle, mut listener) = session(Arc::new(RecordingRequestChannel::new())).await;
    let mut link = accept(&mut listener).await;

    let config = AgentConfig::default().with(Role::Retailer, AgentMode::Ai);
    handle.start(config.clone(), 10).await.unwrap();

    let start: serde_json::Value = serde_json::from_str(&link.recv().await.unwrap()).unwrap();
    assert_eq!(
        start,
        serde_json::json!({
            "type": "start_simulation",
            "config": { "Retailer": "AI", "Wholesaler": "RULE", "Distributor": "RULE" },
            "weeks": 10
        })
    );

    let mut oracle = Oracle::new(11, "abc", config);
    link.send(oracle.session_frame());
    let view = wait(&handle, |v| v.state.session_id().is_some()).await;
    assert!(view.is_running());
    assert_eq!(view.connection_status_text(), "Live Simulation Running");

    for _ in 0..3 {
        link.send(oracle.step_frame().unwrap());
    }
    let view = wait(&handle, |v| v.state.tick_history().len() == 3).await;
    assert_eq!(view.latest_tick().map(|t| t.week), Some(3));

    link.send(oracle.summary_frame().unwrap());
    let view = wait(&handle, |v| v.state.summary().is_some()).await;
    assert!(!view.is_running());
    assert_eq!(view.state.tick_history().len(), 3);
}

#[tokio::test]
async fn test_summary_without_ticks() {
    let (handle, mut listener) = session(Arc::new(RecordingRequestChannel::new())).await;
    let link = accept(&mut listener).await;

    let oracle = Oracle::new(2, "empty", AgentConfig::default());
    link.send(oracle.session_frame());
    link.send(oracle.summary_frame().unwrap());

    let view = wait(&handle, |v| v.state.summary().is_some()).await;
    assert!(!view.is_running());
    assert!(view.state.tick_history().is_empty());
    assert!(view.kpis().is_empty());
}

#[tokio::test]
async fn test_failed_disruption_leaves_stream_state_alone() {
    let requests = Arc::new(RecordingRequestChannel::with_status(503));
    let (handle, mut listener) = session(Arc::clone(&requests)).await;
    let link = accept(&mut listener).await;

    let mut oracle = Oracle::new(4, "busy", AgentConfig::default());
    link.send(oracle.session_frame());
    link.send(oracle.step_frame().unwrap());
    let before = wait(&handle, |v| v.state.tick_history().len() == 1).await;

    let outcome = handle.disrupt(Disruption::default_demand_spike()).await.unwrap();
    assert!(matches!(outcome, DisruptOutcome::Failed { .. }));
    assert_eq!(requests.requests().len(), 1);

    let after = handle.snapshot().await.unwrap();
    assert_eq!(after.state, before.state);
    assert_eq!(after.status, ConnectionStatus::Open);
}

#[tokio::test]
async fn test_shutdown_closes_link() {
    let (handle, mut listener) = session(Arc::new(RecordingRequestChannel::new())).await;
    let mut link = accept(&mut listener).await;
    wait(&handle, |v| v.status == ConnectionStatus::Open).await;

    handle.shutdown().await.unwrap();
    assert!(tokio::time::timeout(WAIT, link.recv()).await.unwrap().is_none());
    assert!(handle.snapshot().await.is_err());
}

#[tokio::test]
async fn test_dropped_links_do_not_trip_breaker() {
    let (connector, mut listener) = SimNetwork::reliable();
    let config = ClientConfig::new(SIM_WEBSOCKET_URL)
        .unwrap()
        .with_reconnect(ReconnectPolicy::default().with_max_attempts(Some(3)));
    let handle = spawn_session(
        SimContext::shared(5),
        Arc::clone(&connector),
        Arc::new(RecordingRequestChannel::new()),
        &config,
    );

    // Every handshake succeeds and the peer hangs up straight away.
    for _ in 0..6 {
        drop(accept(&mut listener).await);
    }
    let _link = accept(&mut listener).await;

    let view = wait(&handle, |v| v.stats.reconnects == 6 && v.status == ConnectionStatus::Open).await;
    assert!(!view.stats.gave_up);
    assert_eq!(connector.accepted(), 7);
    assert_eq!(connector.attempts(), 7);
}

#[tokio::test]
async fn test_failed_send_is_replayed_once_on_next_link() {
    let (handle, mut listener) = session(Arc::new(RecordingRequestChannel::new())).await;
    let mut first = accept(&mut listener).await;
    wait(&handle, |v| v.status == ConnectionStatus::Open).await;

    first.stop_reading();
    handle.start(AgentConfig::default(), 5).await.unwrap();
    handle.start(AgentConfig::default(), 6).await.unwrap();

    let mut second = accept(&mut listener).await;
    let weeks: Vec<u64> = [
        tokio::time::timeout(WAIT, second.recv()).await.unwrap().unwrap(),
        tokio::time::timeout(WAIT, second.recv()).await.unwrap().unwrap(),
    ]
    .iter()
    .map(|frame| serde_json::from_str::<serde_json::Value>(frame).unwrap()["weeks"].as_u64().unwrap())
    .collect();
    assert_eq!(weeks, vec![5, 6]);

    // Nothing else is queued behind them.
    assert!(tokio::time::timeout(Duration::from_millis(200), second.recv()).await.is_err());
    assert!(first.recv().await.is_none());
}
