//! Command sender - outbound intents and their wire encoding.
//!
//! Two intents exist: starting a run (sent over the stream) and injecting a
//! disruption into a running session (sent over the companion request
//! channel, addressed by session id).

use crate::error::SyncError;
use crate::model::{AgentMode, Role, SessionId};
use chainview_env::Frame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Week count used when the requested value is unusable.
pub const DEFAULT_WEEKS: u32 = 50;

/// Path suffix of the streaming endpoint, stripped to obtain the request base.
pub const STREAM_PATH_SUFFIX: &str = "/ws/simulation";

/// Role → decision mode mapping sent with a start request.
///
/// Roles left out are run by the remote's default (rule-based) policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentConfig(BTreeMap<Role, AgentMode>);

impl AgentConfig {
    /// An empty mapping.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Sets the mode for one role.
    pub fn with(mut self, role: Role, mode: AgentMode) -> Self {
        self.0.insert(role, mode);
        self
    }

    pub fn set(&mut self, role: Role, mode: AgentMode) {
        self.0.insert(role, mode);
    }

    pub fn get(&self, role: Role) -> Option<AgentMode> {
        self.0.get(&role).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, AgentMode)> + '_ {
        self.0.iter().map(|(role, mode)| (*role, *mode))
    }
}

impl Default for AgentConfig {
    /// Retailer, Wholesaler and Distributor on the rule-based policy.
    fn default() -> Self {
        Self::empty()
            .with(Role::Retailer, AgentMode::Rule)
            .with(Role::Wholesaler, AgentMode::Rule)
            .with(Role::Distributor, AgentMode::Rule)
    }
}

/// Clamps a requested week count; non-positive or oversized values fall
/// back to [`DEFAULT_WEEKS`].
pub fn clamp_weeks(requested: i64) -> u32 {
    match u32::try_from(requested) {
        Ok(weeks) if weeks > 0 => weeks,
        _ => DEFAULT_WEEKS,
    }
}

/// Parses user input for a week count, clamping anything unusable.
pub fn parse_weeks(input: &str) -> u32 {
    input.trim().parse::<i64>().map(clamp_weeks).unwrap_or(DEFAULT_WEEKS)
}

/// A request to start a new remote run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub config: AgentConfig,
    pub weeks: u32,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundMessage<'a> {
    StartSimulation { config: &'a AgentConfig, weeks: u32 },
}

impl StartRequest {
    /// Creates a start request, clamping the week count.
    pub fn new(config: AgentConfig, weeks: i64) -> Self {
        Self {
            config,
            weeks: clamp_weeks(weeks),
        }
    }

    /// Encodes the request as a stream frame.
    pub fn to_frame(&self) -> Result<Frame, SyncError> {
        let message = OutboundMessage::StartSimulation {
            config: &self.config,
            weeks: self.weeks,
        };
        Ok(serde_json::to_string(&message)?)
    }
}

/// A perturbation injected into a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disruption {
    /// Customer demand replaced by `value` for `duration` weeks
    DemandSpike { value: u32, duration: u32 },
}

impl Disruption {
    /// The demand spike offered by the control panel.
    pub fn default_demand_spike() -> Self {
        Disruption::DemandSpike { value: 80, duration: 3 }
    }

    /// Encodes the request body.
    pub fn to_body(&self) -> Result<serde_json::Value, SyncError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// What happened to a disruption request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisruptOutcome {
    /// No session id was known; nothing was sent
    Skipped,
    Delivered { session_id: SessionId, status: u16 },
    Failed { session_id: SessionId, reason: String },
}

/// Derives the companion request base from the streaming URL.
///
/// `ws://host/ws/simulation` → `http://host`, `wss://…` → `https://…`.
/// Query and fragment are dropped; any path before the suffix is kept.
pub fn derive_base_url(stream_url: &Url) -> String {
    let scheme = match stream_url.scheme() {
        "wss" | "https" => "https",
        _ => "http",
    };

    let mut base = stream_url.clone();
    // ws, wss, http and https are all special schemes; swapping between them
    // always succeeds.
    let _ = base.set_scheme(scheme);

    let path = base.path().trim_end_matches('/');
    let path = path.strip_suffix(STREAM_PATH_SUFFIX).unwrap_or(path).to_string();
    base.set_path(&path);
    base.set_query(None);
    base.set_fragment(None);

    base.as_str().trim_end_matches('/').to_string()
}

/// URL of the disruption endpoint for one session.
pub fn disrupt_url(base_url: &str, session_id: &SessionId) -> String {
    format!("{base_url}/simulation/{session_id}/disrupt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_frame_shape() {
        let config = AgentConfig::empty()
            .with(Role::Retailer, AgentMode::Ai)
            .with(Role::Wholesaler, AgentMode::Rule)
            .with(Role::Distributor, AgentMode::Rule);
        let frame = StartRequest::new(config, 10).to_frame().unwrap();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "start_simulation",
                "config": { "Retailer": "AI", "Wholesaler": "RULE", "Distributor": "RULE" },
                "weeks": 10
            })
        );
    }

    #[test]
    fn test_weeks_are_clamped() {
        assert_eq!(StartRequest::new(AgentConfig::default(), 0).weeks, DEFAULT_WEEKS);
        assert_eq!(StartRequest::new(AgentConfig::default(), -4).weeks, DEFAULT_WEEKS);
        assert_eq!(StartRequest::new(AgentConfig::default(), i64::MAX).weeks, DEFAULT_WEEKS);
        assert_eq!(StartRequest::new(AgentConfig::default(), 12).weeks, 12);
        assert_eq!(parse_weeks("abc"), DEFAULT_WEEKS);
        assert_eq!(parse_weeks(" 30 "), 30);
        assert_eq!(parse_weeks(""), DEFAULT_WEEKS);
    }

    #[test]
    fn test_disruption_body() {
        let body = Disruption::default_demand_spike().to_body().unwrap();
        assert_eq!(body, json!({ "type": "DEMAND_SPIKE", "value": 80, "duration": 3 }));
    }

    fn base(stream_url: &str) -> String {
        derive_base_url(&Url::parse(stream_url).unwrap())
    }

    #[test]
    fn test_derive_base_url() {
        assert_eq!(base("ws://127.0.0.1:8000/ws/simulation"), "http://127.0.0.1:8000");
        assert_eq!(base("wss://host/ws/simulation"), "https://host");
        assert_eq!(base("wss://host/ws/simulation/"), "https://host");
        assert_eq!(base("ws://host:9000"), "http://host:9000");
    }

    #[test]
    fn test_derive_base_url_keeps_prefix_drops_query() {
        assert_eq!(base("wss://host/api/ws/simulation?token=x#live"), "https://host/api");
        assert_eq!(base("ws://[::1]:8001/ws/simulation"), "http://[::1]:8001");
        assert_eq!(base("wss://host:443/ws/simulation"), "https://host");
    }

    #[test]
    fn test_disrupt_url() {
        let url = disrupt_url("http://127.0.0.1:8001", &SessionId::new("abc"));
        assert_eq!(url, "http://127.0.0.1:8001/simulation/abc/disrupt");
    }
}
