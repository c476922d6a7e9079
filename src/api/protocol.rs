#![forbid(unsafe_code)]

// Control API protocol - request/response bodies for the HTTP boundary

use crate::session::SessionStatus;
use crate::swarm::ClientState;
use serde::{Deserialize, Serialize};

/// Numeric field that tolerates both JSON integers and decimal strings.
/// The original chat-bot caller forwards command tokens as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Int(i64),
    Str(String),
}

impl NumberOrString {
    /// Parses to a signed integer; malformed strings become a validation
    /// error, not a deserialization failure.
    pub fn as_i64(&self) -> Result<i64, String> {
        match self {
            NumberOrString::Int(v) => Ok(*v),
            NumberOrString::Str(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("expected an integer, got {s:?}")),
        }
    }
}

impl Default for NumberOrString {
    fn default() -> Self {
        NumberOrString::Int(0)
    }
}

impl From<i64> for NumberOrString {
    fn from(v: i64) -> Self {
        NumberOrString::Int(v)
    }
}

fn default_delay_min() -> NumberOrString {
    NumberOrString::Int(4000)
}

fn default_delay_max() -> NumberOrString {
    NumberOrString::Int(5000)
}

fn default_prefix() -> String {
    "ys_".to_string()
}

fn default_plugin() -> String {
    "1.21.1.jar".to_string()
}

/// Body of `POST /api/start_test`. Optional fields carry the defaults the
/// original caller supplies.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    /// Target server as `host:port`
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub count: NumberOrString,
    #[serde(default = "default_delay_min")]
    pub delay_min: NumberOrString,
    #[serde(default = "default_delay_max")]
    pub delay_max: NumberOrString,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Client plugin/version identifier
    #[serde(default = "default_plugin")]
    pub plugin: String,
}

/// Successful `POST /api/start_test` body
#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub success: bool,
    pub message: String,
    pub session_id: String,
    pub scheduled: u64,
}

/// Successful `POST /api/stop_test` body with final counts
#[derive(Debug, Clone, Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
    pub connected: u64,
    pub disconnected: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub force_terminated: u64,
}

/// Non-2xx error body. Every failure is structured, never a raw crash
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub message: String,
}

/// `GET /api/status` body, a non-mutating snapshot of the controller
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
}

/// Snapshot of the active session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub server: String,
    pub count: u64,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    pub prefix: String,
    pub plugin: String,
    pub started_unix: u64,
    pub uptime_secs: u64,
    pub clients: ClientCounts,
}

/// Per-state client counts for a status snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientCounts {
    pub pending: u64,
    pub connecting: u64,
    pub connected: u64,
    pub disconnected: u64,
    pub errored: u64,
}

impl ClientCounts {
    pub fn record(&mut self, state: ClientState) {
        match state {
            ClientState::Pending => self.pending += 1,
            ClientState::Connecting => self.connecting += 1,
            ClientState::Connected => self.connected += 1,
            ClientState::Disconnected => self.disconnected += 1,
            ClientState::Errored => self.errored += 1,
        }
    }
}
