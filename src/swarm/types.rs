#![forbid(unsafe_code)]

// Common types and error handling for the swarm module

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Custom error type for stress-test operations
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("a stress-test session is already active")]
    SessionAlreadyActive,

    #[error("no stress-test session is active")]
    NoActiveSession,

    #[error("spawn scheduler is closed")]
    SchedulerClosed,

    #[error("connection error: {0}")]
    ConnectionError(String),
}

impl SwarmError {
    /// Machine-readable error kind used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SwarmError::InvalidRequest(_) => "invalid_request",
            SwarmError::SessionAlreadyActive => "session_already_active",
            SwarmError::NoActiveSession => "no_active_session",
            SwarmError::SchedulerClosed => "scheduler_closed",
            SwarmError::ConnectionError(_) => "connection_error",
        }
    }
}

/// Result type alias for swarm operations
pub type SwarmResult<T> = Result<T, SwarmError>;

/// Connection state of a single simulated client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// Waiting out its join delay, no connection attempted yet
    Pending,
    /// Dialing the target server
    Connecting,
    /// Connection established and held
    Connected,
    /// Terminal: connection closed (stop, cancellation, or server-side close)
    Disconnected,
    /// Terminal: the connection attempt or an established connection failed
    Errored,
}

impl ClientState {
    /// A terminal client never transitions again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ClientState::Disconnected | ClientState::Errored)
    }
}

/// Point-in-time view of one simulated client
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub name: String,
    pub state: ClientState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Validated parameters for one scheduled swarm
#[derive(Debug, Clone)]
pub struct SpawnPlan {
    /// Target server as `host:port`
    pub server: String,
    pub count: usize,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub prefix: String,
    /// Client plugin/version identifier announced on join
    pub plugin: String,
}
