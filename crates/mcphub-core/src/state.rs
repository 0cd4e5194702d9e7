//! Connection and hub state enums
//!
//! Unified state enums shared by supervisors, the hub core, and event
//! payloads. Values serialize in snake_case for clients.

use serde::{Deserialize, Serialize};

/// Per-server connection state, driven by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Configuration disables the server; no transport.
    Disabled,
    /// No transport; may hold the last failure message.
    #[default]
    Disconnected,
    /// Transport being created / capabilities being fetched.
    Connecting,
    /// Remote replied 401; an authorization URL is available.
    Unauthorized,
    /// Transport open and capabilities loaded.
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Unauthorized => "unauthorized",
            Self::Connected => "connected",
        }
    }

    /// States that carry a `start_time`.
    pub fn tracks_uptime(&self) -> bool {
        matches!(self, Self::Connected | Self::Disabled)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide phase label, single-writer (the hub core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Starting,
    Ready,
    Restarting,
    Restarted,
    Stopping,
    Stopped,
    Error,
}

impl HubState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Restarting => "restarting",
            Self::Restarted => "restarted",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for HubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
