//! MCP Hub runtime
//!
//! Supervises a fleet of MCP servers for editor/agent clients: stdio
//! child processes and remote Streamable-HTTP/SSE endpoints, with
//! OAuth (PKCE) negotiation, capability discovery and dispatch,
//! configuration hot-reload, and a fan-out event bus.
//!
//! The entry point is [`McpHub`]: build it over a
//! [`mcphub_core::ConfigStore`], call [`McpHub::initialize`], and
//! subscribe clients via [`McpHub::subscribe`].

pub mod client;
pub mod hub;
pub mod marketplace;
pub mod oauth;
pub mod shutdown;
pub mod supervisor;
pub mod transport;

pub use client::{HubClientHandler, McpClient};
pub use hub::{HubOptions, HubSubscription, McpHub};
pub use marketplace::{Marketplace, StaticMarketplace};
pub use oauth::{OAuthProvider, OAuthStore};
pub use shutdown::{ClientRegistry, ShutdownReason};
pub use supervisor::{Capabilities, ServerInfo, ServerSupervisor, SupervisorContext};
pub use transport::{ConnectOutcome, RemoteTransport, StdioTransport, DEFAULT_CONNECT_TIMEOUT};

pub use mcphub_core as core;
