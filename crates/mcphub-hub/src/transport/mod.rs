//! Transports for MCP connections
//!
//! Three flavors: child-process stdio, Streamable HTTP, and an SSE
//! fallback for remote servers that fail streaming with a
//! non-authorization error. Each connect attempt yields a
//! [`ConnectOutcome`]; a 401-class failure is a distinct outcome, not
//! an error, because it starts the authorization flow instead.

mod http;
mod stdio;

pub use http::RemoteTransport;
pub use stdio::StdioTransport;

use std::time::Duration;

use crate::client::McpClient;

/// Default budget for one connect attempt (handshake included).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one transport connect attempt.
pub enum ConnectOutcome {
    /// Transport open, MCP handshake done.
    Connected(McpClient),
    /// The remote demands authorization (HTTP 401 et al.).
    Unauthorized,
    /// Anything else.
    Failed(String),
}

impl std::fmt::Debug for ConnectOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected(_) => f.write_str("Connected"),
            Self::Unauthorized => f.write_str("Unauthorized"),
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

/// Classify a connect error as an authorization demand.
///
/// The SDK surfaces 401s in several shapes depending on transport and
/// server; match the known indicators rather than a single status
/// code.
pub fn requires_authorization(error: &str) -> bool {
    let error = error.to_lowercase();
    const INDICATORS: &[&str] = &[
        "401",
        "unauthorized",
        "auth required",
        "authrequired",
        "invalid_token",
        "www-authenticate",
        "access token",
        "bearer",
    ];
    INDICATORS.iter().any(|s| error.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_authorization_errors() {
        assert!(requires_authorization("HTTP status client error (401 Unauthorized)"));
        assert!(requires_authorization("server requires Bearer token"));
        assert!(requires_authorization("invalid_token: expired"));
        assert!(!requires_authorization("connection refused"));
        assert!(!requires_authorization("HTTP 500 internal server error"));
    }
}
