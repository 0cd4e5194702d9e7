//! Remote transports: Streamable HTTP and SSE fallback
//!
//! Both flavors ride on a `reqwest` client carrying the resolved
//! headers plus a bearer token when the OAuth provider has one. A
//! 401-class failure surfaces as `Unauthorized` so the supervisor can
//! run the authorization flow; only other errors are eligible for the
//! SSE fallback (the SDK's SSE client auto-reconnects on its own).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{SseClientTransport, StreamableHttpClientTransport};
use rmcp::ServiceExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use mcphub_core::{ResolvedServerConfig, SupervisorEvent};

use super::{requires_authorization, ConnectOutcome};
use crate::client::HubClientHandler;
use crate::oauth::OAuthProvider;

/// One remote server, connectable over either remote flavor.
pub struct RemoteTransport {
    server: String,
    url: String,
    headers: BTreeMap<String, String>,
    provider: Arc<OAuthProvider>,
    connect_timeout: Duration,
    event_tx: broadcast::Sender<SupervisorEvent>,
}

impl RemoteTransport {
    pub fn new(
        config: &ResolvedServerConfig,
        provider: Arc<OAuthProvider>,
        connect_timeout: Duration,
        event_tx: broadcast::Sender<SupervisorEvent>,
    ) -> Self {
        Self {
            server: config.name.clone(),
            url: config.url.clone().unwrap_or_default(),
            headers: config.headers.clone(),
            provider,
            connect_timeout,
            event_tx,
        }
    }

    /// Build the HTTP client with resolved headers and, when stored
    /// tokens exist, a bearer Authorization header.
    async fn build_http_client(&self) -> Result<reqwest::Client, String> {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| format!("invalid header name '{}': {}", name, e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| format!("invalid header value for '{}': {}", name, e))?;
            headers.insert(name, value);
        }

        // A configured Authorization header wins over stored tokens.
        if !headers.contains_key(AUTHORIZATION) {
            match self.provider.access_token().await {
                Ok(Some(token)) => {
                    let value = HeaderValue::from_str(&format!("Bearer {}", token))
                        .map_err(|e| format!("stored token is not a valid header: {}", e))?;
                    headers.insert(AUTHORIZATION, value);
                    debug!(server = %self.server, "Using stored OAuth token");
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(server = %self.server, error = %e, "Token lookup failed, connecting bare");
                }
            }
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))
    }

    /// Map a failed handshake onto the connect outcome.
    fn classify_error(&self, flavor: &str, err: String) -> ConnectOutcome {
        if requires_authorization(&err) {
            info!(server = %self.server, "Server requires authorization");
            ConnectOutcome::Unauthorized
        } else {
            error!(server = %self.server, "{} connection failed: {}", flavor, err);
            ConnectOutcome::Failed(format!("{} connection failed: {}", flavor, err))
        }
    }

    fn timeout_outcome(&self) -> ConnectOutcome {
        let err = format!("Connection timeout ({:?})", self.connect_timeout);
        error!(server = %self.server, "{}", err);
        ConnectOutcome::Failed(err)
    }

    /// Primary remote flavor: one long-lived Streamable-HTTP session.
    pub async fn connect_streamable(&self) -> ConnectOutcome {
        info!(server = %self.server, url = %self.url, "Connecting via Streamable HTTP");

        if let Err(e) = url::Url::parse(&self.url) {
            return ConnectOutcome::Failed(format!("Invalid URL: {}", e));
        }

        let client = match self.build_http_client().await {
            Ok(client) => client,
            Err(e) => return ConnectOutcome::Failed(e),
        };

        let config = StreamableHttpClientTransportConfig::with_uri(self.url.as_str());
        let transport = StreamableHttpClientTransport::with_client(client, config);

        let handler = HubClientHandler::new(&self.server, self.event_tx.clone());
        match tokio::time::timeout(self.connect_timeout, handler.serve(transport)).await {
            Ok(Ok(client)) => {
                info!(server = %self.server, "Remote server connected via Streamable HTTP");
                ConnectOutcome::Connected(client)
            }
            Ok(Err(e)) => self.classify_error("Streamable HTTP", format!("{:#}", e)),
            Err(_) => self.timeout_outcome(),
        }
    }

    /// Fallback flavor: auto-reconnecting event source.
    pub async fn connect_sse(&self) -> ConnectOutcome {
        info!(server = %self.server, url = %self.url, "Connecting via SSE fallback");

        let client = match self.build_http_client().await {
            Ok(client) => client,
            Err(e) => return ConnectOutcome::Failed(e),
        };

        let config = SseClientConfig {
            sse_endpoint: self.url.clone().into(),
            ..Default::default()
        };

        let transport = match SseClientTransport::start_with_client(client, config).await {
            Ok(transport) => transport,
            Err(e) => return self.classify_error("SSE", format!("{:#}", e)),
        };

        let handler = HubClientHandler::new(&self.server, self.event_tx.clone());
        match tokio::time::timeout(self.connect_timeout, handler.serve(transport)).await {
            Ok(Ok(client)) => {
                info!(server = %self.server, "Remote server connected via SSE");
                ConnectOutcome::Connected(client)
            }
            Ok(Err(e)) => self.classify_error("SSE", format!("{:#}", e)),
            Err(_) => self.timeout_outcome(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(url: &str, headers: &[(&str, &str)]) -> RemoteTransport {
        let tmp = std::env::temp_dir();
        let config = ResolvedServerConfig {
            name: "remote".into(),
            command: None,
            args: vec![],
            env: BTreeMap::new(),
            url: Some(url.into()),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            disabled: false,
            dev: None,
            description: None,
        };
        let provider = Arc::new(OAuthProvider::new(
            "remote",
            url,
            "http://127.0.0.1:37650",
            &tmp,
        ));
        let (tx, _rx) = broadcast::channel(8);
        RemoteTransport::new(&config, provider, Duration::from_secs(5), tx)
    }

    #[tokio::test]
    async fn invalid_url_fails_before_any_request() {
        let transport = remote("not a url", &[]);
        match transport.connect_streamable().await {
            ConnectOutcome::Failed(err) => assert!(err.contains("Invalid URL")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_header_name_is_rejected() {
        let transport = remote("https://example.invalid/mcp", &[("bad header", "v")]);
        match transport.connect_streamable().await {
            ConnectOutcome::Failed(err) => assert!(err.contains("invalid header name")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn classify_separates_auth_from_failure() {
        let transport = remote("https://example.invalid/mcp", &[]);
        assert!(matches!(
            transport.classify_error("SSE", "401 Unauthorized".into()),
            ConnectOutcome::Unauthorized
        ));
        assert!(matches!(
            transport.classify_error("SSE", "connection reset".into()),
            ConnectOutcome::Failed(_)
        ));
    }
}
