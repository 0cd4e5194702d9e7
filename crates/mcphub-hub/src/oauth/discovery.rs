//! OAuth authorization-server discovery
//!
//! Fetches RFC 8414 / OIDC metadata for the authorization server
//! guarding a remote MCP endpoint. The issuer is derived from the
//! server URL's origin; both well-known locations are probed.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

/// Authorization-server metadata (RFC 8414 subset the hub needs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,

    /// Dynamic client registration endpoint (RFC 7591), if offered.
    #[serde(default)]
    pub registration_endpoint: Option<String>,

    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

impl AuthServerMetadata {
    pub fn supports_pkce(&self) -> bool {
        self.code_challenge_methods_supported
            .contains(&"S256".to_string())
    }

    /// Scopes to request: whatever the server advertises, or none.
    pub fn default_scopes(&self) -> Vec<String> {
        self.scopes_supported.clone()
    }
}

/// Derive the issuer origin from a remote MCP server URL.
pub fn issuer_from_server_url(server_url: &str) -> anyhow::Result<String> {
    let url = Url::parse(server_url)?;
    let origin = url.origin();
    if !matches!(origin, url::Origin::Tuple(..)) {
        anyhow::bail!("server URL '{}' has no usable origin", server_url);
    }
    Ok(origin.ascii_serialization())
}

/// Probe the well-known endpoints of an issuer.
pub async fn discover(
    http: &reqwest::Client,
    issuer: &str,
) -> anyhow::Result<AuthServerMetadata> {
    let base = issuer.trim_end_matches('/');

    let oauth_url = format!("{}/.well-known/oauth-authorization-server", base);
    debug!(url = %oauth_url, "Probing OAuth AS metadata");
    match fetch_metadata(http, &oauth_url).await {
        Ok(metadata) => {
            info!(issuer = %issuer, "OAuth AS metadata discovered");
            return Ok(metadata);
        }
        Err(e) => {
            debug!(error = %e, "OAuth AS metadata unavailable, trying OIDC discovery");
        }
    }

    let oidc_url = format!("{}/.well-known/openid-configuration", base);
    debug!(url = %oidc_url, "Probing OIDC metadata");
    match fetch_metadata(http, &oidc_url).await {
        Ok(metadata) => {
            info!(issuer = %issuer, "OIDC metadata discovered");
            Ok(metadata)
        }
        Err(e) => anyhow::bail!(
            "OAuth discovery failed for {}: no metadata at either well-known endpoint: {}",
            issuer,
            e
        ),
    }
}

async fn fetch_metadata(
    http: &reqwest::Client,
    url: &str,
) -> anyhow::Result<AuthServerMetadata> {
    let response = http
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("discovery request failed: HTTP {}", response.status());
    }

    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuer_is_the_origin() {
        assert_eq!(
            issuer_from_server_url("https://notes.example/api/mcp?x=1").unwrap(),
            "https://notes.example"
        );
        assert_eq!(
            issuer_from_server_url("https://notes.example:8443/mcp").unwrap(),
            "https://notes.example:8443"
        );
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(issuer_from_server_url("not a url").is_err());
    }

    #[test]
    fn metadata_deserializes_with_defaults() {
        let json = r#"{
            "issuer": "https://auth.example",
            "authorization_endpoint": "https://auth.example/authorize",
            "token_endpoint": "https://auth.example/token"
        }"#;
        let metadata: AuthServerMetadata = serde_json::from_str(json).unwrap();
        assert!(metadata.registration_endpoint.is_none());
        assert!(!metadata.supports_pkce());
        assert!(metadata.default_scopes().is_empty());
    }

    #[test]
    fn metadata_reports_pkce_support() {
        let json = r#"{
            "issuer": "https://auth.example",
            "authorization_endpoint": "https://auth.example/authorize",
            "token_endpoint": "https://auth.example/token",
            "registration_endpoint": "https://auth.example/register",
            "code_challenge_methods_supported": ["S256"],
            "scopes_supported": ["mcp.read", "mcp.write"]
        }"#;
        let metadata: AuthServerMetadata = serde_json::from_str(json).unwrap();
        assert!(metadata.supports_pkce());
        assert_eq!(metadata.default_scopes(), vec!["mcp.read", "mcp.write"]);
    }
}
