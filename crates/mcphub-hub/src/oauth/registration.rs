//! Dynamic client registration (RFC 7591), outbound
//!
//! Registers the hub as a public client against a remote server's
//! advertised registration endpoint. The resulting client id/secret is
//! persisted and reused as long as the redirect URI stays the same.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::discovery::AuthServerMetadata;

/// Registration request body.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl RegistrationRequest {
    /// A public-client registration with PKCE in mind.
    pub fn public_client(client_name: &str, redirect_uri: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
            redirect_uris: vec![redirect_uri.to_string()],
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            scope: None,
        }
    }
}

/// Persisted registration for one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    /// Issuer the registration was made against.
    pub issuer: String,
}

impl ClientRegistration {
    /// A persisted registration is reusable only while the redirect URI
    /// and issuer still match.
    pub fn matches(&self, issuer: &str, redirect_uri: &str) -> bool {
        self.issuer == issuer && self.redirect_uri == redirect_uri
    }
}

/// Registration response fields the hub keeps.
#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

/// Perform dynamic registration against the server's metadata.
pub async fn register(
    http: &reqwest::Client,
    metadata: &AuthServerMetadata,
    client_name: &str,
    redirect_uri: &str,
) -> anyhow::Result<ClientRegistration> {
    let endpoint = metadata
        .registration_endpoint
        .as_deref()
        .ok_or_else(|| {
            anyhow::anyhow!(
                "authorization server '{}' does not offer dynamic registration",
                metadata.issuer
            )
        })?;

    let request = RegistrationRequest::public_client(client_name, redirect_uri);
    debug!(endpoint = %endpoint, client_name = %client_name, "Registering OAuth client");

    let response = http.post(endpoint).json(&request).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("client registration failed: HTTP {} - {}", status, body);
    }

    let registered: RegistrationResponse = response.json().await?;
    info!(
        issuer = %metadata.issuer,
        client_id = %registered.client_id,
        "OAuth client registered"
    );

    Ok(ClientRegistration {
        client_id: registered.client_id,
        client_secret: registered.client_secret,
        redirect_uri: redirect_uri.to_string(),
        issuer: metadata.issuer.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_client_request_shape() {
        let request = RegistrationRequest::public_client("mcp-hub", "http://127.0.0.1:1/cb");
        assert_eq!(request.token_endpoint_auth_method, "none");
        assert_eq!(request.response_types, vec!["code"]);
        assert!(request
            .grant_types
            .contains(&"authorization_code".to_string()));
        assert!(request.grant_types.contains(&"refresh_token".to_string()));
    }

    #[test]
    fn registration_reuse_requires_matching_redirect() {
        let reg = ClientRegistration {
            client_id: "c1".into(),
            client_secret: None,
            redirect_uri: "http://127.0.0.1:7100/callback".into(),
            issuer: "https://auth.example".into(),
        };
        assert!(reg.matches("https://auth.example", "http://127.0.0.1:7100/callback"));
        assert!(!reg.matches("https://auth.example", "http://127.0.0.1:7200/callback"));
        assert!(!reg.matches("https://other.example", "http://127.0.0.1:7100/callback"));
    }

    #[test]
    fn registration_response_tolerates_missing_secret() {
        let parsed: RegistrationResponse =
            serde_json::from_str(r#"{ "client_id": "abc" }"#).unwrap();
        assert_eq!(parsed.client_id, "abc");
        assert!(parsed.client_secret.is_none());
    }
}
