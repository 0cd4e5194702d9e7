//! OAuth provider for remote MCP servers
//!
//! One provider per remote connection attempt. It discovers the
//! authorization server behind the MCP endpoint, registers the hub as
//! a public client (once, reused while the redirect URI matches),
//! produces PKCE authorization URLs without opening a browser, and
//! exchanges/refreshes tokens. All persistent state lives in a
//! per-server directory owned by the hub.

mod discovery;
mod pkce;
mod registration;
mod store;
mod token;

pub use discovery::{discover, issuer_from_server_url, AuthServerMetadata};
pub use pkce::PkceAttempt;
pub use registration::{register, ClientRegistration, RegistrationRequest};
pub use store::{default_base_dir, OAuthStore};
pub use token::{request_grant, Grant, StoredTokens};

use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Client name presented during dynamic registration.
const CLIENT_NAME: &str = "MCP Hub";

#[derive(Default)]
struct ProviderState {
    metadata: Option<AuthServerMetadata>,
    registration: Option<ClientRegistration>,
    /// Secrets of the authorization waiting for its callback code.
    pending: Option<PkceAttempt>,
    generated_auth_url: Option<String>,
}

/// Per-server OAuth provider.
pub struct OAuthProvider {
    server: String,
    server_url: String,
    redirect_uri: String,
    http: reqwest::Client,
    store: OAuthStore,
    /// Single writer per server: registration, tokens, pending flow.
    state: Mutex<ProviderState>,
}

impl OAuthProvider {
    /// `redirect_base` is the externally served callback origin, e.g.
    /// `http://127.0.0.1:37650`; the hub's HTTP collaborator routes
    /// `/oauth/callback` back into `handle_auth_callback`.
    pub fn new(server: &str, server_url: &str, redirect_base: &str, base_dir: &Path) -> Self {
        let redirect_uri = format!(
            "{}/oauth/callback?server_name={}",
            redirect_base.trim_end_matches('/'),
            urlencoding::encode(server)
        );
        Self {
            server: server.to_string(),
            server_url: server_url.to_string(),
            redirect_uri,
            http: reqwest::Client::new(),
            store: OAuthStore::new(base_dir, server),
            state: Mutex::new(ProviderState::default()),
        }
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Authorization URL generated by the last `prepare_authorization`.
    pub async fn generated_auth_url(&self) -> Option<String> {
        self.state.lock().await.generated_auth_url.clone()
    }

    /// Current bearer value for outbound requests, refreshing a
    /// retired token once when possible. `None` means no usable token.
    pub async fn access_token(&self) -> Result<Option<String>> {
        let tokens = match self.store.load_tokens().await? {
            Some(tokens) => tokens,
            None => return Ok(None),
        };

        if tokens.is_usable() {
            return Ok(Some(tokens.access_token));
        }

        let Some(refresh) = tokens.refresh_token.clone() else {
            debug!(server = %self.server, "Access token expired with no refresh token");
            return Ok(None);
        };

        let mut state = self.state.lock().await;
        let metadata = self.ensure_metadata(&mut state).await?;
        let registration = self
            .ensure_stored_registration(&mut state)
            .await?
            .context("token refresh requires a client registration")?;

        match token::request_grant(
            &self.http,
            &metadata,
            &registration,
            Grant::Refresh { token: &refresh },
        )
        .await
        {
            Ok(new_tokens) => {
                self.store.save_tokens(&new_tokens).await?;
                info!(server = %self.server, "Access token refreshed");
                Ok(Some(new_tokens.access_token))
            }
            Err(e) => {
                warn!(server = %self.server, error = %e, "Token refresh failed");
                Ok(None)
            }
        }
    }

    /// Discover metadata, ensure a client registration, and produce the
    /// authorization URL for the user to visit. The URL is stored as
    /// `generated_auth_url`; the caller decides whether to surface it.
    pub async fn prepare_authorization(&self) -> Result<String> {
        let mut state = self.state.lock().await;

        let metadata = self.ensure_metadata(&mut state).await?;
        let registration = self.ensure_registration(&mut state, &metadata).await?;

        let attempt = PkceAttempt::new();

        let mut url = Url::parse(&metadata.authorization_endpoint)
            .context("invalid authorization endpoint")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &registration.client_id);
            query.append_pair("redirect_uri", &self.redirect_uri);
            let scopes = metadata.default_scopes();
            if !scopes.is_empty() {
                query.append_pair("scope", &scopes.join(" "));
            }
            query.append_pair("state", attempt.csrf_state());
            query.append_pair("code_challenge", attempt.challenge());
            query.append_pair("code_challenge_method", PkceAttempt::CHALLENGE_METHOD);
        }

        let auth_url = url.to_string();
        debug!(server = %self.server, "Authorization URL generated");

        state.pending = Some(attempt);
        state.generated_auth_url = Some(auth_url.clone());

        Ok(auth_url)
    }

    /// Exchange the callback code for tokens using the stored verifier.
    pub async fn handle_callback(&self, code: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        let pending = state
            .pending
            .take()
            .context("no authorization flow is pending for this server")?;

        let metadata = self.ensure_metadata(&mut state).await?;
        let registration = self
            .ensure_stored_registration(&mut state)
            .await?
            .context("callback received without a client registration")?;

        let tokens = token::request_grant(
            &self.http,
            &metadata,
            &registration,
            Grant::AuthorizationCode {
                code,
                verifier: pending.verifier(),
                redirect_uri: &self.redirect_uri,
            },
        )
        .await?;

        self.store.save_tokens(&tokens).await?;
        state.generated_auth_url = None;
        info!(server = %self.server, "Authorization completed, tokens stored");
        Ok(())
    }

    /// CSRF state of the pending flow, for callback validation by the
    /// HTTP collaborator.
    pub async fn pending_state(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .pending
            .as_ref()
            .map(|attempt| attempt.csrf_state().to_string())
    }

    /// Drop stored tokens (registration is kept for reuse).
    pub async fn clear_tokens(&self) -> Result<()> {
        self.store.clear_tokens().await
    }

    async fn ensure_metadata(
        &self,
        state: &mut ProviderState,
    ) -> Result<AuthServerMetadata> {
        if let Some(metadata) = &state.metadata {
            return Ok(metadata.clone());
        }
        let issuer = issuer_from_server_url(&self.server_url)?;
        let metadata = discover(&self.http, &issuer).await?;
        state.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    /// Load the persisted registration without registering a new one.
    async fn ensure_stored_registration(
        &self,
        state: &mut ProviderState,
    ) -> Result<Option<ClientRegistration>> {
        if state.registration.is_none() {
            state.registration = self.store.load_registration().await?;
        }
        Ok(state.registration.clone())
    }

    /// Load the persisted registration or perform dynamic registration.
    /// A stale registration (different issuer or redirect URI) is
    /// replaced.
    async fn ensure_registration(
        &self,
        state: &mut ProviderState,
        metadata: &AuthServerMetadata,
    ) -> Result<ClientRegistration> {
        if state.registration.is_none() {
            state.registration = self.store.load_registration().await?;
        }

        if let Some(registration) = &state.registration {
            if registration.matches(&metadata.issuer, &self.redirect_uri) {
                debug!(
                    server = %self.server,
                    client_id = %registration.client_id,
                    "Reusing persisted client registration"
                );
                return Ok(registration.clone());
            }
            warn!(
                server = %self.server,
                "Stored registration no longer matches issuer/redirect, re-registering"
            );
        }

        let registration =
            register(&self.http, metadata, CLIENT_NAME, &self.redirect_uri).await?;
        self.store.save_registration(&registration).await?;
        state.registration = Some(registration.clone());
        Ok(registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_uri_identifies_the_server() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = OAuthProvider::new(
            "my server",
            "https://notes.example/mcp",
            "http://127.0.0.1:37650/",
            tmp.path(),
        );
        assert_eq!(
            provider.redirect_uri(),
            "http://127.0.0.1:37650/oauth/callback?server_name=my%20server"
        );
    }

    #[tokio::test]
    async fn no_token_without_stored_state() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = OAuthProvider::new(
            "s",
            "https://notes.example/mcp",
            "http://127.0.0.1:37650",
            tmp.path(),
        );
        assert!(provider.access_token().await.unwrap().is_none());
        assert!(provider.generated_auth_url().await.is_none());
    }

    #[tokio::test]
    async fn callback_without_pending_flow_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = OAuthProvider::new(
            "s",
            "https://notes.example/mcp",
            "http://127.0.0.1:37650",
            tmp.path(),
        );
        let err = provider.handle_callback("code").await.unwrap_err();
        assert!(err.to_string().contains("pending"));
    }
}
