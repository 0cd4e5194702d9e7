//! Token grants
//!
//! One entry point to the token endpoint, covering both grant flavors
//! the hub uses: the initial code-plus-verifier exchange and the
//! refresh. What comes back is persisted as [`StoredTokens`] with the
//! issue time and the lifetime the server reported; validity is
//! derived at read time, with a small skew so a token retires shortly
//! before the server would start rejecting it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::discovery::AuthServerMetadata;
use super::registration::ClientRegistration;

/// Retire access tokens this many seconds before their lifetime ends.
const EXPIRY_SKEW_SECS: i64 = 30;

/// Token material held on disk for one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// When the grant was issued (hub-local clock).
    pub obtained_at: DateTime<Utc>,
    /// Lifetime in seconds, when the server reported one.
    #[serde(default)]
    pub lifetime_secs: Option<i64>,
}

impl StoredTokens {
    fn from_response(response: GrantResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            obtained_at: Utc::now(),
            lifetime_secs: response.expires_in,
        }
    }

    /// Whether the access token is still worth sending. A grant
    /// without a reported lifetime stays usable until the server says
    /// otherwise.
    pub fn is_usable(&self) -> bool {
        match self.lifetime_secs {
            Some(lifetime) => {
                let usable_for = Duration::seconds((lifetime - EXPIRY_SKEW_SECS).max(0));
                Utc::now() < self.obtained_at + usable_for
            }
            None => true,
        }
    }
}

/// The two grant flavors the hub requests.
pub enum Grant<'a> {
    /// Initial exchange: callback code plus the attempt's verifier.
    AuthorizationCode {
        code: &'a str,
        verifier: &'a str,
        redirect_uri: &'a str,
    },
    /// Renewal of an expired access token.
    Refresh { token: &'a str },
}

impl Grant<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::Refresh { .. } => "refresh_token",
        }
    }
}

/// Fields the hub keeps from the token-endpoint response.
#[derive(Debug, Deserialize)]
struct GrantResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Form body for a grant request. The secret rides along only for
/// confidential registrations; public clients authenticate with the
/// verifier alone.
fn grant_form<'a>(
    registration: &'a ClientRegistration,
    grant: &'a Grant<'a>,
) -> Vec<(&'static str, &'a str)> {
    let mut form: Vec<(&'static str, &'a str)> = vec![
        ("grant_type", grant.kind()),
        ("client_id", registration.client_id.as_str()),
    ];
    match grant {
        Grant::AuthorizationCode {
            code,
            verifier,
            redirect_uri,
        } => {
            form.push(("code", *code));
            form.push(("code_verifier", *verifier));
            form.push(("redirect_uri", *redirect_uri));
        }
        Grant::Refresh { token } => {
            form.push(("refresh_token", *token));
        }
    }
    if let Some(secret) = registration.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }
    form
}

/// Run a grant against the server's token endpoint.
pub async fn request_grant(
    http: &reqwest::Client,
    metadata: &AuthServerMetadata,
    registration: &ClientRegistration,
    grant: Grant<'_>,
) -> anyhow::Result<StoredTokens> {
    let kind = grant.kind();
    debug!(endpoint = %metadata.token_endpoint, grant = kind, "Requesting token grant");

    let form = grant_form(registration, &grant);
    let response = http
        .post(&metadata.token_endpoint)
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!(
            "token endpoint rejected {} grant ({}): {}",
            kind,
            status,
            body.trim()
        );
    }

    let granted: GrantResponse = response.json().await?;
    info!(grant = kind, "Token grant issued");
    Ok(StoredTokens::from_response(granted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(secret: Option<&str>) -> ClientRegistration {
        ClientRegistration {
            client_id: "hub-client".into(),
            client_secret: secret.map(str::to_string),
            redirect_uri: "http://127.0.0.1:37650/oauth/callback".into(),
            issuer: "https://auth.example".into(),
        }
    }

    fn tokens(obtained_secs_ago: i64, lifetime_secs: Option<i64>) -> StoredTokens {
        StoredTokens {
            access_token: "at".into(),
            refresh_token: None,
            obtained_at: Utc::now() - Duration::seconds(obtained_secs_ago),
            lifetime_secs,
        }
    }

    #[test]
    fn fresh_grant_is_usable() {
        let granted = StoredTokens::from_response(GrantResponse {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_in: Some(3600),
        });
        assert!(granted.is_usable());
        assert_eq!(granted.refresh_token.as_deref(), Some("rt"));
    }

    #[test]
    fn tokens_retire_before_the_reported_lifetime_ends() {
        // 40s into a 60s lifetime: the 30s skew has already retired it.
        assert!(!tokens(40, Some(60)).is_usable());
        // 40s into a 120s lifetime: still comfortably valid.
        assert!(tokens(40, Some(120)).is_usable());
    }

    #[test]
    fn grant_without_lifetime_stays_usable() {
        assert!(tokens(86_400, None).is_usable());
    }

    #[test]
    fn authorization_code_form_carries_the_proof() {
        let registration = registration(None);
        let grant = Grant::AuthorizationCode {
            code: "c0de",
            verifier: "v3rifier",
            redirect_uri: "http://127.0.0.1:37650/oauth/callback",
        };
        let form = grant_form(&registration, &grant);
        assert!(form.contains(&("grant_type", "authorization_code")));
        assert!(form.contains(&("code", "c0de")));
        assert!(form.contains(&("code_verifier", "v3rifier")));
        assert!(form
            .iter()
            .any(|(k, _)| *k == "redirect_uri"));
        assert!(!form.iter().any(|(k, _)| *k == "client_secret"));
    }

    #[test]
    fn refresh_form_is_minimal() {
        let registration = registration(None);
        let grant = Grant::Refresh { token: "rt" };
        let form = grant_form(&registration, &grant);
        assert!(form.contains(&("grant_type", "refresh_token")));
        assert!(form.contains(&("refresh_token", "rt")));
        assert!(!form.iter().any(|(k, _)| *k == "code_verifier"));
    }

    #[test]
    fn client_secret_rides_along_only_when_registered() {
        let confidential = registration(Some("s3cret"));
        let form = grant_form(&confidential, &Grant::Refresh { token: "rt" });
        assert!(form.contains(&("client_secret", "s3cret")));
    }

    #[test]
    fn grant_response_tolerates_minimal_body() {
        let granted: GrantResponse =
            serde_json::from_str(r#"{ "access_token": "only" }"#).unwrap();
        assert_eq!(granted.access_token, "only");
        assert!(granted.refresh_token.is_none());
        assert!(granted.expires_in.is_none());
    }
}
