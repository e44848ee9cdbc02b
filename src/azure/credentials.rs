//! Bearer tokens for Azure Resource Manager.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::error::ArmError;

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Source of bearer tokens for ARM requests.
pub enum Credential {
    /// A pre-issued token used as-is.
    AccessToken(String),
    /// An Azure AD application using the client credentials flow.
    ClientSecret(ClientSecretCredential),
}

impl Credential {
    /// Return a bearer token, fetching a new one if needed.
    pub async fn token(&self, http: &reqwest::Client) -> Result<String, ArmError> {
        match self {
            Self::AccessToken(token) => Ok(token.clone()),
            Self::ClientSecret(credential) => credential.token(http).await,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            Self::ClientSecret(credential) => f
                .debug_struct("ClientSecret")
                .field("tenant_id", &credential.tenant_id)
                .field("client_id", &credential.client_id)
                .finish_non_exhaustive(),
        }
    }
}

/// OAuth2 client credentials against the Microsoft identity platform.
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority: String,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl ClientSecretCredential {
    /// Create a credential for the given application.
    ///
    /// `authority` is the identity host (e.g. `https://login.microsoftonline.com`)
    /// and `resource_endpoint` the ARM endpoint the token is scoped to.
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authority: &str,
        resource_endpoint: &str,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority: authority.trim_end_matches('/').to_string(),
            scope: format!("{}/.default", resource_endpoint.trim_end_matches('/')),
            cached: Mutex::new(None),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id)
    }

    async fn token(&self, http: &reqwest::Client) -> Result<String, ArmError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!(tenant_id = %self.tenant_id, client_id = %self.client_id, "Requesting access token");
        let response = http
            .post(self.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(ArmError::Auth(format!(
                "token request returned {}: {}",
                status,
                String::from_utf8_lossy(&body).trim()
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&body)?;
        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let credential = Credential::AccessToken("abc".into());
        let token = credential.token(&reqwest::Client::new()).await.unwrap();
        assert_eq!(token, "abc");
    }

    #[test]
    fn test_client_secret_urls() {
        let credential = ClientSecretCredential::new(
            "tenant1",
            "client1",
            "secret",
            "https://login.microsoftonline.com/",
            "https://management.azure.com/",
        );
        assert_eq!(
            credential.token_url(),
            "https://login.microsoftonline.com/tenant1/oauth2/v2.0/token"
        );
        assert_eq!(credential.scope, "https://management.azure.com/.default");
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let credential = ClientSecretCredential::new(
            "tenant1",
            "client1",
            "secret",
            "http://127.0.0.1:9",
            "https://management.azure.com",
        );
        *credential.cached.lock().await = Some(CachedToken {
            value: "cached".into(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        });

        let token = credential.token(&reqwest::Client::new()).await.unwrap();
        assert_eq!(token, "cached");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credential = Credential::AccessToken("super-secret".into());
        assert!(!format!("{:?}", credential).contains("super-secret"));

        let credential = Credential::ClientSecret(ClientSecretCredential::new(
            "t",
            "c",
            "hunter2",
            "https://login.microsoftonline.com",
            "https://management.azure.com",
        ));
        assert!(!format!("{:?}", credential).contains("hunter2"));
    }
}
