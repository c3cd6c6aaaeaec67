use chrono::{DateTime, Duration, Utc};
use lifeboat_core::RemoteCredential;
use serde::Deserialize;

use crate::error::RemoteError;

pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    /// Builds the replacement credential. Providers usually omit the refresh
    /// token on refresh, in which case the previous one stays in use.
    pub fn into_credential(
        self,
        previous_refresh_token: Option<String>,
        now: DateTime<Utc>,
    ) -> RemoteCredential {
        RemoteCredential {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh_token),
            expiry: self.expires_in.map(|secs| now + Duration::seconds(secs)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges a refresh token for a fresh access token.
#[async_trait::async_trait]
pub trait TokenExchange: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RemoteError>;
}

/// OAuth2 token endpoint client. Covers only the token exchange half of the
/// flow; the consent redirect happens elsewhere and hands us a code.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Trades an authorization code for the initial credential.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<RemoteCredential, RemoteError> {
        let grant = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .await?;
        if grant.access_token.is_empty() {
            return Err(RemoteError::AuthFailure(
                "token endpoint returned an empty access token".to_owned(),
            ));
        }
        Ok(grant.into_credential(None, Utc::now()))
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenGrant, RemoteError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let resp = self
            .http
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| RemoteError::AuthFailure(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<TokenErrorBody>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {desc}", err.error),
                    None => err.error,
                },
                Err(_) => format!("token endpoint returned {status}"),
            };
            return Err(RemoteError::AuthFailure(reason));
        }

        resp.json::<TokenGrant>()
            .await
            .map_err(|e| RemoteError::AuthFailure(format!("malformed token response: {e}")))
    }
}

#[async_trait::async_trait]
impl TokenExchange for OAuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RemoteError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}
