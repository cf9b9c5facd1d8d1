//! OAuth2 authorization-code grant against the Bold identity service

use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{ApiError, ApiResult};

pub const OAUTH2_AUTHORIZE_URL: &str = "https://auth.boldsmartlock.com/";
pub const OAUTH2_TOKEN_URL: &str = "https://api.boldsmartlock.com/v2/oauth/token";

/// Token as returned by the token endpoint, plus the computed expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Unix timestamp (seconds); set when the token is received
    #[serde(default)]
    pub expires_at: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuth2Token {
    /// Stamp `expires_at` relative to `now`
    pub fn received_at(mut self, now: DateTime<Utc>) -> Self {
        let expires_in = i64::try_from(self.expires_in).unwrap_or(i64::MAX);
        self.expires_at = Some(now.timestamp().saturating_add(expires_in));
        self
    }

    /// Valid for at least `margin_secs` more seconds
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        self.expires_at
            .map(|expires_at| expires_at > now.timestamp().saturating_add(margin_secs))
            .unwrap_or(false)
    }
}

pub struct OAuth2Client {
    http: Client,
    client_id: String,
    client_secret: String,
    authorize_url: String,
    token_url: String,
}

impl OAuth2Client {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_url: OAUTH2_AUTHORIZE_URL.to_string(),
            token_url: OAUTH2_TOKEN_URL.to_string(),
        }
    }

    pub fn with_urls(
        mut self,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.authorize_url = authorize_url.into();
        self.token_url = token_url.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// URL the user opens to grant access; `state` comes back with the code
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> ApiResult<String> {
        let url = Url::parse_with_params(
            &self.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
            ],
        )
        .map_err(|e| ApiError::Status {
            status: 0,
            message: format!("invalid authorize url: {e}"),
        })?;
        Ok(url.into())
    }

    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> ApiResult<OAuth2Token> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> ApiResult<OAuth2Token> {
        let mut token = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;
        // keep the old refresh token when the server does not rotate it
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> ApiResult<OAuth2Token> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        form.push(("client_secret", self.client_secret.as_str()));

        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), %message, "token request failed");
            return Err(match status.as_u16() {
                400 | 401 => ApiError::Unauthorized,
                429 => ApiError::TooManyRequests,
                code => ApiError::Status {
                    status: code,
                    message,
                },
            });
        }

        let body = response.text().await?;
        let token: OAuth2Token = serde_json::from_str(&body)?;
        debug!(expires_in = token.expires_in, "received oauth token");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_authorize_url() {
        let client = OAuth2Client::new("my client", "secret");
        let url = client
            .authorize_url("http://localhost/callback", "xyz")
            .unwrap();

        assert!(url.starts_with("https://auth.boldsmartlock.com/?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=my+client"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%2Fcallback"));
    }

    #[test]
    fn test_token_validity() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let token = OAuth2Token {
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            expires_in: 3600,
            token_type: "Bearer".into(),
            expires_at: None,
        };
        assert!(!token.is_valid_at(now, 20));

        let token = token.received_at(now);
        assert_eq!(token.expires_at, Some(now.timestamp() + 3600));
        assert!(token.is_valid_at(now + chrono::Duration::seconds(3500), 20));
        assert!(!token.is_valid_at(now + chrono::Duration::seconds(3590), 20));
    }
    #[test]
    fn test_huge_expires_in_saturates() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let token = OAuth2Token {
            access_token: "a".into(),
            refresh_token: None,
            expires_in: u64::MAX,
            token_type: "Bearer".into(),
            expires_at: None,
        }
        .received_at(now);

        assert_eq!(token.expires_at, Some(i64::MAX));
        assert!(token.is_valid_at(now, 20));
        assert!(!token.is_valid_at(now, i64::MAX));
    }
}
