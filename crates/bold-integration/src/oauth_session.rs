//! OAuth2 credentials of an entry
//!
//! The token lives in the entry data under `token`. Requests ask the
//! session for an access token; an expired token is refreshed once, merged
//! back into the entry and persisted.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bold_api::{ApiError, ApiResult, OAuth2Client, OAuth2Token, TokenProvider};
use bold_config_entries::{ConfigEntries, ConfigEntry};
use bold_core::SharedClock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::consts::{CONF_TOKEN, OAUTH_CLOCK_SKEW_SECS};
use crate::error::IntegrationError;

pub struct OAuth2Session {
    entry_id: String,
    entries: Arc<ConfigEntries>,
    oauth: Arc<OAuth2Client>,
    clock: SharedClock,
    token: Mutex<OAuth2Token>,
}

impl OAuth2Session {
    pub fn new(
        entry: &ConfigEntry,
        entries: Arc<ConfigEntries>,
        oauth: Arc<OAuth2Client>,
        clock: SharedClock,
    ) -> Result<Self, IntegrationError> {
        let token = entry
            .data_as::<OAuth2Token>(CONF_TOKEN)
            .ok_or_else(|| IntegrationError::MissingData {
                entry_id: entry.entry_id.clone(),
                key: CONF_TOKEN,
            })?;

        Ok(Self {
            entry_id: entry.entry_id.clone(),
            entries,
            oauth,
            clock,
            token: Mutex::new(token),
        })
    }

    pub async fn token(&self) -> OAuth2Token {
        self.token.lock().await.clone()
    }

    /// Token does not expire within the clock-skew margin
    pub async fn valid_token(&self) -> bool {
        self.token
            .lock()
            .await
            .is_valid_at(self.clock.now(), OAUTH_CLOCK_SKEW_SECS)
    }

    /// Refresh the token when it is about to expire.
    ///
    /// Callers serialize on the token lock, so concurrent requests trigger
    /// a single refresh.
    pub async fn ensure_token_valid(&self) -> ApiResult<OAuth2Token> {
        let mut token = self.token.lock().await;
        if token.is_valid_at(self.clock.now(), OAUTH_CLOCK_SKEW_SECS) {
            return Ok(token.clone());
        }

        let refresh_token = token.refresh_token.clone().ok_or(ApiError::Unauthorized)?;
        debug!(entry_id = %self.entry_id, "refreshing OAuth2 token");
        let refreshed = self
            .oauth
            .refresh(&refresh_token)
            .await?
            .received_at(self.clock.now());

        let data = HashMap::from([(CONF_TOKEN.to_string(), serde_json::to_value(&refreshed)?)]);
        if let Err(e) = self.entries.update_data(&self.entry_id, data).await {
            warn!(entry_id = %self.entry_id, error = %e, "failed to persist refreshed OAuth2 token");
        }

        *token = refreshed.clone();
        Ok(refreshed)
    }
}

#[async_trait]
impl TokenProvider for OAuth2Session {
    async fn access_token(&self) -> ApiResult<String> {
        self.ensure_token_valid().await.map(|t| t.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{CONF_AUTH_IMPLEMENTATION, DOMAIN};
    use bold_core::{Clock, MockClock};
    use bold_registries::Storage;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _dir: TempDir,
        server: MockServer,
        entries: Arc<ConfigEntries>,
        clock: MockClock,
        session: Arc<OAuth2Session>,
        entry_id: String,
    }

    async fn fixture(expires_at: i64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let clock = MockClock::at(chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());

        let entry = entries
            .add(ConfigEntry::new(DOMAIN, "Bold").with_data(HashMap::from([
                (CONF_AUTH_IMPLEMENTATION.to_string(), json!(DOMAIN)),
                (
                    CONF_TOKEN.to_string(),
                    json!({
                        "access_token": "old-access",
                        "refresh_token": "refresh-1",
                        "expires_in": 3600,
                        "token_type": "Bearer",
                        "expires_at": expires_at,
                    }),
                ),
            ])))
            .await
            .unwrap();

        let oauth = Arc::new(OAuth2Client::new("client", "secret").with_urls(
            format!("{}/authorize", server.uri()),
            format!("{}/v2/oauth/token", server.uri()),
        ));
        let session = Arc::new(
            OAuth2Session::new(&entry, entries.clone(), oauth, Arc::new(clock.clone())).unwrap(),
        );

        Fixture {
            _dir: dir,
            server,
            entries,
            clock,
            session,
            entry_id: entry.entry_id,
        }
    }

    #[tokio::test]
    async fn test_valid_token_is_used_as_is() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap().timestamp();
        let f = fixture(now + 600).await;

        assert!(f.session.valid_token().await);
        assert_eq!(f.session.access_token().await.unwrap(), "old-access");
        assert!(f.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_inside_skew_margin_is_refreshed_and_persisted() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap().timestamp();
        let f = fixture(now + 10).await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth/token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "refresh_token": "refresh-2",
                "expires_in": 3600,
                "token_type": "Bearer",
            })))
            .expect(1)
            .mount(&f.server)
            .await;

        assert!(!f.session.valid_token().await);
        assert_eq!(f.session.access_token().await.unwrap(), "new-access");

        let stored: OAuth2Token = f
            .entries
            .get(&f.entry_id)
            .unwrap()
            .data_as(CONF_TOKEN)
            .unwrap();
        assert_eq!(stored.access_token, "new-access");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(stored.expires_at, Some(f.clock.now().timestamp() + 3600));
        assert!(f.session.valid_token().await);
    }

    #[tokio::test]
    async fn test_concurrent_callers_refresh_once() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap().timestamp();
        let f = fixture(now - 1).await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&f.server)
            .await;

        let (a, b) = tokio::join!(f.session.access_token(), f.session.access_token());
        assert_eq!(a.unwrap(), "new-access");
        assert_eq!(b.unwrap(), "new-access");
        // The refresh response had no refresh token, the old one is kept
        assert_eq!(
            f.session.token().await.refresh_token.as_deref(),
            Some("refresh-1")
        );
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_unauthorized() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap().timestamp();
        let f = fixture(now - 1).await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth/token"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&f.server)
            .await;

        let err = f.session.access_token().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(f.session.token().await.access_token, "old-access");
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let entry = ConfigEntry::new(DOMAIN, "Bold");
        let oauth = Arc::new(OAuth2Client::new("client", "secret"));

        let result = OAuth2Session::new(&entry, entries, oauth, Arc::new(MockClock::new()));
        assert!(matches!(
            result,
            Err(IntegrationError::MissingData { key: CONF_TOKEN, .. })
        ));
    }
}
