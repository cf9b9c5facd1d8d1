//! Session token refresh scheduling
//!
//! Session-mode entries carry a token and the instant it must be renewed.
//! [`TokenRefresher`] keeps exactly one timer per entry armed for that
//! instant; when it fires the token is exchanged through `re_login`, the new
//! credential is merged into the entry data, and the timer is re-armed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bold_api::{ApiError, BoldApi};
use bold_config_entries::ConfigEntries;
use bold_core::SharedClock;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::consts::{CONF_EXPIRATION_TIME, CONF_TOKEN, REQUEST_TIMEOUT, TOKEN_RETRY_DELAY};
use crate::error::TokenRefreshError;
use crate::helpers::convert_expiration_time;

struct PendingRefresh {
    at: DateTime<Utc>,
    task: JoinHandle<()>,
}

pub struct TokenRefresher {
    entry_id: String,
    api: Arc<dyn BoldApi>,
    entries: Arc<ConfigEntries>,
    clock: SharedClock,
    retry_delay: Duration,
    pending: Mutex<Option<PendingRefresh>>,
}

impl TokenRefresher {
    pub fn new(
        entry_id: impl Into<String>,
        api: Arc<dyn BoldApi>,
        entries: Arc<ConfigEntries>,
        clock: SharedClock,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            api,
            entries,
            clock,
            retry_delay: TOKEN_RETRY_DELAY,
            pending: Mutex::new(None),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Instant of the armed refresh, if any
    pub fn next_refresh(&self) -> Option<DateTime<Utc>> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|p| p.at)
    }

    /// Use `token` from now on and refresh it at `expiration`
    pub fn update_token(self: &Arc<Self>, expiration: DateTime<Utc>, token: &str) {
        self.api.set_token(token);
        self.arm(expiration);
        debug!(entry_id = %self.entry_id, %expiration, "Token updated, scheduled next update");
    }

    fn arm(self: &Arc<Self>, at: DateTime<Utc>) {
        let delay = (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        let refresher = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(refresher) = refresher.upgrade() else {
                return;
            };
            // The timer has fired; drop its handle so re-arming does not abort this task
            refresher
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            let _ = refresher.refresh_token().await;
        });

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(PendingRefresh { at, task });
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    /// Exchange the session token and persist the result.
    ///
    /// Unreachable or unresponsive servers are retried after the retry
    /// delay. A missing token or a rejected one is left for the user to fix
    /// by logging in again.
    pub async fn refresh_token(self: &Arc<Self>) -> Result<DateTime<Utc>, TokenRefreshError> {
        let result = tokio::time::timeout(REQUEST_TIMEOUT, self.api.re_login())
            .await
            .unwrap_or(Err(ApiError::Timeout));
        let response = match result {
            Ok(response) => response,
            Err(ApiError::TokenMissing) => {
                error!(entry_id = %self.entry_id, "Current token is missing");
                return Err(ApiError::TokenMissing.into());
            }
            Err(e) if e.is_transient() => {
                error!(entry_id = %self.entry_id, error = %e, "Cannot connect");
                let retry_in = chrono::Duration::seconds(self.retry_delay.as_secs() as i64);
                self.arm(self.clock.now() + retry_in);
                return Err(e.into());
            }
            Err(e) => {
                error!(entry_id = %self.entry_id, error = %e, "Token refresh rejected");
                return Err(e.into());
            }
        };

        let expiration = convert_expiration_time(&response.expiration_time).map_err(|e| {
            error!(
                entry_id = %self.entry_id,
                value = %response.expiration_time,
                "Invalid expiration time from server"
            );
            TokenRefreshError::InvalidExpiration(e.to_string())
        })?;

        let data = HashMap::from([
            (CONF_TOKEN.to_string(), json!(response.token)),
            (CONF_EXPIRATION_TIME.to_string(), json!(expiration.to_rfc3339())),
        ]);
        if let Err(e) = self.entries.update_data(&self.entry_id, data).await {
            // The new token is still used for this run
            warn!(entry_id = %self.entry_id, error = %e, "failed to persist refreshed token");
        }

        self.update_token(expiration, &response.token);
        Ok(expiration)
    }

    /// Cancel the pending refresh
    pub fn shutdown(&self) {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(pending) = pending {
            pending.task.abort();
            debug!(entry_id = %self.entry_id, "token refresh cancelled");
        }
    }
}

impl Drop for TokenRefresher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
