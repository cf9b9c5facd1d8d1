//! Error types of the Bold integration

use bold_api::ApiError;
use bold_config_entries::{ConfigEntriesError, SetupError};
use bold_registries::StorageError;
use thiserror::Error;

/// A coordinator refresh that did not produce a snapshot
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateFailed {
    #[error("Timeout fetching device permissions")]
    Timeout,

    #[error("Error communicating with API: {0}")]
    Communication(String),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl UpdateFailed {
    pub fn from_api(error: &ApiError) -> Self {
        match error {
            ApiError::Unauthorized | ApiError::TokenMissing | ApiError::AuthenticateFailed => {
                UpdateFailed::Auth(error.to_string())
            }
            ApiError::Timeout => UpdateFailed::Timeout,
            other => UpdateFailed::Communication(other.to_string()),
        }
    }
}

/// Every failed first poll is retried; a rejected session token can still be
/// renewed by the refresher before the next attempt.
impl From<UpdateFailed> for SetupError {
    fn from(failed: UpdateFailed) -> Self {
        SetupError::NotReady(failed.to_string())
    }
}

/// A lock, unlock or press that did not go through
#[derive(Debug, Error)]
pub enum EntityError {
    /// Action rejected by the API, with the message shown to the user
    #[error("{message}")]
    Action {
        message: String,
        #[source]
        source: ApiError,
    },

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity {0} does not support {1}")]
    NotSupported(String, &'static str),
}

impl EntityError {
    pub fn action(message: impl Into<String>, source: ApiError) -> Self {
        EntityError::Action {
            message: message.into(),
            source,
        }
    }
}

pub type EntityResult<T> = Result<T, EntityError>;

/// Failure to refresh the session token
#[derive(Debug, Error)]
pub enum TokenRefreshError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid expiration time from server: {0}")]
    InvalidExpiration(String),

    #[error(transparent)]
    Store(#[from] ConfigEntriesError),
}

impl From<TokenRefreshError> for SetupError {
    fn from(error: TokenRefreshError) -> Self {
        match error {
            TokenRefreshError::Api(e) if e.is_transient() => SetupError::NotReady(e.to_string()),
            other => SetupError::Failed(other.to_string()),
        }
    }
}

/// Errors surfaced while building the runtime for an entry
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Entry {entry_id} has no {key} in its data")]
    MissingData { entry_id: String, key: &'static str },

    #[error("Entry {entry_id} has an invalid {key}: {reason}")]
    InvalidData {
        entry_id: String,
        key: &'static str,
        reason: String,
    },

    #[error("OAuth2 is not configured")]
    OAuthNotConfigured,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Entries(#[from] ConfigEntriesError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<IntegrationError> for SetupError {
    fn from(error: IntegrationError) -> Self {
        match error {
            IntegrationError::Api(e) if e.is_transient() => SetupError::NotReady(e.to_string()),
            other => SetupError::Failed(other.to_string()),
        }
    }
}
