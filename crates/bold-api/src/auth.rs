//! Bearer-token sources for [`BoldClient`](crate::BoldClient)

use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ApiError, ApiResult};

/// Supplies the bearer token for authenticated requests
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A token that is valid right now
    async fn access_token(&self) -> ApiResult<String>;
}

/// Session token obtained through email/password login
#[derive(Debug, Default)]
pub struct SessionToken {
    token: RwLock<Option<String>>,
}

impl SessionToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl TokenProvider for SessionToken {
    async fn access_token(&self) -> ApiResult<String> {
        self.token().ok_or(ApiError::TokenMissing)
    }
}
