//! Bold smart-lock cloud API
//!
//! [`BoldClient`] speaks the REST API used by the Bold app: session login
//! (validation + authentication + re-login), the effective device
//! permissions listing, and remote activation/deactivation of locks.
//! [`OAuth2Client`] covers the OAuth2 authorization-code grant.
//!
//! The client authenticates through a [`TokenProvider`]. Session logins use
//! [`SessionToken`]; OAuth2 deployments plug in a provider that refreshes
//! and persists the token.

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod oauth;

pub use auth::{SessionToken, TokenProvider};
pub use client::{BoldApi, BoldClient, DEFAULT_API_BASE_URL};
pub use error::{ApiError, ApiResult};
pub use models::{
    ActivationResponse, AuthenticationResponse, DeviceGateway, DeviceModel, DevicePermission,
    DeviceType, DeviceTypeInfo, ValidationResponse,
};
pub use oauth::{OAuth2Client, OAuth2Token, OAUTH2_AUTHORIZE_URL, OAUTH2_TOKEN_URL};
