//! REST client for `api.boldsmartlock.com`

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::auth::{SessionToken, TokenProvider};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    ActivationResponse, AuthenticationResponse, DevicePermission, ValidationResponse,
};

pub const DEFAULT_API_BASE_URL: &str = "https://api.boldsmartlock.com";

/// Operations the polling coordinator and entities depend on
#[async_trait]
pub trait BoldApi: Send + Sync {
    async fn get_device_permissions(&self) -> ApiResult<Vec<DevicePermission>>;

    async fn remote_activation(&self, device_id: u64) -> ApiResult<ActivationResponse>;

    /// `true` when the device accepted the deactivation
    async fn remote_deactivation(&self, device_id: u64) -> ApiResult<bool>;

    /// Exchange the current session token for a fresh one
    async fn re_login(&self) -> ApiResult<AuthenticationResponse>;

    /// Use `token` as the session token for subsequent requests
    fn set_token(&self, token: &str);
}

/// Endpoint groups with their own status-code meanings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Validation,
    Authentication,
    ReLogin,
    Permissions,
    Activation,
    Deactivation,
}

fn status_error(endpoint: Endpoint, status: StatusCode, message: String) -> ApiError {
    use Endpoint::*;

    match (endpoint, status.as_u16()) {
        (_, 429) => ApiError::TooManyRequests,
        (Validation, 400) => ApiError::InvalidEmail,
        (Authentication, 404) => ApiError::VerificationNotFound,
        (Authentication, 400 | 401 | 403) => ApiError::AuthenticateFailed,
        (Activation | Deactivation, 404) => ApiError::GatewayNotFound,
        (Deactivation, 405) => ApiError::DeviceFirmwareOutdated,
        (_, 401) => ApiError::Unauthorized,
        (_, status) => ApiError::Status { status, message },
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticationRequest<'a> {
    email: &'a str,
    password: &'a str,
    verification_code: &'a str,
    validation_id: &'a str,
    language: &'a str,
    client_locale: &'a str,
}

pub struct BoldClient {
    http: Client,
    base_url: String,
    session: Arc<SessionToken>,
    auth: Arc<dyn TokenProvider>,
}

impl BoldClient {
    /// Client authenticating with a session token
    pub fn new(base_url: impl Into<String>) -> Self {
        let session = Arc::new(SessionToken::new());
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: session.clone(),
            session,
        }
    }

    /// Client authenticating through an external provider (OAuth2)
    pub fn with_token_provider(
        base_url: impl Into<String>,
        provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            auth: provider,
            ..Self::new(base_url)
        }
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session_token(&self) -> Option<String> {
        self.session.token()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, builder: RequestBuilder) -> ApiResult<RequestBuilder> {
        let token = self.auth.access_token().await?;
        Ok(builder.bearer_auth(token))
    }

    async fn check(endpoint: Endpoint, response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        debug!(?endpoint, status = status.as_u16(), %message, "request failed");
        Err(status_error(endpoint, status, message))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        builder: RequestBuilder,
    ) -> ApiResult<T> {
        let response = Self::check(endpoint, builder.send().await?).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Start a login: the server mails a verification code to `email`
    #[instrument(skip(self))]
    pub async fn request_validation_id(&self, email: &str) -> ApiResult<ValidationResponse> {
        if email.trim().is_empty() {
            return Err(ApiError::EmailOrPhoneNotSpecified);
        }

        let builder = self
            .http
            .post(self.url("/v2/validations"))
            .json(&serde_json::json!({ "email": email }));
        self.send(Endpoint::Validation, builder).await
    }

    /// Finish a login with the mailed code; stores the returned session token
    #[instrument(skip(self, password, verification_code))]
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        verification_code: &str,
        validation_id: &str,
    ) -> ApiResult<AuthenticationResponse> {
        let request = AuthenticationRequest {
            email,
            password,
            verification_code,
            validation_id,
            language: "en",
            client_locale: "en-US",
        };
        let builder = self
            .http
            .post(self.url("/v2/authentications"))
            .json(&request);

        let response: AuthenticationResponse =
            self.send(Endpoint::Authentication, builder).await?;
        self.session.set_token(&response.token);
        debug!("authenticated");
        Ok(response)
    }
}

#[async_trait]
impl BoldApi for BoldClient {
    #[instrument(skip(self))]
    async fn get_device_permissions(&self) -> ApiResult<Vec<DevicePermission>> {
        let builder = self
            .authorized(self.http.get(self.url("/v1/effective-device-permissions")))
            .await?;
        let devices: Vec<DevicePermission> = self.send(Endpoint::Permissions, builder).await?;
        debug!(count = devices.len(), "fetched device permissions");
        Ok(devices)
    }

    #[instrument(skip(self))]
    async fn remote_activation(&self, device_id: u64) -> ApiResult<ActivationResponse> {
        let path = format!("/v1/devices/{device_id}/remote-activation");
        let builder = self.authorized(self.http.post(self.url(&path))).await?;
        self.send(Endpoint::Activation, builder).await
    }

    #[instrument(skip(self))]
    async fn remote_deactivation(&self, device_id: u64) -> ApiResult<bool> {
        let path = format!("/v1/devices/{device_id}/remote-deactivation");
        let builder = self.authorized(self.http.post(self.url(&path))).await?;
        let response = builder.send().await?;
        Self::check(Endpoint::Deactivation, response).await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn re_login(&self) -> ApiResult<AuthenticationResponse> {
        let token = self.session.token().ok_or(ApiError::TokenMissing)?;
        let builder = self
            .http
            .put(self.url(&format!("/v2/authentications/{token}")));

        let response: AuthenticationResponse = self.send(Endpoint::ReLogin, builder).await?;
        self.session.set_token(&response.token);
        Ok(response)
    }

    fn set_token(&self, token: &str) {
        self.session.set_token(token);
    }
}
