//! Config flows that create Bold entries
//!
//! Session login: the user enters an email, the server mails a verification
//! code, and the code plus password are exchanged for a session token.
//! OAuth2: the user is sent to the authorize URL and the returned code is
//! exchanged for a token.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bold_api::{ApiError, BoldClient, OAuth2Client};
use bold_config_entries::{ConfigEntries, ConfigEntriesError, ConfigEntry};
use bold_core::SharedClock;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::consts::{
    CONF_AUTH_IMPLEMENTATION, CONF_EMAIL, CONF_EXPIRATION_TIME, CONF_PASSWORD, CONF_TOKEN,
    CONF_VERIFICATION_CODE, DOMAIN, REQUEST_TIMEOUT,
};
use crate::helpers::convert_expiration_time;

/// Result of a config flow step
#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    pub flow_id: String,
    /// Integration domain
    pub handler: String,
    /// form, create_entry, abort or external_step
    #[serde(rename = "type")]
    pub result_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Always present, empty when the step has no form
    pub data_schema: Vec<FormField>,
    pub errors: Option<HashMap<String, String>>,
    /// Page the user opens (external_step)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Created entry (create_entry)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub last_step: Option<bool>,
}

impl FlowResult {
    fn base(flow_id: &str, result_type: &str) -> Self {
        Self {
            flow_id: flow_id.to_string(),
            handler: DOMAIN.to_string(),
            result_type: result_type.to_string(),
            step_id: None,
            data_schema: Vec::new(),
            errors: None,
            url: None,
            title: None,
            reason: None,
            result: None,
            last_step: None,
        }
    }

    fn form(
        flow_id: &str,
        step_id: &str,
        data_schema: Vec<FormField>,
        errors: HashMap<String, String>,
        last_step: bool,
    ) -> Self {
        Self {
            step_id: Some(step_id.to_string()),
            data_schema,
            errors: (!errors.is_empty()).then_some(errors),
            last_step: Some(last_step),
            ..Self::base(flow_id, "form")
        }
    }

    fn external_step(flow_id: &str, step_id: &str, url: String) -> Self {
        Self {
            step_id: Some(step_id.to_string()),
            url: Some(url),
            ..Self::base(flow_id, "external_step")
        }
    }

    fn create_entry(flow_id: &str, entry: &ConfigEntry) -> Self {
        Self {
            title: Some(entry.title.clone()),
            result: Some(json!({
                "entry_id": entry.entry_id,
                "domain": entry.domain,
                "title": entry.title,
            })),
            ..Self::base(flow_id, "create_entry")
        }
    }

    fn abort(flow_id: &str, reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Self::base(flow_id, "abort")
        }
    }

    pub fn is_form(&self) -> bool {
        self.result_type == "form"
    }

    pub fn is_create_entry(&self) -> bool {
        self.result_type == "create_entry"
    }

    pub fn is_abort(&self) -> bool {
        self.result_type == "abort"
    }

    /// Entry id of a created entry
    pub fn entry_id(&self) -> Option<&str> {
        self.result.as_ref()?.get("entry_id")?.as_str()
    }
}

/// Form field schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

impl FormField {
    fn required_string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: "string".to_string(),
            required: Some(true),
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    #[error("Could not store entry: {0}")]
    Store(#[from] ConfigEntriesError),
}

/// Interface of config flow handlers
#[async_trait]
pub trait ConfigFlowHandler: Send + Sync {
    /// Start a flow for `handler` (the integration domain)
    async fn start_flow(
        &self,
        handler: &str,
        show_advanced_options: bool,
    ) -> Result<FlowResult, FlowError>;

    /// Continue a flow with the user's input for its current step
    async fn progress_flow(
        &self,
        flow_id: &str,
        user_input: Option<Value>,
    ) -> Result<FlowResult, FlowError>;

    async fn list_flows(&self) -> Vec<Value>;
}

#[derive(Debug, Clone)]
enum FlowStep {
    User,
    Validate {
        email: String,
        validation_id: String,
    },
    OAuthCallback {
        state: String,
    },
}

impl FlowStep {
    fn id(&self) -> &'static str {
        match self {
            FlowStep::User => "user",
            FlowStep::Validate { .. } => "validate",
            FlowStep::OAuthCallback { .. } => "creation",
        }
    }
}

/// OAuth2 settings for the authorization-code flow
#[derive(Clone)]
pub struct OAuthFlowConfig {
    pub client: Arc<OAuth2Client>,
    pub redirect_uri: String,
}

/// Runs Bold config flows and stores the resulting entries
pub struct FlowManager {
    entries: Arc<ConfigEntries>,
    api_base_url: String,
    oauth: Option<OAuthFlowConfig>,
    clock: SharedClock,
    flows: DashMap<String, FlowStep>,
}

impl FlowManager {
    pub fn new(
        entries: Arc<ConfigEntries>,
        api_base_url: impl Into<String>,
        clock: SharedClock,
    ) -> Self {
        Self {
            entries,
            api_base_url: api_base_url.into(),
            oauth: None,
            clock,
            flows: DashMap::new(),
        }
    }

    /// Use the OAuth2 flow instead of the session login
    pub fn with_oauth(mut self, oauth: OAuthFlowConfig) -> Self {
        self.oauth = Some(oauth);
        self
    }

    fn client(&self) -> BoldClient {
        BoldClient::new(&self.api_base_url)
    }

    fn user_form(flow_id: &str, errors: HashMap<String, String>) -> FlowResult {
        FlowResult::form(
            flow_id,
            "user",
            vec![FormField::required_string(CONF_EMAIL)],
            errors,
            false,
        )
    }

    fn validate_form(flow_id: &str, errors: HashMap<String, String>) -> FlowResult {
        FlowResult::form(
            flow_id,
            "validate",
            vec![
                FormField::required_string(CONF_VERIFICATION_CODE),
                FormField::required_string(CONF_PASSWORD),
            ],
            errors,
            true,
        )
    }

    async fn step_user(&self, flow_id: &str, input: &Value) -> (FlowResult, Option<FlowStep>) {
        let Some(email) = field(input, CONF_EMAIL) else {
            return (
                Self::user_form(flow_id, error_map(CONF_EMAIL, "invalid_email")),
                Some(FlowStep::User),
            );
        };

        if self
            .entries
            .get_by_unique_id(DOMAIN, &email.to_lowercase())
            .is_some()
        {
            return (FlowResult::abort(flow_id, "already_configured"), None);
        }

        let result =
            tokio::time::timeout(REQUEST_TIMEOUT, self.client().request_validation_id(&email))
                .await
                .unwrap_or(Err(ApiError::Timeout));

        match result {
            Ok(validation) => {
                debug!("E-mail verification code requested");
                let email = validation.email.unwrap_or(email);
                (
                    Self::validate_form(flow_id, HashMap::new()),
                    Some(FlowStep::Validate {
                        email,
                        validation_id: validation.id,
                    }),
                )
            }
            Err(ApiError::InvalidEmail | ApiError::EmailOrPhoneNotSpecified) => {
                error!("Invalid e-mail");
                (
                    Self::user_form(flow_id, error_map(CONF_EMAIL, "invalid_email")),
                    Some(FlowStep::User),
                )
            }
            Err(e) => {
                error!(error = %e, "Cannot connect");
                (
                    Self::user_form(flow_id, error_map("base", base_error(&e))),
                    Some(FlowStep::User),
                )
            }
        }
    }

    async fn step_validate(
        &self,
        flow_id: &str,
        email: String,
        validation_id: String,
        input: &Value,
    ) -> Result<(FlowResult, Option<FlowStep>), FlowError> {
        let retry = FlowStep::Validate {
            email: email.clone(),
            validation_id: validation_id.clone(),
        };
        let (Some(code), Some(password)) = (
            field(input, CONF_VERIFICATION_CODE),
            field(input, CONF_PASSWORD),
        ) else {
            return Ok((
                Self::validate_form(flow_id, error_map("base", "invalid_auth")),
                Some(retry),
            ));
        };

        let client = self.client();
        let result = tokio::time::timeout(
            REQUEST_TIMEOUT,
            client.authenticate(&email, &password, &code, &validation_id),
        )
        .await
        .unwrap_or(Err(ApiError::Timeout));

        let response = match result {
            Ok(response) => response,
            Err(
                ApiError::Unauthorized
                | ApiError::VerificationNotFound
                | ApiError::AuthenticateFailed,
            ) => {
                error!("Invalid auth");
                return Ok((
                    Self::validate_form(flow_id, error_map("base", "invalid_auth")),
                    Some(retry),
                ));
            }
            Err(e) => {
                error!(error = %e, "Cannot connect");
                return Ok((
                    Self::validate_form(flow_id, error_map("base", base_error(&e))),
                    Some(retry),
                ));
            }
        };

        let Ok(expiration) = convert_expiration_time(&response.expiration_time) else {
            error!(value = %response.expiration_time, "Invalid expiration time from server");
            return Ok((
                Self::validate_form(flow_id, error_map("base", "unknown")),
                Some(retry),
            ));
        };
        debug!(%expiration, "Token set with expiration time");

        let data = HashMap::from([
            (CONF_EMAIL.to_string(), json!(email)),
            (CONF_PASSWORD.to_string(), json!(password)),
            (CONF_TOKEN.to_string(), json!(response.token)),
            (CONF_EXPIRATION_TIME.to_string(), json!(expiration.to_rfc3339())),
        ]);
        let entry = ConfigEntry::new(DOMAIN, email.clone())
            .with_data(data)
            .with_unique_id(email.to_lowercase());

        Ok((self.create_entry(flow_id, entry).await?, None))
    }

    async fn step_oauth_callback(
        &self,
        flow_id: &str,
        expected_state: String,
        input: &Value,
    ) -> Result<(FlowResult, Option<FlowStep>), FlowError> {
        let Some(oauth) = &self.oauth else {
            return Ok((FlowResult::abort(flow_id, "missing_configuration"), None));
        };
        if field(input, "state").as_deref() != Some(expected_state.as_str()) {
            return Ok((FlowResult::abort(flow_id, "invalid_state"), None));
        }
        let Some(code) = field(input, "code") else {
            return Ok((FlowResult::abort(flow_id, "missing_code"), None));
        };

        let exchanged = tokio::time::timeout(
            REQUEST_TIMEOUT,
            oauth.client.exchange_code(&code, &oauth.redirect_uri),
        )
        .await
        .unwrap_or(Err(ApiError::Timeout));
        let token = match exchanged {
            Ok(token) => token.received_at(self.clock.now()),
            Err(e) => {
                error!(error = %e, "OAuth2 code exchange failed");
                let reason = if e.is_transient() {
                    "cannot_connect"
                } else {
                    "oauth_error"
                };
                return Ok((FlowResult::abort(flow_id, reason), None));
            }
        };

        let token = match serde_json::to_value(&token) {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "could not encode OAuth2 token");
                return Ok((FlowResult::abort(flow_id, "oauth_error"), None));
            }
        };
        let data = HashMap::from([
            (CONF_AUTH_IMPLEMENTATION.to_string(), json!(DOMAIN)),
            (CONF_TOKEN.to_string(), token),
        ]);
        let entry = ConfigEntry::new(DOMAIN, "Bold")
            .with_data(data)
            .with_unique_id(DOMAIN);

        Ok((self.create_entry(flow_id, entry).await?, None))
    }

    async fn create_entry(&self, flow_id: &str, entry: ConfigEntry) -> Result<FlowResult, FlowError> {
        match self.entries.add(entry).await {
            Ok(entry) => {
                info!(entry_id = %entry.entry_id, title = %entry.title, "created Bold entry");
                Ok(FlowResult::create_entry(flow_id, &entry))
            }
            Err(ConfigEntriesError::AlreadyExists { .. }) => {
                Ok(FlowResult::abort(flow_id, "already_configured"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ConfigFlowHandler for FlowManager {
    async fn start_flow(
        &self,
        handler: &str,
        _show_advanced_options: bool,
    ) -> Result<FlowResult, FlowError> {
        if handler != DOMAIN {
            return Err(FlowError::UnknownHandler(handler.to_string()));
        }
        let flow_id = ulid::Ulid::new().to_string();

        let Some(oauth) = &self.oauth else {
            self.flows.insert(flow_id.clone(), FlowStep::User);
            return Ok(Self::user_form(&flow_id, HashMap::new()));
        };

        if self.entries.get_by_unique_id(DOMAIN, DOMAIN).is_some() {
            return Ok(FlowResult::abort(&flow_id, "already_configured"));
        }
        let state = ulid::Ulid::new().to_string();
        match oauth.client.authorize_url(&oauth.redirect_uri, &state) {
            Ok(url) => {
                self.flows
                    .insert(flow_id.clone(), FlowStep::OAuthCallback { state });
                Ok(FlowResult::external_step(&flow_id, "creation", url))
            }
            Err(e) => {
                error!(error = %e, "could not build authorize url");
                Ok(FlowResult::abort(&flow_id, "authorize_url_fail"))
            }
        }
    }

    async fn progress_flow(
        &self,
        flow_id: &str,
        user_input: Option<Value>,
    ) -> Result<FlowResult, FlowError> {
        let (_, step) = self
            .flows
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        let Some(input) = user_input else {
            let result = match &step {
                FlowStep::User => Self::user_form(flow_id, HashMap::new()),
                FlowStep::Validate { .. } => Self::validate_form(flow_id, HashMap::new()),
                FlowStep::OAuthCallback { .. } => FlowResult::abort(flow_id, "missing_code"),
            };
            if result.is_form() {
                self.flows.insert(flow_id.to_string(), step);
            }
            return Ok(result);
        };

        let (result, next) = match step {
            FlowStep::User => self.step_user(flow_id, &input).await,
            FlowStep::Validate {
                email,
                validation_id,
            } => {
                self.step_validate(flow_id, email, validation_id, &input)
                    .await?
            }
            FlowStep::OAuthCallback { state } => {
                self.step_oauth_callback(flow_id, state, &input).await?
            }
        };

        if let Some(next) = next {
            self.flows.insert(flow_id.to_string(), next);
        }
        Ok(result)
    }

    async fn list_flows(&self) -> Vec<Value> {
        self.flows
            .iter()
            .map(|flow| {
                json!({
                    "flow_id": flow.key(),
                    "handler": DOMAIN,
                    "step_id": flow.value().id(),
                })
            })
            .collect()
    }
}

fn field(input: &Value, name: &str) -> Option<String> {
    match input.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn error_map(field: &str, error: &str) -> HashMap<String, String> {
    HashMap::from([(field.to_string(), error.to_string())])
}

fn base_error(error: &ApiError) -> &'static str {
    if error.is_transient() {
        "cannot_connect"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bold_core::MockClock;
    use bold_registries::Storage;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _dir: TempDir,
        server: MockServer,
        entries: Arc<ConfigEntries>,
        flows: FlowManager,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let flows = FlowManager::new(entries.clone(), server.uri(), Arc::new(MockClock::new()));
        Fixture {
            _dir: dir,
            server,
            entries,
            flows,
        }
    }

    async fn mount_validation(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v2/validations"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": 4711, "email": "me@example.com"})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_session_flow_creates_entry() {
        let f = fixture().await;
        mount_validation(&f.server).await;
        Mock::given(method("POST"))
            .and(path("/v2/authentications"))
            .and(body_partial_json(json!({
                "email": "me@example.com",
                "password": "hunter2",
                "verificationCode": "123456",
                "validationId": "4711",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "session-token",
                "expirationTime": "2024-06-01T12:00:00.000Z",
            })))
            .mount(&f.server)
            .await;

        let start = f.flows.start_flow(DOMAIN, false).await.unwrap();
        assert!(start.is_form());
        assert_eq!(start.step_id.as_deref(), Some("user"));

        let validate = f
            .flows
            .progress_flow(&start.flow_id, Some(json!({"email": "me@example.com"})))
            .await
            .unwrap();
        assert_eq!(validate.step_id.as_deref(), Some("validate"));
        assert_eq!(validate.last_step, Some(true));

        let done = f
            .flows
            .progress_flow(
                &start.flow_id,
                Some(json!({"verification_code": "123456", "password": "hunter2"})),
            )
            .await
            .unwrap();
        assert!(done.is_create_entry());
        assert_eq!(done.title.as_deref(), Some("me@example.com"));

        let entry = f.entries.get(done.entry_id().unwrap()).unwrap();
        assert_eq!(entry.data_str(CONF_TOKEN), Some("session-token"));
        assert_eq!(entry.data_str(CONF_PASSWORD), Some("hunter2"));
        assert_eq!(
            entry.data_str(CONF_EXPIRATION_TIME),
            Some("2024-06-01T09:00:00+00:00")
        );
        assert_eq!(entry.unique_id.as_deref(), Some("me@example.com"));
        assert!(f.flows.list_flows().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_email_shows_error() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v2/validations"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&f.server)
            .await;

        let start = f.flows.start_flow(DOMAIN, false).await.unwrap();
        let result = f
            .flows
            .progress_flow(&start.flow_id, Some(json!({"email": "not-an-email"})))
            .await
            .unwrap();

        assert_eq!(result.step_id.as_deref(), Some("user"));
        assert_eq!(result.errors.unwrap()[CONF_EMAIL], "invalid_email");
        assert_eq!(f.flows.list_flows().await.len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_cannot_connect() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v2/validations"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&f.server)
            .await;

        let start = f.flows.start_flow(DOMAIN, false).await.unwrap();
        let result = f
            .flows
            .progress_flow(&start.flow_id, Some(json!({"email": "me@example.com"})))
            .await
            .unwrap();
        assert_eq!(result.errors.unwrap()["base"], "cannot_connect");
    }

    #[tokio::test]
    async fn test_wrong_code_is_invalid_auth() {
        let f = fixture().await;
        mount_validation(&f.server).await;
        Mock::given(method("POST"))
            .and(path("/v2/authentications"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&f.server)
            .await;

        let start = f.flows.start_flow(DOMAIN, false).await.unwrap();
        f.flows
            .progress_flow(&start.flow_id, Some(json!({"email": "me@example.com"})))
            .await
            .unwrap();
        let result = f
            .flows
            .progress_flow(
                &start.flow_id,
                Some(json!({"verification_code": "000000", "password": "hunter2"})),
            )
            .await
            .unwrap();

        assert_eq!(result.step_id.as_deref(), Some("validate"));
        assert_eq!(result.errors.unwrap()["base"], "invalid_auth");
        assert!(f.entries.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_email_aborts() {
        let f = fixture().await;
        f.entries
            .add(ConfigEntry::new(DOMAIN, "me@example.com").with_unique_id("me@example.com"))
            .await
            .unwrap();

        let start = f.flows.start_flow(DOMAIN, false).await.unwrap();
        let result = f
            .flows
            .progress_flow(&start.flow_id, Some(json!({"email": "Me@Example.com"})))
            .await
            .unwrap();

        assert!(result.is_abort());
        assert_eq!(result.reason.as_deref(), Some("already_configured"));
        assert!(f.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_handler_and_flow() {
        let f = fixture().await;
        assert!(matches!(
            f.flows.start_flow("hue", false).await,
            Err(FlowError::UnknownHandler(_))
        ));
        assert!(matches!(
            f.flows.progress_flow("nope", None).await,
            Err(FlowError::UnknownFlow(_))
        ));
    }

    #[tokio::test]
    async fn test_oauth_flow_creates_entry() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 7200,
                "token_type": "Bearer",
            })))
            .mount(&f.server)
            .await;
        let client = OAuth2Client::new("client-id", "secret").with_urls(
            format!("{}/authorize", f.server.uri()),
            format!("{}/v2/oauth/token", f.server.uri()),
        );
        let flows = FlowManager::new(f.entries.clone(), f.server.uri(), Arc::new(MockClock::new()))
            .with_oauth(OAuthFlowConfig {
                client: Arc::new(client),
                redirect_uri: "http://localhost/auth/external/callback".into(),
            });

        let start = flows.start_flow(DOMAIN, false).await.unwrap();
        assert_eq!(start.result_type, "external_step");
        let url = start.url.clone().unwrap();
        assert!(url.contains("client_id=client-id"));
        let state = url
            .split("state=")
            .nth(1)
            .unwrap()
            .split('&')
            .next()
            .unwrap()
            .to_string();

        let bad = flows.start_flow(DOMAIN, false).await.unwrap();
        let aborted = flows
            .progress_flow(&bad.flow_id, Some(json!({"code": "c", "state": "forged"})))
            .await
            .unwrap();
        assert_eq!(aborted.reason.as_deref(), Some("invalid_state"));

        let done = flows
            .progress_flow(&start.flow_id, Some(json!({"code": "abc", "state": state})))
            .await
            .unwrap();
        assert!(done.is_create_entry());

        let entry = f.entries.get(done.entry_id().unwrap()).unwrap();
        assert_eq!(entry.data_str(CONF_AUTH_IMPLEMENTATION), Some(DOMAIN));
        let token: bold_api::OAuth2Token = entry.data_as(CONF_TOKEN).unwrap();
        assert_eq!(token.access_token, "access");
        assert!(token.expires_at.is_some());

        let again = flows.start_flow(DOMAIN, false).await.unwrap();
        assert_eq!(again.reason.as_deref(), Some("already_configured"));
    }
    #[tokio::test]
    async fn test_stalled_code_exchange_aborts() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(15))
                    .set_body_json(json!({"access_token": "access", "expires_in": 7200})),
            )
            .mount(&f.server)
            .await;
        let client = OAuth2Client::new("client-id", "secret").with_urls(
            format!("{}/authorize", f.server.uri()),
            format!("{}/v2/oauth/token", f.server.uri()),
        );
        let flows = FlowManager::new(f.entries.clone(), f.server.uri(), Arc::new(MockClock::new()))
            .with_oauth(OAuthFlowConfig {
                client: Arc::new(client),
                redirect_uri: "http://localhost/auth/external/callback".into(),
            });

        let start = flows.start_flow(DOMAIN, false).await.unwrap();
        let url = start.url.clone().unwrap();
        let state = url
            .split("state=")
            .nth(1)
            .unwrap()
            .split('&')
            .next()
            .unwrap()
            .to_string();

        let started = std::time::Instant::now();
        let aborted = flows
            .progress_flow(&start.flow_id, Some(json!({"code": "abc", "state": state})))
            .await
            .unwrap();
        assert!(aborted.is_abort());
        assert_eq!(aborted.reason.as_deref(), Some("cannot_connect"));
        assert!(started.elapsed() < Duration::from_secs(14));
        assert!(f.entries.is_empty());
    }
}
