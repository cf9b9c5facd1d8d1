//! HTTP-level tests for the Bold API client against a mock server.

use bold_api::{ApiError, BoldApi, BoldClient, DeviceType, OAuth2Client};
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn logged_in_client(server: &MockServer) -> BoldClient {
    let client = BoldClient::new(server.uri());
    client.set_token("session-token");
    client
}

// ============================================================================
// Session login
// ============================================================================

#[tokio::test]
async fn test_request_validation_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/validations"))
        .and(body_json(json!({ "email": "user@example.com" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 98765,
            "email": "user@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = BoldClient::new(server.uri());
    let validation = client
        .request_validation_id("user@example.com")
        .await
        .unwrap();
    assert_eq!(validation.id, "98765");
}

#[tokio::test]
async fn test_request_validation_id_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/validations"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let client = BoldClient::new(server.uri());
    assert!(matches!(
        client.request_validation_id("not-an-email").await,
        Err(ApiError::InvalidEmail)
    ));
    assert!(matches!(
        client.request_validation_id("  ").await,
        Err(ApiError::EmailOrPhoneNotSpecified)
    ));
}

#[tokio::test]
async fn test_authenticate_stores_session_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/authentications"))
        .and(body_string_contains("\"verificationCode\":\"123456\""))
        .and(body_string_contains("\"validationId\":\"98765\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "fresh-token",
            "expirationTime": "2024-05-01T12:00:00.000Z"
        })))
        .mount(&server)
        .await;

    let client = BoldClient::new(server.uri());
    let auth = client
        .authenticate("user@example.com", "hunter2", "123456", "98765")
        .await
        .unwrap();

    assert_eq!(auth.token, "fresh-token");
    assert_eq!(auth.expiration_time, "2024-05-01T12:00:00.000Z");
    assert_eq!(client.session_token().as_deref(), Some("fresh-token"));
}

#[tokio::test]
async fn test_authenticate_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/authentications"))
        .and(body_string_contains("\"verificationCode\":\"000000\""))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/authentications"))
        .and(body_string_contains("\"password\":\"wrong\""))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = BoldClient::new(server.uri());
    assert!(matches!(
        client.authenticate("a@b.c", "pw", "000000", "1").await,
        Err(ApiError::VerificationNotFound)
    ));
    assert!(matches!(
        client.authenticate("a@b.c", "wrong", "111111", "1").await,
        Err(ApiError::AuthenticateFailed)
    ));
    assert!(client.session_token().is_none());
}

#[tokio::test]
async fn test_re_login() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v2/authentications/session-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "renewed-token",
            "expirationTime": "2024-06-01T00:00:00.000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = logged_in_client(&server).await;
    let auth = client.re_login().await.unwrap();

    assert_eq!(auth.token, "renewed-token");
    assert_eq!(client.session_token().as_deref(), Some("renewed-token"));
}

#[tokio::test]
async fn test_re_login_without_token() {
    let server = MockServer::start().await;
    let client = BoldClient::new(server.uri());

    assert!(matches!(
        client.re_login().await,
        Err(ApiError::TokenMissing)
    ));
}

// ============================================================================
// Devices
// ============================================================================

#[tokio::test]
async fn test_get_device_permissions_sends_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/effective-device-permissions"))
        .and(header("Authorization", "Bearer session-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 1,
                "name": "Front Door",
                "type": { "id": 1 },
                "model": { "id": 3, "model": "SX-33", "make": "Bold" },
                "permissionRemoteActivate": true,
                "actualFirmwareVersion": 12,
                "requiredFirmwareVersion": 12,
                "batteryLevel": 90,
                "gateway": { "gatewayId": 2 }
            },
            {
                "id": 2,
                "name": "Bold Connect",
                "type": { "id": 2 },
                "permissionRemoteActivate": true
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = logged_in_client(&server).await;
    let devices = client.get_device_permissions().await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].kind(), Some(DeviceType::Lock));
    assert_eq!(devices[0].gateway_id(), Some(2));
    assert_eq!(devices[1].kind(), Some(DeviceType::Gateway));
}

#[tokio::test]
async fn test_get_device_permissions_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/effective-device-permissions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = logged_in_client(&server).await;
    assert!(matches!(
        client.get_device_permissions().await,
        Err(ApiError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_get_device_permissions_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/effective-device-permissions"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let client = logged_in_client(&server).await;
    let err = client.get_device_permissions().await.unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, ApiError::Status { status: 502, .. }));
}

#[tokio::test]
async fn test_remote_activation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/devices/42/remote-activation"))
        .and(header("Authorization", "Bearer session-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "activationTime": 7,
            "startTime": "2024-01-01T00:00:00.000Z",
            "endTime": "2024-01-01T00:00:07.000Z"
        })))
        .mount(&server)
        .await;

    let client = logged_in_client(&server).await;
    let activation = client.remote_activation(42).await.unwrap();
    assert_eq!(activation.activation_time, 7);
}

#[tokio::test]
async fn test_remote_activation_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/devices/1/remote-activation"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/devices/2/remote-activation"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = logged_in_client(&server).await;
    assert!(matches!(
        client.remote_activation(1).await,
        Err(ApiError::TooManyRequests)
    ));
    assert!(matches!(
        client.remote_activation(2).await,
        Err(ApiError::GatewayNotFound)
    ));
}

#[tokio::test]
async fn test_remote_deactivation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/devices/42/remote-deactivation"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/devices/43/remote-deactivation"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let client = logged_in_client(&server).await;
    assert!(client.remote_deactivation(42).await.unwrap());
    assert!(matches!(
        client.remote_deactivation(43).await,
        Err(ApiError::DeviceFirmwareOutdated)
    ));
}

#[tokio::test]
async fn test_requests_without_token_fail_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = BoldClient::new(server.uri());
    assert!(matches!(
        client.get_device_permissions().await,
        Err(ApiError::TokenMissing)
    ));
}

// ============================================================================
// OAuth2
// ============================================================================

#[tokio::test]
async fn test_oauth_exchange_and_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .and(body_string_contains("client_id=cid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let oauth = OAuth2Client::new("cid", "csecret").with_urls(
        format!("{}/authorize", server.uri()),
        format!("{}/v2/oauth/token", server.uri()),
    );

    let token = oauth
        .exchange_code("auth-code", "http://localhost/cb")
        .await
        .unwrap();
    assert_eq!(token.access_token, "access-1");
    assert_eq!(token.expires_in, 3600);

    let refreshed = oauth.refresh("refresh-1").await.unwrap();
    assert_eq!(refreshed.access_token, "access-2");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_oauth_refresh_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let oauth = OAuth2Client::new("cid", "csecret")
        .with_urls(server.uri(), format!("{}/v2/oauth/token", server.uri()));
    assert!(matches!(
        oauth.refresh("stale").await,
        Err(ApiError::Unauthorized)
    ));
}
