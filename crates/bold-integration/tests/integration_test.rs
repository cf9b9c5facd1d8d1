//! End-to-end: config flow login, entry setup and remote actions against a
//! mock Bold API.

use std::sync::Arc;

use bold_config_entries::{ConfigEntries, ConfigEntryState};
use bold_core::{states, SystemClock};
use bold_event_bus::EventBus;
use bold_integration::consts::{CONF_EXPIRATION_TIME, CONF_TOKEN};
use bold_integration::{BoldIntegration, ConfigFlowHandler, EntityError, IntegrationConfig};
use bold_registries::Registries;
use bold_state_store::StateStore;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Host {
    _dir: TempDir,
    server: MockServer,
    entries: Arc<ConfigEntries>,
    states: Arc<StateStore>,
    integration: Arc<BoldIntegration>,
}

async fn host() -> Host {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let registries = Arc::new(Registries::new(dir.path()));
    let entries = Arc::new(ConfigEntries::new(registries.storage.clone()));
    let clock = Arc::new(SystemClock);
    let states = Arc::new(StateStore::new(Arc::new(EventBus::new()), clock.clone()));

    let config = IntegrationConfig {
        api_base_url: server.uri(),
        platforms: vec!["lock".into(), "button".into()],
        ..Default::default()
    };
    let integration = Arc::new(BoldIntegration::new(
        config,
        entries.clone(),
        registries,
        states.clone(),
        clock,
    ));
    integration.register();

    Host {
        _dir: dir,
        server,
        entries,
        states,
        integration,
    }
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v2/validations"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": 11, "email": "me@example.com"})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/authentications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "session-token",
            "expirationTime": "2099-01-01T00:00:00.000Z",
        })))
        .mount(server)
        .await;
}

async fn mount_devices(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/effective-device-permissions"))
        .and(header("authorization", "Bearer session-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 1,
                "name": "Hallway Connect",
                "type": {"id": 2},
                "model": {"id": 4, "model": "Connect", "make": "Bold"},
                "permissionRemoteActivate": true,
                "actualFirmwareVersion": 12,
                "requiredFirmwareVersion": 12,
                "gateway": {"gatewayId": 1}
            },
            {
                "id": 2,
                "name": "Front door",
                "type": {"id": 1},
                "model": {"id": 3, "model": "SX-33", "make": "Bold"},
                "permissionRemoteActivate": true,
                "actualFirmwareVersion": 89,
                "requiredFirmwareVersion": 90,
                "batteryLevel": 84,
                "batteryLastMeasurement": "2024-05-01T10:00:00.000Z",
                "gateway": {"gatewayId": 1}
            }
        ])))
        .mount(server)
        .await;
}

async fn login(host: &Host) -> String {
    let flows = host.integration.flow_manager();
    let start = flows.start_flow("bold", false).await.unwrap();
    flows
        .progress_flow(&start.flow_id, Some(json!({"email": "me@example.com"})))
        .await
        .unwrap();
    let done = flows
        .progress_flow(
            &start.flow_id,
            Some(json!({"verification_code": "123456", "password": "hunter2"})),
        )
        .await
        .unwrap();
    assert!(done.is_create_entry());
    done.entry_id().unwrap().to_string()
}

#[tokio::test]
async fn test_login_setup_and_unlock() {
    let host = host().await;
    mount_login(&host.server).await;
    mount_devices(&host.server).await;
    Mock::given(method("POST"))
        .and(path("/v1/devices/2/remote-activation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"activationTime": 30})))
        .expect(1)
        .mount(&host.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/devices/2/remote-deactivation"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&host.server)
        .await;

    let entry_id = login(&host).await;
    let entry = host.entries.get(&entry_id).unwrap();
    assert_eq!(entry.data_str(CONF_TOKEN), Some("session-token"));
    assert_eq!(
        entry.data_str(CONF_EXPIRATION_TIME),
        Some("2098-12-31T21:00:00+00:00")
    );

    host.entries.setup(&entry_id).await.unwrap();
    assert_eq!(
        host.entries.get(&entry_id).unwrap().state,
        ConfigEntryState::Loaded
    );

    let front_door = host.states.get("lock.front_door").unwrap();
    assert_eq!(front_door.state, states::LOCKED);
    assert_eq!(front_door.attributes["battery_level"], json!(84));
    assert_eq!(front_door.attributes["update_available"], json!(true));
    assert!(host.states.get("lock.hallway_connect").is_none());

    host.integration.unlock("lock.front_door").await.unwrap();
    assert!(host.states.is_state("lock.front_door", states::UNLOCKED));
    host.integration.lock("lock.front_door").await.unwrap();
    assert!(host.states.is_state("lock.front_door", states::LOCKED));

    host.entries.unload_all().await;
    assert!(host.states.get("lock.front_door").is_none());
}

#[tokio::test]
async fn test_rate_limited_unlock_reports_message() {
    let host = host().await;
    mount_login(&host.server).await;
    mount_devices(&host.server).await;
    Mock::given(method("POST"))
        .and(path("/v1/devices/2/remote-activation"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&host.server)
        .await;

    let entry_id = login(&host).await;
    host.entries.setup(&entry_id).await.unwrap();

    let err = host.integration.unlock("lock.front_door").await.unwrap_err();
    assert!(matches!(err, EntityError::Action { .. }));
    assert_eq!(
        err.to_string(),
        "The user has sent too many requests in a given amount of time."
    );
    assert!(host.states.is_state("lock.front_door", states::LOCKED));

    host.entries.unload_all().await;
}

#[tokio::test]
async fn test_rejected_token_retries_setup() {
    let host = host().await;
    mount_login(&host.server).await;
    Mock::given(method("GET"))
        .and(path("/v1/effective-device-permissions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&host.server)
        .await;

    let entry_id = login(&host).await;
    host.entries.setup(&entry_id).await.unwrap();
    assert_eq!(
        host.entries.get(&entry_id).unwrap().state,
        ConfigEntryState::SetupRetry
    );
    assert!(host.integration.runtime(&entry_id).is_none());
    host.entries.unload(&entry_id).await.unwrap();
}
