//! In-memory [`BoldApi`] for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bold_api::{
    ActivationResponse, ApiError, ApiResult, AuthenticationResponse, BoldApi, DeviceGateway,
    DeviceModel, DevicePermission, DeviceTypeInfo,
};

pub(crate) fn lock_device(id: u64, name: &str, gateway_id: Option<u64>) -> DevicePermission {
    DevicePermission {
        id,
        name: name.to_string(),
        device_type: DeviceTypeInfo { id: 1 },
        model: Some(DeviceModel {
            id: Some(3),
            model: Some("SX-33".to_string()),
            make: Some("Bold".to_string()),
        }),
        permission_remote_activate: true,
        actual_firmware_version: Some(89),
        required_firmware_version: Some(90),
        battery_level: Some(84),
        battery_last_measurement: Some("2024-05-01T10:00:00.000Z".to_string()),
        gateway: gateway_id.map(|gateway_id| DeviceGateway {
            gateway_id: Some(gateway_id),
        }),
    }
}

pub(crate) fn gateway_device(id: u64, name: &str) -> DevicePermission {
    DevicePermission {
        id,
        name: name.to_string(),
        device_type: DeviceTypeInfo { id: 2 },
        model: Some(DeviceModel {
            id: Some(4),
            model: Some("Connect".to_string()),
            make: Some("Bold".to_string()),
        }),
        permission_remote_activate: true,
        actual_firmware_version: Some(12),
        required_firmware_version: Some(12),
        battery_level: None,
        battery_last_measurement: None,
        gateway: Some(DeviceGateway {
            gateway_id: Some(id),
        }),
    }
}

#[derive(Default)]
pub(crate) struct MockApi {
    devices: Mutex<Vec<DevicePermission>>,
    permission_errors: Mutex<VecDeque<ApiError>>,
    activation_errors: Mutex<VecDeque<ApiError>>,
    deactivation_errors: Mutex<VecDeque<ApiError>>,
    relogin_results: Mutex<VecDeque<ApiResult<AuthenticationResponse>>>,
    deactivation_result: Mutex<Option<bool>>,
    activation_time: Mutex<Option<u64>>,
    tokens: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
    relogin_delay: Mutex<Duration>,
    permission_calls: AtomicUsize,
    activation_calls: AtomicUsize,
    deactivation_calls: AtomicUsize,
    relogin_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_devices(&self, devices: Vec<DevicePermission>) {
        *self.devices.lock().unwrap() = devices;
    }

    /// Fail the next permissions fetch
    pub fn fail_permissions(&self, error: ApiError) {
        self.permission_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_activation(&self, error: ApiError) {
        self.activation_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_deactivation(&self, error: ApiError) {
        self.deactivation_errors.lock().unwrap().push_back(error);
    }

    pub fn set_deactivation_result(&self, result: bool) {
        *self.deactivation_result.lock().unwrap() = Some(result);
    }

    pub fn set_activation_time(&self, seconds: u64) {
        *self.activation_time.lock().unwrap() = Some(seconds);
    }

    /// Queue the outcome of the next re-login
    pub fn push_relogin(&self, result: ApiResult<AuthenticationResponse>) {
        self.relogin_results.lock().unwrap().push_back(result);
    }

    /// Every API call sleeps this long
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Re-logins sleep this long before answering
    pub fn set_relogin_delay(&self, delay: Duration) {
        *self.relogin_delay.lock().unwrap() = delay;
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn permission_calls(&self) -> usize {
        self.permission_calls.load(Ordering::SeqCst)
    }

    pub fn activation_calls(&self) -> usize {
        self.activation_calls.load(Ordering::SeqCst)
    }

    pub fn deactivation_calls(&self) -> usize {
        self.deactivation_calls.load(Ordering::SeqCst)
    }

    pub fn relogin_calls(&self) -> usize {
        self.relogin_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BoldApi for MockApi {
    async fn get_device_permissions(&self) -> ApiResult<Vec<DevicePermission>> {
        self.permission_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await;
        let result = match self.permission_errors.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(self.devices.lock().unwrap().clone()),
        };
        self.leave();
        result
    }

    async fn remote_activation(&self, _device_id: u64) -> ApiResult<ActivationResponse> {
        self.activation_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await;
        let result = match self.activation_errors.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(ActivationResponse {
                activation_time: self.activation_time.lock().unwrap().unwrap_or(7),
                start_time: None,
                end_time: None,
            }),
        };
        self.leave();
        result
    }

    async fn remote_deactivation(&self, _device_id: u64) -> ApiResult<bool> {
        self.deactivation_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await;
        let result = match self.deactivation_errors.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(self.deactivation_result.lock().unwrap().unwrap_or(true)),
        };
        self.leave();
        result
    }

    async fn re_login(&self) -> ApiResult<AuthenticationResponse> {
        self.relogin_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.relogin_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let queued = self.relogin_results.lock().unwrap().pop_front();
        let response = queued.unwrap_or_else(|| {
            Ok(AuthenticationResponse {
                token: "refreshed-token".to_string(),
                expiration_time: "2099-01-01T00:00:00.000Z".to_string(),
            })
        })?;
        self.set_token(&response.token);
        Ok(response)
    }

    fn set_token(&self, token: &str) {
        self.tokens.lock().unwrap().push(token.to_string());
    }
}
