//! Lock platform: Bold locks and Bold Connect gateways

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bold_api::{ApiError, DevicePermission, DeviceType};
use bold_core::{platforms, states, EntityId};
use bold_registries::{DeviceIdentifier, DeviceInfo};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::consts::{
    ATTR_BATTERY_LAST_MEASUREMENT, ATTR_BATTERY_LEVEL, ATTR_DEVICE_ID, ATTR_FRIENDLY_NAME,
    ATTR_GATEWAY_ID, ATTR_UPDATE_AVAILABLE, DOMAIN, MANUFACTURER,
};
use crate::entity::{ActivationWindow, BoldEntity, EntityContext};
use crate::error::{EntityError, EntityResult};

const TOO_MANY_REQUESTS: &str = "The user has sent too many requests in a given amount of time.";

/// A lock or gateway that can be remotely activated
pub struct BoldLockEntity {
    kind: DeviceType,
    entity_id: EntityId,
    unique_id: String,
    ctx: EntityContext,
    device: RwLock<DevicePermission>,
    window: ActivationWindow,
}

impl BoldLockEntity {
    pub fn new(
        kind: DeviceType,
        entity_id: EntityId,
        device: DevicePermission,
        ctx: EntityContext,
    ) -> Self {
        Self {
            kind,
            entity_id,
            unique_id: device.id.to_string(),
            window: ActivationWindow::new(ctx.clock.clone()),
            device: RwLock::new(device),
            ctx,
        }
    }

    /// Entity id suggested for a device before registry de-duplication
    pub fn suggested_entity_id(device: &DevicePermission) -> Option<EntityId> {
        EntityId::from_name(platforms::LOCK, &device.name, &format!("bold {}", device.id)).ok()
    }

    pub fn kind(&self) -> DeviceType {
        self.kind
    }

    fn device(&self) -> DevicePermission {
        self.device.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_locked(&self) -> bool {
        !self.window.is_open()
    }

    /// Reachable through a gateway
    pub fn available(&self) -> bool {
        self.device
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .gateway_id()
            .is_some()
    }

    pub fn unlock_end_time(&self) -> DateTime<Utc> {
        self.window.end()
    }

    pub fn device_info(&self) -> DeviceInfo {
        Self::device_info_for(self.kind, &self.device())
    }

    /// Registry description of a device; locks hang off their gateway
    pub fn device_info_for(kind: DeviceType, device: &DevicePermission) -> DeviceInfo {
        let via_device = match kind {
            DeviceType::Lock => device
                .gateway_id()
                .map(|id| DeviceIdentifier::new(DOMAIN, id.to_string())),
            DeviceType::Gateway => None,
        };

        DeviceInfo::new(DeviceIdentifier::new(DOMAIN, device.id.to_string()), &device.name)
            .manufacturer(MANUFACTURER)
            .model(device.model_name().map(str::to_string))
            .sw_version(device.actual_firmware_version.map(|v| v.to_string()))
            .via_device(via_device)
    }

    #[instrument(skip(self), fields(entity_id = %self.entity_id))]
    pub async fn unlock(self: &Arc<Self>) -> EntityResult<()> {
        let response = self
            .ctx
            .coordinator
            .remote_activation(self.device_id())
            .await
            .map_err(|e| self.unlock_error(e))?;

        let entity = Arc::downgrade(self);
        self.window
            .open(response.activation_time, move || {
                if let Some(entity) = entity.upgrade() {
                    entity.write_state();
                }
            })
            .map_err(|e| self.unlock_error(e))?;
        self.write_state();

        debug!(
            seconds = response.activation_time,
            "Lock deactivated, scheduled activation of lock"
        );
        Ok(())
    }

    #[instrument(skip(self), fields(entity_id = %self.entity_id))]
    pub async fn lock(&self) -> EntityResult<()> {
        let deactivated = self
            .ctx
            .coordinator
            .remote_deactivation(self.device_id())
            .await
            .map_err(|e| self.lock_error(e))?;

        if deactivated {
            self.window.close();
            self.write_state();
            debug!("Lock activated");
        }
        Ok(())
    }

    fn unlock_error(&self, error: ApiError) -> EntityError {
        let name = self.name();
        let message = match (&error, self.kind) {
            (ApiError::TooManyRequests, _) => TOO_MANY_REQUESTS.to_string(),
            (ApiError::GatewayNotFound, DeviceType::Lock) => {
                format!("No available gateway for device '{name}' found.")
            }
            _ => format!("Error while unlocking: {name}"),
        };
        EntityError::action(message, error)
    }

    fn lock_error(&self, error: ApiError) -> EntityError {
        let name = self.name();
        let message = match (&error, self.kind) {
            (ApiError::TooManyRequests, _) => TOO_MANY_REQUESTS.to_string(),
            (ApiError::DeviceFirmwareOutdated, _) => {
                format!("Update the firmware of your Bold device '{name}' to enable deactivating.")
            }
            (ApiError::GatewayNotFound, DeviceType::Lock) => {
                format!("No available gateway for device '{name}' found.")
            }
            _ => format!("Error while locking: {name}"),
        };
        EntityError::action(message, error)
    }
}

impl BoldEntity for BoldLockEntity {
    fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn device_id(&self) -> u64 {
        self.device.read().unwrap_or_else(|e| e.into_inner()).id
    }

    fn name(&self) -> String {
        self.device
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .name
            .clone()
    }

    fn state(&self) -> String {
        let state = if !self.available() {
            states::UNAVAILABLE
        } else if self.is_locked() {
            states::LOCKED
        } else {
            states::UNLOCKED
        };
        state.to_string()
    }

    fn attributes(&self) -> HashMap<String, Value> {
        let device = self.device();
        let mut attributes = HashMap::from([
            (ATTR_FRIENDLY_NAME.to_string(), json!(device.name)),
            (ATTR_DEVICE_ID.to_string(), json!(self.unique_id)),
            (
                ATTR_UPDATE_AVAILABLE.to_string(),
                json!(device.update_available()),
            ),
        ]);

        if self.kind == DeviceType::Lock {
            attributes.insert(
                ATTR_BATTERY_LAST_MEASUREMENT.to_string(),
                json!(device.battery_last_measurement),
            );
            attributes.insert(
                ATTR_BATTERY_LEVEL.to_string(),
                json!(device.battery_level.unwrap_or(0)),
            );
            attributes.insert(ATTR_GATEWAY_ID.to_string(), json!(device.gateway_id()));
        }
        attributes
    }

    fn context(&self) -> &EntityContext {
        &self.ctx
    }

    fn set_device(&self, device: DevicePermission) {
        *self.device.write().unwrap_or_else(|e| e.into_inner()) = device;
    }

    fn shutdown(&self) {
        self.window.cancel();
    }
}
