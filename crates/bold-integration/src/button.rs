//! Button platform: one activation button per remotely controllable lock
//!
//! Predates the lock platform and stays for installations that use it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bold_api::DevicePermission;
use bold_core::{platforms, states, EntityId};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::consts::{ATTR_FRIENDLY_NAME, ATTR_ICON, ICON_LOCKED, ICON_UNLOCKED};
use crate::entity::{ActivationWindow, BoldEntity, EntityContext};
use crate::error::{EntityError, EntityResult};

pub struct BoldActivationButton {
    entity_id: EntityId,
    unique_id: String,
    ctx: EntityContext,
    device: RwLock<DevicePermission>,
    window: ActivationWindow,
    last_pressed: RwLock<Option<DateTime<Utc>>>,
}

impl BoldActivationButton {
    pub fn new(entity_id: EntityId, device: DevicePermission, ctx: EntityContext) -> Self {
        Self {
            entity_id,
            unique_id: Self::unique_id_for(&device),
            window: ActivationWindow::new(ctx.clock.clone()),
            device: RwLock::new(device),
            ctx,
            last_pressed: RwLock::new(None),
        }
    }

    pub fn unique_id_for(device: &DevicePermission) -> String {
        format!("bold_smart_lock_{}", device.id)
    }

    pub fn suggested_entity_id(device: &DevicePermission) -> Option<EntityId> {
        EntityId::from_name(platforms::BUTTON, &device.name, &format!("bold {}", device.id)).ok()
    }

    pub fn icon(&self) -> &'static str {
        if self.window.is_open() {
            ICON_UNLOCKED
        } else {
            ICON_LOCKED
        }
    }

    pub fn last_pressed(&self) -> Option<DateTime<Utc>> {
        *self.last_pressed.read().unwrap_or_else(|e| e.into_inner())
    }

    #[instrument(skip(self), fields(entity_id = %self.entity_id))]
    pub async fn press(self: &Arc<Self>) -> EntityResult<()> {
        let response = self
            .ctx
            .coordinator
            .remote_activation(self.device_id())
            .await
            .map_err(|e| {
                EntityError::action(format!("Error while activating: {}", self.name()), e)
            })?;

        let button = Arc::downgrade(self);
        self.window
            .open(response.activation_time, move || {
                if let Some(button) = button.upgrade() {
                    button.write_state();
                }
            })
            .map_err(|e| {
                EntityError::action(format!("Error while activating: {}", self.name()), e)
            })?;
        let now = self.ctx.clock.now();
        *self.last_pressed.write().unwrap_or_else(|e| e.into_inner()) = Some(now);
        self.write_state();

        debug!(
            seconds = response.activation_time,
            "Lock deactivated, scheduled activation of lock"
        );
        Ok(())
    }
}

impl BoldEntity for BoldActivationButton {
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

    /// Time of the last press, like any button
    fn state(&self) -> String {
        if !self.ctx.coordinator.last_update_success() {
            return states::UNAVAILABLE.to_string();
        }
        self.last_pressed()
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| states::UNKNOWN.to_string())
    }

    fn attributes(&self) -> HashMap<String, Value> {
        HashMap::from([
            (ATTR_FRIENDLY_NAME.to_string(), json!(self.name())),
            (ATTR_ICON.to_string(), json!(self.icon())),
        ])
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
