//! Entity setup for the lock and button platforms
//!
//! Devices come from the coordinator's first snapshot. Gateways register
//! before locks so each lock's device resolves its parent gateway.

use std::sync::Arc;

use bold_api::{DevicePermission, DeviceType};
use bold_core::platforms;
use bold_registries::{DisabledBy, Registries};
use tracing::{debug, warn};

use crate::button::BoldActivationButton;
use crate::consts::DOMAIN;
use crate::entity::{BoldEntity, EntityContext};
use crate::lock::BoldLockEntity;

/// Lock entities for every remotely controllable gateway and lock.
///
/// Gateways register disabled; an entity the user disabled is registered
/// but not added.
pub fn setup_locks(
    entry_id: &str,
    ctx: &EntityContext,
    registries: &Registries,
    snapshot: &[DevicePermission],
) -> Vec<Arc<BoldLockEntity>> {
    let mut entities = Vec::new();

    for kind in [DeviceType::Gateway, DeviceType::Lock] {
        for device in snapshot.iter().filter(|d| d.is_remote_controllable(kind)) {
            let Some(suggested) = BoldLockEntity::suggested_entity_id(device) else {
                warn!(device_id = device.id, "no usable entity id for device");
                continue;
            };

            let device_entry = registries
                .devices
                .get_or_create(entry_id, &BoldLockEntity::device_info_for(kind, device));
            let disabled_by = match kind {
                DeviceType::Gateway => Some(DisabledBy::Integration),
                DeviceType::Lock => None,
            };
            let registered = registries.entities.get_or_create(
                platforms::LOCK,
                DOMAIN,
                &device.id.to_string(),
                &suggested,
                Some(entry_id),
                Some(&device_entry.id),
                disabled_by,
            );

            if registered.is_disabled() {
                debug!(entity_id = %registered.entity_id, "entity disabled, not adding");
                continue;
            }

            let entity = Arc::new(BoldLockEntity::new(
                kind,
                registered.entity_id,
                device.clone(),
                ctx.clone(),
            ));
            entity.write_state();
            entities.push(entity);
        }
    }

    debug!(entry_id, count = entities.len(), "lock entities added");
    entities
}

/// Activation buttons for every remotely controllable lock
pub fn setup_buttons(
    entry_id: &str,
    ctx: &EntityContext,
    registries: &Registries,
    snapshot: &[DevicePermission],
) -> Vec<Arc<BoldActivationButton>> {
    let mut buttons = Vec::new();

    for device in snapshot
        .iter()
        .filter(|d| d.is_remote_controllable(DeviceType::Lock))
    {
        let Some(suggested) = BoldActivationButton::suggested_entity_id(device) else {
            warn!(device_id = device.id, "no usable entity id for device");
            continue;
        };

        let device_entry = registries.devices.get_or_create(
            entry_id,
            &BoldLockEntity::device_info_for(DeviceType::Lock, device),
        );
        let registered = registries.entities.get_or_create(
            platforms::BUTTON,
            DOMAIN,
            &BoldActivationButton::unique_id_for(device),
            &suggested,
            Some(entry_id),
            Some(&device_entry.id),
            None,
        );

        if registered.is_disabled() {
            debug!(entity_id = %registered.entity_id, "entity disabled, not adding");
            continue;
        }

        let button = Arc::new(BoldActivationButton::new(
            registered.entity_id,
            device.clone(),
            ctx.clone(),
        ));
        button.write_state();
        buttons.push(button);
    }

    debug!(entry_id, count = buttons.len(), "activation buttons added");
    buttons
}
