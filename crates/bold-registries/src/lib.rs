//! Registries for the Bold integration host
//!
//! - [`EntityRegistry`] maps each entity's unique id to its entity id,
//!   config entry and device, and remembers whether it is disabled.
//! - [`DeviceRegistry`] keeps the device info (manufacturer, model,
//!   firmware, parent gateway) reported for every lock and gateway.
//!
//! Both persist through [`Storage`], the `.storage/` JSON directory that
//! also holds the config entries.

pub mod device_registry;
pub mod entity_registry;
pub mod storage;

pub use device_registry::{
    DeviceEntry, DeviceIdentifier, DeviceInfo, DeviceRegistry, DeviceRegistryData,
};
pub use entity_registry::{DisabledBy, EntityEntry, EntityRegistry, EntityRegistryData};
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};

use std::sync::Arc;

/// Entity and device registries sharing one storage directory
pub struct Registries {
    pub storage: Arc<Storage>,
    pub entities: EntityRegistry,
    pub devices: DeviceRegistry,
}

impl Registries {
    pub fn new(config_dir: impl AsRef<std::path::Path>) -> Self {
        let storage = Arc::new(Storage::new(config_dir));

        Self {
            entities: EntityRegistry::new(storage.clone()),
            devices: DeviceRegistry::new(storage.clone()),
            storage,
        }
    }

    pub async fn load_all(&self) -> StorageResult<()> {
        self.entities.load().await?;
        self.devices.load().await?;
        Ok(())
    }

    pub async fn save_all(&self) -> StorageResult<()> {
        self.entities.save().await?;
        self.devices.save().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bold_core::EntityId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_registries_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let registries = Registries::new(temp_dir.path());

        let device = registries.devices.get_or_create(
            "entry-1",
            &DeviceInfo::new(DeviceIdentifier::new("bold", "12"), "Front Door"),
        );
        let entity = registries.entities.get_or_create(
            "lock",
            "bold",
            "12",
            &EntityId::new("lock", "front_door").unwrap(),
            Some("entry-1"),
            Some(&device.id),
            None,
        );

        registries.save_all().await.unwrap();

        let reloaded = Registries::new(temp_dir.path());
        reloaded.load_all().await.unwrap();

        assert_eq!(reloaded.entities.len(), 1);
        assert_eq!(reloaded.devices.len(), 1);
        let loaded = reloaded.entities.get(&entity.entity_id).unwrap();
        assert_eq!(loaded.device_id.as_deref(), Some(device.id.as_str()));
    }
}
