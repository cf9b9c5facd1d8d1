//! Entity Registry
//!
//! Maps `(domain, platform, unique_id)` to a stable entity id so that lock
//! and gateway entities keep their ids across restarts. Entries also carry
//! the owning config entry and device, and whether the entity is disabled.

use std::sync::Arc;

use bold_core::EntityId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{string_or_number, Storable, Storage, StorageResult};

/// Reason an entity was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledBy {
    ConfigEntry,
    Device,
    /// Disabled by the integration (gateways start this way)
    Integration,
    User,
}

/// A registered entity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal ULID
    pub id: String,
    pub entity_id: EntityId,
    /// Platform-specific unique identifier
    ///
    /// Older stores hold numeric device ids here; they load as strings.
    #[serde(default, deserialize_with = "string_or_number")]
    pub unique_id: Option<String>,
    /// Integration that provides the entity
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    fn unique_key(&self) -> Option<String> {
        self.unique_id
            .as_deref()
            .map(|uid| unique_key(self.entity_id.domain(), &self.platform, uid))
    }
}

fn unique_key(domain: &str, platform: &str, unique_id: &str) -> String {
    format!("{domain}\u{0}{platform}\u{0}{unique_id}")
}

/// Persisted registry contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    pub entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = "bold.entity_registry";
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 2;
}

/// Entity registry with lookups by entity id, unique id and config entry
pub struct EntityRegistry {
    storage: Arc<Storage>,
    by_entity_id: DashMap<String, EntityEntry>,
    /// (domain, platform, unique_id) -> entity_id
    by_unique_id: DashMap<String, String>,
}

impl EntityRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_entity_id: DashMap::new(),
            by_unique_id: DashMap::new(),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.storage.load_data::<EntityRegistryData>().await? else {
            debug!("no entity registry found, starting empty");
            return Ok(());
        };

        info!(count = data.entities.len(), "loading entity registry");
        for entry in data.entities {
            self.index(entry);
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let mut entities: Vec<EntityEntry> =
            self.by_entity_id.iter().map(|e| e.value().clone()).collect();
        entities.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        self.storage
            .save_data(&EntityRegistryData { entities })
            .await?;
        debug!(count = self.by_entity_id.len(), "saved entity registry");
        Ok(())
    }

    fn index(&self, entry: EntityEntry) {
        if let Some(key) = entry.unique_key() {
            self.by_unique_id.insert(key, entry.entity_id.to_string());
        }
        self.by_entity_id.insert(entry.entity_id.to_string(), entry);
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<EntityEntry> {
        self.by_entity_id
            .get(&entity_id.to_string())
            .map(|e| e.value().clone())
    }

    pub fn get_entity_id(&self, domain: &str, platform: &str, unique_id: &str) -> Option<EntityId> {
        let entity_id = self
            .by_unique_id
            .get(&unique_key(domain, platform, unique_id))?
            .value()
            .clone();
        self.by_entity_id
            .get(&entity_id)
            .map(|e| e.entity_id.clone())
    }

    /// Return the registered entry for a unique id, registering it under
    /// `suggested` (suffixed `_2`, `_3`, ... on collision) when unknown.
    ///
    /// `disabled_by` only applies to new registrations; an existing entry
    /// keeps whatever the user set.
    #[allow(clippy::too_many_arguments)]
    pub fn get_or_create(
        &self,
        domain: &str,
        platform: &str,
        unique_id: &str,
        suggested: &EntityId,
        config_entry_id: Option<&str>,
        device_id: Option<&str>,
        disabled_by: Option<DisabledBy>,
    ) -> EntityEntry {
        if let Some(entity_id) = self.get_entity_id(domain, platform, unique_id) {
            if let Some(mut entry) = self.by_entity_id.get_mut(&entity_id.to_string()) {
                let device_id = device_id.map(str::to_string);
                let config_entry_id = config_entry_id.map(str::to_string);
                if entry.device_id != device_id || entry.config_entry_id != config_entry_id {
                    entry.device_id = device_id;
                    entry.config_entry_id = config_entry_id;
                    entry.modified_at = Utc::now();
                }
                return entry.clone();
            }
        }

        let entity_id = self.free_entity_id(suggested);
        let now = Utc::now();
        let entry = EntityEntry {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id,
            unique_id: Some(unique_id.to_string()),
            platform: platform.to_string(),
            config_entry_id: config_entry_id.map(str::to_string),
            device_id: device_id.map(str::to_string),
            disabled_by,
            created_at: now,
            modified_at: now,
        };

        info!(entity_id = %entry.entity_id, unique_id, "registered entity");
        self.index(entry.clone());
        entry
    }

    fn free_entity_id(&self, suggested: &EntityId) -> EntityId {
        if !self.by_entity_id.contains_key(&suggested.to_string()) {
            return suggested.clone();
        }
        (2..)
            .filter_map(|n| {
                EntityId::new(suggested.domain(), format!("{}_{n}", suggested.object_id())).ok()
            })
            .find(|candidate| !self.by_entity_id.contains_key(&candidate.to_string()))
            .unwrap_or_else(|| suggested.clone())
    }

    pub fn entries_for_config_entry(&self, config_entry_id: &str) -> Vec<EntityEntry> {
        self.by_entity_id
            .iter()
            .filter(|e| e.config_entry_id.as_deref() == Some(config_entry_id))
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn set_disabled_by(
        &self,
        entity_id: &EntityId,
        disabled_by: Option<DisabledBy>,
    ) -> Option<EntityEntry> {
        let mut entry = self.by_entity_id.get_mut(&entity_id.to_string())?;
        entry.disabled_by = disabled_by;
        entry.modified_at = Utc::now();
        Some(entry.clone())
    }

    pub fn remove(&self, entity_id: &EntityId) -> Option<EntityEntry> {
        let (_, entry) = self.by_entity_id.remove(&entity_id.to_string())?;
        if let Some(key) = entry.unique_key() {
            self.by_unique_id.remove(&key);
        }
        debug!(entity_id = %entity_id, "removed entity");
        Some(entry)
    }

    /// Drop every entity owned by a config entry
    pub fn remove_config_entry(&self, config_entry_id: &str) -> usize {
        let owned = self.entries_for_config_entry(config_entry_id);
        for entry in &owned {
            self.remove(&entry.entity_id);
        }
        owned.len()
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity_id.is_empty()
    }
}
