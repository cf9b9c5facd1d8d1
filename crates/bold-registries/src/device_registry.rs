//! Device Registry
//!
//! One record per physical lock or gateway, keyed by its `(bold, id)`
//! identifier. Locks point at their gateway through `via_device_id`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

/// A device identifier `(domain, id)`
///
/// Serialized as a two-element array. The id may be a JSON number on disk
/// (device ids are numeric in the vendor API) and is kept as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl<'de> Deserialize<'de> for DeviceIdentifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, SeqAccess, Visitor};

        struct DeviceIdentifierVisitor;

        impl<'de> Visitor<'de> for DeviceIdentifierVisitor {
            type Value = DeviceIdentifier;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a [domain, id] pair")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let domain: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let id = match seq.next_element::<serde_json::Value>()? {
                    Some(serde_json::Value::String(s)) => s,
                    Some(serde_json::Value::Number(n)) => n.to_string(),
                    Some(_) => return Err(de::Error::custom("id must be string or number")),
                    None => return Err(de::Error::invalid_length(1, &self)),
                };
                if seq.next_element::<serde_json::Value>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }

                Ok(DeviceIdentifier(domain, id))
            }
        }

        deserializer.deserialize_seq(DeviceIdentifierVisitor)
    }
}

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// Device description reported by an entity
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceInfo {
    pub identifiers: Vec<DeviceIdentifier>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    /// Parent device, registered first
    pub via_device: Option<DeviceIdentifier>,
}

impl DeviceInfo {
    pub fn new(identifier: DeviceIdentifier, name: impl Into<String>) -> Self {
        Self {
            identifiers: vec![identifier],
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn sw_version(mut self, sw_version: Option<String>) -> Self {
        self.sw_version = sw_version;
        self
    }

    pub fn via_device(mut self, via_device: Option<DeviceIdentifier>) -> Self {
        self.via_device = via_device;
        self
    }
}

/// A registered device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal UUID (hex, no dashes)
    pub id: String,
    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,
    #[serde(default)]
    pub config_entries: HashSet<String>,
    pub name: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sw_version: Option<String>,
    #[serde(default)]
    pub via_device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Persisted registry contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryData {
    pub devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = "bold.device_registry";
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 1;
}

pub struct DeviceRegistry {
    storage: Arc<Storage>,
    by_id: DashMap<String, DeviceEntry>,
    /// identifier key -> device id
    by_identifier: DashMap<String, String>,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_id: DashMap::new(),
            by_identifier: DashMap::new(),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        let Some(data) = self.storage.load_data::<DeviceRegistryData>().await? else {
            debug!("no device registry found, starting empty");
            return Ok(());
        };

        info!(count = data.devices.len(), "loading device registry");
        for device in data.devices {
            self.index(device);
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let mut devices: Vec<DeviceEntry> = self.by_id.iter().map(|e| e.value().clone()).collect();
        devices.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        self.storage.save_data(&DeviceRegistryData { devices }).await
    }

    fn index(&self, device: DeviceEntry) {
        for identifier in &device.identifiers {
            self.by_identifier.insert(identifier.key(), device.id.clone());
        }
        self.by_id.insert(device.id.clone(), device);
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceEntry> {
        self.by_id.get(device_id).map(|e| e.value().clone())
    }

    pub fn get_by_identifier(&self, identifier: &DeviceIdentifier) -> Option<DeviceEntry> {
        let device_id = self.by_identifier.get(&identifier.key())?.value().clone();
        self.get(&device_id)
    }

    /// Register a device or refresh the stored info of an existing one.
    ///
    /// `via_device` resolves only if the parent is already registered.
    pub fn get_or_create(&self, config_entry_id: &str, info: &DeviceInfo) -> DeviceEntry {
        let via_device_id = info
            .via_device
            .as_ref()
            .and_then(|parent| self.get_by_identifier(parent))
            .map(|parent| parent.id);

        let existing = info
            .identifiers
            .iter()
            .find_map(|identifier| self.get_by_identifier(identifier));

        let device = match existing {
            Some(mut device) => {
                device.config_entries.insert(config_entry_id.to_string());
                device.name = info.name.clone();
                device.manufacturer = info.manufacturer.clone();
                device.model = info.model.clone();
                device.sw_version = info.sw_version.clone();
                device.via_device_id = via_device_id;
                for identifier in &info.identifiers {
                    if !device.identifiers.contains(identifier) {
                        device.identifiers.push(identifier.clone());
                    }
                }
                device.modified_at = Utc::now();
                device
            }
            None => {
                let now = Utc::now();
                let device = DeviceEntry {
                    id: uuid::Uuid::new_v4().simple().to_string(),
                    identifiers: info.identifiers.clone(),
                    config_entries: HashSet::from([config_entry_id.to_string()]),
                    name: info.name.clone(),
                    manufacturer: info.manufacturer.clone(),
                    model: info.model.clone(),
                    sw_version: info.sw_version.clone(),
                    via_device_id,
                    created_at: now,
                    modified_at: now,
                };
                info!(device_id = %device.id, name = %device.name, "registered device");
                device
            }
        };

        self.index(device.clone());
        device
    }

    /// Detach a config entry; devices left without entries are removed
    pub fn remove_config_entry(&self, config_entry_id: &str) -> usize {
        let owned: Vec<String> = self
            .by_id
            .iter()
            .filter(|e| e.config_entries.contains(config_entry_id))
            .map(|e| e.id.clone())
            .collect();

        let mut removed = 0;
        for device_id in owned {
            let orphaned = match self.by_id.get_mut(&device_id) {
                Some(mut device) => {
                    device.config_entries.remove(config_entry_id);
                    device.config_entries.is_empty()
                }
                None => false,
            };
            if orphaned {
                if let Some((_, device)) = self.by_id.remove(&device_id) {
                    for identifier in &device.identifiers {
                        self.by_identifier.remove(&identifier.key());
                    }
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
