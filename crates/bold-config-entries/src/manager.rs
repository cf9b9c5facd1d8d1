//! Config Entries Manager
//!
//! Owns every config entry, persists them, and drives setup and unload
//! through the integration's [`EntrySetup`] hook. Entries whose service is
//! unreachable at setup time are retried with exponential backoff.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bold_core::{events::CONFIG_ENTRY_UPDATED, Context, EventData};
use bold_event_bus::EventBus;
use bold_registries::{Storable, Storage, StorageResult};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::{calculate_retry_delay, InvalidTransition};

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Unload failed: {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Storage error: {0}")]
    Storage(#[from] bold_registries::StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Outcome reported by an integration's setup or unload
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// Temporary failure, setup is retried automatically
    #[error("not ready: {0}")]
    NotReady(String),

    /// Permanent failure, needs user action
    #[error("{0}")]
    Failed(String),
}

/// Integration hook invoked for each entry of its domain
#[async_trait]
pub trait EntrySetup: Send + Sync {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError>;

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError>;
}

/// Payload of `config_entry_updated`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntryUpdatedData {
    pub entry_id: String,
    pub domain: String,
}

impl EventData for ConfigEntryUpdatedData {
    fn event_type() -> &'static str {
        CONFIG_ENTRY_UPDATED
    }
}

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = "bold.config_entries";
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 1;
}

pub struct ConfigEntries {
    storage: Arc<Storage>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup and unload
    setup_lock: Mutex<()>,

    handlers: DashMap<String, Arc<dyn EntrySetup>>,

    /// Pending automatic setup retries by entry_id
    retry_tasks: DashMap<String, JoinHandle<()>>,

    event_bus: Option<Arc<EventBus>>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            handlers: DashMap::new(),
            retry_tasks: DashMap::new(),
            event_bus: None,
        }
    }

    /// Announce data merges as `config_entry_updated` events
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load_data::<ConfigEntriesData>().await? {
            info!(count = data.entries.len(), "loading config entries");
            for entry in data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let mut entries: Vec<ConfigEntry> =
            self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        self.storage.save_data(&ConfigEntriesData { entries }).await?;
        debug!(count = self.entries.len(), "saved config entries");
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());
        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }
        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))?
            .value()
            .clone();
        self.get(&entry_id)
    }

    /// Add a new entry, rejecting a duplicate `(domain, unique_id)`
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            entry_id = %entry.entry_id,
            domain = %entry.domain,
            title = %entry.title,
            "added config entry"
        );
        Ok(entry)
    }

    /// Replace fields of an existing entry
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut updated = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.unindex_entry(&updated);

        if let Some(title) = update.title {
            updated.title = title;
        }
        if let Some(data) = update.data {
            updated.data = data;
        }
        if let Some(unique_id) = update.unique_id {
            updated.unique_id = unique_id;
        }
        if let Some(pref) = update.pref_disable_polling {
            updated.pref_disable_polling = pref;
        }
        updated.modified_at = Utc::now();

        self.index_entry(&updated);
        self.save().await?;
        self.fire_updated(&updated);

        debug!(entry_id, "updated config entry");
        Ok(updated)
    }

    /// Merge keys into the entry's data, keeping keys not mentioned
    pub async fn update_data(
        &self,
        entry_id: &str,
        new_data: HashMap<String, serde_json::Value>,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let updated = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
            entry.data.extend(new_data);
            entry.modified_at = Utc::now();
            entry.clone()
        };

        self.save().await?;
        self.fire_updated(&updated);

        debug!(entry_id, "merged config entry data");
        Ok(updated)
    }

    fn fire_updated(&self, entry: &ConfigEntry) {
        if let Some(bus) = &self.event_bus {
            bus.fire_typed(
                ConfigEntryUpdatedData {
                    entry_id: entry.entry_id.clone(),
                    domain: entry.domain.clone(),
                },
                Context::new(),
            );
        }
    }

    /// Unload (if needed) and delete an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        self.unload(entry_id).await?;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.unindex_entry(&entry);
        self.save().await?;

        info!(entry_id, title = %entry.title, "removed config entry");
        Ok(entry)
    }

    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!(entry_id, ?state, "config entry state changed");
        Ok(())
    }

    pub fn register_setup_handler(&self, domain: &str, handler: Arc<dyn EntrySetup>) {
        self.handlers.insert(domain.to_string(), handler);
        debug!(domain, "registered setup handler");
    }

    pub fn unregister_setup_handler(&self, domain: &str) {
        self.handlers.remove(domain);
    }

    /// Set up an entry; a not-ready outcome schedules automatic retries
    pub async fn setup(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        if let Some((_, task)) = self.retry_tasks.remove(entry_id) {
            task.abort();
        }

        if let Some(delay) = self.attempt_setup(entry_id).await? {
            self.schedule_retry(entry_id, delay);
        }
        Ok(())
    }

    /// One setup attempt; returns the retry delay when not ready
    async fn attempt_setup(&self, entry_id: &str) -> ConfigEntriesResult<Option<Duration>> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.disabled {
            debug!(entry_id, "skipping setup for disabled entry");
            return Ok(None);
        }

        self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let handler = self.handlers.get(&entry.domain).map(|h| h.value().clone());
        let Some(handler) = handler else {
            debug!(domain = %entry.domain, "no setup handler, marking as loaded");
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            return Ok(None);
        };

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        match handler.setup_entry(&entry).await {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!(entry_id, title = %entry.title, "setup completed");
                Ok(None)
            }
            Err(SetupError::NotReady(reason)) => {
                let tries = self
                    .entries
                    .get_mut(entry_id)
                    .map(|mut e| e.increment_tries())
                    .unwrap_or_default();
                self.transition(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;

                let delay = calculate_retry_delay(tries);
                warn!(entry_id, %reason, retry_in = ?delay, "config entry not ready, retrying");
                Ok(Some(delay))
            }
            Err(SetupError::Failed(reason)) => {
                warn!(entry_id, %reason, "setup failed");
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, entry_id: &str, delay: Duration) {
        let manager: Weak<Self> = Arc::downgrade(self);
        let id = entry_id.to_string();

        let task = tokio::spawn(async move {
            let mut delay = delay;
            loop {
                tokio::time::sleep(delay).await;
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                match manager.attempt_setup(&id).await {
                    Ok(Some(next)) => delay = next,
                    Ok(None) => {
                        manager.retry_tasks.remove(&id);
                        return;
                    }
                    Err(e) => {
                        warn!(entry_id = %id, error = %e, "setup retry gave up");
                        manager.retry_tasks.remove(&id);
                        return;
                    }
                }
            }
        });

        self.retry_tasks.insert(entry_id.to_string(), task);
    }

    pub fn has_pending_retry(&self, entry_id: &str) -> bool {
        self.retry_tasks.contains_key(entry_id)
    }

    /// Unload an entry; an entry waiting for a retry just stops retrying
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        if let Some((_, task)) = self.retry_tasks.remove(entry_id) {
            task.abort();
        }

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(()),
            state if !state.is_recoverable() => {
                return Err(ConfigEntriesError::CannotUnload(state));
            }
            _ => {}
        }

        let was_loaded = entry.is_loaded();
        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let handler = self.handlers.get(&entry.domain).map(|h| h.value().clone());
        if let (true, Some(handler)) = (was_loaded, handler) {
            if let Err(e) = handler.unload_entry(&entry).await {
                warn!(entry_id, error = %e, "unload failed");
                self.transition(entry_id, ConfigEntryState::FailedUnload, Some(e.to_string()))?;
                return Err(ConfigEntriesError::UnloadFailed(e.to_string()));
            }
        }

        self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
        info!(entry_id, title = %entry.title, "unloaded entry");
        Ok(())
    }

    pub async fn reload(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        self.unload(entry_id).await?;
        self.setup(entry_id).await
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }

    /// Set up every entry, collecting per-entry results
    pub async fn setup_all(self: &Arc<Self>) -> Vec<(String, ConfigEntriesResult<()>)> {
        let mut results = Vec::new();
        for entry_id in self.entry_ids() {
            let result = self.setup(&entry_id).await;
            results.push((entry_id, result));
        }
        results
    }

    /// Unload every loaded or retrying entry
    pub async fn unload_all(&self) {
        for entry_id in self.entry_ids() {
            if let Err(e) = self.unload(&entry_id).await {
                warn!(entry_id = %entry_id, error = %e, "unload during shutdown failed");
            }
        }
    }
}
