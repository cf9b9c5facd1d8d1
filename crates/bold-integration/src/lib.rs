//! Bold smart-lock integration
//!
//! [`BoldIntegration`] is the setup handler for `bold` config entries. For
//! each entry it builds an API client (OAuth2 or session token), a polling
//! [`BoldCoordinator`], a [`TokenRefresher`] for session logins, and the
//! lock and button entities fed by the coordinator's snapshots.
//!
//! Entries are created by the [`FlowManager`] config flows.

pub mod button;
pub mod config_flow;
pub mod consts;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod helpers;
pub mod lock;
pub mod oauth_session;
pub mod platform;
pub mod token;

#[cfg(test)]
mod testing;

pub use button::BoldActivationButton;
pub use config_flow::{
    ConfigFlowHandler, FlowError, FlowManager, FlowResult, FormField, OAuthFlowConfig,
};
pub use coordinator::{BoldCoordinator, Snapshot};
pub use entity::{ActivationWindow, BoldEntity, EntityContext};
pub use error::{EntityError, EntityResult, IntegrationError, TokenRefreshError, UpdateFailed};
pub use lock::BoldLockEntity;
pub use oauth_session::OAuth2Session;
pub use token::TokenRefresher;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bold_api::{BoldApi, BoldClient, DEFAULT_API_BASE_URL};
use bold_config_entries::{ConfigEntries, ConfigEntry, EntrySetup, SetupError};
use bold_core::{platforms, Context, SharedClock};
use bold_registries::Registries;
use bold_state_store::StateStore;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::consts::{
    CONF_AUTH_IMPLEMENTATION, CONF_EXPIRATION_TIME, CONF_TOKEN, DOMAIN, OAUTH_SCAN_INTERVAL,
    SESSION_SCAN_INTERVAL,
};
use crate::helpers::parse_stored_expiration;

/// Builds the API client for an entry in place of the HTTP client
pub type ApiFactory = Arc<dyn Fn(&ConfigEntry) -> Arc<dyn BoldApi> + Send + Sync>;

/// Daemon-level settings of the integration
#[derive(Clone)]
pub struct IntegrationConfig {
    pub api_base_url: String,
    /// OAuth2 application; entries with `auth_implementation` need it
    pub oauth: Option<OAuthFlowConfig>,
    /// Overrides the per-auth-mode poll interval
    pub scan_interval: Option<Duration>,
    /// Entity platforms to set up (`lock`, `button`)
    pub platforms: Vec<String>,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            oauth: None,
            scan_interval: None,
            platforms: vec![platforms::LOCK.to_string()],
        }
    }
}

/// Everything running for one loaded entry
pub struct EntryRuntime {
    coordinator: Arc<BoldCoordinator>,
    refresher: Option<Arc<TokenRefresher>>,
    locks: Vec<Arc<BoldLockEntity>>,
    buttons: Vec<Arc<BoldActivationButton>>,
    listener: JoinHandle<()>,
}

impl EntryRuntime {
    pub fn coordinator(&self) -> &Arc<BoldCoordinator> {
        &self.coordinator
    }

    /// Session-mode token refresher
    pub fn refresher(&self) -> Option<&Arc<TokenRefresher>> {
        self.refresher.as_ref()
    }

    pub fn locks(&self) -> &[Arc<BoldLockEntity>] {
        &self.locks
    }

    pub fn buttons(&self) -> &[Arc<BoldActivationButton>] {
        &self.buttons
    }

    fn entities(&self) -> impl Iterator<Item = &dyn BoldEntity> {
        self.locks
            .iter()
            .map(|l| l.as_ref() as &dyn BoldEntity)
            .chain(self.buttons.iter().map(|b| b.as_ref() as &dyn BoldEntity))
    }

    fn shutdown(&self, states: &StateStore) {
        self.listener.abort();
        self.coordinator.shutdown();
        if let Some(refresher) = &self.refresher {
            refresher.shutdown();
        }
        for entity in self.entities() {
            entity.shutdown();
            states.remove(entity.entity_id(), Context::new());
        }
    }
}

impl Drop for EntryRuntime {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

pub struct BoldIntegration {
    config: IntegrationConfig,
    entries: Arc<ConfigEntries>,
    registries: Arc<Registries>,
    states: Arc<StateStore>,
    clock: SharedClock,
    api_factory: Option<ApiFactory>,
    runtimes: DashMap<String, Arc<EntryRuntime>>,
}

impl BoldIntegration {
    pub fn new(
        config: IntegrationConfig,
        entries: Arc<ConfigEntries>,
        registries: Arc<Registries>,
        states: Arc<StateStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            entries,
            registries,
            states,
            clock,
            api_factory: None,
            runtimes: DashMap::new(),
        }
    }

    pub fn with_api_factory(mut self, factory: ApiFactory) -> Self {
        self.api_factory = Some(factory);
        self
    }

    /// Register as the setup handler for `bold` entries
    pub fn register(self: &Arc<Self>) {
        self.entries.register_setup_handler(DOMAIN, self.clone());
    }

    /// Config flows creating entries for this integration
    pub fn flow_manager(&self) -> FlowManager {
        let flows = FlowManager::new(
            self.entries.clone(),
            &self.config.api_base_url,
            self.clock.clone(),
        );
        match &self.config.oauth {
            Some(oauth) => flows.with_oauth(oauth.clone()),
            None => flows,
        }
    }

    pub fn runtime(&self, entry_id: &str) -> Option<Arc<EntryRuntime>> {
        self.runtimes.get(entry_id).map(|r| r.value().clone())
    }

    pub fn coordinator(&self, entry_id: &str) -> Option<Arc<BoldCoordinator>> {
        self.runtime(entry_id).map(|r| r.coordinator.clone())
    }

    /// Entity ids of every loaded entity
    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .runtimes
            .iter()
            .flat_map(|r| {
                r.entities()
                    .map(|e| e.entity_id().to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        ids.sort();
        ids
    }

    fn find_lock(&self, entity_id: &str) -> Option<Arc<BoldLockEntity>> {
        self.runtimes.iter().find_map(|r| {
            r.locks
                .iter()
                .find(|l| l.entity_id().to_string() == entity_id)
                .cloned()
        })
    }

    fn find_button(&self, entity_id: &str) -> Option<Arc<BoldActivationButton>> {
        self.runtimes.iter().find_map(|r| {
            r.buttons
                .iter()
                .find(|b| b.entity_id().to_string() == entity_id)
                .cloned()
        })
    }

    fn lock_entity(
        &self,
        entity_id: &str,
        action: &'static str,
    ) -> EntityResult<Arc<BoldLockEntity>> {
        if let Some(lock) = self.find_lock(entity_id) {
            return Ok(lock);
        }
        if self.find_button(entity_id).is_some() {
            return Err(EntityError::NotSupported(entity_id.to_string(), action));
        }
        Err(EntityError::NotFound(entity_id.to_string()))
    }

    pub async fn unlock(&self, entity_id: &str) -> EntityResult<()> {
        self.lock_entity(entity_id, "unlock")?.unlock().await
    }

    pub async fn lock(&self, entity_id: &str) -> EntityResult<()> {
        self.lock_entity(entity_id, "lock")?.lock().await
    }

    pub async fn press(&self, entity_id: &str) -> EntityResult<()> {
        if let Some(button) = self.find_button(entity_id) {
            return button.press().await;
        }
        if self.find_lock(entity_id).is_some() {
            return Err(EntityError::NotSupported(entity_id.to_string(), "press"));
        }
        Err(EntityError::NotFound(entity_id.to_string()))
    }

    /// Delete an entry along with its entities and devices
    pub async fn remove_entry(&self, entry_id: &str) -> Result<ConfigEntry, IntegrationError> {
        let entry = self.entries.remove(entry_id).await?;
        let entities = self.registries.entities.remove_config_entry(entry_id);
        let devices = self.registries.devices.remove_config_entry(entry_id);
        self.registries.save_all().await?;
        info!(entry_id, entities, devices, "removed Bold entry");
        Ok(entry)
    }

    fn client_for(
        &self,
        entry: &ConfigEntry,
        build: impl FnOnce() -> BoldClient,
    ) -> Arc<dyn BoldApi> {
        match &self.api_factory {
            Some(factory) => factory(entry),
            None => Arc::new(build()),
        }
    }

    fn oauth_api(&self, entry: &ConfigEntry) -> Result<Arc<dyn BoldApi>, IntegrationError> {
        let oauth = self
            .config
            .oauth
            .as_ref()
            .ok_or(IntegrationError::OAuthNotConfigured)?;
        let session = Arc::new(OAuth2Session::new(
            entry,
            self.entries.clone(),
            oauth.client.clone(),
            self.clock.clone(),
        )?);
        Ok(self.client_for(entry, || {
            BoldClient::with_token_provider(&self.config.api_base_url, session)
        }))
    }

    /// Session client with its refresher armed; a stored token that is
    /// already due is exchanged before anything else uses it.
    async fn session_api(
        &self,
        entry: &ConfigEntry,
    ) -> Result<(Arc<dyn BoldApi>, Arc<TokenRefresher>), SetupError> {
        let token = entry
            .data_str(CONF_TOKEN)
            .ok_or_else(|| IntegrationError::MissingData {
                entry_id: entry.entry_id.clone(),
                key: CONF_TOKEN,
            })?;
        let api = self.client_for(entry, || BoldClient::new(&self.config.api_base_url));
        let refresher = Arc::new(TokenRefresher::new(
            entry.entry_id.clone(),
            api.clone(),
            self.entries.clone(),
            self.clock.clone(),
        ));

        let expiration = entry
            .data_str(CONF_EXPIRATION_TIME)
            .and_then(parse_stored_expiration);
        match expiration {
            Some(expiration) if expiration > self.clock.now() => {
                refresher.update_token(expiration, token);
            }
            _ => {
                debug!(entry_id = %entry.entry_id, "stored token is due, refreshing first");
                api.set_token(token);
                if let Err(e) = refresher.refresh_token().await {
                    refresher.shutdown();
                    return Err(e.into());
                }
            }
        }

        Ok((api, refresher))
    }

    fn spawn_listener(
        coordinator: &BoldCoordinator,
        entities: Vec<Arc<dyn BoldEntity>>,
    ) -> JoinHandle<()> {
        let mut updates = coordinator.subscribe();
        updates.borrow_and_update();

        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let snapshot = updates.borrow_and_update().clone();
                for entity in &entities {
                    entity.handle_coordinator_update(&snapshot);
                }
            }
        })
    }

    async fn save_registries(&self) {
        if let Err(e) = self.registries.save_all().await {
            warn!(error = %e, "failed to save registries");
        }
    }
}

#[async_trait]
impl EntrySetup for BoldIntegration {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError> {
        let oauth_mode = entry.data.contains_key(CONF_AUTH_IMPLEMENTATION);
        let (api, refresher) = if oauth_mode {
            (self.oauth_api(entry)?, None)
        } else {
            let (api, refresher) = self.session_api(entry).await?;
            (api, Some(refresher))
        };

        let default_interval = if oauth_mode {
            OAUTH_SCAN_INTERVAL
        } else {
            SESSION_SCAN_INTERVAL
        };
        let coordinator = Arc::new(BoldCoordinator::new(
            DOMAIN,
            api,
            self.config.scan_interval.unwrap_or(default_interval),
        ));

        if let Err(e) = coordinator.first_refresh().await {
            if let Some(refresher) = &refresher {
                refresher.shutdown();
            }
            return Err(e);
        }

        let ctx = EntityContext {
            coordinator: coordinator.clone(),
            states: self.states.clone(),
            clock: self.clock.clone(),
        };
        let snapshot = coordinator.data();
        let wants = |platform: &str| self.config.platforms.iter().any(|p| p == platform);

        let locks = if wants(platforms::LOCK) {
            platform::setup_locks(&entry.entry_id, &ctx, &self.registries, &snapshot)
        } else {
            Vec::new()
        };
        let buttons = if wants(platforms::BUTTON) {
            platform::setup_buttons(&entry.entry_id, &ctx, &self.registries, &snapshot)
        } else {
            Vec::new()
        };
        self.save_registries().await;

        let entities: Vec<Arc<dyn BoldEntity>> = locks
            .iter()
            .map(|l| l.clone() as Arc<dyn BoldEntity>)
            .chain(buttons.iter().map(|b| b.clone() as Arc<dyn BoldEntity>))
            .collect();
        let listener = Self::spawn_listener(&coordinator, entities);

        if entry.pref_disable_polling {
            debug!(entry_id = %entry.entry_id, "polling disabled for entry");
        } else {
            coordinator.start();
        }

        info!(
            entry_id = %entry.entry_id,
            mode = if oauth_mode { "oauth2" } else { "session" },
            devices = snapshot.len(),
            locks = locks.len(),
            buttons = buttons.len(),
            "Bold entry set up"
        );

        let runtime = EntryRuntime {
            coordinator,
            refresher,
            locks,
            buttons,
            listener,
        };
        if let Some(previous) = self
            .runtimes
            .insert(entry.entry_id.clone(), Arc::new(runtime))
        {
            previous.shutdown(&self.states);
        }
        Ok(())
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError> {
        if let Some((_, runtime)) = self.runtimes.remove(&entry.entry_id) {
            runtime.shutdown(&self.states);
            debug!(entry_id = %entry.entry_id, "Bold entry unloaded");
        }
        Ok(())
    }
}
