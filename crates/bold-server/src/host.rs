//! Host wiring: event bus, state store, registries, entries and the Bold
//! integration, all rooted in one config directory.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use bold_api::OAuth2Client;
use bold_config::{BoldSettings, Settings};
use bold_config_entries::ConfigEntries;
use bold_core::{SharedClock, SystemClock};
use bold_event_bus::EventBus;
use bold_integration::{BoldIntegration, IntegrationConfig, OAuthFlowConfig};
use bold_registries::Registries;
use bold_state_store::StateStore;
use tracing::{info, warn};

/// Redirect target when `oauth.redirect_uri` is not configured
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8123/auth/external/callback";

pub struct Host {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub registries: Arc<Registries>,
    pub entries: Arc<ConfigEntries>,
    pub integration: Arc<BoldIntegration>,
}

impl Host {
    /// Load registries and entries from `config_dir` and register the
    /// integration. Nothing is set up yet.
    pub async fn load(config_dir: &Path, settings: &Settings) -> Result<Self> {
        let clock: SharedClock = Arc::new(SystemClock);
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone(), clock.clone()));

        let registries = Arc::new(Registries::new(config_dir));
        registries
            .load_all()
            .await
            .context("loading registries")?;

        let entries =
            Arc::new(ConfigEntries::new(registries.storage.clone()).with_event_bus(bus.clone()));
        entries.load().await.context("loading config entries")?;

        let integration = Arc::new(BoldIntegration::new(
            integration_config(&settings.bold),
            entries.clone(),
            registries.clone(),
            states.clone(),
            clock,
        ));
        integration.register();

        Ok(Self {
            bus,
            states,
            registries,
            entries,
            integration,
        })
    }

    /// Set up every entry; failures are logged and retried by the entry store
    pub async fn setup(&self) {
        for (entry_id, result) in self.entries.setup_all().await {
            if let Err(e) = result {
                warn!(entry_id = %entry_id, error = %e, "entry setup failed");
            }
        }
        info!(
            entries = self.entries.len(),
            entities = self.states.entity_count(),
            "Bold integration started"
        );
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.entries.unload_all().await;
        self.registries
            .save_all()
            .await
            .context("saving registries")?;
        Ok(())
    }
}

pub fn integration_config(settings: &BoldSettings) -> IntegrationConfig {
    let oauth = settings.oauth.as_ref().map(|oauth| OAuthFlowConfig {
        client: Arc::new(
            OAuth2Client::new(&oauth.client_id, &oauth.client_secret)
                .with_urls(&oauth.authorize_url, &oauth.token_url),
        ),
        redirect_uri: oauth
            .redirect_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
    });

    IntegrationConfig {
        api_base_url: settings.api_base_url.clone(),
        oauth,
        scan_interval: settings.scan_interval(),
        platforms: settings.platforms.clone(),
    }
}
