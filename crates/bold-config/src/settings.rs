//! Typed view of `configuration.yaml`
//!
//! ```yaml
//! logger:
//!   default: info
//!
//! bold:
//!   api_base_url: https://api.boldsmartlock.com
//!   scan_interval: 1800
//!   platforms: [lock]
//!   oauth:
//!     client_id: !secret bold_client_id
//!     client_secret: !secret bold_client_secret
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

pub const CONFIG_FILE: &str = "configuration.yaml";

const DEFAULT_API_BASE_URL: &str = "https://api.boldsmartlock.com";
const DEFAULT_AUTHORIZE_URL: &str = "https://auth.boldsmartlock.com/";
const DEFAULT_TOKEN_URL: &str = "https://api.boldsmartlock.com/v2/oauth/token";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logger: LoggerSettings,
    #[serde(default)]
    pub bold: BoldSettings,
}

impl Settings {
    /// Load `configuration.yaml`; a missing file yields the defaults
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.join(CONFIG_FILE).exists() {
            debug!(?config_dir, "no configuration.yaml, using defaults");
            return Ok(Self::default());
        }

        let value = YamlLoader::new(config_dir)?.load_file(CONFIG_FILE)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_yaml::Value) -> ConfigResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value).map_err(|source| ConfigError::InvalidSettings {
            file: CONFIG_FILE,
            source,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggerSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub default: String,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            default: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoldSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// OAuth2 application credentials; session login is used without them
    #[serde(default)]
    pub oauth: Option<OAuthSettings>,

    /// Poll interval in seconds, overriding the per-auth-mode default
    #[serde(default)]
    pub scan_interval: Option<u64>,

    /// Entity platforms to set up (`lock`, `button`)
    #[serde(default = "default_platforms")]
    pub platforms: Vec<String>,
}

impl BoldSettings {
    pub fn scan_interval(&self) -> Option<Duration> {
        self.scan_interval.map(Duration::from_secs)
    }
}

impl Default for BoldSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            oauth: None,
            scan_interval: None,
            platforms: default_platforms(),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_platforms() -> Vec<String> {
    vec!["lock".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

fn default_authorize_url() -> String {
    DEFAULT_AUTHORIZE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}
