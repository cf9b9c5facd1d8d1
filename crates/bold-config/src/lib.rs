//! YAML configuration for the Bold daemon
//!
//! `configuration.yaml` lives in the config directory and supports three
//! custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! ```ignore
//! use bold_config::Settings;
//!
//! let settings = Settings::load("/config")?;
//! let client_id = settings.bold.oauth.map(|o| o.client_id);
//! ```

mod error;
mod loader;
mod secrets;
mod settings;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;
pub use settings::{BoldSettings, LoggerSettings, OAuthSettings, Settings, CONFIG_FILE};

pub use serde_yaml::Value;
