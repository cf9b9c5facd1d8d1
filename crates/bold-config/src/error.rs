use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A `!secret` tag names a key missing from `secrets.yaml`
    #[error("!secret {key} is not defined in secrets.yaml")]
    SecretNotFound { key: String },

    #[error("!include {path} rejected: {reason}")]
    InvalidIncludePath { path: String, reason: String },

    #[error("!include cycle through {path}")]
    CircularInclude { path: PathBuf },

    #[error("!env_var {var} is not set")]
    EnvVarNotFound { var: String },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// `configuration.yaml` parsed but does not match the settings layout
    #[error("invalid settings in {file}: {source}")]
    InvalidSettings {
        file: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
}
