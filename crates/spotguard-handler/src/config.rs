use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use spotguard_core::duration::{DurationParseError, parse_duration};
use spotguard_core::imds::{DEFAULT_METADATA_BASE, DEFAULT_TIMEOUT, DEFAULT_TOKEN_TTL, token_url_for};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/spot-handler/config.yaml";

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    polling_interval: String,
    shutdown_script: PathBuf,
    metadata_url: String,
    #[serde(default)]
    token_url: Option<String>,
    #[serde(default)]
    token_ttl_seconds: Option<u64>,
    #[serde(default)]
    request_timeout: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid {field}: {source}")]
    Duration {
        field: &'static str,
        #[source]
        source: DurationParseError,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    pub polling_interval: Duration,
    pub shutdown_script: PathBuf,
    pub metadata_url: String,
    /// `None` disables the metadata token handshake.
    pub token_url: Option<String>,
    pub token_ttl: Duration,
    pub request_timeout: Duration,
}

fn positive_duration(field: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let d = parse_duration(raw).map_err(|source| ConfigError::Duration { field, source })?;
    if d.is_zero() {
        return Err(ConfigError::Zero(field));
    }
    Ok(d)
}

impl HandlerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Ok(Self::from_yaml_str(&raw)?)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: RawConfig = serde_yaml::from_str(raw)?;

        let polling_interval = positive_duration("pollingInterval", &cfg.polling_interval)?;
        let request_timeout = match cfg.request_timeout.as_deref() {
            Some(v) => positive_duration("requestTimeout", v)?,
            None => DEFAULT_TIMEOUT,
        };
        if cfg.shutdown_script.as_os_str().is_empty() {
            return Err(ConfigError::Empty("shutdownScript"));
        }
        let metadata_url = cfg.metadata_url.trim().to_string();
        if metadata_url.is_empty() {
            return Err(ConfigError::Empty("metadataUrl"));
        }
        let token_ttl = match cfg.token_ttl_seconds {
            Some(0) => return Err(ConfigError::Zero("tokenTtlSeconds")),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TOKEN_TTL,
        };
        let token_url = match cfg.token_url {
            None => Some(token_url_for(DEFAULT_METADATA_BASE)),
            Some(u) if u.trim().is_empty() => None,
            Some(u) => Some(u.trim().to_string()),
        };

        Ok(Self {
            polling_interval,
            shutdown_script: cfg.shutdown_script,
            metadata_url,
            token_url,
            token_ttl,
            request_timeout,
        })
    }
}
