//! Client configuration
//!
//! Loaded from TOML (default location from the platform config directory),
//! then overridden from the environment.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::StreamConfig;
use crate::constants::{
    DEFAULT_API_BASE, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_INSTRUCTIONS, DEFAULT_MODEL,
    DEFAULT_OUTBOUND_CAPACITY, DEFAULT_PLAYBACK_CAPACITY,
};
use crate::error::ConfigError;
use crate::transport::{default_ice_servers, IceServer};

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_MODEL: &str = "REALTIME_MODEL";
pub const ENV_API_BASE: &str = "REALTIME_API_BASE";

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Long-lived API key; read from the environment, never written back out
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    pub instructions: Option<String>,
    pub voice: Option<String>,
    pub stream: StreamConfig,
    /// Input device name, None for the host default
    pub input_device: Option<String>,
    /// Output device name, None for the host default
    pub output_device: Option<String>,
    /// Playback jitter buffer depth in frames
    pub playback_capacity: usize,
    /// Outbound queue depth in frames
    pub outbound_capacity: usize,
    pub http_timeout_secs: u64,
    pub ice_servers: Vec<IceServer>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            instructions: Some(DEFAULT_INSTRUCTIONS.to_string()),
            voice: None,
            stream: StreamConfig::default(),
            input_device: None,
            output_device: None,
            playback_capacity: DEFAULT_PLAYBACK_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            ice_servers: default_ice_servers(),
        }
    }
}

impl ClientConfig {
    /// Config with an explicit API key and defaults for everything else
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    /// `config.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "realtime-voice").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default path if it exists, then apply
    /// environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_path(&path)?,
                None => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply `OPENAI_API_KEY`, `REALTIME_MODEL` and `REALTIME_API_BASE`
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(key) = non_empty(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(model) = non_empty(ENV_MODEL) {
            self.model = model;
        }
        if let Some(base) = non_empty(ENV_API_BASE) {
            self.api_base = base;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream.validate()?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".into()));
        }
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "api_base must be an http(s) URL, got '{}'",
                self.api_base
            )));
        }
        if self.playback_capacity == 0 {
            return Err(ConfigError::Invalid("playback_capacity must be > 0".into()));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Invalid("outbound_capacity must be > 0".into()));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid("http_timeout_secs must be > 0".into()));
        }
        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err(ConfigError::Invalid("ice server without urls".into()));
            }
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// `api_base` without a trailing slash
    pub fn api_base(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }
}
