use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::deserialize_duration;

/// Provider API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the aggregation provider's API.
    pub base_url: String,
    /// Username for the provider session. Falls back to
    /// `LEDGERLINK_PROVIDER_USERNAME`.
    pub username: Option<String>,
    /// Password for the provider session. Falls back to
    /// `LEDGERLINK_PROVIDER_PASSWORD`.
    pub password: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.aggregation.example.com".to_string(),
            username: None,
            password: None,
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_gate_permits() -> usize {
    // The provider misbehaves under concurrent requests per credential.
    1
}

/// Link engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Delay between provider-account snapshot polls.
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,

    /// Backoff before retrying a transient provider failure.
    #[serde(
        default = "default_retry_backoff",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_backoff: Duration,

    /// Concurrent in-flight provider calls allowed through the gate.
    #[serde(default = "default_gate_permits")]
    pub gate_permits: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            retry_backoff: default_retry_backoff(),
            gate_permits: default_gate_permits(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the data directory. If relative, resolved from the config
    /// file's location; if not specified, defaults to the config file's
    /// directory.
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub link: LinkConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => config_dir.to_path_buf(),
        }
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub provider: ProviderConfig,
    pub link: LinkConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./ledgerlink.toml` if it exists in the current directory
/// 2. `~/.local/share/ledgerlink/ledgerlink.toml` (XDG data directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("ledgerlink.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("ledgerlink").join("ledgerlink.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Load and resolve config from a file path. The data directory resolves
    /// relative to the config file's parent directory.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        let data_dir = config.resolve_data_dir(config_dir);

        Ok(Self {
            data_dir,
            provider: config.provider,
            link: config.link,
        })
    }

    /// Load config, falling back to defaults when the file doesn't exist.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path);
        }

        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };

        let config_dir = config_path
            .parent()
            .context("config path has no parent directory")?;

        Ok(Self {
            data_dir: config_dir.to_path_buf(),
            provider: ProviderConfig::default(),
            link: LinkConfig::default(),
        })
    }
}
