use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::provider::ProviderId;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 10.0;
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 30;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,

    /// Overrides the provider's public endpoint, e.g. for a proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared per-call deadline for provider requests.
    pub request_timeout_secs: f64,

    /// Outbound rate limit, applied to each provider independently.
    pub max_requests_per_minute: u32,

    pub cache_ttl_secs: u64,

    pub redis_url: String,

    /// Providers that may be queried. When unset, every provider with an
    /// API key is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_providers: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub geocoder_url: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            active_providers: None,
            geocoder_url: None,
            providers: HashMap::new(),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// The active provider set as strongly-typed ids, in a stable order.
    pub fn active_provider_ids(&self) -> Result<Vec<ProviderId>> {
        let Some(names) = &self.active_providers else {
            return Ok(ProviderId::all()
                .iter()
                .copied()
                .filter(|id| self.is_provider_configured(*id))
                .collect());
        };

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let id: ProviderId = name
                .parse()
                .with_context(|| format!("Invalid entry in `active_providers`: '{name}'"))?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        Ok(ids)
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-agg", "weather-agg")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Set or replace a provider API key, keeping any endpoint override.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .and_modify(|cfg| cfg.api_key = api_key.clone())
            .or_insert(ProviderConfig { api_key, base_url: None });
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.provider_config(provider_id).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some_and(|key| !key.is_empty())
    }
}
