use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::model::{
    DEFAULT_BASE_URL, DEFAULT_TIMEOUT, KeyCredential, ProbeSettings, UnitSystem, mask_key,
};

/// One API key entry. Exactly one of `api_key` / `api_key_env` must be set.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Name of an environment variable holding the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl KeyConfig {
    pub fn inline(label: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            api_key: Some(api_key.into()),
            api_key_env: None,
        }
    }

    pub fn from_env(label: impl Into<String>, var: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            api_key: None,
            api_key_env: Some(var.into()),
        }
    }

    /// Resolve the key, reading environment variables through `lookup`.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<KeyCredential>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = match (&self.api_key, &self.api_key_env) {
            (Some(key), None) => key.clone(),
            (None, Some(var)) => lookup(var)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| {
                    anyhow!(
                        "Environment variable '{var}' for key '{}' is not set.",
                        self.label
                    )
                })?,
            (Some(_), Some(_)) => bail!(
                "Key '{}' sets both `api_key` and `api_key_env`; choose one.",
                self.label
            ),
            (None, None) => bail!(
                "Key '{}' has neither `api_key` nor `api_key_env`.",
                self.label
            ),
        };

        Ok(KeyCredential::new(self.label.clone(), api_key.trim()))
    }
}

impl fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyConfig")
            .field("label", &self.label)
            .field("api_key", &self.api_key.as_deref().map(mask_key))
            .field("api_key_env", &self.api_key_env)
            .finish()
    }
}

/// Settings for the activation monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub city: String,
    pub units: UnitSystem,
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            city: "London,uk".to_string(),
            units: UnitSystem::Standard,
            interval_secs: 300,
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// cities = ["New York", "London", "Tokyo"]
///
/// [[keys]]
/// label = "original"
/// api_key_env = "OPENWEATHER_KEY"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub units: UnitSystem,
    pub timeout_secs: u64,
    pub cities: Vec<String>,
    pub monitor: MonitorConfig,
    pub keys: Vec<KeyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            units: UnitSystem::Metric,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            cities: vec!["New York".into(), "London".into(), "Tokyo".into()],
            monitor: MonitorConfig::default(),
            keys: Vec::new(),
        }
    }
}

impl Config {
    /// Settings for comparison and single-key tests.
    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            base_url: self.base_url.clone(),
            units: self.units,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// Settings for the activation monitor (its own unit system).
    pub fn monitor_settings(&self) -> ProbeSettings {
        ProbeSettings {
            units: self.monitor.units,
            ..self.probe_settings()
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.interval_secs)
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base_url '{}'", self.base_url))?;

        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        if self.monitor.interval_secs == 0 {
            bail!("monitor.interval_secs must be greater than zero");
        }
        if self.cities.is_empty() || self.cities.iter().any(|c| c.trim().is_empty()) {
            bail!("cities must contain at least one non-empty city name");
        }
        if self.monitor.city.trim().is_empty() {
            bail!("monitor.city must not be empty");
        }

        let mut labels = HashSet::new();
        for key in &self.keys {
            if key.label.trim().is_empty() {
                bail!("Every key needs a non-empty label");
            }
            if !labels.insert(key.label.as_str()) {
                bail!("Duplicate key label '{}'", key.label);
            }
            if key.api_key.is_some() == key.api_key_env.is_some() {
                bail!(
                    "Key '{}' must set exactly one of `api_key` or `api_key_env`",
                    key.label
                );
            }
        }

        Ok(())
    }

    /// Resolve every configured key from the process environment.
    pub fn resolve_keys(&self) -> Result<Vec<KeyCredential>> {
        self.resolve_keys_with(|var| std::env::var(var).ok())
    }

    pub fn resolve_keys_with<F>(&self, lookup: F) -> Result<Vec<KeyCredential>>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.keys.is_empty() {
            return Err(no_keys_error());
        }
        self.keys.iter().map(|k| k.resolve_with(&lookup)).collect()
    }

    /// Resolve the key with `label`, or the first configured key.
    pub fn resolve_key(&self, label: Option<&str>) -> Result<KeyCredential> {
        self.resolve_key_with(label, |var| std::env::var(var).ok())
    }

    pub fn resolve_key_with<F>(&self, label: Option<&str>, lookup: F) -> Result<KeyCredential>
    where
        F: Fn(&str) -> Option<String>,
    {
        let entry = match label {
            Some(label) => self.key(label).ok_or_else(|| {
                anyhow!(
                    "No key labelled '{label}'.\n\
                     Hint: run `keyprobe configure {label}` and enter the API key."
                )
            })?,
            None => self.keys.first().ok_or_else(no_keys_error)?,
        };

        entry.resolve_with(lookup)
    }

    pub fn key(&self, label: &str) -> Option<&KeyConfig> {
        self.keys.iter().find(|k| k.label == label)
    }

    /// Replace the entry with the same label, or append a new one.
    pub fn upsert_key(&mut self, key: KeyConfig) {
        match self.keys.iter_mut().find(|k| k.label == key.label) {
            Some(existing) => *existing = key,
            None => self.keys.push(key),
        }
    }

    /// Load config from `path`, or return defaults if it doesn't exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return defaults.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Default path to the config file in the platform config directory.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "keyprobe", "keyprobe")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}

fn no_keys_error() -> anyhow::Error {
    anyhow!(
        "No API keys configured.\n\
         Hint: run `keyprobe configure <label>` (e.g. `keyprobe configure primary`) first."
    )
}
