//! User configuration stored as TOML under the platform config directory.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::core::chat_stream::ProviderCredentials;
use crate::core::retry::DEFAULT_MAX_RETRIES;
use crate::core::session::{SessionSettings, DEFAULT_RENDER_INTERVAL};
use crate::utils::fs::write_atomic;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    /// Overrides the catalog endpoint, e.g. for a local proxy.
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Model selected when a conversation starts
    pub default_model: Option<String>,
    pub deep_thinking: Option<bool>,
    /// Retries after the first attempt for rate limits and server errors
    pub max_retries: Option<u32>,
    /// Minimum time between UI updates while streaming
    pub render_interval_ms: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    /// Where conversations are saved
    pub data_dir: Option<PathBuf>,
    /// Keyed by provider id (`glm`, `doubao`)
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
}

/// Errors that can occur when loading or saving configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Serialize(toml::ser::Error),
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The platform has no home/config directory.
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config at {}: {source}", path.display())
            }
            ConfigError::Serialize(source) => write!(f, "Failed to serialize config: {source}"),
            ConfigError::Write { path, source } => {
                write!(f, "Failed to write config at {}: {source}", path.display())
            }
            ConfigError::NoConfigDir => write!(f, "Could not determine the config directory"),
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Serialize(source) => Some(source),
            ConfigError::Write { source, .. } => Some(source),
            ConfigError::NoConfigDir => None,
        }
    }
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("org", "tutorchat", "tutorchat").ok_or(ConfigError::NoConfigDir)
}

impl Config {
    pub fn load() -> Result<Config, ConfigError> {
        Self::load_from_path(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to_path(&Self::config_path()?)
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// A missing file yields the default config.
    pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
        if !config_path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        write_atomic(config_path, contents.as_bytes()).map_err(|source| ConfigError::Write {
            path: config_path.to_path_buf(),
            source,
        })
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().join("conversations")),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            deep_thinking: self.deep_thinking.unwrap_or(false),
            render_interval: self
                .render_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RENDER_INTERVAL),
        }
    }

    pub fn credentials(&self) -> HashMap<String, ProviderCredentials> {
        self.providers
            .iter()
            .map(|(id, settings)| {
                (
                    id.to_ascii_lowercase(),
                    ProviderCredentials {
                        api_key: settings.api_key.clone(),
                        base_url: settings.base_url.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn provider_mut(&mut self, provider_id: &str) -> &mut ProviderSettings {
        self.providers
            .entry(provider_id.to_ascii_lowercase())
            .or_default()
    }

    /// Human-readable dump with API keys masked.
    pub fn describe(&self) -> String {
        let unset = || "(unset)".to_string();
        let mut lines = vec![
            format!(
                "default-model: {}",
                self.default_model.clone().unwrap_or_else(unset)
            ),
            format!("deep-thinking: {}", self.deep_thinking.unwrap_or(false)),
            format!("max-retries: {}", self.max_retries()),
            format!(
                "render-interval-ms: {}",
                self.session_settings().render_interval.as_millis()
            ),
            format!("connect-timeout-secs: {}", self.connect_timeout().as_secs()),
            format!(
                "data-dir: {}",
                self.data_dir()
                    .map(|dir| dir.display().to_string())
                    .unwrap_or_else(|_| unset())
            ),
        ];

        let mut providers: Vec<_> = self.providers.iter().collect();
        providers.sort_by(|a, b| a.0.cmp(b.0));
        for (id, settings) in providers {
            let key = match &settings.api_key {
                Some(key) => mask_key(key),
                None => unset(),
            };
            lines.push(format!("providers.{id}.api-key: {key}"));
            if let Some(base_url) = &settings.base_url {
                lines.push(format!("providers.{id}.base-url: {base_url}"));
            }
        }
        lines.join("\n")
    }
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if key.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("****{visible}")
    }
}
