//! Application configuration.
//!
//! Values come from, in increasing priority: built-in defaults, the TOML
//! file, then `PHOTO_WEATHER_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::photo::DirectoryGallery;
use crate::state::PhotoHistoryStore;
use crate::weather::DEFAULT_BASE_URL;

pub const ENV_API_KEY: &str = "PHOTO_WEATHER_API_KEY";
pub const ENV_BASE_URL: &str = "PHOTO_WEATHER_BASE_URL";
pub const ENV_DATABASE: &str = "PHOTO_WEATHER_DB";
pub const ENV_GALLERY: &str = "PHOTO_WEATHER_GALLERY";

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no {0} could be determined for this platform")]
    NoDefaultPath(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub weather: WeatherConfig,
    pub storage: StorageConfig,
    pub share: ShareConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl WeatherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// History database; platform data dir when unset
    pub database_path: Option<PathBuf>,
    /// Gallery directory; platform pictures dir when unset
    pub gallery_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        self.database_path
            .clone()
            .or_else(PhotoHistoryStore::default_path)
            .ok_or(ConfigError::NoDefaultPath("database path"))
    }

    pub fn gallery_dir(&self) -> Result<PathBuf, ConfigError> {
        self.gallery_dir
            .clone()
            .or_else(DirectoryGallery::default_root)
            .ok_or(ConfigError::NoDefaultPath("gallery directory"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShareConfig {
    /// Program and arguments; `{path}` and `{mime}` are substituted
    pub command: Vec<String>,
}

impl AppConfig {
    /// Default config file location:
    /// - Linux: ~/.config/photo-weather/config.toml
    /// - macOS: ~/Library/Application Support/photo-weather/config.toml
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("photo-weather");
        path.push("config.toml");
        Some(path)
    }

    /// Load configuration and apply environment overrides.
    ///
    /// An explicit `path` must exist. The default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Config file loaded");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from environment-style variables. Empty values are
    /// ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_API_KEY) {
            self.weather.api_key = Some(key);
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.weather.base_url = url;
        }
        if let Some(path) = get(ENV_DATABASE) {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_GALLERY) {
            self.storage.gallery_dir = Some(PathBuf::from(path));
        }
    }
}
