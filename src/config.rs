//! Configuration file parser for ~/.config/feedcycle/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, so a typo does not silently
//! disable a setting.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("HOME environment variable not set")]
    MissingHome,
}

/// Process-level configuration. Values that belong to the persisted state
/// record (refresh cadence, cache age, manual proxy) act as first-run
/// seeds; afterwards the record wins.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Where the state/posts/cache documents live. Defaults to
    /// `~/.local/share/feedcycle`.
    pub data_dir: Option<PathBuf>,

    /// Default refresh interval in minutes.
    pub refresh_minutes: u64,

    /// Response cache freshness in minutes (clamped to [5 min, 24 h] at
    /// the fetcher).
    pub cache_max_age_minutes: u64,

    /// Manual CORS proxy template, always tried first when set.
    pub cors_proxy: Option<String>,

    /// Hard per-request timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Concurrent feed refreshes.
    pub max_concurrent_refreshes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            refresh_minutes: 30,
            cache_max_age_minutes: 60,
            cors_proxy: None,
            fetch_timeout_secs: 12,
            max_concurrent_refreshes: 8,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "data_dir",
        "refresh_minutes",
        "cache_max_age_minutes",
        "cors_proxy",
        "fetch_timeout_secs",
        "max_concurrent_refreshes",
    ];

    /// Default config path: `~/.config/feedcycle/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = std::env::var("HOME").map_err(|_| ConfigError::MissingHome)?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("feedcycle")
            .join("config.toml"))
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let home = std::env::var("HOME").map_err(|_| ConfigError::MissingHome)?;
        Ok(PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("feedcycle"))
    }

    /// Loads configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line info
    /// - Unknown keys → accepted, logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Bound the read before it happens; a corrupted multi-GB file
        // should not take the process down with it.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read.
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}
