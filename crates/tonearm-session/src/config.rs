use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Errors that can occur while loading or resolving session configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to determine the user's configuration or data directories. This
    /// usually occurs when required environment variables are missing (e.g.,
    /// `$HOME` on Unix or `%APPDATA%` on Windows).
    #[error("failed to obtain user's directories")]
    DirectoriesNotFound,
    /// An I/O error occurred while reading or writing the configuration file.
    #[error("failed to read config: {0}")]
    IoError(#[from] std::io::Error),
    /// The configuration file contains invalid TOML or does not match the expected structure.
    #[error("failed to deserialize config: {0}")]
    DeserializeError(#[from] toml::de::Error),
    /// Failed to serialize the configuration to TOML (e.g., when saving changes).
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Tuning of the playback buffer pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackTuning {
    /// Number of buffers cycled through the output queue.
    pub buffer_count: usize,
    /// Total seconds of audio the pool holds when every buffer is full.
    pub target_buffer_seconds: f32,
}

impl Default for PlaybackTuning {
    fn default() -> Self {
        Self {
            buffer_count: 5,
            target_buffer_seconds: 10.0,
        }
    }
}

/// Configuration of one engine session.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// User agent string reported to the engine.
    pub user_agent: String,
    /// Directory for engine settings and credential storage.
    pub settings_location: PathBuf,
    /// Directory for the engine's media cache.
    pub cache_location: PathBuf,
    /// Playback buffering parameters.
    pub playback: PlaybackTuning,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let (settings_location, cache_location) = build_project_dirs()
            .unwrap_or_else(|_| (PathBuf::from("settings"), PathBuf::from("cache")));
        Self {
            user_agent: "tonearm".to_string(),
            settings_location,
            cache_location,
            playback: PlaybackTuning::default(),
        }
    }
}

fn build_project_dirs() -> Result<(PathBuf, PathBuf), ConfigError> {
    match ProjectDirs::from("dev", "tonearm", "tonearm") {
        Some(path) => Ok((
            path.config_dir().to_path_buf(),
            path.cache_dir().to_path_buf(),
        )),
        None => Err(ConfigError::DirectoriesNotFound),
    }
}

/// Loads the session configuration from disk, writing out the defaults first
/// when no config file exists yet.
pub fn load_config() -> Result<SessionConfig, ConfigError> {
    let (config_dir, _) = build_project_dirs()?;

    let config_path = config_dir.join("config.toml");
    log::info!("Loading configuration from {config_path:?}");
    if config_path.exists() {
        let contents = fs::read_to_string(config_path)?;
        let config: SessionConfig = toml::from_str(&contents)?;
        return Ok(config);
    }

    let config = SessionConfig::default();
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(&config)?;
    fs::write(config_path, contents)?;

    Ok(config)
}

/// Saves the current configuration to disk. This function serializes the
/// provided `SessionConfig` to pretty-printed TOML and writes it to
/// `config.toml` in the user's configuration directory, overwriting any
/// existing file.
pub fn save_config(config: &SessionConfig) -> Result<(), ConfigError> {
    let (config_dir, _) = build_project_dirs()?;

    let config_path = config_dir.join("config.toml");
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(&config)?;
    fs::write(config_path, contents)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = SessionConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: SessionConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.user_agent, config.user_agent);
        assert_eq!(back.playback.buffer_count, 5);
        assert_eq!(back.playback.target_buffer_seconds, 10.0);
    }
}
