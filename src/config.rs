//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\garden-music\config.toml
//! - macOS: ~/Library/Application Support/garden-music/config.toml
//! - Linux: ~/.config/garden-music/config.toml
//!
//! The config file is human-readable and editable. Settings are loaded at
//! startup; there is no UI that writes it back, but `save` is kept for
//! operators who want to persist a generated default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path.
    pub database_path: PathBuf,

    /// Base directory scene paths are resolved under. Empty means scene
    /// `path` columns are already absolute.
    pub scenes_base_dir: PathBuf,

    /// Scheduler and engine tunables.
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("garden_music.db"),
            scenes_base_dir: PathBuf::new(),
            engine: EngineConfig::default(),
        }
    }
}

/// Timing tunables for the scheduler and playback engine (spec §5, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the scheduler polls routines, in seconds.
    pub poll_interval_secs: u64,
    /// Crossfade duration in seconds.
    pub crossfade_secs: f64,
    /// Same-start guard window in seconds (§4.2.5).
    pub same_start_guard_secs: f64,
    /// Promotion guard window in milliseconds (§4.2.5).
    pub promotion_guard_window_ms: u64,
    /// Readiness-wait timeout for the main stream, in milliseconds.
    pub main_ready_timeout_ms: u64,
    /// Readiness-wait timeout for the next (crossfade) stream, in milliseconds.
    pub next_ready_timeout_ms: u64,
    /// Default soft-stop timeout when the scheduler arms one, in seconds.
    pub soft_stop_timeout_secs: u64,
    /// Default duration substituted when a track's duration can't be parsed.
    pub default_duration_secs: f64,
    /// Fallback playback tick interval, in milliseconds.
    pub tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            crossfade_secs: 5.0,
            same_start_guard_secs: 1.5,
            promotion_guard_window_ms: 350,
            main_ready_timeout_ms: 1_500,
            next_ready_timeout_ms: 2_000,
            soft_stop_timeout_secs: 300,
            default_duration_secs: 180.0,
            tick_ms: 50,
        }
    }
}

/// Get the config directory path.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("garden-music"))
}

/// Get the full path to the config file.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk.
///
/// Returns default config if the file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail — the service always gets a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!(target: "config", "could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!(target: "config", "no config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!(target: "config", "loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!(target: "config", "failed to parse config file {:?}: {}", path, e);
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!(target: "config", "failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to disk, creating the config directory if needed.
/// Writes atomically (write to temp, then rename).
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    let path = dir.join("config.toml");

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::CreateDir(dir.clone(), e))?;

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, &path)
        .map_err(|e| ConfigError::Rename(temp_path, path.clone(), e))?;

    tracing::info!(target: "config", "saved config to {:?}", path);
    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[engine]"));
        assert!(toml.contains("poll_interval_secs"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.engine.crossfade_secs = 3.5;
        config.database_path = PathBuf::from("/tmp/test.db");

        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.engine.crossfade_secs, 3.5);
        assert_eq!(parsed.database_path, PathBuf::from("/tmp/test.db"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
database_path = "custom.db"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database_path, PathBuf::from("custom.db"));
        assert_eq!(config.engine.poll_interval_secs, 10);
    }
}
