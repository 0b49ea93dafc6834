//! TOML + environment configuration loading for the SDL Application
//! Manager daemon.
//!
//! A serde-friendly TOML struct (durations as plain seconds, since
//! TOML has no native duration type) layered with environment
//! overrides via `figment`, then translated into
//! `sdl_app_manager::ApplicationManagerConfig` — the shape the core
//! itself agrees to accept (spec §6).

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use sdl_app_manager::ApplicationManagerConfig;
use sdl_app_manager::model::HmiLevel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level TOML configuration for the daemon (spec §6's enumerated
/// option list, plus the resumption storage path this core needs
/// concretely but §6 leaves to deployment).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
    #[serde(default)]
    pub pending_requests_amount: u32,

    #[serde(default)]
    pub app_time_scale_secs: u64,
    #[serde(default)]
    pub app_time_scale_max_requests: u32,

    #[serde(default = "default_hmi_level_none_time_scale_secs")]
    pub app_hmi_level_none_time_scale_secs: u64,
    #[serde(default = "default_hmi_level_none_time_scale_max_requests")]
    pub app_hmi_level_none_time_scale_max_requests: u32,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// `0` means heartbeat is off (spec §6).
    #[serde(default)]
    pub heart_beat_timeout_secs: u64,

    #[serde(default = "default_save_timeout_secs")]
    pub app_resumption_save_persistent_data_timeout_secs: u64,
    #[serde(default = "default_resuming_timeout_secs")]
    pub app_resuming_timeout_secs: u64,
    #[serde(default = "default_delay_secs")]
    pub resumption_delay_before_ign_secs: u64,
    #[serde(default = "default_delay_secs")]
    pub resumption_delay_after_ign_secs: u64,

    #[serde(default = "default_hash_string_size")]
    pub hash_string_size: usize,
    #[serde(default)]
    pub is_mixing_audio_supported: bool,

    #[serde(default = "default_not_resumed_hmi_level")]
    pub default_not_resumed_hmi_level: HmiLevel,

    /// Path to the JSON resumption-store file. Not part of spec §6's
    /// enumerated list (§6 treats the backend as swappable behind
    /// `ResumptionStorage`); the daemon needs a concrete path to
    /// construct `JsonFileResumptionStorage`.
    #[serde(default = "default_resumption_storage_path")]
    pub resumption_storage_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: default_thread_pool_size(),
            pending_requests_amount: 0,
            app_time_scale_secs: 0,
            app_time_scale_max_requests: 0,
            app_hmi_level_none_time_scale_secs: default_hmi_level_none_time_scale_secs(),
            app_hmi_level_none_time_scale_max_requests: default_hmi_level_none_time_scale_max_requests(),
            default_timeout_ms: default_timeout_ms(),
            heart_beat_timeout_secs: 0,
            app_resumption_save_persistent_data_timeout_secs: default_save_timeout_secs(),
            app_resuming_timeout_secs: default_resuming_timeout_secs(),
            resumption_delay_before_ign_secs: default_delay_secs(),
            resumption_delay_after_ign_secs: default_delay_secs(),
            hash_string_size: default_hash_string_size(),
            is_mixing_audio_supported: false,
            default_not_resumed_hmi_level: default_not_resumed_hmi_level(),
            resumption_storage_path: default_resumption_storage_path(),
        }
    }
}

fn default_thread_pool_size() -> usize {
    2
}
fn default_hmi_level_none_time_scale_secs() -> u64 {
    10
}
fn default_hmi_level_none_time_scale_max_requests() -> u32 {
    100
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_save_timeout_secs() -> u64 {
    30
}
fn default_resuming_timeout_secs() -> u64 {
    3
}
fn default_delay_secs() -> u64 {
    30
}
fn default_hash_string_size() -> usize {
    32
}
fn default_not_resumed_hmi_level() -> HmiLevel {
    HmiLevel::None
}

fn default_resumption_storage_path() -> PathBuf {
    data_dir().join("resumption.json")
}

fn data_dir() -> PathBuf {
    ProjectDirs::from("org", "smartdevicelink", "sdl-core").map_or_else(
        || PathBuf::from("."),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

/// Resolve the config file path via XDG / platform conventions.
#[must_use]
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "smartdevicelink", "sdl-core").map_or_else(
        || PathBuf::from("sdl-core.toml"),
        |dirs| dirs.config_dir().join("sdl-core.toml"),
    )
}

/// Loads `DaemonConfig` from the canonical TOML path, if present, then
/// layers `SDL_`-prefixed environment overrides on top.
pub fn load_config() -> Result<DaemonConfig, ConfigError> {
    let path = config_path();
    let figment = Figment::new()
        .merge(Serialized::defaults(DaemonConfig::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("SDL_").split("_"));
    Ok(figment.extract()?)
}

/// Loads config, falling back to defaults if the file is absent or
/// unreadable — used by harnesses that should never fail to start.
#[must_use]
pub fn load_config_or_default() -> DaemonConfig {
    load_config().unwrap_or_default()
}

/// Writes `cfg` to the canonical TOML path, creating parent
/// directories as needed.
pub fn save_config(cfg: &DaemonConfig) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

impl DaemonConfig {
    /// Translates to the shape the core itself accepts (spec §6).
    #[must_use]
    pub fn to_core_config(&self) -> ApplicationManagerConfig {
        ApplicationManagerConfig {
            thread_pool_size: self.thread_pool_size,
            pending_requests_amount: self.pending_requests_amount,
            app_time_scale: Duration::from_secs(self.app_time_scale_secs),
            app_time_scale_max_requests: self.app_time_scale_max_requests,
            app_hmi_level_none_time_scale: Duration::from_secs(self.app_hmi_level_none_time_scale_secs),
            app_hmi_level_none_time_scale_max_requests: self.app_hmi_level_none_time_scale_max_requests,
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            heart_beat_timeout: if self.heart_beat_timeout_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(self.heart_beat_timeout_secs))
            },
            app_resumption_save_persistent_data_timeout: Duration::from_secs(
                self.app_resumption_save_persistent_data_timeout_secs,
            ),
            app_resuming_timeout: Duration::from_secs(self.app_resuming_timeout_secs),
            resumption_delay_before_ign: Duration::from_secs(self.resumption_delay_before_ign_secs),
            resumption_delay_after_ign: Duration::from_secs(self.resumption_delay_after_ign_secs),
            hash_string_size: self.hash_string_size,
            is_mixing_audio_supported: self.is_mixing_audio_supported,
            default_not_resumed_hmi_level: self.default_not_resumed_hmi_level,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_daemon_config_translates_to_spec_defaults() {
        let cfg = DaemonConfig::default();
        let core = cfg.to_core_config();
        assert_eq!(core.thread_pool_size, 2);
        assert_eq!(core.app_hmi_level_none_time_scale, Duration::from_secs(10));
        assert_eq!(core.app_hmi_level_none_time_scale_max_requests, 100);
        assert_eq!(core.default_timeout, Duration::from_millis(10_000));
        assert_eq!(core.app_resuming_timeout, Duration::from_secs(3));
        assert_eq!(core.resumption_delay_before_ign, Duration::from_secs(30));
        assert_eq!(core.hash_string_size, 32);
        assert!(core.heart_beat_timeout.is_none());
    }

    #[test]
    fn nonzero_heart_beat_timeout_becomes_some_duration() {
        let mut cfg = DaemonConfig::default();
        cfg.heart_beat_timeout_secs = 15;
        let core = cfg.to_core_config();
        assert_eq!(core.heart_beat_timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn toml_round_trip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DaemonConfig::default();
        cfg.thread_pool_size = 4;
        cfg.resumption_storage_path = dir.path().join("resumption.json");

        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let reparsed: DaemonConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.thread_pool_size, 4);
    }
}
