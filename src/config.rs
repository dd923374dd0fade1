//! Configuration management for CoolSafe
//!
//! Settings are stored in `~/.coolsafe/config.json` with schema versioning and
//! migrations. Every section uses `#[serde(default)]` so partial files load
//! with defaults for anything missing. The loaded [`Config`] is passed into the
//! components that need it; there is no process-wide cached instance.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current config schema version
const CURRENT_VERSION: u32 = 1;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to write config file: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown config version: {0}")]
    UnknownVersion(u32),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema version for migrations
    pub version: u32,
    /// Voice control settings
    pub voice: VoiceConfig,
    /// Cooling thresholds and status tick
    pub cooling: CoolingConfig,
    /// Conversational flow budgets
    pub flow: FlowConfig,
    /// Wake-word listener restart policy
    pub listener: ListenerConfig,
    /// Backend sync settings
    pub sync: SyncConfig,
    /// Site and file locations
    pub general: GeneralConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            voice: VoiceConfig::default(),
            cooling: CoolingConfig::default(),
            flow: FlowConfig::default(),
            listener: ListenerConfig::default(),
            sync: SyncConfig::default(),
            general: GeneralConfig::default(),
        }
    }
}

impl Config {
    /// Check the config for values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cooling.soft_limit_minutes <= 0 {
            return Err(ConfigError::Invalid(
                "soft_limit_minutes must be greater than 0".to_string(),
            ));
        }
        if self.cooling.hard_limit_minutes <= self.cooling.soft_limit_minutes {
            return Err(ConfigError::Invalid(format!(
                "hard_limit_minutes ({}) must be greater than soft_limit_minutes ({})",
                self.cooling.hard_limit_minutes, self.cooling.soft_limit_minutes
            )));
        }
        if self.cooling.status_tick_secs == 0 {
            return Err(ConfigError::Invalid(
                "status_tick_secs must be greater than 0".to_string(),
            ));
        }
        if self.flow.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_retries must be greater than 0".to_string(),
            ));
        }
        if self.flow.step_timeout_secs == 0 || self.flow.confirm_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "flow timeouts must be greater than 0".to_string(),
            ));
        }
        if self.listener.backoff_base_ms == 0
            || self.listener.backoff_cap_ms < self.listener.backoff_base_ms
        {
            return Err(ConfigError::Invalid(
                "backoff_cap_ms must be at least backoff_base_ms, and both non-zero".to_string(),
            ));
        }
        if self.sync.max_retry_attempts == 0 || self.sync.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync retry attempts and flush interval must be greater than 0".to_string(),
            ));
        }
        if self.voice.wake_phrases.iter().all(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "at least one wake phrase is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Voice control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Whether voice control starts enabled
    pub enabled: bool,
    /// Trigger phrase aliases, matched case-insensitively
    pub wake_phrases: Vec<String>,
    /// How long to wait for a command after a bare wake phrase
    pub command_timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_phrases: vec![
                "hey chef".to_string(),
                "okay chef".to_string(),
                "hey kitchen".to_string(),
            ],
            command_timeout_secs: 8,
        }
    }
}

/// Cooling thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoolingConfig {
    /// Warning threshold in minutes
    pub soft_limit_minutes: i64,
    /// Critical threshold in minutes
    pub hard_limit_minutes: i64,
    /// Interval of the periodic status recompute
    pub status_tick_secs: u64,
    /// End temperatures strictly below this are compliant
    pub compliant_below_celsius: f64,
    /// Lowest reading treated as plausible when confirming
    pub plausible_min_celsius: f64,
    /// Highest reading treated as plausible when confirming
    pub plausible_max_celsius: f64,
}

impl Default for CoolingConfig {
    fn default() -> Self {
        Self {
            soft_limit_minutes: 90,
            hard_limit_minutes: 120,
            status_tick_secs: 10,
            compliant_below_celsius: 8.0,
            plausible_min_celsius: -30.0,
            plausible_max_celsius: 110.0,
        }
    }
}

impl CoolingConfig {
    pub fn status_tick(&self) -> Duration {
        Duration::from_secs(self.status_tick_secs)
    }
}

/// Conversational flow budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Failed answers allowed on one step before falling back to manual entry
    pub max_retries: u32,
    /// Timeout for the staff and temperature steps
    pub step_timeout_secs: u64,
    /// Timeout for the confirmation step
    pub confirm_timeout_secs: u64,
    /// Delay after speech finishes before the microphone reopens
    pub speech_grace_ms: u64,
    /// Treat speech as finished if no completion arrives within this time
    pub speech_watchdog_secs: u64,
    /// Treat a capture as stopped if the device never acknowledges the stop
    pub stop_ack_timeout_ms: u64,
    /// Consecutive identical interim answers needed to stop capture early
    pub interim_stable_hits: u32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            step_timeout_secs: 10,
            confirm_timeout_secs: 6,
            speech_grace_ms: 300,
            speech_watchdog_secs: 15,
            stop_ack_timeout_ms: 2000,
            interim_stable_hits: 2,
        }
    }
}

/// Wake-word listener restart policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// First restart delay after a recoverable error
    pub backoff_base_ms: u64,
    /// Upper bound on the restart delay
    pub backoff_cap_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1000,
            backoff_cap_ms: 10_000,
        }
    }
}

/// Backend sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Backend base URL; `None` keeps everything local
    pub backend_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Attempts per request before giving up on this flush
    pub max_retry_attempts: u32,
    /// Seconds between background flush attempts while entries are queued
    pub flush_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            timeout_secs: 15,
            max_retry_attempts: 3,
            flush_interval_secs: 30,
        }
    }
}

/// Site and file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Site identifier stamped on new sessions
    pub site_id: String,
    /// Database file (None for ~/.coolsafe/coolsafe.db)
    pub database_path: Option<PathBuf>,
    /// Staff directory JSON (None for ~/.coolsafe/staff.json)
    pub staff_path: Option<PathBuf>,
    /// Food preset JSON (None for the built-in list)
    pub presets_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            site_id: "main-kitchen".to_string(),
            database_path: None,
            staff_path: None,
            presets_path: None,
        }
    }
}

/// Get the path to the config directory (~/.coolsafe)
pub fn get_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| {
            tracing::error!("Could not determine home directory, using /tmp");
            PathBuf::from("/tmp")
        })
        .join(".coolsafe")
}

/// Get the path to the config file (~/.coolsafe/config.json)
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Load configuration from `path`, falling back to defaults when absent
///
/// Older schema versions are migrated and written back.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", path);
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path).map_err(ConfigError::Read)?;
    let config: Config = serde_json::from_str(&contents)?;

    let original_version = config.version;
    let migrated = migrate_config(config)?;
    if migrated.version != original_version {
        tracing::info!(
            "Migrated config from version {} to {}",
            original_version,
            migrated.version
        );
        save_config(path, &migrated)?;
    }

    migrated.validate()?;
    Ok(migrated)
}

/// Save configuration to `path`, creating the parent directory if needed
pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(ConfigError::Write)?;
        }
    }

    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents).map_err(ConfigError::Write)?;

    tracing::info!("Config saved to {:?}", path);
    Ok(())
}

/// Migrate configuration from older schema versions
fn migrate_config(mut config: Config) -> Result<Config, ConfigError> {
    while config.version < CURRENT_VERSION {
        config = apply_migration(config)?;
    }
    if config.version > CURRENT_VERSION {
        return Err(ConfigError::UnknownVersion(config.version));
    }
    Ok(config)
}

/// Apply a single migration step
fn apply_migration(config: Config) -> Result<Config, ConfigError> {
    match config.version {
        // Version 0 -> 1: wake phrases became case-insensitive aliases
        0 => {
            let mut migrated = config;
            migrated.voice.wake_phrases = migrated
                .voice
                .wake_phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect();
            migrated.version = 1;
            Ok(migrated)
        }
        v => Err(ConfigError::UnknownVersion(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_current_version() {
        let config = Config::default();
        assert_eq!(config.version, CURRENT_VERSION);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_cooling_config_defaults() {
        let cooling = CoolingConfig::default();
        assert_eq!(cooling.soft_limit_minutes, 90);
        assert_eq!(cooling.hard_limit_minutes, 120);
        assert_eq!(cooling.status_tick_secs, 10);
        assert_eq!(cooling.compliant_below_celsius, 8.0);
    }

    #[test]
    fn test_listener_config_defaults() {
        let listener = ListenerConfig::default();
        assert_eq!(listener.backoff_base_ms, 1000);
        assert_eq!(listener.backoff_cap_ms, 10_000);
    }

    #[test]
    fn test_partial_config_deserialisation() {
        let json = r#"{"version": 1, "cooling": {"soft_limit_minutes": 60}}"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.cooling.soft_limit_minutes, 60);
        assert_eq!(config.cooling.hard_limit_minutes, 120);
        assert_eq!(config.flow.max_retries, 3);
        assert_eq!(config.voice.wake_phrases.len(), 3);
    }

    #[test]
    fn test_config_unknown_fields_ignored() {
        let json = r#"{
            "version": 1,
            "unknown_field": "should be ignored",
            "voice": {"enabled": false, "extra": true}
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(!config.voice.enabled);
    }

    #[test]
    fn test_validate_rejects_inverted_limits() {
        let mut config = Config::default();
        config.cooling.hard_limit_minutes = 60;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("hard_limit_minutes"));
    }

    #[test]
    fn test_validate_rejects_empty_wake_phrases() {
        let mut config = Config::default();
        config.voice.wake_phrases = vec!["  ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_migration_from_version_0_normalises_phrases() {
        let mut old_config = Config {
            version: 0,
            ..Default::default()
        };
        old_config.voice.wake_phrases = vec![" Hey Chef ".to_string(), "".to_string()];

        let migrated = migrate_config(old_config).unwrap();
        assert_eq!(migrated.version, CURRENT_VERSION);
        assert_eq!(migrated.voice.wake_phrases, vec!["hey chef".to_string()]);
    }

    #[test]
    fn test_future_version_rejected() {
        let future_config = Config {
            version: 999,
            ..Default::default()
        };
        assert!(matches!(
            migrate_config(future_config),
            Err(ConfigError::UnknownVersion(999))
        ));
    }

    #[test]
    fn test_config_path_format() {
        let path = get_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains(".coolsafe"));
        assert!(path_str.ends_with("config.json"));
    }
}
