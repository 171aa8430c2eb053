//! Configuration module for echem-session
//!
//! This module handles application configuration including:
//! - Session timeouts and log sizing ([`SessionConfig`])
//! - The default measurement method ([`method::MethodConfig`])
//! - The simulated instrument setup ([`SimulatorConfig`])
//! - Application state persistence (UI preferences, last device)
//!
//! # App Data Location
//!
//! Application state is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.echem.session/`
//! - **macOS**: `~/Library/Application Support/dev.echem.session/`
//! - **Windows**: `%APPDATA%\dev.echem.session\`
//!
//! # Files
//!
//! - `app_state.json` - UI preferences and the last used device
//! - `config.toml` - Optional user configuration, loaded from the data
//!   directory or a path given on the command line
//!
//! # Example
//!
//! ```ignore
//! use echem_session::config::{AppConfig, AppState};
//!
//! let config = AppConfig::load_or_default("config.toml");
//! let mut state = AppState::load_or_default();
//! state.last_device = Some("ES4-0001".into());
//! state.save()?;
//! ```

pub mod method;

pub use method::{
    CurrentRange, CurrentRangeBounds, MethodConfig, MethodDescriptor, MethodForm, Pretreatment,
    Technique, TechniqueKind,
};

use crate::error::{Result, ResultExt, SessionError};
use crate::types::{Device, Transport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.echem.session";

/// App state filename
pub const APP_STATE_FILE: &str = "app_state.json";

/// Config filename looked up in the data directory
pub const CONFIG_FILE: &str = "config.toml";

/// Default timeout for device discovery in milliseconds
pub const DEFAULT_DISCOVER_TIMEOUT_MS: u64 = 3_000;

/// Default timeout for connecting in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default time to wait for an abort to be confirmed in milliseconds
pub const DEFAULT_ABORT_TIMEOUT_MS: u64 = 5_000;

/// Default number of log lines kept for the UI
pub const DEFAULT_LOG_CAPACITY: usize = 500;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        SessionError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .map_err(SessionError::from)
            .with_context(|| format!("Failed to create app data directory {:?}", dir))?;
    }

    Ok(dir)
}

/// Get the path to the app state file
pub fn app_state_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(APP_STATE_FILE))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Session Config ====================

/// Timeouts and sizing for a measurement session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound for a discovery scan
    pub discover_timeout_ms: u64,
    /// Upper bound for establishing a connection
    pub connect_timeout_ms: u64,
    /// How long to wait for the instrument to confirm an abort
    pub abort_timeout_ms: u64,
    /// Number of log lines the UI model keeps
    pub log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discover_timeout_ms: DEFAULT_DISCOVER_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            abort_timeout_ms: DEFAULT_ABORT_TIMEOUT_MS,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Discovery timeout as a duration
    pub fn discover_timeout(&self) -> Duration {
        Duration::from_millis(self.discover_timeout_ms)
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Abort confirmation timeout as a duration
    pub fn abort_timeout(&self) -> Duration {
        Duration::from_millis(self.abort_timeout_ms)
    }
}

// ==================== Simulator Config ====================

/// Setup of the in-process simulated instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Devices reported by discovery
    pub devices: Vec<Device>,
    /// Simulated discovery latency in milliseconds
    pub discovery_latency_ms: u64,
    /// Simulated connect latency in milliseconds
    pub connect_latency_ms: u64,
    /// Delay between emitted sample batches in milliseconds
    pub sample_interval_ms: u64,
    /// Samples per curve-data notification
    pub batch_size: usize,
    /// Interval of idle status readings in milliseconds (0 disables them)
    pub status_interval_ms: u64,
    /// Relative noise added to the simulated current (0.0 = none)
    pub noise: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            devices: vec![
                Device::new("ES4-0001", "EmStat4 HR", Transport::Usb),
                Device::new("SENS-0042", "Sensit BT", Transport::Bluetooth),
                Device::new(
                    "PS4-1771",
                    "PalmSens4",
                    Transport::Serial {
                        port: "/dev/ttyUSB0".to_string(),
                    },
                ),
            ],
            discovery_latency_ms: 200,
            connect_latency_ms: 150,
            sample_interval_ms: 20,
            batch_size: 4,
            status_interval_ms: 500,
            noise: 0.02,
        }
    }
}

// ==================== App Config ====================

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Session timeouts and sizing
    #[serde(default)]
    pub session: SessionConfig,

    /// Method prefilled in the UI
    #[serde(default)]
    pub method: MethodConfig,

    /// Simulated instrument setup
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl AppConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(SessionError::from)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        toml::from_str(&content).map_err(|e| {
            SessionError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load a configuration file, returning defaults if it is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| SessionError::Serialization(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(SessionError::from)
                    .context("Failed to create config directory")?;
            }
        }

        std::fs::write(path, content)
            .map_err(SessionError::from)
            .with_context(|| format!("Failed to write config file {:?}", path))
    }
}

// ==================== App State ====================

/// Application state persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Version for future migrations
    #[serde(default = "default_app_state_version")]
    pub version: u32,

    /// ID of the device connected most recently
    #[serde(default)]
    pub last_device: Option<String>,

    /// Use dark theme
    #[serde(default = "default_true")]
    pub dark_mode: bool,

    /// Method used most recently
    #[serde(default)]
    pub last_method: Option<MethodConfig>,
}

fn default_app_state_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            version: default_app_state_version(),
            last_device: None,
            dark_mode: true,
            last_method: None,
        }
    }
}

impl AppState {
    /// Load app state from the default location
    pub fn load() -> Result<Self> {
        let path = app_state_path().ok_or_else(|| {
            SessionError::Config("Could not determine app state path".to_string())
        })?;
        Self::load_from(path)
    }

    /// Load app state from an explicit path; a missing file yields defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(SessionError::from)
            .context("Failed to read app state")?;

        serde_json::from_str(&content)
            .map_err(|e| SessionError::Config(format!("Failed to parse app state: {}", e)))
    }

    /// Load app state, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load app state, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save app state to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(APP_STATE_FILE))
    }

    /// Save app state to an explicit path
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            SessionError::Serialization(format!("Failed to serialize app state: {}", e))
        })?;

        std::fs::write(path.as_ref(), content)
            .map_err(SessionError::from)
            .context("Failed to write app state")
    }

    /// Remember the device that was just connected
    pub fn update_last_device(&mut self, device: &Device) {
        self.last_device = Some(device.id.to_string());
    }

    /// Find the last used device in a discovered list
    pub fn preferred_device_index(&self, devices: &[Device]) -> Option<usize> {
        let last = self.last_device.as_deref()?;
        devices.iter().position(|d| d.id.as_str() == last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_session_config_durations() {
        let config = SessionConfig::default();
        assert_eq!(config.abort_timeout(), Duration::from_millis(DEFAULT_ABORT_TIMEOUT_MS));
        assert_eq!(config.log_capacity, DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn test_app_config_toml_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.session.abort_timeout_ms = 1234;
        config.method = MethodConfig::new(Technique::Chronoamperometry {
            e_dc: 0.3,
            interval_time: 0.2,
            run_time: 4.0,
        });
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nabort_timeout_ms = 250\n").unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.session.abort_timeout_ms, 250);
        assert_eq!(loaded.session.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(loaded.simulator, SimulatorConfig::default());
    }

    #[test]
    fn test_invalid_toml_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "session = 12").unwrap();

        assert!(AppConfig::load(&path).is_err());
        assert_eq!(AppConfig::load_or_default(&path), AppConfig::default());
    }

    #[test]
    fn test_app_state_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(APP_STATE_FILE);

        let mut state = AppState::default();
        let device = Device::new("ES4-0001", "EmStat4 HR", Transport::Usb);
        state.update_last_device(&device);
        state.dark_mode = false;
        state.save_to(&path).unwrap();

        let loaded = AppState::load_from(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.preferred_device_index(&[device]), Some(0));
    }

    #[test]
    fn test_missing_config_reports_io_error_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        match AppConfig::load(&path) {
            Err(SessionError::WithContext { context, source }) => {
                assert!(context.contains("absent.toml"));
                assert!(matches!(*source, SessionError::Io(_)));
            }
            other => panic!("expected an I/O error with context, got {:?}", other),
        }
    }

    #[test]
    fn test_save_into_missing_directory_creates_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        AppConfig::default().save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_missing_app_state_is_default() {
        let dir = tempdir().unwrap();
        let loaded = AppState::load_from(dir.path().join("nope.json")).unwrap();
        assert_eq!(loaded, AppState::default());
    }
}
