//! Configuration types for the event simulator

use crate::error::{Result, SimulatorError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Endpoint the simulator answers when nothing else is configured
pub const DEFAULT_EVENT_SOURCE_URL: &str = "/event-simulator-sse";

/// Storage key used for captured events
pub const DEFAULT_LOCALSTORE_NAME: &str = "fakeEvents";

/// Name of the broadcast channel shared by both contexts
pub const DEFAULT_CHANNEL_NAME: &str = "sse-events-channel4";

/// Main configuration for the simulator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Endpoint identifier (path suffix) the playback is registered under
    pub event_source_url: String,

    /// Source stream to record events from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_url: Option<String>,

    /// Key of the stored event log
    pub localstore_name: String,

    /// Whether the stream is known to end with a CLOSE sentinel
    pub close_event_supported: bool,

    /// Message bus channel name
    pub channel_name: String,

    /// Upper bound for worker registration
    #[serde(with = "humantime_serde")]
    pub registration_timeout: Duration,

    /// Playback engine configuration
    pub playback: PlaybackConfig,

    /// Stored event log configuration
    pub storage: StorageConfig,

    /// Message bus configuration
    pub bus: BusConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            event_source_url: DEFAULT_EVENT_SOURCE_URL.to_string(),
            capture_url: None,
            localstore_name: DEFAULT_LOCALSTORE_NAME.to_string(),
            close_event_supported: false,
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            registration_timeout: Duration::from_secs(10),
            playback: PlaybackConfig::default(),
            storage: StorageConfig::default(),
            bus: BusConfig::default(),
        }
    }
}

/// Timed playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Delay between successive scheduled emissions
    #[serde(with = "humantime_serde")]
    pub cadence: Duration,

    /// Number of events produced by the live generator
    pub generator_events: u32,

    /// Frames buffered between a session and its consumer
    pub frame_buffer: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(2),
            generator_events: 5,
            frame_buffer: 16,
        }
    }
}

/// Stored event log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend for the key-value store
    pub mode: StorageMode,

    /// Maximum number of stored events (oldest evicted first)
    pub max_events: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Memory,
            max_events: crate::store::MAX_STORED_EVENTS,
        }
    }
}

/// Key-value store backend
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageMode {
    /// Process-local map, lost on exit
    #[default]
    Memory,

    /// One JSON file per key, durable across runs
    File {
        /// Directory holding the store files
        data_dir: PathBuf,
    },
}

impl StorageMode {
    /// File store under the platform data directory
    pub fn default_file() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("eventsim");
        StorageMode::File { data_dir }
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Messages buffered per subscriber before the oldest are dropped
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Builder for SimulatorConfig
pub struct ConfigBuilder {
    config: SimulatorConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: SimulatorConfig::default(),
        }
    }

    /// Set the endpoint identifier
    pub fn event_source_url(mut self, url: impl Into<String>) -> Self {
        self.config.event_source_url = url.into();
        self
    }

    /// Set the capture source
    pub fn capture_url(mut self, url: impl Into<String>) -> Self {
        self.config.capture_url = Some(url.into());
        self
    }

    /// Set the stored event log key
    pub fn localstore_name(mut self, name: impl Into<String>) -> Self {
        self.config.localstore_name = name.into();
        self
    }

    /// Declare whether a CLOSE sentinel is guaranteed
    pub fn close_event_supported(mut self, supported: bool) -> Self {
        self.config.close_event_supported = supported;
        self
    }

    /// Set the playback cadence
    pub fn cadence(mut self, cadence: Duration) -> Self {
        self.config.playback.cadence = cadence;
        self
    }

    /// Set storage configuration
    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    /// Set the registration timeout
    pub fn registration_timeout(mut self, timeout: Duration) -> Self {
        self.config.registration_timeout = timeout;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SimulatorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (eventsim.toml, then EVENTSIM_CONFIG_PATH if set)
    /// 3. Environment variable overrides (`EVENTSIM_PLAYBACK__CADENCE=500ms`)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is invalid or fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(SimulatorConfig::default()))
            .merge(Toml::file("eventsim.toml"));

        if let Ok(path) = std::env::var("EVENTSIM_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: SimulatorConfig = figment
            .merge(Env::prefixed("EVENTSIM_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| {
                SimulatorError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: SimulatorConfig = Figment::from(Serialized::defaults(SimulatorConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                SimulatorError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.event_source_url.trim().is_empty() {
            return Err(SimulatorError::Configuration(
                "event_source_url must not be empty".to_string(),
            ));
        }
        if matches!(&self.capture_url, Some(url) if url.trim().is_empty()) {
            return Err(SimulatorError::Configuration(
                "capture_url must not be empty when set".to_string(),
            ));
        }
        if self.localstore_name.trim().is_empty() {
            return Err(SimulatorError::Configuration(
                "localstore_name must not be empty".to_string(),
            ));
        }
        if self.channel_name.trim().is_empty() {
            return Err(SimulatorError::Configuration(
                "channel_name must not be empty".to_string(),
            ));
        }
        if self.storage.max_events == 0 {
            return Err(SimulatorError::Configuration(
                "storage.max_events must be greater than zero".to_string(),
            ));
        }
        if self.bus.capacity == 0 {
            return Err(SimulatorError::Configuration(
                "bus.capacity must be greater than zero".to_string(),
            ));
        }
        if self.playback.frame_buffer == 0 {
            return Err(SimulatorError::Configuration(
                "playback.frame_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = SimulatorConfig::default();
        assert_eq!(config.event_source_url, "/event-simulator-sse");
        assert_eq!(config.localstore_name, "fakeEvents");
        assert_eq!(config.channel_name, "sse-events-channel4");
        assert_eq!(config.playback.cadence, Duration::from_secs(2));
        assert_eq!(config.playback.generator_events, 5);
        assert_eq!(config.storage.max_events, 1000);
        assert!(config.capture_url.is_none());
        assert!(!config.close_event_supported);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_capture_url_fails_closed() {
        let err = ConfigBuilder::new().capture_url("  ").build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn empty_endpoint_fails_closed() {
        let err = ConfigBuilder::new().event_source_url("").build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn zero_capacity_bus_rejected() {
        let mut config = SimulatorConfig::default();
        config.bus.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_merges_partial_toml_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
event_source_url = "/orders/stream"
close_event_supported = true

[playback]
cadence = "250ms"

[storage]
mode = {{ type = "file", data_dir = "/tmp/eventsim" }}
"#
        )
        .unwrap();

        let config = SimulatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.event_source_url, "/orders/stream");
        assert!(config.close_event_supported);
        assert_eq!(config.playback.cadence, Duration::from_millis(250));
        assert_eq!(config.playback.generator_events, 5);
        assert_eq!(
            config.storage.mode,
            StorageMode::File {
                data_dir: PathBuf::from("/tmp/eventsim")
            }
        );
        assert_eq!(config.storage.max_events, 1000);
    }
}
