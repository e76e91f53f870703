//! Application configuration
//!
//! Every section has working defaults, so both binaries run without a
//! config file. A TOML file can override any subset of fields, and command
//! line flags override the file.
//!
//! ```toml
//! [audio]
//! sample_rate = 48000
//! channels = 2
//! frames_per_buffer = 512
//!
//! [jitter]
//! prebuffer_min = 5
//! low_watermark = 10
//! target = 20
//! high_watermark = 30
//! capacity = 200
//! reorder_horizon = 50
//!
//! [network]
//! listen_port = 8080
//! control_port = 8081
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::buffer::JitterThresholds;
use crate::audio::reorder::DEFAULT_REORDER_HORIZON;
use crate::constants::*;
use crate::error::ConfigError;
use crate::protocol::AudioFormat;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioFormat,
    pub jitter: JitterConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// Jitter buffer and reordering settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    pub prebuffer_min: usize,
    pub low_watermark: usize,
    pub target: usize,
    pub high_watermark: usize,
    pub capacity: usize,
    /// Parked packets tolerated before a reorder stall is reported
    pub reorder_horizon: usize,
}

impl JitterConfig {
    pub fn thresholds(&self) -> JitterThresholds {
        JitterThresholds {
            prebuffer_min: self.prebuffer_min,
            low_watermark: self.low_watermark,
            target: self.target,
            high_watermark: self.high_watermark,
            capacity: self.capacity,
        }
    }
}

impl Default for JitterConfig {
    fn default() -> Self {
        let thresholds = JitterThresholds::default();
        Self {
            prebuffer_min: thresholds.prebuffer_min,
            low_watermark: thresholds.low_watermark,
            target: thresholds.target,
            high_watermark: thresholds.high_watermark,
            capacity: thresholds.capacity,
            reorder_horizon: DEFAULT_REORDER_HORIZON,
        }
    }
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the receiver binds for audio
    pub bind_address: String,
    /// UDP port for audio datagrams
    pub listen_port: u16,
    /// UDP port the sender listens on for control datagrams
    pub control_port: u16,
    /// Where the receiver sends volume control, if anywhere
    pub client_control_addr: Option<SocketAddr>,
    /// Kernel receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Socket read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Seconds between buffer statistics reports (0 disables)
    pub stats_interval_secs: u64,
}

impl NetworkConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.listen_port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            listen_port: DEFAULT_AUDIO_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            client_control_addr: None,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            read_timeout_ms: 250,
            stats_interval_secs: 10,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&text)
    }

    /// Load from an explicit path, or from the default location if a file
    /// exists there, or fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Check the audio format and jitter thresholds
    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if audio.sample_rate == 0 || audio.channels == 0 || audio.frames_per_buffer == 0 {
            return Err(ConfigError::InvalidFormat(format!(
                "sample rate, channels and frames per buffer must be non-zero ({} Hz, {} ch, {} frames)",
                audio.sample_rate, audio.channels, audio.frames_per_buffer
            )));
        }
        if audio.payload_size() + crate::protocol::SEQUENCE_HEADER_LEN > MAX_DATAGRAM_SIZE {
            return Err(ConfigError::InvalidFormat(format!(
                "payload of {} bytes does not fit in a UDP datagram",
                audio.payload_size()
            )));
        }

        self.jitter.thresholds().validate()
    }
}

/// `config.toml` in the platform config directory
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "lan-pcm-streamer").map(|dirs| dirs.config_dir().join("config.toml"))
}
