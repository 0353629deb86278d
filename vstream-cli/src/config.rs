//! Configuration file support for the vstream tools
//!
//! One TOML file may carry a `[streamer]` and a `[client]` section. Every
//! field is optional and falls back to the protocol defaults; durations are
//! written in milliseconds and periodic activities as rates in Hz.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use vstream::protocol::config as proto;
use vstream::protocol::{AdmissionPolicy, ClientConfig, LossConfig, StreamerConfig};

/// Simulated receive loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossSection {
    pub enabled: bool,
    pub rate: f64,
    pub seed: Option<u64>,
}

impl Default for LossSection {
    fn default() -> Self {
        let loss = LossConfig::default();
        LossSection {
            enabled: loss.enabled,
            rate: loss.rate,
            seed: loss.seed,
        }
    }
}

impl From<&LossSection> for LossConfig {
    fn from(section: &LossSection) -> Self {
        LossConfig {
            enabled: section.enabled,
            rate: section.rate,
            seed: section.seed,
        }
    }
}

/// Full-buffer admission behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyName {
    Drop,
    Defer,
}

impl From<PolicyName> for AdmissionPolicy {
    fn from(name: PolicyName) -> Self {
        match name {
            PolicyName::Drop => AdmissionPolicy::Drop,
            PolicyName::Defer => AdmissionPolicy::Defer,
        }
    }
}

/// `[streamer]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerSection {
    pub fps: u32,
    pub packets_per_frame: u32,
    pub payload_size: usize,
    /// Retransmissions per pacing tick
    pub retransmit_batch: usize,
    /// Statistics interval in seconds (0 disables)
    pub stats_interval_secs: u64,
    pub loss: LossSection,
}

impl Default for StreamerSection {
    fn default() -> Self {
        let config = StreamerConfig::default();
        StreamerSection {
            fps: config.fps,
            packets_per_frame: config.packets_per_frame,
            payload_size: config.payload_size,
            retransmit_batch: config.retransmit_batch,
            stats_interval_secs: 1,
            loss: LossSection::default(),
        }
    }
}

impl StreamerSection {
    /// Convert into a validated protocol config
    pub fn to_config(&self) -> Result<StreamerConfig, ConfigError> {
        let config = StreamerConfig {
            payload_size: self.payload_size,
            fps: self.fps,
            packets_per_frame: self.packets_per_frame,
            retransmit_batch: self.retransmit_batch,
            loss: (&self.loss).into(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

/// `[client]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub payload_size: usize,
    pub buffer_size: u32,
    pub pause_threshold: u32,
    pub resume_threshold: u32,
    pub packets_per_frame: u32,
    pub consume_start_delay_ms: u64,
    pub prebuffer_threshold: u32,
    /// Frames played per second
    pub consume_rate_hz: u32,
    pub admission_rate_hz: u32,
    pub request_rate_hz: u32,
    pub admission_policy: PolicyName,
    pub repeat_flow_signals: bool,
    pub max_open_frames: Option<usize>,
    /// Statistics interval in seconds (0 disables)
    pub stats_interval_secs: u64,
    pub loss: LossSection,
}

impl Default for ClientSection {
    fn default() -> Self {
        let config = ClientConfig::default();
        ClientSection {
            payload_size: config.payload_size,
            buffer_size: config.buffer_size,
            pause_threshold: config.pause_threshold,
            resume_threshold: config.resume_threshold,
            packets_per_frame: config.packets_per_frame,
            consume_start_delay_ms: config.consume_start_delay.as_millis() as u64,
            prebuffer_threshold: config.prebuffer_threshold,
            consume_rate_hz: 60,
            admission_rate_hz: 120,
            request_rate_hz: 120,
            admission_policy: PolicyName::Drop,
            repeat_flow_signals: config.repeat_flow_signals,
            max_open_frames: config.max_open_frames,
            stats_interval_secs: 1,
            loss: LossSection::default(),
        }
    }
}

fn period(name: &str, hz: u32) -> Result<Duration, ConfigError> {
    if hz == 0 {
        return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
    }
    Ok(Duration::from_secs(1) / hz)
}

impl ClientSection {
    /// Convert into a validated protocol config
    pub fn to_config(&self) -> Result<ClientConfig, ConfigError> {
        let config = ClientConfig {
            payload_size: self.payload_size,
            buffer_size: self.buffer_size,
            pause_threshold: self.pause_threshold,
            resume_threshold: self.resume_threshold,
            packets_per_frame: self.packets_per_frame,
            consume_start_delay: Duration::from_millis(self.consume_start_delay_ms),
            prebuffer_threshold: self.prebuffer_threshold,
            consume_interval: period("consume_rate_hz", self.consume_rate_hz)?,
            admission_interval: period("admission_rate_hz", self.admission_rate_hz)?,
            request_interval: period("request_rate_hz", self.request_rate_hz)?,
            admission_policy: self.admission_policy.into(),
            repeat_flow_signals: self.repeat_flow_signals,
            max_open_frames: self.max_open_frames,
            loss: (&self.loss).into(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

/// Combined configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub streamer: Option<StreamerSection>,
    pub client: Option<ClientSection>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Both sections with every default filled in
    pub fn example() -> Self {
        Config {
            streamer: Some(StreamerSection::default()),
            client: Some(ClientSection::default()),
        }
    }

    /// The `[streamer]` section, or defaults when absent
    pub fn streamer_or_default(&self) -> StreamerSection {
        self.streamer.clone().unwrap_or_default()
    }

    /// The `[client]` section, or defaults when absent
    pub fn client_or_default(&self) -> ClientSection {
        self.client.clone().unwrap_or_default()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Protocol(#[from] proto::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
