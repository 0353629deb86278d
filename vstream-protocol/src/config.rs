//! Endpoint configuration
//!
//! Plain parameter structs for the two endpoints. File formats and command
//! line parsing live in the CLI crate; these only carry validated values.

use crate::packet::RETRANSMIT_CAPACITY;
use std::time::Duration;
use thiserror::Error;

/// Default payload bytes appended to every data and control packet
pub const DEFAULT_PAYLOAD_SIZE: usize = 100;

/// Default number of packets per frame
pub const DEFAULT_PACKETS_PER_FRAME: u32 = 100;

/// What the admission scan does with a complete frame when the playout
/// buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// Discard the frame
    #[default]
    Drop,
    /// Keep the frame's tracker open and offer it again on the next scan
    Defer,
}

/// Simulated receive-side loss
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossConfig {
    /// Drop received datagrams at random
    pub enabled: bool,
    /// Probability of dropping each received datagram (0.0 to 1.0)
    pub rate: f64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for LossConfig {
    fn default() -> Self {
        LossConfig {
            enabled: false,
            rate: 0.01,
            seed: None,
        }
    }
}

impl LossConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.rate) {
            return Err(ConfigError::Invalid(format!(
                "loss rate {} is outside [0, 1]",
                self.rate
            )));
        }
        Ok(())
    }
}

/// Client (receiver) parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Payload bytes appended to control packets
    pub payload_size: usize,
    /// Playout buffer capacity in frames
    pub buffer_size: u32,
    /// Send PAUSE when this many frames are ready
    pub pause_threshold: u32,
    /// Send RESUME when at most this many frames are ready
    pub resume_threshold: u32,
    /// Packets per frame
    pub packets_per_frame: u32,
    /// Delay between start and the first prebuffer check
    pub consume_start_delay: Duration,
    /// Frames that must be ready before playout begins
    pub prebuffer_threshold: u32,
    /// Consumption clock period
    pub consume_interval: Duration,
    /// Admission scan period
    pub admission_interval: Duration,
    /// Retransmit request period
    pub request_interval: Duration,
    /// Full-buffer behaviour of the admission scan
    pub admission_policy: AdmissionPolicy,
    /// Re-send PAUSE/RESUME on every tick the condition holds
    pub repeat_flow_signals: bool,
    /// Open frame trackers beyond which data packets are discarded
    pub max_open_frames: Option<usize>,
    /// Simulated loss on received data packets
    pub loss: LossConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            payload_size: DEFAULT_PAYLOAD_SIZE,
            buffer_size: 40,
            pause_threshold: 30,
            resume_threshold: 5,
            packets_per_frame: DEFAULT_PACKETS_PER_FRAME,
            consume_start_delay: Duration::from_millis(1100),
            prebuffer_threshold: 0,
            consume_interval: Duration::from_secs(1) / 60,
            admission_interval: Duration::from_secs(1) / 120,
            request_interval: Duration::from_secs(1) / 120,
            admission_policy: AdmissionPolicy::Drop,
            repeat_flow_signals: true,
            max_open_frames: None,
            loss: LossConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Check threshold ordering and non-zero periods
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packets_per_frame == 0 {
            return Err(ConfigError::Invalid("packets_per_frame must be > 0".into()));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be > 0".into()));
        }
        if self.resume_threshold >= self.pause_threshold {
            return Err(ConfigError::Invalid(format!(
                "resume threshold {} must be below pause threshold {}",
                self.resume_threshold, self.pause_threshold
            )));
        }
        if self.pause_threshold > self.buffer_size {
            return Err(ConfigError::Invalid(format!(
                "pause threshold {} exceeds buffer size {}",
                self.pause_threshold, self.buffer_size
            )));
        }
        if self.prebuffer_threshold > self.buffer_size {
            return Err(ConfigError::Invalid(format!(
                "prebuffer threshold {} exceeds buffer size {}",
                self.prebuffer_threshold, self.buffer_size
            )));
        }
        for (name, period) in [
            ("consume_interval", self.consume_interval),
            ("admission_interval", self.admission_interval),
            ("request_interval", self.request_interval),
        ] {
            if period.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }
        self.loss.validate()
    }

    /// Open-tracker limit, defaulting to `buffer_size * 2 * packets_per_frame`
    pub fn open_frame_limit(&self) -> usize {
        self.max_open_frames.unwrap_or(
            (self.buffer_size as usize)
                .saturating_mul(2)
                .saturating_mul(self.packets_per_frame as usize),
        )
    }
}

/// Streamer (sender) parameters
#[derive(Debug, Clone, PartialEq)]
pub struct StreamerConfig {
    /// Payload bytes appended to data packets
    pub payload_size: usize,
    /// Frames emitted per second
    pub fps: u32,
    /// Packets per frame
    pub packets_per_frame: u32,
    /// Retransmissions sent per tick at most
    pub retransmit_batch: usize,
    /// Simulated loss on received control packets
    pub loss: LossConfig,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        StreamerConfig {
            payload_size: DEFAULT_PAYLOAD_SIZE,
            fps: 90,
            packets_per_frame: DEFAULT_PACKETS_PER_FRAME,
            retransmit_batch: RETRANSMIT_CAPACITY,
            loss: LossConfig::default(),
        }
    }
}

impl StreamerConfig {
    /// Check for zero rates
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fps == 0 {
            return Err(ConfigError::Invalid("fps must be > 0".into()));
        }
        if self.packets_per_frame == 0 {
            return Err(ConfigError::Invalid("packets_per_frame must be > 0".into()));
        }
        self.loss.validate()
    }

    /// Pacing period (`1 / fps`)
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        ClientConfig::default().validate().unwrap();
        StreamerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_threshold_ordering() {
        let config = ClientConfig {
            pause_threshold: 5,
            resume_threshold: 5,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            pause_threshold: 41,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_loss_rate_range() {
        let config = StreamerConfig {
            loss: LossConfig {
                enabled: true,
                rate: 1.5,
                seed: None,
            },
            ..StreamerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_open_frame_limit() {
        let config = ClientConfig::default();
        assert_eq!(config.open_frame_limit(), 40 * 2 * 100);

        let config = ClientConfig {
            max_open_frames: Some(8),
            ..ClientConfig::default()
        };
        assert_eq!(config.open_frame_limit(), 8);
    }

    #[test]
    fn test_frame_interval() {
        let config = StreamerConfig {
            fps: 50,
            ..StreamerConfig::default()
        };
        assert_eq!(config.frame_interval(), Duration::from_millis(20));
    }
}
