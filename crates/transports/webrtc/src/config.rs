//! Configuration types for channel streaming sessions

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration shared by every channel in a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// One independent connection per viewer, offers pulled by `OfferRequest`
    /// (default: true). When false, the offerer creates one connection and
    /// broadcasts its offer immediately.
    pub fan_out_enabled: bool,

    /// Connection timeout and retry tuning
    pub connection: ConnectionConfig,

    /// Audio packetizer settings
    pub audio: AudioConfig,

    /// Video forwarding settings
    pub video: VideoConfig,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Connection timeout and retry tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connection timeout used for the first attempt (default: 5000ms)
    pub initial_timeout_ms: u64,

    /// Lower bound for the adapted timeout (default: 2000ms)
    pub min_timeout_ms: u64,

    /// Upper bound for the timeout, both when growing and adapting (default: 10000ms)
    pub max_timeout_ms: u64,

    /// Timeout multiplier applied after each retry (default: 1.5)
    pub timeout_growth: f64,

    /// Measured connect time is multiplied by this to derive the next timeout (default: 2.0)
    pub timeout_headroom: f64,

    /// Backoff before a retry while optimistic (default: 500ms)
    pub retry_backoff_ms: u64,

    /// Backoff before a retry once the network measured slow (default: 1500ms)
    pub conservative_backoff_ms: u64,

    /// Connect times at or under this keep the channel optimistic (default: 2000ms)
    pub optimistic_threshold_ms: u64,
}

/// Audio packetizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of captured audio in Hz (default: 48000)
    pub sample_rate: u32,

    /// Duration of each transport packet (default: 20ms)
    pub packet_duration_ms: u32,

    /// Latency bound for the assembly buffer (default: 100ms)
    pub max_buffered_duration_ms: u32,

    /// Opus bitrate used by the WebRTC engine (default: 64000 bps)
    pub opus_bitrate: u32,
}

/// Video forwarding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Pull frames from the media source while streaming (default: true)
    pub enabled: bool,

    /// Frames pulled per second (default: 30)
    pub frame_rate: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            fan_out_enabled: true,
            connection: ConnectionConfig::default(),
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: 5000,
            min_timeout_ms: 2000,
            max_timeout_ms: 10000,
            timeout_growth: 1.5,
            timeout_headroom: 2.0,
            retry_backoff_ms: 500,
            conservative_backoff_ms: 1500,
            optimistic_threshold_ms: 2000,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            packet_duration_ms: 20,
            max_buffered_duration_ms: 100,
            opus_bitrate: 64000,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_rate: 30,
        }
    }
}

impl ConnectionConfig {
    /// Timeout for the first connection attempt
    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    /// Lower bound for adapted timeouts
    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_timeout_ms)
    }

    /// Upper bound for grown or adapted timeouts
    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }
}

impl AudioConfig {
    /// Interval between packetizer drains
    pub fn packet_interval(&self) -> Duration {
        Duration::from_millis(self.packet_duration_ms as u64)
    }
}

impl VideoConfig {
    /// Interval between frame pulls
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.frame_rate.max(1) as u64)
    }
}

impl StreamingConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;

        if conn.initial_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connection.initial_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if conn.min_timeout_ms > conn.max_timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "connection.min_timeout_ms ({}) exceeds max_timeout_ms ({})",
                conn.min_timeout_ms, conn.max_timeout_ms
            )));
        }

        if conn.initial_timeout_ms > conn.max_timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "connection.initial_timeout_ms ({}) exceeds max_timeout_ms ({})",
                conn.initial_timeout_ms, conn.max_timeout_ms
            )));
        }

        if conn.timeout_growth < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "connection.timeout_growth must be >= 1.0, got {}",
                conn.timeout_growth
            )));
        }

        if conn.timeout_headroom <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "connection.timeout_headroom must be positive, got {}",
                conn.timeout_headroom
            )));
        }

        let audio = &self.audio;

        if !matches!(audio.sample_rate, 48000 | 24000 | 16000) {
            return Err(Error::InvalidConfig(format!(
                "audio.sample_rate must be 48000, 24000 or 16000, got {}",
                audio.sample_rate
            )));
        }

        // Opus frame sizes expressible in whole milliseconds
        if !matches!(audio.packet_duration_ms, 5 | 10 | 20 | 40 | 60) {
            return Err(Error::InvalidConfig(format!(
                "audio.packet_duration_ms must be one of 5, 10, 20, 40 or 60, got {}",
                audio.packet_duration_ms
            )));
        }

        if audio.max_buffered_duration_ms < audio.packet_duration_ms {
            return Err(Error::InvalidConfig(format!(
                "audio.max_buffered_duration_ms ({}) must hold at least one packet ({}ms)",
                audio.max_buffered_duration_ms, audio.packet_duration_ms
            )));
        }

        if self.video.enabled && (self.video.frame_rate == 0 || self.video.frame_rate > 120) {
            return Err(Error::InvalidConfig(format!(
                "video.frame_rate must be in range 1-120, got {}",
                self.video.frame_rate
            )));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        Ok(())
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML configuration document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Preset for studio LANs where peers connect quickly
    ///
    /// - Short first timeout and backoff
    /// - 10ms audio packets, 60ms latency bound
    pub fn low_latency() -> Self {
        Self {
            connection: ConnectionConfig {
                initial_timeout_ms: 3000,
                min_timeout_ms: 1500,
                retry_backoff_ms: 250,
                conservative_backoff_ms: 1000,
                optimistic_threshold_ms: 1000,
                ..Default::default()
            },
            audio: AudioConfig {
                packet_duration_ms: 10,
                max_buffered_duration_ms: 60,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Preset for lossy or distant networks
    ///
    /// - Starts above the 7s threshold so the channel gets the largest retry budget
    /// - Longer backoff between attempts
    pub fn unreliable_network() -> Self {
        Self {
            connection: ConnectionConfig {
                initial_timeout_ms: 8000,
                min_timeout_ms: 4000,
                retry_backoff_ms: 1000,
                conservative_backoff_ms: 3000,
                optimistic_threshold_ms: 3000,
                ..Default::default()
            },
            audio: AudioConfig {
                opus_bitrate: 32000,
                ..Default::default()
            },
            video: VideoConfig {
                frame_rate: 15,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Enable or disable per-viewer fan-out
    pub fn with_fan_out(mut self, enabled: bool) -> Self {
        self.fan_out_enabled = enabled;
        self
    }

    /// Override the first-attempt connection timeout
    pub fn with_initial_timeout(mut self, timeout: Duration) -> Self {
        self.connection.initial_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Add TURN servers
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }
}
