//! Configuration loading traits and types.
//!
//! All ROV services read one TOML file. Every section is optional and falls
//! back to the defaults in [`crate::consts`].
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "rov-control"
//! log_level = "debug"
//!
//! [relay]
//! capacity = 15
//!
//! [relay.channels]
//! down = 30
//!
//! [timing]
//! mode_poll_ms = 1000
//!
//! [intake]
//! bind = "127.0.0.1:8765"
//!
//! [sink]
//! target = "127.0.0.1:5006"
//!
//! [cameras]
//! source = "simulation"
//! fps = 30
//! offline = ["stereo_right"]
//! ```

use crate::consts::{
    CHANNEL_COUNT, DEFAULT_COMMAND_QUEUE_DEPTH, DEFAULT_COMMAND_TIMEOUT, DEFAULT_GATE_IDLE,
    DEFAULT_GATE_RETRY, DEFAULT_INTAKE_ADDR, DEFAULT_MODE_POLL, DEFAULT_PACKET_POLL,
    DEFAULT_PACKET_QUEUE_DEPTH, DEFAULT_RELAY_CAPACITY, DEFAULT_SINK_ADDR, DEFAULT_SNAPSHOT_DIR,
};
use crate::mode::StreamChannel;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Common configuration fields shared across ROV services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: "rov-control".to_string(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation: any serde-deserializable struct can be loaded.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Frame relay capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Capacity used by channels without an override.
    pub capacity: usize,
    /// Per-channel overrides.
    pub channels: ChannelCapacities,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RELAY_CAPACITY,
            channels: ChannelCapacities::default(),
        }
    }
}

/// Optional per-channel relay capacity overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelCapacities {
    pub stereo_left: Option<usize>,
    pub stereo_right: Option<usize>,
    pub down: Option<usize>,
    pub manipulator: Option<usize>,
}

impl RelayConfig {
    /// Effective capacity of `channel`.
    pub fn capacity_for(&self, channel: StreamChannel) -> usize {
        let over = match channel {
            StreamChannel::StereoLeft => self.channels.stereo_left,
            StreamChannel::StereoRight => self.channels.stereo_right,
            StreamChannel::Down => self.channels.down,
            StreamChannel::Manipulator => self.channels.manipulator,
        };
        over.unwrap_or(self.capacity)
    }

    /// Effective capacities in channel order.
    pub fn capacities(&self) -> [usize; CHANNEL_COUNT] {
        StreamChannel::ALL.map(|ch| self.capacity_for(ch))
    }
}

/// Worker timing, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Mode watcher sampling interval.
    pub mode_poll_ms: u64,
    /// Task manager command receive timeout.
    pub command_timeout_ms: u64,
    /// Placeholder interval of inactive stream gates.
    pub gate_idle_ms: u64,
    /// Retry interval of active stream gates with an empty relay.
    pub gate_retry_ms: u64,
    /// Packet sink receive timeout.
    pub packet_poll_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            mode_poll_ms: DEFAULT_MODE_POLL.as_millis() as u64,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT.as_millis() as u64,
            gate_idle_ms: DEFAULT_GATE_IDLE.as_millis() as u64,
            gate_retry_ms: DEFAULT_GATE_RETRY.as_millis() as u64,
            packet_poll_ms: DEFAULT_PACKET_POLL.as_millis() as u64,
        }
    }
}

impl TimingConfig {
    pub fn mode_poll(&self) -> Duration {
        Duration::from_millis(self.mode_poll_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn gate_idle(&self) -> Duration {
        Duration::from_millis(self.gate_idle_ms)
    }

    pub fn gate_retry(&self) -> Duration {
        Duration::from_millis(self.gate_retry_ms)
    }

    pub fn packet_poll(&self) -> Duration {
        Duration::from_millis(self.packet_poll_ms)
    }
}

/// Inbound command adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntakeConfig {
    /// TCP listen address; `None` disables the network listener.
    pub bind: Option<SocketAddr>,
    /// Bounded command queue depth.
    pub queue_depth: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_INTAKE_ADDR.parse().ok(),
            queue_depth: DEFAULT_COMMAND_QUEUE_DEPTH,
        }
    }
}

/// Outbound drive packet sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SinkConfig {
    /// UDP target; `None` logs packets instead of sending them.
    pub target: Option<SocketAddr>,
    /// Bounded packet queue depth.
    pub queue_depth: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_SINK_ADDR.parse().ok(),
            queue_depth: DEFAULT_PACKET_QUEUE_DEPTH,
        }
    }
}

/// Camera source selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    /// Registered camera source name.
    pub source: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Capture rate per camera.
    pub fps: u32,
    /// Channels whose camera refuses to open.
    pub offline: Vec<StreamChannel>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: "simulation".to_string(),
            width: 320,
            height: 240,
            fps: 30,
            offline: Vec::new(),
        }
    }
}

impl CameraConfig {
    /// Interval between two captured frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps.max(1)))
    }
}

/// SAVE_IMAGE output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotConfig {
    pub output_dir: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
        }
    }
}

/// Complete control-plane configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RovConfig {
    pub shared: SharedConfig,
    pub relay: RelayConfig,
    pub timing: TimingConfig,
    pub intake: IntakeConfig,
    pub sink: SinkConfig,
    pub cameras: CameraConfig,
    pub snapshots: SnapshotConfig,
}

impl RovConfig {
    /// Validate numeric bounds and names.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        for ch in StreamChannel::ALL {
            if self.relay.capacity_for(ch) == 0 {
                return Err(invalid(format!("relay capacity for {ch} must be > 0")));
            }
        }

        let t = &self.timing;
        for (key, value) in [
            ("timing.mode_poll_ms", t.mode_poll_ms),
            ("timing.command_timeout_ms", t.command_timeout_ms),
            ("timing.gate_idle_ms", t.gate_idle_ms),
            ("timing.gate_retry_ms", t.gate_retry_ms),
            ("timing.packet_poll_ms", t.packet_poll_ms),
        ] {
            if value == 0 {
                return Err(invalid(format!("{key} must be > 0")));
            }
        }

        if self.intake.queue_depth == 0 {
            return Err(invalid("intake.queue_depth must be > 0".into()));
        }
        if self.sink.queue_depth == 0 {
            return Err(invalid("sink.queue_depth must be > 0".into()));
        }

        let cam = &self.cameras;
        if cam.source.is_empty() {
            return Err(invalid("cameras.source cannot be empty".into()));
        }
        if cam.width == 0 || cam.height == 0 {
            return Err(invalid("cameras.width and cameras.height must be > 0".into()));
        }
        if cam.fps == 0 || cam.fps > 1000 {
            return Err(invalid("cameras.fps must be in 1..=1000".into()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::ValidationError(msg)
}
