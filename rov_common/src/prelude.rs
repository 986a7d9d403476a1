//! Prelude module for common re-exports.
//!
//! ```rust
//! use rov_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, RovConfig, SharedConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{CHANNEL_COUNT, DEFAULT_RELAY_CAPACITY};

// ─── Modes & Channels ───────────────────────────────────────────────
pub use crate::mode::{
    activation, ActivationVector, DriveAuthority, ModeError, OperatingMode, StreamChannel,
};

// ─── Wire ───────────────────────────────────────────────────────────
pub use crate::message::{parse_inbound, Command, DrivePacket, WireError};

// ─── Lifecycle ──────────────────────────────────────────────────────
pub use crate::lifecycle::{LifecycleError, WorkerRole};
