//! Wire messages exchanged with the operator console and the motor controller.
//!
//! # Inbound
//!
//! ```json
//! { "command": "START_DOCKING" }
//! ```
//!
//! # Outbound
//!
//! ```json
//! { "autonom_data": [2, -2, 4, 0] }
//! ```
//!
//! Drive values are rounded half-to-even before they leave the vehicle.
//! Malformed drive input is rejected with a [`WireError`]; callers drop it.

use crate::consts::DRIVE_PACKET_LEN;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while decoding or encoding wire messages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    /// Payload is not valid JSON or has the wrong shape.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// JSON object has no usable `command` field.
    #[error("message has no 'command' field")]
    MissingCommand,

    /// Command string is not in the recognized set.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Drive packet does not have exactly four values.
    #[error("drive packet needs {expected} values, got {got}")]
    Arity { expected: usize, got: usize },

    /// Drive value is NaN or infinite.
    #[error("drive value #{index} is not finite")]
    NonFinite { index: usize },

    /// Drive value does not fit the outbound integer type.
    #[error("drive value #{index} ({value}) out of range")]
    OutOfRange { index: usize, value: f64 },
}

/// Recognized operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Stream all cameras.
    StartCamera,
    /// Autonomous pipeline / transect traversal.
    StartPipeline,
    /// Autonomous docking.
    StartDocking,
    /// Camera test pattern.
    StartTest,
    /// Manual driving.
    StartManual,
    /// Save one image per channel; runs beside the current task.
    SaveImage,
}

impl Command {
    /// Every recognized command.
    pub const ALL: [Command; 6] = [
        Command::StartCamera,
        Command::StartPipeline,
        Command::StartDocking,
        Command::StartTest,
        Command::StartManual,
        Command::SaveImage,
    ];

    /// Canonical wire spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Command::StartCamera => "START_CAMERA",
            Command::StartPipeline => "START_PIPELINE",
            Command::StartDocking => "START_DOCKING",
            Command::StartTest => "START_TEST",
            Command::StartManual => "START_MANUAL",
            Command::SaveImage => "SAVE_IMAGE",
        }
    }
}

impl FromStr for Command {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // Older consoles still send the transect name.
            "START_TRANSECT" => Ok(Command::StartPipeline),
            other => Command::ALL
                .into_iter()
                .find(|c| c.as_str() == other)
                .ok_or_else(|| WireError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct InboundCommand {
    command: Option<String>,
}

/// Extract the command string from an inbound JSON message.
///
/// Only the envelope is checked here; the command itself is validated by
/// the task manager against the closed [`Command`] set.
pub fn parse_inbound(raw: &str) -> Result<String, WireError> {
    let msg: InboundCommand =
        serde_json::from_str(raw).map_err(|e| WireError::Malformed(e.to_string()))?;
    match msg.command {
        Some(cmd) if !cmd.is_empty() => Ok(cmd),
        _ => Err(WireError::MissingCommand),
    }
}

/// Four-value motor/actuator command after rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DrivePacket(pub [i32; DRIVE_PACKET_LEN]);

#[derive(Serialize)]
struct OutboundDrive<'a> {
    autonom_data: &'a [i32; DRIVE_PACKET_LEN],
}

impl DrivePacket {
    /// Validate and round raw autonomy output.
    pub fn from_values(values: &[f64]) -> Result<Self, WireError> {
        if values.len() != DRIVE_PACKET_LEN {
            return Err(WireError::Arity {
                expected: DRIVE_PACKET_LEN,
                got: values.len(),
            });
        }
        let mut out = [0i32; DRIVE_PACKET_LEN];
        for (index, (&value, slot)) in values.iter().zip(out.iter_mut()).enumerate() {
            if !value.is_finite() {
                return Err(WireError::NonFinite { index });
            }
            let rounded = value.round_ties_even();
            if rounded < i32::MIN as f64 || rounded > i32::MAX as f64 {
                return Err(WireError::OutOfRange { index, value });
            }
            *slot = rounded as i32;
        }
        Ok(DrivePacket(out))
    }

    /// Outbound JSON encoding.
    pub fn to_json(&self) -> String {
        // Serializing a fixed-size integer array cannot fail.
        serde_json::to_string(&OutboundDrive {
            autonom_data: &self.0,
        })
        .unwrap_or_default()
    }
}
