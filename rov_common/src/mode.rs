//! Operating modes, video channels and the activation table.
//!
//! The activation table is the single source of truth mapping an
//! [`OperatingMode`] onto the set of live video channels. It is a pure
//! function; the mode watcher publishes its result, stream gates read it.
//!
//! # Activation Table
//!
//! | Mode           | StereoLeft | StereoRight | Down | Manipulator |
//! |----------------|------------|-------------|------|-------------|
//! | 0 `None`       | -          | -           | -    | -           |
//! | 1 `Manual`     | -          | -           | x    | x           |
//! | 2 `Docking`    | -          | -           | x    | x           |
//! | 3 `Transect`   | -          | -           | x    | -           |
//! | 4 `Seagrass`   | x          | x           | x    | -           |
//! | 5 `AllCameras` | x          | x           | x    | x           |
//! | 6 `Test`       | x          | -           | x    | -           |
//! | other          | -          | -           | -    | -           |

use crate::consts::CHANNEL_COUNT;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::fmt;
use thiserror::Error;

const_assert!(CHANNEL_COUNT <= u8::BITS as usize);

/// Error returned when decoding wire values into mode types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    /// Integer is not one of the defined operating modes.
    #[error("unknown operating mode {0}")]
    UnknownMode(i32),

    /// Ordinal is not one of the fixed stream channels.
    #[error("unknown stream channel ordinal {0}")]
    UnknownChannel(usize),
}

/// Current mission behavior of the vehicle.
///
/// Wire values are the integers 0–6. Decoding any other integer fails;
/// use [`activation`] to map raw integers with the all-inactive fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
#[repr(i32)]
pub enum OperatingMode {
    /// No task running.
    #[default]
    None = 0,
    /// Operator drives; manual camera set.
    Manual = 1,
    /// Autonomous docking.
    Docking = 2,
    /// Autonomous transect (pipeline) traversal.
    Transect = 3,
    /// Seagrass survey.
    Seagrass = 4,
    /// All cameras streaming.
    AllCameras = 5,
    /// Camera test pattern.
    Test = 6,
}

impl OperatingMode {
    /// All defined modes in wire order.
    pub const ALL: [OperatingMode; 7] = [
        OperatingMode::None,
        OperatingMode::Manual,
        OperatingMode::Docking,
        OperatingMode::Transect,
        OperatingMode::Seagrass,
        OperatingMode::AllCameras,
        OperatingMode::Test,
    ];

    /// Integer wire value.
    pub const fn wire(self) -> i32 {
        self as i32
    }

    /// Activation vector for this mode.
    pub const fn activation(self) -> ActivationVector {
        let mask = match self {
            OperatingMode::None => ChannelMask::empty(),
            OperatingMode::Manual | OperatingMode::Docking => {
                ChannelMask::DOWN.union(ChannelMask::MANIPULATOR)
            }
            OperatingMode::Transect => ChannelMask::DOWN,
            OperatingMode::Seagrass => ChannelMask::STEREO_LEFT
                .union(ChannelMask::STEREO_RIGHT)
                .union(ChannelMask::DOWN),
            OperatingMode::AllCameras => ChannelMask::all(),
            OperatingMode::Test => ChannelMask::STEREO_LEFT.union(ChannelMask::DOWN),
        };
        ActivationVector(mask)
    }
}

impl TryFrom<i32> for OperatingMode {
    type Error = ModeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        OperatingMode::ALL
            .into_iter()
            .find(|m| m.wire() == value)
            .ok_or(ModeError::UnknownMode(value))
    }
}

impl From<OperatingMode> for i32 {
    fn from(mode: OperatingMode) -> Self {
        mode.wire()
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.wire())
    }
}

/// Map a raw mode integer onto its activation vector.
///
/// Undefined integers yield [`ActivationVector::ALL_INACTIVE`].
pub fn activation(raw_mode: i32) -> ActivationVector {
    match OperatingMode::try_from(raw_mode) {
        Ok(mode) => mode.activation(),
        Err(_) => ActivationVector::ALL_INACTIVE,
    }
}

/// Who is allowed to drive the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveAuthority {
    /// Operator in control (wire flag 1).
    #[default]
    Manual,
    /// Autonomy routine in control (wire flag 0).
    Autonomy,
}

impl DriveAuthority {
    /// Manual flag value as used by the downstream controller.
    pub const fn manual_flag(self) -> i32 {
        match self {
            DriveAuthority::Manual => 1,
            DriveAuthority::Autonomy => 0,
        }
    }
}

/// One of the fixed video feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChannel {
    /// Left stereo camera.
    StereoLeft = 0,
    /// Right stereo camera.
    StereoRight = 1,
    /// Downward-looking camera.
    Down = 2,
    /// Manipulator camera.
    Manipulator = 3,
}

impl StreamChannel {
    /// All channels in ordinal order.
    pub const ALL: [StreamChannel; CHANNEL_COUNT] = [
        StreamChannel::StereoLeft,
        StreamChannel::StereoRight,
        StreamChannel::Down,
        StreamChannel::Manipulator,
    ];

    /// Stable ordinal.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Channel for an ordinal.
    pub fn from_index(index: usize) -> Result<Self, ModeError> {
        StreamChannel::ALL
            .get(index)
            .copied()
            .ok_or(ModeError::UnknownChannel(index))
    }

    /// Short identifier used in logs, file names and config keys.
    pub const fn name(self) -> &'static str {
        match self {
            StreamChannel::StereoLeft => "stereo_left",
            StreamChannel::StereoRight => "stereo_right",
            StreamChannel::Down => "down",
            StreamChannel::Manipulator => "manipulator",
        }
    }

    const fn mask(self) -> ChannelMask {
        match self {
            StreamChannel::StereoLeft => ChannelMask::STEREO_LEFT,
            StreamChannel::StereoRight => ChannelMask::STEREO_RIGHT,
            StreamChannel::Down => ChannelMask::DOWN,
            StreamChannel::Manipulator => ChannelMask::MANIPULATOR,
        }
    }
}

impl fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// One bit per [`StreamChannel`], bit position = ordinal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelMask: u8 {
        const STEREO_LEFT = 1 << 0;
        const STEREO_RIGHT = 1 << 1;
        const DOWN = 1 << 2;
        const MANIPULATOR = 1 << 3;
    }
}

/// Per-channel activation, immutable once produced.
///
/// Packed into a single byte so it can be published with one atomic store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ActivationVector(ChannelMask);

impl ActivationVector {
    /// Every channel disabled.
    pub const ALL_INACTIVE: ActivationVector = ActivationVector(ChannelMask::empty());

    /// Every channel enabled.
    pub const ALL_ACTIVE: ActivationVector = ActivationVector(ChannelMask::all());

    /// Build from booleans in channel order.
    pub fn from_flags(flags: [bool; CHANNEL_COUNT]) -> Self {
        let mask = StreamChannel::ALL
            .into_iter()
            .filter(|ch| flags[ch.index()])
            .fold(ChannelMask::empty(), |acc, ch| acc | ch.mask());
        ActivationVector(mask)
    }

    /// Rebuild from a packed byte; unknown bits are discarded.
    pub const fn from_bits(bits: u8) -> Self {
        ActivationVector(ChannelMask::from_bits_truncate(bits))
    }

    /// Packed representation.
    pub const fn bits(self) -> u8 {
        self.0.bits()
    }

    /// Whether `channel` is live.
    pub const fn is_active(self, channel: StreamChannel) -> bool {
        self.0.contains(channel.mask())
    }

    /// Booleans in channel order.
    pub fn flags(self) -> [bool; CHANNEL_COUNT] {
        StreamChannel::ALL.map(|ch| self.is_active(ch))
    }

    /// Live channels in ordinal order.
    pub fn active_channels(self) -> impl Iterator<Item = StreamChannel> {
        StreamChannel::ALL
            .into_iter()
            .filter(move |ch| self.is_active(*ch))
    }
}

impl fmt::Display for ActivationVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = self.flags().map(|b| if b { 'T' } else { 'F' });
        write!(f, "{},{},{},{}", flags[0], flags[1], flags[2], flags[3])
    }
}
