//! System-wide constants for the ROV control plane.
//!
//! Single source of truth for numeric defaults and well-known addresses.
//! Imported by all crates; values are not duplicated elsewhere.

use std::time::Duration;

/// Number of video channels. Fixed for the lifetime of the process.
pub const CHANNEL_COUNT: usize = 4;

/// Default per-channel frame relay capacity.
pub const DEFAULT_RELAY_CAPACITY: usize = 15;

/// Default operating-mode sampling interval of the mode watcher.
pub const DEFAULT_MODE_POLL: Duration = Duration::from_secs(1);

/// Default timeout of the task manager's blocking command receive.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Default placeholder interval of an inactive stream gate (10 Hz cap).
pub const DEFAULT_GATE_IDLE: Duration = Duration::from_millis(100);

/// Default retry interval of an active stream gate waiting for a frame.
pub const DEFAULT_GATE_RETRY: Duration = Duration::from_millis(10);

/// Default poll interval of the outbound packet sink.
pub const DEFAULT_PACKET_POLL: Duration = Duration::from_millis(100);

/// Granularity at which sleeping workers re-check their stop token.
pub const STOP_POLL_SLICE: Duration = Duration::from_millis(10);

/// Default depth of the inbound command queue.
pub const DEFAULT_COMMAND_QUEUE_DEPTH: usize = 32;

/// Default depth of the outbound drive packet queue.
pub const DEFAULT_PACKET_QUEUE_DEPTH: usize = 64;

/// Default command intake listen address.
pub const DEFAULT_INTAKE_ADDR: &str = "127.0.0.1:8765";

/// Default downstream drive packet target.
pub const DEFAULT_SINK_ADDR: &str = "127.0.0.1:5006";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rov/rov.toml";

/// Default directory for SAVE_IMAGE snapshots.
pub const DEFAULT_SNAPSHOT_DIR: &str = "captures";

/// Camera open/release events kept by the ledger; older ones are dropped.
pub const LEDGER_HISTORY: usize = 256;

/// Number of values in a drive packet.
pub const DRIVE_PACKET_LEN: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(DEFAULT_RELAY_CAPACITY > 0);
        assert!(DEFAULT_COMMAND_QUEUE_DEPTH > 0);
        assert!(DEFAULT_PACKET_QUEUE_DEPTH > 0);
        assert!(STOP_POLL_SLICE < DEFAULT_MODE_POLL);
        assert!(DEFAULT_GATE_RETRY < DEFAULT_GATE_IDLE);
    }

    #[test]
    fn channel_mask_fits_in_u8() {
        // ActivationVector packs one bit per channel into a u8.
        assert!(CHANNEL_COUNT <= 8);
    }
}
