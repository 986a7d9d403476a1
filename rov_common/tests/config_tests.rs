//! Config file loading tests.
//!
//! Tests for `RovConfig::load()`: full file round trip, partial files
//! falling back to defaults, offline camera list, validation after load.

use rov_common::config::{ConfigError, ConfigLoader, LogLevel, RovConfig};
use rov_common::mode::StreamChannel;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write `body` as rov.toml in `dir` and return its path.
fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("rov.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_full_config_loads() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[shared]
service_name = "rov-test"
log_level = "debug"

[relay]
capacity = 8

[relay.channels]
manipulator = 3

[timing]
mode_poll_ms = 250
command_timeout_ms = 500
gate_idle_ms = 50
gate_retry_ms = 5
packet_poll_ms = 20

[intake]
bind = "0.0.0.0:9000"
queue_depth = 4

[sink]
target = "10.0.0.2:5006"
queue_depth = 16

[cameras]
source = "simulation"
width = 64
height = 48
fps = 10
offline = ["stereo_right", "down"]

[snapshots]
output_dir = "/tmp/rov-captures"
"#,
    );

    let config = RovConfig::load(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.shared.service_name, "rov-test");
    assert_eq!(config.shared.log_level, LogLevel::Debug);
    assert_eq!(config.relay.capacities(), [8, 8, 8, 3]);
    assert_eq!(config.timing.mode_poll().as_millis(), 250);
    assert_eq!(config.intake.bind, Some("0.0.0.0:9000".parse().unwrap()));
    assert_eq!(config.intake.queue_depth, 4);
    assert_eq!(config.sink.target, Some("10.0.0.2:5006".parse().unwrap()));
    assert_eq!(
        config.cameras.offline,
        vec![StreamChannel::StereoRight, StreamChannel::Down]
    );
    assert_eq!(
        config.snapshots.output_dir,
        Path::new("/tmp/rov-captures")
    );
}

#[test]
fn test_partial_config_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[timing]
mode_poll_ms = 20
"#,
    );

    let config = RovConfig::load(&path).unwrap();
    config.validate().unwrap();
    let defaults = RovConfig::default();

    assert_eq!(config.timing.mode_poll_ms, 20);
    assert_eq!(config.timing.gate_idle_ms, defaults.timing.gate_idle_ms);
    assert_eq!(config.relay.capacities(), defaults.relay.capacities());
    assert_eq!(config.shared.service_name, defaults.shared.service_name);
}

#[test]
fn test_unknown_channel_name_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[cameras]
offline = ["periscope"]
"#,
    );

    assert!(matches!(
        RovConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_loaded_config_fails_validation() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[relay]
capacity = 0
"#,
    );

    let config = RovConfig::load(&path).unwrap();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn test_shared_section_requires_service_name() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[shared]
log_level = "warn"
"#,
    );

    assert!(matches!(
        RovConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}
