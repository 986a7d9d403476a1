//! End-to-end control plane tests.
//!
//! Each test starts a full [`RovSystem`] with simulated cameras, a recording
//! packet sink and a scripted autonomy provider, drives it with operator
//! commands and checks mode, stream activation, camera ownership, drive
//! packets and shutdown.

use parking_lot::Mutex;
use rov::autonomy::{
    AutonomyProvider, DockingAlgorithm, DockingOutput, TransectAlgorithm, TransectOutput,
};
use rov::camera::simulation::SimulatedSource;
use rov::camera::LedgerEvent;
use rov::relay::Frame;
use rov::sink::PacketSink;
use rov::{RovSystem, TaskKind};
use rov_common::config::RovConfig;
use rov_common::lifecycle::WorkerRole;
use rov_common::mode::{ActivationVector, DriveAuthority, OperatingMode, StreamChannel};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<String>>>);

impl PacketSink for RecordingSink {
    fn send(&mut self, payload: &str) -> io::Result<()> {
        self.0.lock().push(payload.to_string());
        Ok(())
    }
}

/// Always steers with the same packet.
struct FixedDrive;

impl DockingAlgorithm for FixedDrive {
    fn step(&mut self, manipulator: &Frame, down: &Frame) -> Option<DockingOutput> {
        Some(DockingOutput {
            manipulator: manipulator.clone(),
            down: down.clone(),
            drive: vec![1.6, -2.2, 3.5, 0.4],
        })
    }
}

impl TransectAlgorithm for FixedDrive {
    fn step(&mut self, frame: &Frame) -> Option<TransectOutput> {
        Some(TransectOutput {
            frame: frame.clone(),
            drive: vec![0.5, 1.5, 2.5, -0.5],
        })
    }
}

struct FixedProvider;

impl AutonomyProvider for FixedProvider {
    fn docking(&self) -> Box<dyn DockingAlgorithm> {
        Box::new(FixedDrive)
    }

    fn transect(&self) -> Box<dyn TransectAlgorithm> {
        Box::new(FixedDrive)
    }
}

fn test_config(bind: bool) -> RovConfig {
    let mut config = RovConfig::default();
    config.timing.mode_poll_ms = 20;
    config.timing.command_timeout_ms = 10;
    config.timing.gate_idle_ms = 10;
    config.timing.gate_retry_ms = 2;
    config.timing.packet_poll_ms = 10;
    config.intake.bind = if bind {
        "127.0.0.1:0".parse().ok()
    } else {
        None
    };
    config.sink.target = None;
    config.cameras.width = 8;
    config.cameras.height = 4;
    config.cameras.fps = 200;
    config
}

async fn start(config: RovConfig) -> (RovSystem, RecordingSink) {
    let sink = RecordingSink::default();
    let source = Arc::new(SimulatedSource::from_config(&config.cameras));
    let system = RovSystem::start(config, source, Box::new(sink.clone()), Arc::new(FixedProvider))
        .await
        .unwrap();
    (system, sink)
}

/// Poll `cond` until it holds or two seconds pass.
async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn docking_activates_down_and_manipulator_and_sends_rounded_packets() {
    let (system, sink) = start(test_config(false)).await;

    system.submit(r#"{"command":"START_DOCKING"}"#).unwrap();
    eventually("docking", || system.current_task() == Some(TaskKind::Docking)).await;

    let snap = system.state().snapshot();
    assert_eq!(snap.mode, OperatingMode::Docking);
    assert_eq!(snap.authority, DriveAuthority::Autonomy);

    let expected = ActivationVector::from_flags([false, false, true, true]);
    eventually("activation", || system.board().current() == expected).await;

    eventually("drive packet", || !sink.0.lock().is_empty()).await;
    assert_eq!(sink.0.lock()[0], r#"{"autonom_data":[2,-2,4,0]}"#);

    let mut feed = system.transport().open_session();
    let first = feed.recv(StreamChannel::Down).await.unwrap();
    assert!(first.is_placeholder());
    let next = tokio::time::timeout(Duration::from_secs(1), feed.recv(StreamChannel::Down))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.frame().map(|f| f.channel), Some(StreamChannel::Down));

    let report = system.shutdown().await;
    assert!(report.panicked.is_empty());
    assert_eq!(report.live_after, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manual_after_docking_releases_docking_cameras_first() {
    let (system, _sink) = start(test_config(false)).await;

    system.command("START_DOCKING").unwrap();
    eventually("docking", || system.current_task() == Some(TaskKind::Docking)).await;
    system.command("START_MANUAL").unwrap();
    eventually("manual", || system.current_task() == Some(TaskKind::Manual)).await;

    let snap = system.state().snapshot();
    assert_eq!(snap.mode, OperatingMode::Manual);
    assert_eq!(snap.authority, DriveAuthority::Manual);

    let events = system.ledger().events();
    let last_docking_release = events
        .iter()
        .rposition(
            |e| matches!(e, LedgerEvent::Released { owner, .. } if owner.starts_with("docking")),
        )
        .unwrap();
    let first_manual_open = events
        .iter()
        .position(|e| matches!(e, LedgerEvent::Opened { owner, .. } if owner.starts_with("manual")))
        .unwrap();
    assert!(last_docking_release < first_manual_open);

    let expected = ActivationVector::from_flags([false, false, true, true]);
    eventually("activation", || system.board().current() == expected).await;

    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_command_leaves_state_untouched() {
    let (system, _sink) = start(test_config(false)).await;

    system.command("START_CAMERA").unwrap();
    eventually("all cameras", || system.current_task() == Some(TaskKind::AllCameras)).await;
    let generation = system.state().generation();

    system.command("START_FOO").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(system.state().generation(), generation);
    assert_eq!(system.current_task(), Some(TaskKind::AllCameras));
    assert_eq!(system.ledger().open_count(), 4);

    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_camera_aborts_start_cleanly() {
    let mut config = test_config(false);
    config.cameras.offline = vec![StreamChannel::StereoRight];
    let (system, _sink) = start(config).await;

    system.command("START_TEST").unwrap();
    eventually("test", || system.current_task() == Some(TaskKind::Test)).await;

    system.command("START_CAMERA").unwrap();
    eventually("rollback", || {
        system.current_task().is_none() && system.state().mode() == OperatingMode::None
    })
    .await;
    assert_eq!(system.state().authority(), DriveAuthority::Manual);
    assert_eq!(system.ledger().open_count(), 0);

    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_commands_reach_the_task_manager() {
    let (system, _sink) = start(test_config(true)).await;
    let addr = system.intake_addr().unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"{\"command\":\"START_TRANSECT\"}\n")
        .await
        .unwrap();
    eventually("transect", || system.current_task() == Some(TaskKind::Transect)).await;
    assert_eq!(system.ledger().held_by("transect#1"), vec![StreamChannel::Down]);

    system.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_is_idempotent_and_releases_everything() {
    let (system, _sink) = start(test_config(true)).await;

    system.command("START_CAMERA").unwrap();
    eventually("all cameras", || system.current_task() == Some(TaskKind::AllCameras)).await;
    let _feed = system.transport().open_session();

    let report = system.shutdown().await;
    assert!(!report.repeated);
    assert_eq!(
        report.joined,
        vec![
            "task-manager:task-manager",
            "packet-sink:packet-sink",
            "command-intake:command-intake",
            "video-transport:video-transport",
            "mode-watcher:mode-watcher",
        ]
    );
    assert_eq!(
        report.released,
        vec!["camera source 'simulation'", "frame relays"]
    );
    assert_eq!(report.live_after, 0);
    assert!(report.fatal.is_none());

    assert_eq!(system.registry().live_count(), 0);
    assert_eq!(system.ledger().open_count(), 0);
    assert_eq!(system.transport().active_sessions(), 0);
    assert_eq!(system.state().mode(), OperatingMode::None);

    let again = system.shutdown().await;
    assert!(again.repeated);
    assert_eq!(again.joined, report.joined);
    assert_eq!(system.ledger().open_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_report_runs_the_orderly_shutdown() {
    let (system, _sink) = start(test_config(true)).await;

    system.command("START_CAMERA").unwrap();
    eventually("all cameras", || system.current_task() == Some(TaskKind::AllCameras)).await;
    assert_eq!(system.ledger().open_count(), 4);

    system
        .registry()
        .report_fatal(WorkerRole::TaskManager, "task worker spawn failed");
    let reason = tokio::time::timeout(Duration::from_secs(2), system.wait_fatal())
        .await
        .unwrap();
    assert_eq!(reason, "task-manager: task worker spawn failed");

    // Nobody calls shutdown here; the fatal report alone tears down.
    eventually("teardown", || {
        system.is_shut_down() && system.registry().live_count() == 0
    })
    .await;

    let report = system.shutdown().await;
    assert!(report.repeated);
    assert_eq!(report.fatal.as_deref(), Some("task-manager: task worker spawn failed"));
    assert_eq!(report.live_after, 0);
    assert!(report.panicked.is_empty());
    assert_eq!(
        report.released,
        vec!["camera source 'simulation'", "frame relays"]
    );
    assert_eq!(system.ledger().open_count(), 0);
    assert_eq!(system.current_task(), None);
    assert_eq!(system.state().mode(), OperatingMode::None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_image_writes_ppm_files() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = test_config(false);
    config.snapshots.output_dir = dir.path().to_path_buf();
    let (system, _sink) = start(config).await;

    system.command("START_MANUAL").unwrap();
    eventually("frames", || !system.relays().get(StreamChannel::Down).is_empty()).await;
    system.command("SAVE_IMAGE").unwrap();

    eventually("snapshot files", || {
        std::fs::read_dir(dir.path())
            .map(|d| d.count() >= 1)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(system.current_task(), Some(TaskKind::Manual));

    system.shutdown().await;
}
