//! Task lifecycle manager.
//!
//! Owns the single-active-task invariant. Commands arrive as raw strings on
//! a bounded queue and are dispatched against the closed [`Command`] set.
//!
//! Starting a task always runs the same four steps:
//!
//! 1. Stop the current task, even if it is the same kind, and join its
//!    worker so its cameras are released.
//! 2. Set mode and drive authority as one update.
//! 3. Open the task's cameras. On failure, release whatever was opened,
//!    reset to mode `None` / manual and leave no task current.
//! 4. Register a stop token and spawn the task worker.

use crate::autonomy::AutonomyProvider;
use crate::camera::{CameraError, CameraRig};
use crate::cancel::{CancellationRegistry, StopToken, WorkerId};
use crate::relay::RelaySet;
use crate::sink::PacketSender;
use crate::snapshot::SnapshotWriter;
use crate::state::ControlState;
use crate::task::{run_task, TaskContext, TaskKind};
use parking_lot::RwLock;
use rov_common::lifecycle::{LifecycleError, WorkerRole};
use rov_common::message::{Command, WireError};
use rov_common::mode::{DriveAuthority, OperatingMode};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Error type for task control.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Command string outside the recognized set.
    #[error(transparent)]
    Command(#[from] WireError),

    /// A camera could not be acquired; the start was rolled back.
    #[error("task start aborted: {0}")]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Read-only view of the current task, shared with the rest of the system.
#[derive(Debug, Clone, Default)]
pub struct CurrentTask(Arc<RwLock<Option<TaskKind>>>);

impl CurrentTask {
    pub fn get(&self) -> Option<TaskKind> {
        *self.0.read()
    }

    fn set(&self, kind: Option<TaskKind>) {
        *self.0.write() = kind;
    }
}

struct RunningTask {
    kind: TaskKind,
    owner: String,
    worker: WorkerId,
    handle: JoinHandle<()>,
}

/// Shared collaborators handed to every task.
pub struct TaskResources {
    pub state: Arc<ControlState>,
    pub rig: CameraRig,
    pub relays: RelaySet,
    pub packets: PacketSender,
    pub autonomy: Arc<dyn AutonomyProvider>,
    pub snapshots: SnapshotWriter,
}

pub struct TaskLifecycleManager {
    registry: Arc<CancellationRegistry>,
    resources: TaskResources,
    running: Option<RunningTask>,
    current: CurrentTask,
    started: u64,
}

impl TaskLifecycleManager {
    pub fn new(registry: Arc<CancellationRegistry>, resources: TaskResources) -> Self {
        Self {
            registry,
            resources,
            running: None,
            current: CurrentTask::default(),
            started: 0,
        }
    }

    /// Handle that keeps reporting the current task after `run` takes `self`.
    pub fn current_handle(&self) -> CurrentTask {
        self.current.clone()
    }

    pub fn current(&self) -> Option<TaskKind> {
        self.running.as_ref().map(|t| t.kind)
    }

    /// Dispatch a raw command string.
    ///
    /// Unknown commands are logged and change nothing.
    pub fn dispatch(&mut self, raw: &str) -> Result<(), TaskError> {
        let command = raw.parse::<Command>().inspect_err(|e| {
            warn!(command = raw, error = %e, "Unrecognized command dropped");
        })?;
        self.handle(command)
    }

    pub fn handle(&mut self, command: Command) -> Result<(), TaskError> {
        info!(%command, "Command received");
        match TaskKind::from_command(command) {
            Some(kind) => self.start(kind),
            None => {
                self.resources.snapshots.spawn();
                Ok(())
            }
        }
    }

    /// Replace the current task with `kind`.
    pub fn start(&mut self, kind: TaskKind) -> Result<(), TaskError> {
        self.stop_current();

        let res = &self.resources;
        res.state.set(kind.mode(), kind.authority());

        self.started += 1;
        let owner = format!("{kind}#{}", self.started);
        let cameras = match res.rig.open_all(kind.channels(), &owner) {
            Ok(cameras) => cameras,
            Err(e) => {
                error!(task = %kind, error = %e, "Camera acquisition failed, task not started");
                self.reset_idle();
                return Err(e.into());
            }
        };

        let token = self.registry.register(WorkerRole::TaskWorker, owner.clone());
        let worker = token.id();
        let ctx = TaskContext {
            kind,
            token,
            cameras,
            relays: res.relays.clone(),
            packets: res.packets.clone(),
            state: Arc::clone(&res.state),
            autonomy: Arc::clone(&res.autonomy),
        };

        let spawned = std::thread::Builder::new()
            .name(format!("task-{kind}"))
            .spawn(move || run_task(ctx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                // The closure, and with it the cameras and token, is dropped here.
                self.reset_idle();
                return Err(LifecycleError::SpawnFailed {
                    role: WorkerRole::TaskWorker,
                    source,
                }
                .into());
            }
        };

        info!(task = %kind, %owner, %worker, mode = %kind.mode(), "Task running");
        self.running = Some(RunningTask {
            kind,
            owner,
            worker,
            handle,
        });
        self.current.set(Some(kind));
        Ok(())
    }

    /// Stop the current task and return to mode `None` / manual.
    pub fn stop_all_tasks(&mut self) {
        self.stop_current();
        self.reset_idle();
    }

    fn reset_idle(&self) {
        self.resources
            .state
            .set(OperatingMode::None, DriveAuthority::Manual);
    }

    /// Signal, join and verify release of the current task, if any.
    fn stop_current(&mut self) {
        let Some(task) = self.running.take() else {
            return;
        };
        self.current.set(None);

        debug!(task = %task.kind, worker = %task.worker, "Stopping task");
        self.registry.stop(task.worker);
        if task.handle.join().is_err() {
            let err = LifecycleError::Panicked {
                role: WorkerRole::TaskWorker,
                name: task.owner.clone(),
            };
            error!(error = %err, "Task worker did not exit cleanly");
        }

        let held = self.resources.rig.ledger().held_by(&task.owner);
        if !held.is_empty() {
            warn!(owner = %task.owner, ?held, "Cameras still held after task exit");
        }
        info!(task = %task.kind, "Task stopped");
    }

    /// Command loop. Exits when `token` stops or the queue closes, stopping
    /// the current task on the way out.
    pub fn run(mut self, commands: Receiver<String>, token: StopToken, timeout: Duration) {
        info!("Task manager started");
        while token.should_continue() {
            match commands.recv_timeout(timeout) {
                Ok(raw) => {
                    if !token.should_continue() {
                        debug!(command = %raw, "Shutting down, command ignored");
                        break;
                    }
                    match self.dispatch(&raw) {
                        Ok(()) | Err(TaskError::Command(_)) => {}
                        Err(TaskError::Camera(e)) => warn!(error = %e, "Command failed"),
                        Err(TaskError::Lifecycle(e)) => {
                            self.registry
                                .report_fatal(WorkerRole::TaskManager, e.to_string());
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Command queue closed");
                    break;
                }
            }
        }
        self.stop_all_tasks();
        info!("Task manager stopped");
    }

    pub fn spawn(
        self,
        commands: Receiver<String>,
        token: StopToken,
        timeout: Duration,
    ) -> Result<JoinHandle<()>, LifecycleError> {
        std::thread::Builder::new()
            .name(WorkerRole::TaskManager.name().to_string())
            .spawn(move || self.run(commands, token, timeout))
            .map_err(|source| LifecycleError::SpawnFailed {
                role: WorkerRole::TaskManager,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autonomy::PlaceholderAutonomy;
    use crate::camera::simulation::SimulatedSource;
    use crate::camera::{CameraLedger, LedgerEvent};
    use crate::sink::packet_channel;
    use rov_common::config::CameraConfig;
    use rov_common::mode::StreamChannel;
    use tempfile::TempDir;

    struct Fixture {
        registry: Arc<CancellationRegistry>,
        state: Arc<ControlState>,
        ledger: Arc<CameraLedger>,
        manager: TaskLifecycleManager,
        _dir: TempDir,
    }

    fn fixture(offline: Vec<StreamChannel>) -> Fixture {
        let registry = CancellationRegistry::new();
        let state = Arc::new(ControlState::new());
        let ledger = Arc::new(CameraLedger::new());
        let source = SimulatedSource::from_config(&CameraConfig {
            width: 4,
            height: 2,
            fps: 500,
            offline,
            ..CameraConfig::default()
        });
        let relays = RelaySet::with_capacities([15; 4]);
        let (packets, _rx) = packet_channel(8);
        let dir = TempDir::new().unwrap();
        let resources = TaskResources {
            state: Arc::clone(&state),
            rig: CameraRig::new(Arc::new(source), Arc::clone(&ledger)),
            snapshots: SnapshotWriter::new(relays.clone(), dir.path()),
            relays,
            packets,
            autonomy: Arc::new(PlaceholderAutonomy),
        };
        Fixture {
            manager: TaskLifecycleManager::new(Arc::clone(&registry), resources),
            registry,
            state,
            ledger,
            _dir: dir,
        }
    }

    #[test]
    fn start_sets_mode_and_authority() {
        let mut f = fixture(vec![]);
        f.manager.start(TaskKind::Docking).unwrap();
        let snap = f.state.snapshot();
        assert_eq!(snap.mode, OperatingMode::Docking);
        assert_eq!(snap.authority, DriveAuthority::Autonomy);
        assert_eq!(f.manager.current(), Some(TaskKind::Docking));
        assert_eq!(f.ledger.open_count(), 2);
        f.manager.stop_all_tasks();
    }

    #[test]
    fn switching_releases_before_next_open() {
        let mut f = fixture(vec![]);
        f.manager.dispatch("START_DOCKING").unwrap();
        f.manager.dispatch("START_MANUAL").unwrap();

        let events = f.ledger.events();
        let first_manual_open = events
            .iter()
            .position(|e| matches!(e, LedgerEvent::Opened { owner, .. } if owner.starts_with("manual")))
            .unwrap();
        let docking_releases: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, LedgerEvent::Released { owner, .. } if owner.starts_with("docking")))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(docking_releases.len(), 2);
        assert!(docking_releases.iter().all(|&i| i < first_manual_open));

        assert_eq!(f.state.mode(), OperatingMode::Manual);
        assert_eq!(f.state.authority(), DriveAuthority::Manual);
        // Only the manual worker is live.
        assert_eq!(f.registry.live_count(), 1);
        f.manager.stop_all_tasks();
    }

    #[test]
    fn restarting_same_task_restarts_worker() {
        let mut f = fixture(vec![]);
        f.manager.start(TaskKind::Transect).unwrap();
        f.manager.start(TaskKind::Transect).unwrap();
        assert_eq!(f.ledger.held_by("transect#2"), vec![StreamChannel::Down]);
        assert!(f.ledger.held_by("transect#1").is_empty());
        f.manager.stop_all_tasks();
    }

    #[test]
    fn unknown_command_changes_nothing() {
        let mut f = fixture(vec![]);
        f.manager.start(TaskKind::Manual).unwrap();
        let generation = f.state.generation();

        assert!(matches!(
            f.manager.dispatch("START_FOO"),
            Err(TaskError::Command(WireError::UnknownCommand(_)))
        ));
        assert_eq!(f.state.generation(), generation);
        assert_eq!(f.manager.current(), Some(TaskKind::Manual));
        f.manager.stop_all_tasks();
    }

    #[test]
    fn camera_failure_rolls_back_to_idle() {
        let mut f = fixture(vec![StreamChannel::Down]);
        f.manager.start(TaskKind::Manual).unwrap_err();
        let err = f.manager.start(TaskKind::Docking).unwrap_err();
        assert!(matches!(err, TaskError::Camera(CameraError::OpenFailed { .. })));

        assert_eq!(f.manager.current(), None);
        assert_eq!(f.state.mode(), OperatingMode::None);
        assert_eq!(f.state.authority(), DriveAuthority::Manual);
        assert_eq!(f.ledger.open_count(), 0);
        assert_eq!(f.registry.live_count(), 0);
    }

    #[test]
    fn stop_all_resets_even_when_idle() {
        let mut f = fixture(vec![]);
        f.manager.stop_all_tasks();
        assert_eq!(f.state.mode(), OperatingMode::None);

        f.manager.start(TaskKind::AllCameras).unwrap();
        f.manager.stop_all_tasks();
        assert_eq!(f.state.mode(), OperatingMode::None);
        assert_eq!(f.ledger.open_count(), 0);
        assert_eq!(f.registry.live_count(), 0);
    }

    #[test]
    fn command_loop_stops_task_on_exit() {
        let f = fixture(vec![]);
        let (tx, rx) = std::sync::mpsc::sync_channel(4);
        let current = f.manager.current_handle();
        let handle = f
            .manager
            .spawn(
                rx,
                f.registry.register(WorkerRole::TaskManager, "manager"),
                Duration::from_millis(10),
            )
            .unwrap();

        tx.send("START_TEST".to_string()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while current.get() != Some(TaskKind::Test) {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(2));
        }

        f.registry.stop_all();
        handle.join().unwrap();
        assert_eq!(current.get(), None);
        assert_eq!(f.state.mode(), OperatingMode::None);
        assert_eq!(f.ledger.open_count(), 0);
        assert_eq!(f.registry.live_count(), 0);
    }
}
