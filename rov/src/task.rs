//! Mission task routines.
//!
//! A task owns the cameras it opened and runs on its own worker thread until
//! its [`StopToken`] is cleared. Frames are pushed into the relays the task
//! feeds; autonomy tasks also submit drive values to the packet sink.
//!
//! Per-iteration failures never end a task:
//!
//! - no frame ready: back off and retry
//! - camera read error or unusable algorithm input: warn, skip the iteration
//!
//! Autonomy tasks also exit once drive authority returns to manual.

use crate::autonomy::AutonomyProvider;
use crate::camera::{CameraError, CameraHandle};
use crate::cancel::StopToken;
use crate::relay::{Frame, RelaySet};
use crate::sink::PacketSender;
use crate::state::ControlState;
use rov_common::message::Command;
use rov_common::mode::{DriveAuthority, OperatingMode, StreamChannel};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause after an empty or failed camera read.
pub const READ_BACKOFF: Duration = Duration::from_millis(10);

/// The mission tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Manual,
    Docking,
    Transect,
    AllCameras,
    Test,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Manual,
        TaskKind::Docking,
        TaskKind::Transect,
        TaskKind::AllCameras,
        TaskKind::Test,
    ];

    pub const fn mode(self) -> OperatingMode {
        match self {
            TaskKind::Manual => OperatingMode::Manual,
            TaskKind::Docking => OperatingMode::Docking,
            TaskKind::Transect => OperatingMode::Transect,
            TaskKind::AllCameras => OperatingMode::AllCameras,
            TaskKind::Test => OperatingMode::Test,
        }
    }

    pub const fn authority(self) -> DriveAuthority {
        match self {
            TaskKind::Manual | TaskKind::AllCameras => DriveAuthority::Manual,
            TaskKind::Docking | TaskKind::Transect | TaskKind::Test => DriveAuthority::Autonomy,
        }
    }

    /// Cameras opened at start, in open order. Each feeds its own relay.
    pub const fn channels(self) -> &'static [StreamChannel] {
        use StreamChannel::*;
        match self {
            TaskKind::Manual => &[Down, Manipulator],
            TaskKind::Docking => &[Manipulator, Down],
            TaskKind::Transect => &[Down],
            TaskKind::AllCameras => &[StereoLeft, StereoRight, Down, Manipulator],
            TaskKind::Test => &[StereoLeft, Down],
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            TaskKind::Manual => "manual",
            TaskKind::Docking => "docking",
            TaskKind::Transect => "transect",
            TaskKind::AllCameras => "all-cameras",
            TaskKind::Test => "test",
        }
    }

    /// Task started by `command`; `None` for side actions.
    pub const fn from_command(command: Command) -> Option<TaskKind> {
        match command {
            Command::StartManual => Some(TaskKind::Manual),
            Command::StartDocking => Some(TaskKind::Docking),
            Command::StartPipeline => Some(TaskKind::Transect),
            Command::StartCamera => Some(TaskKind::AllCameras),
            Command::StartTest => Some(TaskKind::Test),
            Command::SaveImage => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a running task owns or shares.
pub struct TaskContext {
    pub kind: TaskKind,
    pub token: StopToken,
    pub cameras: Vec<CameraHandle>,
    pub relays: RelaySet,
    pub packets: PacketSender,
    pub state: Arc<ControlState>,
    pub autonomy: Arc<dyn AutonomyProvider>,
}

/// Run `ctx.kind` until stopped. Cameras are released and the relays they
/// fed are emptied before returning.
pub fn run_task(ctx: TaskContext) {
    let TaskContext {
        kind,
        token,
        mut cameras,
        relays,
        packets,
        state,
        autonomy,
    } = ctx;

    info!(task = %kind, cameras = cameras.len(), "Task started");
    let frames = match kind {
        TaskKind::Manual | TaskKind::AllCameras | TaskKind::Test => {
            run_passthrough(&token, &mut cameras, &relays)
        }
        TaskKind::Docking => run_docking(&token, &mut cameras, &relays, &packets, &state, &*autonomy),
        TaskKind::Transect => run_transect(&token, &mut cameras, &relays, &packets, &state, &*autonomy),
    };

    for camera in cameras.iter_mut() {
        camera.release();
    }
    // Leftovers would reach viewers as stale frames once the channel is
    // active again under a later task.
    for channel in kind.channels() {
        relays.get(*channel).clear();
    }
    info!(task = %kind, frames, "Task stopped");
}

/// Read one frame, logging failures. `None` means skip this iteration.
fn read(camera: &mut CameraHandle, token: &StopToken) -> Option<Frame> {
    match camera.read_frame() {
        Ok(Some(frame)) => Some(frame),
        Ok(None) => {
            token.sleep(READ_BACKOFF);
            None
        }
        Err(CameraError::Released(channel)) => {
            debug!(%channel, "read on released camera");
            token.sleep(READ_BACKOFF);
            None
        }
        Err(e) => {
            warn!(channel = %camera.channel(), error = %e, "Camera read failed");
            token.sleep(READ_BACKOFF);
            None
        }
    }
}

fn camera_for(cameras: &[CameraHandle], channel: StreamChannel) -> Option<usize> {
    cameras.iter().position(|c| c.channel() == channel)
}

/// Keep running while not stopped and, for autonomy tasks, while autonomy
/// still holds drive authority.
fn autonomy_continues(token: &StopToken, state: &ControlState) -> bool {
    if !token.should_continue() {
        return false;
    }
    if state.authority() == DriveAuthority::Manual {
        info!("Drive authority returned to manual, leaving autonomy loop");
        return false;
    }
    true
}

fn run_passthrough(token: &StopToken, cameras: &mut [CameraHandle], relays: &RelaySet) -> u64 {
    let mut frames = 0;
    while token.should_continue() {
        for camera in cameras.iter_mut() {
            if !token.should_continue() {
                break;
            }
            if let Some(frame) = read(camera, token) {
                relays.get(camera.channel()).push(frame.retarget(camera.channel()));
                frames += 1;
            }
        }
    }
    frames
}

fn run_docking(
    token: &StopToken,
    cameras: &mut [CameraHandle],
    relays: &RelaySet,
    packets: &PacketSender,
    state: &ControlState,
    autonomy: &dyn AutonomyProvider,
) -> u64 {
    let (Some(manip), Some(down)) = (
        camera_for(cameras, StreamChannel::Manipulator),
        camera_for(cameras, StreamChannel::Down),
    ) else {
        warn!("Docking needs the manipulator and down cameras");
        return 0;
    };

    let mut algorithm = autonomy.docking();
    let mut frames = 0;
    while autonomy_continues(token, state) {
        let Some(manip_frame) = read(&mut cameras[manip], token) else {
            continue;
        };
        let Some(down_frame) = read(&mut cameras[down], token) else {
            continue;
        };
        let Some(out) = algorithm.step(&manip_frame, &down_frame) else {
            warn!("Docking step rejected input, skipping iteration");
            continue;
        };
        relays
            .get(StreamChannel::Manipulator)
            .push(out.manipulator.retarget(StreamChannel::Manipulator));
        relays
            .get(StreamChannel::Down)
            .push(out.down.retarget(StreamChannel::Down));
        packets.submit(out.drive);
        frames += 1;
    }
    frames
}

fn run_transect(
    token: &StopToken,
    cameras: &mut [CameraHandle],
    relays: &RelaySet,
    packets: &PacketSender,
    state: &ControlState,
    autonomy: &dyn AutonomyProvider,
) -> u64 {
    let Some(down) = camera_for(cameras, StreamChannel::Down) else {
        warn!("Transect needs the down camera");
        return 0;
    };

    let mut algorithm = autonomy.transect();
    let mut frames = 0;
    while autonomy_continues(token, state) {
        let Some(frame) = read(&mut cameras[down], token) else {
            continue;
        };
        let Some(out) = algorithm.step(&frame) else {
            warn!("Transect step rejected input, skipping iteration");
            continue;
        };
        relays
            .get(StreamChannel::Down)
            .push(out.frame.retarget(StreamChannel::Down));
        packets.submit(out.drive);
        frames += 1;
    }
    frames
}
