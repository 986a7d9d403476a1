//! Mode watcher: turns operating-mode changes into activation vectors.
//!
//! Samples [`ControlState`] once per interval. On a change it publishes the
//! new vector to the [`ActivationBoard`] shared by every stream gate, so all
//! gates see a mode change within one interval. Stop latency is bounded by
//! the same interval.

use crate::cancel::StopToken;
use crate::state::{ActivationBoard, ControlState};
use rov_common::lifecycle::{LifecycleError, WorkerRole};
use rov_common::mode::{activation, ActivationVector, OperatingMode};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ModeWatcher {
    state: Arc<ControlState>,
    board: Arc<ActivationBoard>,
    interval: Duration,
    last_mode: Option<i32>,
}

impl ModeWatcher {
    pub fn new(state: Arc<ControlState>, board: Arc<ActivationBoard>, interval: Duration) -> Self {
        Self {
            state,
            board,
            interval,
            last_mode: None,
        }
    }

    /// Sample once; publish and return the new vector if the mode changed.
    pub fn poll_once(&mut self) -> Option<ActivationVector> {
        let raw = self.state.mode().wire();
        if self.last_mode == Some(raw) {
            return None;
        }

        if OperatingMode::try_from(raw).is_err() {
            warn!(mode = raw, "undefined operating mode, disabling all streams");
        }
        let vector = activation(raw);
        self.board.publish(vector);
        info!(mode = raw, streams = %vector, "Mode changed, stream activation updated");
        self.last_mode = Some(raw);
        Some(vector)
    }

    /// Loop until `token` stops.
    pub fn run(mut self, token: StopToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Mode watcher started");
        while token.should_continue() {
            self.poll_once();
            if !token.sleep(self.interval) {
                break;
            }
        }
        debug!("Mode watcher stopped");
    }

    /// Run on a dedicated thread.
    pub fn spawn(self, token: StopToken) -> Result<JoinHandle<()>, LifecycleError> {
        std::thread::Builder::new()
            .name(WorkerRole::ModeWatcher.name().to_string())
            .spawn(move || self.run(token))
            .map_err(|source| LifecycleError::SpawnFailed {
                role: WorkerRole::ModeWatcher,
                source,
            })
    }
}
