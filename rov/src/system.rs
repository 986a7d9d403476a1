//! System wiring.
//!
//! [`RovSystem::start`] builds the shared state, spawns every worker and
//! hands their join handles to the [`ShutdownCoordinator`]. A fatal report
//! from any worker runs the same shutdown. Collaborators
//! that talk to the outside world (camera source, packet sink, autonomy)
//! are injected so tests can substitute their own.

use crate::autonomy::AutonomyProvider;
use crate::camera::{CameraError, CameraLedger, CameraRig, CameraSource, CameraSourceRegistry};
use crate::cancel::CancellationRegistry;
use crate::gate::GateTiming;
use crate::intake::{CommandIntake, IntakeError};
use crate::manager::{CurrentTask, TaskLifecycleManager, TaskResources};
use crate::relay::RelaySet;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::sink::{packet_channel, LogSink, PacketForwarder, PacketSink, UdpPacketSink};
use crate::snapshot::SnapshotWriter;
use crate::state::{ActivationBoard, ControlState};
use crate::task::TaskKind;
use crate::transport::VideoTransport;
use crate::watcher::ModeWatcher;
use rov_common::config::{ConfigError, RovConfig};
use rov_common::lifecycle::{LifecycleError, WorkerRole};
use rov_common::mode::StreamChannel;
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// How often the fatal watch checks the registry.
const FATAL_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum SystemError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("failed to {what}: {source}")]
    Io {
        what: String,
        #[source]
        source: io::Error,
    },
}

/// Relay counters for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub channel: StreamChannel,
    pub pushed: u64,
    pub evicted: u64,
    pub retained: usize,
}

/// Point-in-time system overview, logged at exit.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSummary {
    pub mode: i32,
    pub manual: i32,
    pub task: Option<&'static str>,
    pub live_workers: usize,
    pub viewer_sessions: usize,
    pub cameras_open: usize,
    pub channels: Vec<ChannelSummary>,
}

pub struct RovSystem {
    registry: Arc<CancellationRegistry>,
    state: Arc<ControlState>,
    board: Arc<ActivationBoard>,
    relays: RelaySet,
    ledger: Arc<CameraLedger>,
    transport: Arc<VideoTransport>,
    intake: CommandIntake,
    intake_addr: Option<SocketAddr>,
    current: CurrentTask,
    coordinator: Arc<ShutdownCoordinator>,
}

impl RovSystem {
    /// Build the default collaborators from `config` and start.
    pub async fn from_config(
        config: RovConfig,
        autonomy: Arc<dyn AutonomyProvider>,
    ) -> Result<Self, SystemError> {
        let source = CameraSourceRegistry::with_builtin().create(&config.cameras)?;
        let sink: Box<dyn PacketSink> = match config.sink.target {
            Some(target) => Box::new(UdpPacketSink::connect(target).map_err(|source| {
                SystemError::Io {
                    what: format!("open drive packet sink {target}"),
                    source,
                }
            })?),
            None => Box::new(LogSink),
        };
        Self::start(config, source, sink, autonomy).await
    }

    /// Spawn every worker. Must be called from within a tokio runtime.
    pub async fn start(
        config: RovConfig,
        source: Arc<dyn CameraSource>,
        sink: Box<dyn PacketSink>,
        autonomy: Arc<dyn AutonomyProvider>,
    ) -> Result<Self, SystemError> {
        config.validate()?;

        // Bind before spawning anything so a failure leaves nothing running.
        let listener = match config.intake.bind {
            Some(addr) => Some(TcpListener::bind(addr).await.map_err(|source| {
                SystemError::Io {
                    what: format!("bind command intake {addr}"),
                    source,
                }
            })?),
            None => None,
        };
        let intake_addr = listener.as_ref().and_then(|l| l.local_addr().ok());

        let registry = CancellationRegistry::new();
        let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&registry)));
        let state = Arc::new(ControlState::new());
        let board = Arc::new(ActivationBoard::new());
        let timing = &config.timing;

        let relays = RelaySet::from_config(&config.relay);
        {
            let relays = relays.clone();
            coordinator.own("frame relays", move || {
                for (channel, relay) in relays.iter() {
                    let stats = relay.stats();
                    info!(%channel, pushed = stats.pushed, evicted = stats.evicted, "Relay closed");
                    relay.clear();
                }
            });
        }

        let ledger = Arc::new(CameraLedger::new());
        let rig = CameraRig::new(Arc::clone(&source), Arc::clone(&ledger));
        {
            let ledger = Arc::clone(&ledger);
            let name = source.name();
            coordinator.own(format!("camera source '{name}'"), move || {
                let open = ledger.open_count();
                if open > 0 {
                    warn!(open, "Cameras still open at shutdown");
                }
            });
        }

        match Self::spawn_workers(
            &config,
            &coordinator,
            &registry,
            &state,
            &board,
            &relays,
            rig,
            sink,
            autonomy,
            listener,
        ) {
            Ok((intake, current, transport)) => {
                tokio::spawn(shutdown_on_fatal(
                    Arc::clone(&registry),
                    Arc::clone(&coordinator),
                ));
                info!(
                    service = %config.shared.service_name,
                    intake = ?intake_addr,
                    mode_poll_ms = timing.mode_poll_ms,
                    "ROV control plane running"
                );
                Ok(Self {
                    registry,
                    state,
                    board,
                    relays,
                    ledger,
                    transport,
                    intake,
                    intake_addr,
                    current,
                    coordinator,
                })
            }
            Err(e) => {
                coordinator.shutdown().await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_workers(
        config: &RovConfig,
        coordinator: &ShutdownCoordinator,
        registry: &Arc<CancellationRegistry>,
        state: &Arc<ControlState>,
        board: &Arc<ActivationBoard>,
        relays: &RelaySet,
        rig: CameraRig,
        sink: Box<dyn PacketSink>,
        autonomy: Arc<dyn AutonomyProvider>,
        listener: Option<TcpListener>,
    ) -> Result<(CommandIntake, CurrentTask, Arc<VideoTransport>), SystemError> {
        let timing = &config.timing;

        let (packets, packet_rx) = packet_channel(config.sink.queue_depth);
        let handle = PacketForwarder::new(packet_rx, sink, timing.packet_poll())
            .spawn(registry.register(WorkerRole::PacketSink, "packet-sink"))?;
        coordinator.adopt_thread(WorkerRole::PacketSink, "packet-sink", handle);

        let (command_tx, command_rx) = mpsc::sync_channel(config.intake.queue_depth);
        let manager = TaskLifecycleManager::new(
            Arc::clone(registry),
            TaskResources {
                state: Arc::clone(state),
                rig,
                relays: relays.clone(),
                packets,
                autonomy,
                snapshots: SnapshotWriter::new(relays.clone(), &config.snapshots.output_dir),
            },
        );
        let current = manager.current_handle();
        let handle = manager.spawn(
            command_rx,
            registry.register(WorkerRole::TaskManager, "task-manager"),
            timing.command_timeout(),
        )?;
        coordinator.adopt_thread(WorkerRole::TaskManager, "task-manager", handle);

        let handle = ModeWatcher::new(Arc::clone(state), Arc::clone(board), timing.mode_poll())
            .spawn(registry.register(WorkerRole::ModeWatcher, "mode-watcher"))?;
        coordinator.adopt_thread(WorkerRole::ModeWatcher, "mode-watcher", handle);

        let transport = VideoTransport::new(relays.clone(), Arc::clone(board), GateTiming::from(timing));
        let handle = tokio::spawn(
            Arc::clone(&transport)
                .run(registry.register(WorkerRole::VideoTransport, "video-transport")),
        );
        coordinator.adopt_task(WorkerRole::VideoTransport, "video-transport", handle);

        let intake = CommandIntake::new(command_tx);
        if let Some(listener) = listener {
            let handle = tokio::spawn(
                intake
                    .clone()
                    .run(listener, registry.register(WorkerRole::CommandIntake, "command-intake")),
            );
            coordinator.adopt_task(WorkerRole::CommandIntake, "command-intake", handle);
        }

        Ok((intake, current, transport))
    }

    /// Queue an inbound JSON message, as if received over the network.
    pub fn submit(&self, raw: &str) -> Result<String, IntakeError> {
        self.intake.accept_message(raw)
    }

    /// Queue a bare command string.
    pub fn command(&self, command: &str) -> Result<String, IntakeError> {
        self.intake.enqueue(command.to_string())
    }

    pub fn state(&self) -> &Arc<ControlState> {
        &self.state
    }

    pub fn board(&self) -> &Arc<ActivationBoard> {
        &self.board
    }

    pub fn relays(&self) -> &RelaySet {
        &self.relays
    }

    pub fn ledger(&self) -> &Arc<CameraLedger> {
        &self.ledger
    }

    pub fn transport(&self) -> &Arc<VideoTransport> {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    pub fn current_task(&self) -> Option<TaskKind> {
        self.current.get()
    }

    /// Address the command intake listens on, if enabled.
    pub fn intake_addr(&self) -> Option<SocketAddr> {
        self.intake_addr
    }

    pub fn summary(&self) -> SystemSummary {
        let snap = self.state.snapshot();
        SystemSummary {
            mode: snap.mode.wire(),
            manual: snap.authority.manual_flag(),
            task: self.current.get().map(TaskKind::name),
            live_workers: self.registry.live_count(),
            viewer_sessions: self.transport.active_sessions(),
            cameras_open: self.ledger.open_count(),
            channels: self
                .relays
                .iter()
                .map(|(channel, relay)| {
                    let stats = relay.stats();
                    ChannelSummary {
                        channel,
                        pushed: stats.pushed,
                        evicted: stats.evicted,
                        retained: relay.len(),
                    }
                })
                .collect(),
        }
    }

    /// Resolves with the reason once a worker reports a fatal error.
    ///
    /// The orderly shutdown is already under way by then.
    pub async fn wait_fatal(&self) -> String {
        self.registry.wait_fatal().await
    }

    pub fn is_shut_down(&self) -> bool {
        self.coordinator.is_shut_down()
    }

    /// Orderly shutdown. Safe to call more than once; a call made while
    /// another is running waits for it.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.coordinator.shutdown().await
    }
}

/// Run the orderly shutdown on the first fatal report.
///
/// Ends without action once shutdown has started for another reason.
async fn shutdown_on_fatal(
    registry: Arc<CancellationRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
) {
    while !coordinator.is_shut_down() {
        if let Some(reason) = registry.fatal_reason() {
            warn!(%reason, "Fatal worker error, shutting down");
            coordinator.shutdown().await;
            return;
        }
        tokio::time::sleep(FATAL_POLL).await;
    }
}
