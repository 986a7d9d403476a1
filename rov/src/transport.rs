//! In-process video transport.
//!
//! Each viewer session gets one [`StreamGate`] per channel and a bounded
//! stream of [`GateOutput`]s per channel. Dropping a session's receivers is
//! a disconnect: its pumps stop and the session is reaped without touching
//! other sessions. Sessions on the same channel compete for that relay's
//! frames.

use crate::cancel::{StopSignal, StopToken};
use crate::gate::{GateOutput, GateTiming, StreamGate};
use crate::relay::RelaySet;
use crate::state::ActivationBoard;
use parking_lot::Mutex;
use rov_common::consts::CHANNEL_COUNT;
use rov_common::mode::StreamChannel;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Per-channel buffer between a gate and its viewer.
pub const SESSION_CHANNEL_DEPTH: usize = 2;

pub type SessionId = u64;

/// Viewer side of a session.
pub struct ViewerFeed {
    id: SessionId,
    streams: Vec<mpsc::Receiver<GateOutput>>,
}

impl ViewerFeed {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next output on `channel`; `None` once the session is closed.
    pub async fn recv(&mut self, channel: StreamChannel) -> Option<GateOutput> {
        self.streams[channel.index()].recv().await
    }

    pub fn receiver(&mut self, channel: StreamChannel) -> &mut mpsc::Receiver<GateOutput> {
        &mut self.streams[channel.index()]
    }
}

struct Session {
    open: Arc<AtomicBool>,
    pumps: Vec<JoinHandle<()>>,
}

impl Session {
    fn is_finished(&self) -> bool {
        !self.open.load(Ordering::SeqCst) || self.pumps.iter().all(|p| p.is_finished())
    }
}

pub struct VideoTransport {
    relays: RelaySet,
    board: Arc<ActivationBoard>,
    timing: GateTiming,
    accepting: AtomicBool,
    next_id: AtomicU64,
    sessions: Mutex<BTreeMap<SessionId, Session>>,
}

impl VideoTransport {
    pub fn new(relays: RelaySet, board: Arc<ActivationBoard>, timing: GateTiming) -> Arc<Self> {
        Arc::new(Self {
            relays,
            board,
            timing,
            accepting: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(BTreeMap::new()),
        })
    }

    /// Open a viewer session. Must be called from within a tokio runtime.
    ///
    /// After shutdown the returned feed is already closed.
    pub fn open_session(&self) -> ViewerFeed {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let open = Arc::new(AtomicBool::new(self.accepting.load(Ordering::SeqCst)));
        let signal = StopSignal::never().with_flag(Arc::clone(&open));

        let mut streams = Vec::with_capacity(CHANNEL_COUNT);
        let mut pumps = Vec::with_capacity(CHANNEL_COUNT);
        for channel in StreamChannel::ALL {
            let (tx, rx) = mpsc::channel(SESSION_CHANNEL_DEPTH);
            let gate = StreamGate::new(
                channel,
                Arc::clone(self.relays.get(channel)),
                Arc::clone(&self.board),
                self.timing,
            );
            pumps.push(tokio::spawn(pump(gate, tx, signal.clone(), Arc::clone(&open))));
            streams.push(rx);
        }

        info!(session = id, "Viewer session opened");
        self.sessions.lock().insert(id, Session { open, pumps });
        ViewerFeed { id, streams }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|s| !s.is_finished())
            .count()
    }

    /// Drop sessions whose viewer disconnected. Returns how many were removed.
    pub fn reap(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|id, s| {
            let done = s.is_finished();
            if done {
                s.open.store(false, Ordering::SeqCst);
                info!(session = id, "Viewer session closed");
            }
            !done
        });
        before - sessions.len()
    }

    /// Close every session and wait for its pumps. No new session stays open.
    pub async fn close_all(&self) -> usize {
        self.accepting.store(false, Ordering::SeqCst);
        let drained: Vec<Session> = std::mem::take(&mut *self.sessions.lock())
            .into_values()
            .collect();
        for session in &drained {
            session.open.store(false, Ordering::SeqCst);
        }
        let count = drained.len();
        for session in drained {
            for pump in session.pumps {
                let _ = pump.await;
            }
        }
        count
    }

    /// Reap disconnected sessions until `token` stops, then close the rest.
    pub async fn run(self: Arc<Self>, token: StopToken) {
        info!("Video transport started");
        while token.sleep_async(self.timing.idle).await {
            self.reap();
        }
        let closed = self.close_all().await;
        info!(sessions = closed, "Video transport stopped");
    }
}

async fn pump(
    mut gate: StreamGate,
    tx: mpsc::Sender<GateOutput>,
    signal: StopSignal,
    open: Arc<AtomicBool>,
) {
    loop {
        let out = tokio::select! {
            _ = signal.cancelled() => break,
            out = gate.next_output() => out,
        };
        let sent = tokio::select! {
            _ = signal.cancelled() => break,
            sent = tx.send(out) => sent,
        };
        if sent.is_err() {
            debug!(channel = %gate.channel(), "Viewer went away");
            open.store(false, Ordering::SeqCst);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationRegistry;
    use crate::relay::Frame;
    use rov_common::lifecycle::WorkerRole;
    use rov_common::mode::OperatingMode;
    use std::time::Duration;

    fn transport() -> (Arc<VideoTransport>, RelaySet, Arc<ActivationBoard>) {
        let relays = RelaySet::with_capacities([15; 4]);
        let board = Arc::new(ActivationBoard::new());
        let t = VideoTransport::new(
            relays.clone(),
            Arc::clone(&board),
            GateTiming {
                idle: Duration::from_millis(10),
                retry: Duration::from_millis(1),
            },
        );
        (t, relays, board)
    }

    async fn recv(feed: &mut ViewerFeed, ch: StreamChannel) -> GateOutput {
        tokio::time::timeout(Duration::from_secs(1), feed.recv(ch))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn active_channel_delivers_frames_after_placeholder() {
        let (t, relays, board) = transport();
        board.publish(OperatingMode::Transect.activation());
        relays.push(Frame::new(StreamChannel::Down, 7, 1, 1, vec![0; 3]));

        let mut feed = t.open_session();
        assert!(recv(&mut feed, StreamChannel::Down).await.is_placeholder());
        let out = recv(&mut feed, StreamChannel::Down).await;
        assert_eq!(out.frame().map(|f| f.seq), Some(7));

        // Inactive channels only ever see placeholders.
        assert!(recv(&mut feed, StreamChannel::StereoLeft).await.is_placeholder());
        t.close_all().await;
    }

    #[tokio::test]
    async fn disconnect_reaps_only_that_session() {
        let (t, _relays, _board) = transport();
        let gone = t.open_session();
        let mut stays = t.open_session();
        drop(gone);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(t.reap(), 1);
        assert_eq!(t.active_sessions(), 1);
        assert!(recv(&mut stays, StreamChannel::Manipulator).await.is_placeholder());
        t.close_all().await;
    }

    #[tokio::test]
    async fn stop_closes_every_session() {
        let registry = CancellationRegistry::new();
        let (t, _relays, _board) = transport();
        let mut feed = t.open_session();
        let runner = tokio::spawn(
            Arc::clone(&t).run(registry.register(WorkerRole::VideoTransport, "transport")),
        );

        registry.stop_all();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t.active_sessions(), 0);

        // Drain whatever was buffered; the stream then ends.
        while feed.recv(StreamChannel::Down).await.is_some() {}
        let late = t.open_session();
        assert_eq!(t.active_sessions(), 0);
        drop(late);
    }
}
