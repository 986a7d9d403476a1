//! Outbound drive packet sink.
//!
//! Task routines submit raw drive values through a bounded queue
//! ([`PacketSender`]). The [`PacketForwarder`] worker validates and rounds
//! them into [`DrivePacket`]s and writes `{"autonom_data":[..]}` to a
//! [`PacketSink`].
//!
//! Policy for malformed input (wrong arity, non-finite, out of range): the
//! values are dropped with a warning. Nothing is sent downstream for them.

use crate::cancel::StopToken;
use rov_common::lifecycle::{LifecycleError, WorkerRole};
use rov_common::message::{DrivePacket, WireError};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where encoded packets go.
pub trait PacketSink: Send {
    fn send(&mut self, payload: &str) -> io::Result<()>;

    /// Close the underlying transport. Called once when the forwarder exits.
    fn close(&mut self) {}
}

/// One UDP datagram per packet.
pub struct UdpPacketSink {
    socket: Option<UdpSocket>,
    target: SocketAddr,
}

impl UdpPacketSink {
    pub fn connect(target: SocketAddr) -> io::Result<Self> {
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(target)?;
        info!(%target, "Drive packet sink connected");
        Ok(Self {
            socket: Some(socket),
            target,
        })
    }
}

impl PacketSink for UdpPacketSink {
    fn send(&mut self, payload: &str) -> io::Result<()> {
        match self.socket.as_ref() {
            Some(socket) => socket.send(payload.as_bytes()).map(|_| ()),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "sink closed")),
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            info!(target = %self.target, "Drive packet sink closed");
        }
    }
}

/// Logs packets instead of sending them; used when no target is configured.
#[derive(Debug, Default)]
pub struct LogSink;

impl PacketSink for LogSink {
    fn send(&mut self, payload: &str) -> io::Result<()> {
        info!(%payload, "Drive packet (no sink target configured)");
        Ok(())
    }
}

/// Producer side of the packet queue. Never blocks.
#[derive(Clone)]
pub struct PacketSender {
    tx: SyncSender<Vec<f64>>,
}

impl PacketSender {
    /// Queue raw drive values. Returns `false` if the packet was dropped.
    pub fn submit(&self, values: Vec<f64>) -> bool {
        match self.tx.try_send(values) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Drive packet queue full, dropping packet");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Drive packet sink gone, dropping packet");
                false
            }
        }
    }
}

/// Create a bounded packet queue.
pub fn packet_channel(depth: usize) -> (PacketSender, Receiver<Vec<f64>>) {
    let (tx, rx) = mpsc::sync_channel(depth);
    (PacketSender { tx }, rx)
}

/// Forwarder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub sent: u64,
    pub rejected: u64,
    pub send_errors: u64,
}

/// Drains the packet queue into a [`PacketSink`].
pub struct PacketForwarder {
    rx: Receiver<Vec<f64>>,
    sink: Box<dyn PacketSink>,
    poll: Duration,
    stats: SinkStats,
}

impl PacketForwarder {
    pub fn new(rx: Receiver<Vec<f64>>, sink: Box<dyn PacketSink>, poll: Duration) -> Self {
        Self {
            rx,
            sink,
            poll,
            stats: SinkStats::default(),
        }
    }

    /// Validate, encode and send one packet.
    ///
    /// Returns the payload that was sent. Transport errors are logged and
    /// counted but not returned; the forwarder keeps running.
    pub fn forward(&mut self, values: &[f64]) -> Result<String, WireError> {
        let packet = match DrivePacket::from_values(values) {
            Ok(p) => p,
            Err(e) => {
                self.stats.rejected += 1;
                warn!(error = %e, ?values, "Dropping malformed drive packet");
                return Err(e);
            }
        };
        let payload = packet.to_json();
        match self.sink.send(&payload) {
            Ok(()) => {
                self.stats.sent += 1;
                debug!(%payload, "Drive packet sent");
            }
            Err(e) => {
                self.stats.send_errors += 1;
                warn!(error = %e, "Failed to send drive packet");
            }
        }
        Ok(payload)
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    /// Loop until `token` stops or every sender is gone.
    pub fn run(mut self, token: StopToken) -> SinkStats {
        info!("Packet sink started");
        while token.should_continue() {
            match self.rx.recv_timeout(self.poll) {
                Ok(values) => {
                    let _ = self.forward(&values);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("All packet senders dropped");
                    break;
                }
            }
        }
        self.sink.close();
        info!(
            sent = self.stats.sent,
            rejected = self.stats.rejected,
            send_errors = self.stats.send_errors,
            "Packet sink stopped"
        );
        self.stats
    }

    pub fn spawn(self, token: StopToken) -> Result<JoinHandle<()>, LifecycleError> {
        std::thread::Builder::new()
            .name(WorkerRole::PacketSink.name().to_string())
            .spawn(move || {
                self.run(token);
            })
            .map_err(|source| LifecycleError::SpawnFailed {
                role: WorkerRole::PacketSink,
                source,
            })
    }
}
