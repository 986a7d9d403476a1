//! Operator command intake.
//!
//! Accepts line-delimited JSON `{"command": "..."}` over TCP and forwards
//! the command string to the task manager's bounded queue. Malformed lines
//! are logged and dropped; the connection stays open.

use crate::cancel::{StopSignal, StopToken};
use rov_common::message::{parse_inbound, WireError};
use std::net::SocketAddr;
use std::sync::mpsc::{SyncSender, TrySendError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("command queue full, '{0}' dropped")]
    QueueFull(String),

    #[error("task manager gone")]
    Closed,
}

/// Producer side of the command queue.
#[derive(Clone)]
pub struct CommandIntake {
    queue: SyncSender<String>,
}

impl CommandIntake {
    pub fn new(queue: SyncSender<String>) -> Self {
        Self { queue }
    }

    /// Decode one inbound message and queue its command.
    pub fn accept_message(&self, raw: &str) -> Result<String, IntakeError> {
        let command = parse_inbound(raw)?;
        self.enqueue(command)
    }

    /// Queue a bare command string (stdin, tests).
    pub fn enqueue(&self, command: String) -> Result<String, IntakeError> {
        match self.queue.try_send(command.clone()) {
            Ok(()) => Ok(command),
            Err(TrySendError::Full(cmd)) => Err(IntakeError::QueueFull(cmd)),
            Err(TrySendError::Disconnected(_)) => Err(IntakeError::Closed),
        }
    }

    /// Serve `listener` until `token` stops.
    pub async fn run(self, listener: TcpListener, token: StopToken) {
        let addr = listener.local_addr().ok();
        info!(?addr, "Command intake listening");
        let signal = token.signal();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = signal.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(self.clone().serve(stream, peer, signal.clone()));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Connections watch the same signal and finish on their own.
        while connections.join_next().await.is_some() {}
        info!("Command intake stopped");
    }

    async fn serve(self, stream: TcpStream, peer: SocketAddr, signal: StopSignal) {
        debug!(%peer, "Operator connected");
        let mut lines = BufReader::new(stream).lines();
        loop {
            let line = tokio::select! {
                _ = signal.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match self.accept_message(&line) {
                    Ok(command) => debug!(%peer, %command, "Command queued"),
                    Err(e) => warn!(%peer, error = %e, "Inbound message dropped"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(%peer, error = %e, "Connection read failed");
                    break;
                }
            }
        }
        debug!(%peer, "Operator disconnected");
    }
}
