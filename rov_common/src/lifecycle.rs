//! # Worker Lifecycle Types
//!
//! Identifies the long-running workers of the control plane and the order
//! in which they are torn down. The `rov` crate's shutdown coordinator joins
//! workers sorted by [`WorkerRole::shutdown_rank`].
//!
//! # Shutdown Order
//!
//! 1. Task manager (stops the current task worker first)
//! 2. Outbound packet sink
//! 3. Command intake adapter
//! 4. Video transport adapter
//! 5. Mode watcher

use std::fmt;

/// Identifies a managed worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerRole {
    /// Command loop owning the single-active-task invariant.
    TaskManager,
    /// Mission task routine (manual, docking, transect, ...).
    TaskWorker,
    /// Outbound drive packet forwarder.
    PacketSink,
    /// Inbound operator command adapter.
    CommandIntake,
    /// Video transport adapter serving viewer sessions.
    VideoTransport,
    /// Operating-mode sampler publishing activation vectors.
    ModeWatcher,
}

impl WorkerRole {
    /// Position in the shutdown sequence; lower ranks are joined first.
    pub const fn shutdown_rank(self) -> u8 {
        match self {
            WorkerRole::TaskWorker => 0,
            WorkerRole::TaskManager => 1,
            WorkerRole::PacketSink => 2,
            WorkerRole::CommandIntake => 3,
            WorkerRole::VideoTransport => 4,
            WorkerRole::ModeWatcher => 5,
        }
    }

    /// Short identifier used in thread names and logs.
    pub const fn name(self) -> &'static str {
        match self {
            WorkerRole::TaskManager => "task-manager",
            WorkerRole::TaskWorker => "task",
            WorkerRole::PacketSink => "packet-sink",
            WorkerRole::CommandIntake => "command-intake",
            WorkerRole::VideoTransport => "video-transport",
            WorkerRole::ModeWatcher => "mode-watcher",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error type for worker lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The OS refused to spawn the worker thread.
    #[error("failed to spawn {role}: {source}")]
    SpawnFailed {
        role: WorkerRole,
        #[source]
        source: std::io::Error,
    },

    /// Worker panicked instead of returning.
    #[error("{role} '{name}' panicked")]
    Panicked { role: WorkerRole, name: String },

    /// A worker reported an unrecoverable condition.
    #[error("fatal error in {role}: {reason}")]
    Fatal { role: WorkerRole, reason: String },
}
