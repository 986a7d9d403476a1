//! Shared control state.
//!
//! Two objects are shared by reference between workers:
//!
//! | Object           | Writer           | Readers                          |
//! |------------------|------------------|----------------------------------|
//! | [`ControlState`] | task manager     | mode watcher, task routines, API |
//! | [`ActivationBoard`] | mode watcher  | stream gates                     |
//!
//! Mode and drive authority are always replaced together under one lock;
//! the activation vector is one byte stored with a single atomic write.

use parking_lot::RwLock;
use rov_common::mode::{ActivationVector, DriveAuthority, OperatingMode, StreamChannel};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Mode and authority as observed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlSnapshot {
    pub mode: OperatingMode,
    pub authority: DriveAuthority,
}

/// Operating mode + manual/autonomy indicator.
#[derive(Debug, Default)]
pub struct ControlState {
    inner: RwLock<ControlSnapshot>,
    generation: AtomicU64,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode and authority from the same update.
    pub fn snapshot(&self) -> ControlSnapshot {
        *self.inner.read()
    }

    pub fn mode(&self) -> OperatingMode {
        self.inner.read().mode
    }

    pub fn authority(&self) -> DriveAuthority {
        self.inner.read().authority
    }

    /// Number of updates applied so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace mode and authority as one update.
    ///
    /// Only the task manager calls this.
    pub(crate) fn set(&self, mode: OperatingMode, authority: DriveAuthority) {
        let mut guard = self.inner.write();
        *guard = ControlSnapshot { mode, authority };
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Current activation vector, shared by every stream gate.
#[derive(Debug, Default)]
pub struct ActivationBoard {
    bits: AtomicU8,
}

impl ActivationBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ActivationVector {
        ActivationVector::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn is_active(&self, channel: StreamChannel) -> bool {
        self.current().is_active(channel)
    }

    /// Replace the whole vector. Only the mode watcher calls this.
    pub(crate) fn publish(&self, vector: ActivationVector) {
        self.bits.store(vector.bits(), Ordering::Release);
    }
}
