//! Cooperative cancellation registry.
//!
//! Every long-running worker is registered here and receives a
//! [`StopToken`]. Workers poll [`StopToken::should_continue`] at each loop
//! boundary; nothing is ever forcibly terminated.
//!
//! Tokens are hierarchical: the registry-wide shutdown flag stops every
//! worker, a worker's own flag stops that worker and any [`StopSignal`]
//! derived from it. Dropping a token deregisters the worker, so a worker is
//! "live" exactly until its loop has returned.

use parking_lot::Mutex;
use rov_common::consts::STOP_POLL_SLICE;
use rov_common::lifecycle::WorkerRole;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Registry-assigned worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Snapshot of one registered worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveWorker {
    pub id: WorkerId,
    pub role: WorkerRole,
    pub name: String,
}

struct Entry {
    role: WorkerRole,
    name: String,
    live: Arc<AtomicBool>,
}

/// Assigns liveness ids and flips them on stop.
pub struct CancellationRegistry {
    next_id: AtomicU32,
    shutdown: Arc<AtomicBool>,
    entries: Mutex<BTreeMap<WorkerId, Entry>>,
    fatal: Mutex<Option<String>>,
}

impl CancellationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU32::new(1),
            shutdown: Arc::new(AtomicBool::new(false)),
            entries: Mutex::new(BTreeMap::new()),
            fatal: Mutex::new(None),
        })
    }

    /// Register a worker and hand out its token.
    ///
    /// Registering after shutdown still succeeds, but the token reports
    /// stop immediately.
    pub fn register(self: &Arc<Self>, role: WorkerRole, name: impl Into<String>) -> StopToken {
        let id = WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        let live = Arc::new(AtomicBool::new(true));

        debug!(%id, %role, %name, "worker registered");
        self.entries.lock().insert(
            id,
            Entry {
                role,
                name,
                live: Arc::clone(&live),
            },
        );

        StopToken {
            id,
            role,
            signal: StopSignal {
                flags: Arc::from(vec![Arc::clone(&self.shutdown), live]),
            },
            registry: Arc::downgrade(self),
        }
    }

    /// Ask one worker to stop. Returns `false` if the id is not registered.
    pub fn stop(&self, id: WorkerId) -> bool {
        match self.entries.lock().get(&id) {
            Some(entry) => {
                entry.live.store(false, Ordering::SeqCst);
                debug!(%id, role = %entry.role, "worker stop requested");
                true
            }
            None => false,
        }
    }

    /// Flip every registered id (and any later registration) to stopped.
    pub fn stop_all(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            let entries = self.entries.lock();
            for entry in entries.values() {
                entry.live.store(false, Ordering::SeqCst);
            }
            info!("Stop requested for {} live workers", entries.len());
        }
    }

    /// Whether [`stop_all`](Self::stop_all) has run.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Record an unrecoverable error and stop everything.
    ///
    /// Only the first reason is kept.
    pub fn report_fatal(&self, role: WorkerRole, reason: impl Into<String>) {
        let reason = reason.into();
        error!(%role, %reason, "fatal worker error, requesting shutdown");
        self.fatal.lock().get_or_insert_with(|| format!("{role}: {reason}"));
        self.stop_all();
    }

    /// First fatal error reported, if any.
    pub fn fatal_reason(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    /// Resolves with the first fatal reason once one is reported.
    pub async fn wait_fatal(&self) -> String {
        loop {
            if let Some(reason) = self.fatal_reason() {
                return reason;
            }
            tokio::time::sleep(STOP_POLL_SLICE).await;
        }
    }

    /// Workers whose loop has not yet returned.
    pub fn live_workers(&self) -> Vec<LiveWorker> {
        self.entries
            .lock()
            .iter()
            .map(|(id, e)| LiveWorker {
                id: *id,
                role: e.role,
                name: e.name.clone(),
            })
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.entries.lock().len()
    }

    fn deregister(&self, id: WorkerId) {
        if let Some(entry) = self.entries.lock().remove(&id) {
            debug!(%id, role = %entry.role, name = %entry.name, "worker deregistered");
        }
    }
}

/// Read-only, cloneable view of a stop condition.
///
/// Stops when any flag in the chain is cleared.
#[derive(Clone)]
pub struct StopSignal {
    flags: Arc<[Arc<AtomicBool>]>,
}

impl StopSignal {
    /// Signal that never stops on its own; used for standalone components.
    pub fn never() -> Self {
        Self {
            flags: Arc::from(vec![Arc::new(AtomicBool::new(true))]),
        }
    }

    pub fn should_continue(&self) -> bool {
        self.flags.iter().all(|f| f.load(Ordering::SeqCst))
    }

    /// Derive a signal that additionally stops when `flag` is cleared.
    pub fn with_flag(&self, flag: Arc<AtomicBool>) -> StopSignal {
        let mut flags: Vec<_> = self.flags.iter().cloned().collect();
        flags.push(flag);
        StopSignal {
            flags: Arc::from(flags),
        }
    }

    /// Sleep up to `duration`, waking early on stop.
    ///
    /// Returns [`should_continue`](Self::should_continue) on wake-up.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if !self.should_continue() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL_SLICE));
        }
    }

    /// Async counterpart of [`sleep`](Self::sleep).
    pub async fn sleep_async(&self, duration: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if !self.should_continue() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(STOP_POLL_SLICE)).await;
        }
    }

    /// Resolves once the signal reports stop.
    pub async fn cancelled(&self) {
        while self.should_continue() {
            tokio::time::sleep(STOP_POLL_SLICE).await;
        }
    }
}

/// A worker's liveness handle. Not cloneable; dropping it deregisters.
pub struct StopToken {
    id: WorkerId,
    role: WorkerRole,
    signal: StopSignal,
    registry: Weak<CancellationRegistry>,
}

impl StopToken {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    pub fn should_continue(&self) -> bool {
        self.signal.should_continue()
    }

    /// Cloneable view for sub-tasks that must stop with this worker.
    pub fn signal(&self) -> StopSignal {
        self.signal.clone()
    }

    pub fn sleep(&self, duration: Duration) -> bool {
        self.signal.sleep(duration)
    }

    pub async fn sleep_async(&self, duration: Duration) -> bool {
        self.signal.sleep_async(duration).await
    }

    pub async fn cancelled(&self) {
        self.signal.cancelled().await
    }
}

impl Drop for StopToken {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id);
        }
    }
}

impl fmt::Debug for StopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopToken")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("live", &self.should_continue())
            .finish()
    }
}
