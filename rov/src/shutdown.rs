//! Orderly shutdown.
//!
//! The coordinator adopts every worker's join handle and every owned
//! resource as the system starts. [`ShutdownCoordinator::shutdown`] then:
//!
//! 1. flips every registered worker to stopped,
//! 2. joins workers in [`WorkerRole::shutdown_rank`] order,
//! 3. releases owned resources in reverse acquisition order.
//!
//! Only the first call does any work. Concurrent and later calls wait for
//! it and get a copy of its report flagged `repeated`.

use crate::cancel::CancellationRegistry;
use parking_lot::Mutex;
use rov_common::lifecycle::{LifecycleError, WorkerRole};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

/// A join that takes longer than this is logged; the join keeps waiting.
pub const SLOW_JOIN_WARNING: Duration = Duration::from_secs(2);

enum Joinable {
    Thread(std::thread::JoinHandle<()>),
    Task(tokio::task::JoinHandle<()>),
}

struct ManagedWorker {
    role: WorkerRole,
    name: String,
    join: Joinable,
}

type Release = Box<dyn FnOnce() + Send>;

/// Outcome of a shutdown run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// Workers joined, in join order.
    pub joined: Vec<String>,
    /// Workers that panicked instead of returning.
    pub panicked: Vec<String>,
    /// Resources released, in release order.
    pub released: Vec<String>,
    /// Registry entries still live after the joins.
    pub live_after: usize,
    pub fatal: Option<String>,
    pub elapsed: Duration,
    /// `true` when another call ran the shutdown.
    pub repeated: bool,
}

pub struct ShutdownCoordinator {
    registry: Arc<CancellationRegistry>,
    workers: Mutex<Vec<ManagedWorker>>,
    resources: Mutex<Vec<(String, Release)>>,
    started: AtomicBool,
    report: OnceCell<ShutdownReport>,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<CancellationRegistry>) -> Self {
        Self {
            registry,
            workers: Mutex::new(Vec::new()),
            resources: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            report: OnceCell::new(),
        }
    }

    pub fn adopt_thread(
        &self,
        role: WorkerRole,
        name: impl Into<String>,
        handle: std::thread::JoinHandle<()>,
    ) {
        self.adopt(role, name.into(), Joinable::Thread(handle));
    }

    pub fn adopt_task(
        &self,
        role: WorkerRole,
        name: impl Into<String>,
        handle: tokio::task::JoinHandle<()>,
    ) {
        self.adopt(role, name.into(), Joinable::Task(handle));
    }

    fn adopt(&self, role: WorkerRole, name: String, join: Joinable) {
        self.workers.lock().push(ManagedWorker { role, name, join });
    }

    /// Register a resource to release after every worker has been joined.
    pub fn own(&self, name: impl Into<String>, release: impl FnOnce() + Send + 'static) {
        self.resources.lock().push((name.into(), Box::new(release)));
    }

    pub fn is_shut_down(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Stop, join and release everything. Idempotent.
    pub async fn shutdown(&self) -> ShutdownReport {
        let repeated = self.started.swap(true, Ordering::SeqCst);
        let mut report = self.report.get_or_init(|| self.run()).await.clone();
        report.repeated = repeated;
        report
    }

    async fn run(&self) -> ShutdownReport {
        let start = Instant::now();
        info!("Shutdown started");
        self.registry.stop_all();

        let mut workers = std::mem::take(&mut *self.workers.lock());
        workers.sort_by_key(|w| w.role.shutdown_rank());

        let mut report = ShutdownReport::default();
        for worker in workers {
            let label = format!("{}:{}", worker.role, worker.name);
            match join(worker.join, &label).await {
                Ok(()) => info!(worker = %label, "Worker joined"),
                Err(()) => {
                    let err = LifecycleError::Panicked {
                        role: worker.role,
                        name: worker.name,
                    };
                    error!(error = %err, "Worker did not exit cleanly");
                    report.panicked.push(label.clone());
                }
            }
            report.joined.push(label);
        }

        let mut resources = std::mem::take(&mut *self.resources.lock());
        while let Some((name, release)) = resources.pop() {
            release();
            info!(resource = %name, "Resource released");
            report.released.push(name);
        }

        report.live_after = self.registry.live_count();
        if report.live_after > 0 {
            warn!(
                live = ?self.registry.live_workers(),
                "Workers still registered after shutdown"
            );
        }
        report.fatal = self.registry.fatal_reason();
        report.elapsed = start.elapsed();
        info!(
            joined = report.joined.len(),
            released = report.released.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Shutdown complete"
        );
        report
    }
}

async fn join(join: Joinable, label: &str) -> Result<(), ()> {
    match join {
        Joinable::Thread(handle) => {
            let mut waiter = tokio::task::spawn_blocking(move || handle.join());
            match wait_logged(&mut waiter, label).await {
                Ok(Ok(())) => Ok(()),
                _ => Err(()),
            }
        }
        Joinable::Task(mut handle) => wait_logged(&mut handle, label).await.map_err(|_| ()),
    }
}

async fn wait_logged<T>(
    handle: &mut tokio::task::JoinHandle<T>,
    label: &str,
) -> Result<T, tokio::task::JoinError> {
    loop {
        match tokio::time::timeout(SLOW_JOIN_WARNING, &mut *handle).await {
            Ok(result) => return result,
            Err(_) => warn!(worker = %label, "Worker slow to stop, still waiting"),
        }
    }
}
