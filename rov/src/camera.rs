//! Camera access with exclusive ownership.
//!
//! Capture itself is an external collaborator behind the [`Camera`] and
//! [`CameraSource`] traits. This module adds what the control plane needs
//! on top:
//!
//! - [`CameraSourceRegistry`] - named source factories selected by config
//! - [`CameraLedger`] - who owns which channel, plus a bounded open/release log
//! - [`CameraRig`] / [`CameraHandle`] - opening through the ledger and
//!   releasing on drop, so a task's cameras are freed when its worker exits
//!
//! A channel's camera is owned by at most one task at a time; a second
//! open is refused with [`CameraError::Busy`].

pub mod simulation;

use crate::relay::Frame;
use parking_lot::Mutex;
use rov_common::config::CameraConfig;
use rov_common::consts::LEDGER_HISTORY;
use rov_common::mode::StreamChannel;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error types for camera operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// Device could not be opened.
    #[error("failed to open {channel} camera: {reason}")]
    OpenFailed {
        channel: StreamChannel,
        reason: String,
    },

    /// Channel already owned by another task.
    #[error("{channel} camera is owned by '{owner}'")]
    Busy {
        channel: StreamChannel,
        owner: String,
    },

    /// Device returned an error while reading.
    #[error("failed to read {channel} camera: {reason}")]
    ReadFailed {
        channel: StreamChannel,
        reason: String,
    },

    /// Handle used after release.
    #[error("{0} camera already released")]
    Released(StreamChannel),

    /// No factory registered under that name.
    #[error("camera source not found: {0}")]
    SourceNotFound(String),
}

/// One open capture device.
pub trait Camera: Send {
    fn channel(&self) -> StreamChannel;

    /// Read the next frame.
    ///
    /// `Ok(None)` means no frame is ready yet; callers back off and retry.
    fn read_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Free the device. Called exactly once by [`CameraHandle`].
    fn release(&mut self);
}

/// Opens capture devices by channel.
pub trait CameraSource: Send + Sync {
    /// Source identifier (e.g. "simulation").
    fn name(&self) -> &'static str;

    fn open(&self, channel: StreamChannel) -> Result<Box<dyn Camera>, CameraError>;
}

/// Factory function type for creating camera sources.
pub type CameraSourceFactory = fn(&CameraConfig) -> Arc<dyn CameraSource>;

/// Registry of available camera sources.
///
/// Constructed at startup and populated via `register()`. No global state.
pub struct CameraSourceRegistry {
    factories: HashMap<&'static str, CameraSourceFactory>,
}

impl CameraSourceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in source.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register(simulation::SOURCE_NAME, simulation::create_source);
        reg
    }

    /// Register a source factory.
    ///
    /// # Panics
    /// Panics if a source with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: CameraSourceFactory) {
        if self.factories.contains_key(name) {
            panic!("Camera source '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Create the source named in `config.source`.
    pub fn create(&self, config: &CameraConfig) -> Result<Arc<dyn CameraSource>, CameraError> {
        let factory = self
            .factories
            .get(config.source.as_str())
            .ok_or_else(|| CameraError::SourceNotFound(config.source.clone()))?;
        Ok(factory(config))
    }

    pub fn list_sources(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for CameraSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry in the ledger's event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Opened { channel: StreamChannel, owner: String },
    Released { channel: StreamChannel, owner: String },
}

struct LedgerInner {
    owners: HashMap<StreamChannel, String>,
    events: VecDeque<LedgerEvent>,
    history: usize,
}

impl LedgerInner {
    fn log(&mut self, event: LedgerEvent) {
        if self.events.len() == self.history {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Exclusive camera ownership plus a log of the most recent opens and
/// releases.
pub struct CameraLedger {
    inner: Mutex<LedgerInner>,
}

impl Default for CameraLedger {
    fn default() -> Self {
        Self::with_history(LEDGER_HISTORY)
    }
}

impl CameraLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger keeping at most `history` events (at least one).
    pub fn with_history(history: usize) -> Self {
        let history = history.max(1);
        Self {
            inner: Mutex::new(LedgerInner {
                owners: HashMap::new(),
                events: VecDeque::with_capacity(history),
                history,
            }),
        }
    }

    fn claim(&self, channel: StreamChannel, owner: &str) -> Result<(), CameraError> {
        let mut inner = self.inner.lock();
        if let Some(current) = inner.owners.get(&channel) {
            return Err(CameraError::Busy {
                channel,
                owner: current.clone(),
            });
        }
        inner.owners.insert(channel, owner.to_string());
        Ok(())
    }

    fn unclaim(&self, channel: StreamChannel) {
        self.inner.lock().owners.remove(&channel);
    }

    fn record_open(&self, channel: StreamChannel, owner: &str) {
        self.inner.lock().log(LedgerEvent::Opened {
            channel,
            owner: owner.to_string(),
        });
    }

    fn record_release(&self, channel: StreamChannel, owner: &str) {
        let mut inner = self.inner.lock();
        inner.owners.remove(&channel);
        inner.log(LedgerEvent::Released {
            channel,
            owner: owner.to_string(),
        });
    }

    /// Current owner of `channel`'s camera.
    pub fn owner(&self, channel: StreamChannel) -> Option<String> {
        self.inner.lock().owners.get(&channel).cloned()
    }

    /// Channels currently held by `owner`.
    pub fn held_by(&self, owner: &str) -> Vec<StreamChannel> {
        let inner = self.inner.lock();
        let mut held: Vec<_> = inner
            .owners
            .iter()
            .filter(|(_, o)| o.as_str() == owner)
            .map(|(ch, _)| *ch)
            .collect();
        held.sort();
        held
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().owners.len()
    }

    /// Retained open/release history, oldest first.
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.inner.lock().events.iter().cloned().collect()
    }
}

/// Opens cameras through the ledger.
#[derive(Clone)]
pub struct CameraRig {
    source: Arc<dyn CameraSource>,
    ledger: Arc<CameraLedger>,
}

impl CameraRig {
    pub fn new(source: Arc<dyn CameraSource>, ledger: Arc<CameraLedger>) -> Self {
        Self { source, ledger }
    }

    pub fn ledger(&self) -> &Arc<CameraLedger> {
        &self.ledger
    }

    /// Open `channel` on behalf of `owner`.
    pub fn open(&self, channel: StreamChannel, owner: &str) -> Result<CameraHandle, CameraError> {
        self.ledger.claim(channel, owner)?;
        match self.source.open(channel) {
            Ok(camera) => {
                self.ledger.record_open(channel, owner);
                info!(%channel, owner, source = self.source.name(), "Camera opened");
                Ok(CameraHandle {
                    camera: Some(camera),
                    channel,
                    owner: owner.to_string(),
                    ledger: Arc::clone(&self.ledger),
                })
            }
            Err(e) => {
                self.ledger.unclaim(channel);
                warn!(%channel, owner, error = %e, "Camera open failed");
                Err(e)
            }
        }
    }

    /// Open every channel in `channels`, all or nothing.
    pub fn open_all(
        &self,
        channels: &[StreamChannel],
        owner: &str,
    ) -> Result<Vec<CameraHandle>, CameraError> {
        let mut handles = Vec::with_capacity(channels.len());
        for &channel in channels {
            // Handles opened so far are released by drop on early return.
            handles.push(self.open(channel, owner)?);
        }
        Ok(handles)
    }
}

/// An owned, open camera. Released on drop.
pub struct CameraHandle {
    camera: Option<Box<dyn Camera>>,
    channel: StreamChannel,
    owner: String,
    ledger: Arc<CameraLedger>,
}

impl CameraHandle {
    pub fn channel(&self) -> StreamChannel {
        self.channel
    }

    pub fn read_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.camera.as_mut() {
            Some(cam) => cam.read_frame(),
            None => Err(CameraError::Released(self.channel)),
        }
    }

    /// Release now rather than at drop.
    pub fn release(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.release();
            self.ledger.record_release(self.channel, &self.owner);
            debug!(channel = %self.channel, owner = %self.owner, "Camera released");
        }
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.release();
    }
}
