//! # ROV Control Plane
//!
//! Mode-driven task orchestration and bounded video-frame relay for a
//! remotely operated vehicle. Shared types live in `rov_common`.
//!
//! # Module Structure
//!
//! - [`cancel`] - Cancellation registry and stop tokens
//! - [`state`] - Shared mode/authority pair and activation board
//! - [`relay`] - Frames and the drop-oldest frame relay
//! - [`gate`] - Stream gates switched by the activation board
//! - [`watcher`] - Mode watcher publishing activation vectors
//! - [`camera`] - Camera traits, source registry, ownership ledger
//! - [`autonomy`] - Docking/transect algorithm interfaces
//! - [`task`] - Mission task routines
//! - [`manager`] - Task lifecycle manager (single active task)
//! - [`sink`] - Outbound drive packet forwarding
//! - [`intake`] - Inbound operator commands over TCP
//! - [`transport`] - Viewer sessions fed by stream gates
//! - [`snapshot`] - SAVE_IMAGE writer
//! - [`shutdown`] - Ordered worker join and resource release
//! - [`system`] - Wiring of all of the above
//!
//! # Architecture
//!
//! ```text
//!  operator ──► intake ──► [cmd queue] ──► TaskLifecycleManager
//!                                                │ sets (mode, authority)
//!                                                ▼
//!        cameras ◄── task worker ──► [drive queue] ──► packet sink ──► motors
//!                        │
//!                        ▼ frames
//!                   FrameRelay ×4 ──► StreamGate ×4 per session ──► viewer
//!                                          ▲
//!        ControlState ──► ModeWatcher ──► ActivationBoard
//! ```

pub mod autonomy;
pub mod camera;
pub mod cancel;
pub mod gate;
pub mod intake;
pub mod manager;
pub mod relay;
pub mod shutdown;
pub mod sink;
pub mod snapshot;
pub mod state;
pub mod system;
pub mod task;
pub mod transport;
pub mod watcher;

pub use crate::manager::{TaskError, TaskLifecycleManager};
pub use crate::system::{RovSystem, SystemError};
pub use crate::task::TaskKind;
