//! Stream gate: a relay consumer switched by one activation bit.
//!
//! While its channel is inactive a gate does not touch the relay and emits
//! a [`GateOutput::Placeholder`] at most once per idle interval. When the
//! channel becomes active for the first time, one placeholder precedes the
//! first real frame so a fresh viewer never sees an uninitialized payload.

use crate::relay::{Frame, FrameRelay};
use crate::state::ActivationBoard;
use rov_common::config::TimingConfig;
use rov_common::mode::StreamChannel;
use std::sync::Arc;
use std::time::Duration;

/// What a gate hands to the video transport.
#[derive(Debug, Clone)]
pub enum GateOutput {
    /// Idle/initialisation sentinel.
    Placeholder,
    /// A real captured frame.
    Frame(Frame),
}

impl GateOutput {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, GateOutput::Placeholder)
    }

    pub fn frame(&self) -> Option<&Frame> {
        match self {
            GateOutput::Frame(f) => Some(f),
            GateOutput::Placeholder => None,
        }
    }
}

/// Gate pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateTiming {
    /// Placeholder interval while inactive.
    pub idle: Duration,
    /// Retry interval while active and the relay is empty.
    pub retry: Duration,
}

impl From<&TimingConfig> for GateTiming {
    fn from(t: &TimingConfig) -> Self {
        Self {
            idle: t.gate_idle(),
            retry: t.gate_retry(),
        }
    }
}

/// Gated consumer of one channel's relay.
pub struct StreamGate {
    channel: StreamChannel,
    relay: Arc<FrameRelay>,
    board: Arc<ActivationBoard>,
    timing: GateTiming,
    primed: bool,
}

impl StreamGate {
    pub fn new(
        channel: StreamChannel,
        relay: Arc<FrameRelay>,
        board: Arc<ActivationBoard>,
        timing: GateTiming,
    ) -> Self {
        Self {
            channel,
            relay,
            board,
            timing,
            primed: false,
        }
    }

    pub fn channel(&self) -> StreamChannel {
        self.channel
    }

    pub fn is_active(&self) -> bool {
        self.board.is_active(self.channel)
    }

    /// Next output for the viewer.
    ///
    /// Never busy-spins: the inactive path sleeps the idle interval, the
    /// active path sleeps the retry interval between empty polls.
    pub async fn next_output(&mut self) -> GateOutput {
        loop {
            if !self.is_active() {
                tokio::time::sleep(self.timing.idle).await;
                return GateOutput::Placeholder;
            }
            if !self.primed {
                self.primed = true;
                return GateOutput::Placeholder;
            }
            if let Some(frame) = self.relay.pop_latest() {
                return GateOutput::Frame(frame);
            }
            tokio::time::sleep(self.timing.retry).await;
        }
    }
}
