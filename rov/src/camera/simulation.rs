//! Simulated camera source.
//!
//! Produces a moving colour-bar test pattern at the configured frame rate.
//! `read_frame` blocks until the next frame is due, like a real capture
//! device. Channels listed in `cameras.offline` refuse to open.

use super::{Camera, CameraError, CameraSource};
use crate::relay::Frame;
use rov_common::config::CameraConfig;
use rov_common::mode::StreamChannel;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Registry name of this source.
pub const SOURCE_NAME: &str = "simulation";

/// Factory registered in [`super::CameraSourceRegistry::with_builtin`].
pub fn create_source(config: &CameraConfig) -> Arc<dyn CameraSource> {
    Arc::new(SimulatedSource::from_config(config))
}

#[derive(Debug, Clone)]
pub struct SimulatedSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    offline: Vec<StreamChannel>,
}

impl SimulatedSource {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            frame_interval: config.frame_interval(),
            offline: config.offline.clone(),
        }
    }
}

impl CameraSource for SimulatedSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn open(&self, channel: StreamChannel) -> Result<Box<dyn Camera>, CameraError> {
        if self.offline.contains(&channel) {
            return Err(CameraError::OpenFailed {
                channel,
                reason: "simulated device offline".to_string(),
            });
        }
        Ok(Box::new(SimulatedCamera {
            channel,
            width: self.width,
            height: self.height,
            frame_interval: self.frame_interval,
            next_due: Instant::now(),
            seq: 0,
            open: true,
        }))
    }
}

struct SimulatedCamera {
    channel: StreamChannel,
    width: u32,
    height: u32,
    frame_interval: Duration,
    next_due: Instant,
    seq: u64,
    open: bool,
}

impl SimulatedCamera {
    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = self.seq as usize;
        // Each channel gets its own tint so feeds are distinguishable.
        let tint = (self.channel.index() as u8).wrapping_mul(60);
        let mut pixels = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                let bar = (((x + shift) * 8) / w.max(1)) as u8;
                pixels.push(bar.wrapping_mul(32));
                pixels.push(((y * 255) / h.max(1)) as u8);
                pixels.push(tint);
            }
        }
        pixels
    }
}

impl Camera for SimulatedCamera {
    fn channel(&self) -> StreamChannel {
        self.channel
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if !self.open {
            return Err(CameraError::Released(self.channel));
        }
        let now = Instant::now();
        if now < self.next_due {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due = Instant::now() + self.frame_interval;
        self.seq += 1;
        Ok(Some(Frame::new(
            self.channel,
            self.seq,
            self.width,
            self.height,
            self.render(),
        )))
    }

    fn release(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CameraConfig {
        CameraConfig {
            width: 8,
            height: 4,
            fps: 200,
            offline: vec![StreamChannel::StereoRight],
            ..CameraConfig::default()
        }
    }

    #[test]
    fn frames_are_well_formed_and_sequenced() {
        let source = SimulatedSource::from_config(&config());
        let mut cam = source.open(StreamChannel::Down).unwrap();
        let a = cam.read_frame().unwrap().unwrap();
        let b = cam.read_frame().unwrap().unwrap();
        assert!(a.is_well_formed());
        assert_eq!(a.channel, StreamChannel::Down);
        assert_eq!(b.seq, a.seq + 1);
        assert_ne!(a.pixels, b.pixels);
    }

    #[test]
    fn paced_at_frame_rate() {
        let source = SimulatedSource::from_config(&config());
        let mut cam = source.open(StreamChannel::Manipulator).unwrap();
        let start = Instant::now();
        for _ in 0..5 {
            cam.read_frame().unwrap();
        }
        // First frame is immediate, four more intervals of 5ms follow.
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn offline_channel_fails_to_open() {
        let source = SimulatedSource::from_config(&config());
        assert!(matches!(
            source.open(StreamChannel::StereoRight),
            Err(CameraError::OpenFailed { .. })
        ));
    }

    #[test]
    fn released_camera_stops_reading() {
        let source = SimulatedSource::from_config(&config());
        let mut cam = source.open(StreamChannel::Down).unwrap();
        cam.release();
        assert!(cam.read_frame().is_err());
    }
}
