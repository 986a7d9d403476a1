//! Autonomy algorithm interfaces.
//!
//! The vision algorithms are external; task routines drive them through
//! these traits. Each task start asks the [`AutonomyProvider`] for a fresh
//! algorithm instance so no state leaks between runs.
//!
//! [`PlaceholderAutonomy`] passes frames through and steers on image
//! brightness balance. It exists so the vehicle can be exercised end to end
//! without the real algorithms.

use crate::relay::Frame;

/// Output of one docking step.
#[derive(Debug, Clone)]
pub struct DockingOutput {
    /// Annotated manipulator view.
    pub manipulator: Frame,
    /// Annotated downward view.
    pub down: Frame,
    /// Raw drive values; validated and rounded by the packet sink.
    pub drive: Vec<f64>,
}

/// Output of one transect step.
#[derive(Debug, Clone)]
pub struct TransectOutput {
    pub frame: Frame,
    pub drive: Vec<f64>,
}

pub trait DockingAlgorithm: Send {
    /// `None` means the inputs were unusable; the iteration is skipped.
    fn step(&mut self, manipulator: &Frame, down: &Frame) -> Option<DockingOutput>;
}

pub trait TransectAlgorithm: Send {
    /// `None` means the input was unusable; the iteration is skipped.
    fn step(&mut self, frame: &Frame) -> Option<TransectOutput>;
}

/// Hands out fresh algorithm instances.
pub trait AutonomyProvider: Send + Sync {
    fn docking(&self) -> Box<dyn DockingAlgorithm>;
    fn transect(&self) -> Box<dyn TransectAlgorithm>;
}

/// Brightness-balance stand-in for the real algorithms.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderAutonomy;

impl AutonomyProvider for PlaceholderAutonomy {
    fn docking(&self) -> Box<dyn DockingAlgorithm> {
        Box::new(BalanceDocking)
    }

    fn transect(&self) -> Box<dyn TransectAlgorithm> {
        Box::new(BalanceTransect)
    }
}

/// Largest steering magnitude produced by the placeholder.
const MAX_STEER: f64 = 100.0;

/// Mean luminance difference between right and left halves, scaled to
/// `[-MAX_STEER, MAX_STEER]`. `None` for malformed frames.
fn brightness_balance(frame: &Frame) -> Option<f64> {
    if !frame.is_well_formed() {
        return None;
    }
    let (w, h) = (frame.width as usize, frame.height as usize);
    let half = w / 2;
    if half == 0 {
        return Some(0.0);
    }
    let (mut left, mut right) = (0u64, 0u64);
    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) * 3;
            let px = &frame.pixels[i..i + 3];
            let luma = u64::from(px[0]) + u64::from(px[1]) + u64::from(px[2]);
            if x < half {
                left += luma;
            } else if x >= w - half {
                right += luma;
            }
        }
    }
    let samples = (half * h * 3) as f64;
    let diff = (right as f64 - left as f64) / samples;
    Some((diff / 255.0 * MAX_STEER).clamp(-MAX_STEER, MAX_STEER))
}

struct BalanceDocking;

impl DockingAlgorithm for BalanceDocking {
    fn step(&mut self, manipulator: &Frame, down: &Frame) -> Option<DockingOutput> {
        let yaw = brightness_balance(manipulator)?;
        let sway = brightness_balance(down)?;
        Some(DockingOutput {
            manipulator: manipulator.clone(),
            down: down.clone(),
            drive: vec![0.0, sway, 0.0, yaw],
        })
    }
}

struct BalanceTransect;

impl TransectAlgorithm for BalanceTransect {
    fn step(&mut self, frame: &Frame) -> Option<TransectOutput> {
        let sway = brightness_balance(frame)?;
        Some(TransectOutput {
            frame: frame.clone(),
            drive: vec![MAX_STEER / 4.0, sway, 0.0, 0.0],
        })
    }
}
