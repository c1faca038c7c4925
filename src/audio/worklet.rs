//! Render add-ons ("worklets") and the metering worklet.
//!
//! A worklet runs on the real-time render thread, observing each rendered
//! quantum. The only data crossing back to the main sequence is an immutable
//! [`WorkletMessage`] sent over a channel; no mutable state is shared across
//! the thread boundary.

use std::time::Duration;

/// Message emitted by a worklet at render cadence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkletMessage {
    /// Output volume in [0, 1], overwritten each emission.
    Volume(f32),
}

/// A render add-on observing the streamer's rendered audio.
///
/// `process` runs on the render thread once per quantum; keep it
/// allocation-free. Returning `Some` sends one message to the add-on's
/// subscriber on the main sequence.
pub trait Worklet: Send {
    /// Observe one rendered quantum of mono samples at the device rate.
    fn process(&mut self, frames: &[f32], sample_rate: u32) -> Option<WorkletMessage>;
}

// =============================================================================
// Volume Meter
// =============================================================================

/// Default interval between volume emissions.
pub const VOLUME_UPDATE_INTERVAL: Duration = Duration::from_millis(25);

/// Decay applied to the smoothed volume between quanta.
const VOLUME_DECAY: f32 = 0.7;

/// RMS volume meter with peak-hold smoothing.
///
/// Emits [`WorkletMessage::Volume`] at most once per update interval. The
/// smoothed value rises instantly with the signal and decays geometrically,
/// which keeps a UI meter readable at render cadence.
pub struct VolMeterWorklet {
    smoothed: f32,
    interval: Duration,
    frames_since_emit: usize,
}

impl VolMeterWorklet {
    /// Meter with the default update interval.
    pub fn new() -> Self {
        Self::with_interval(VOLUME_UPDATE_INTERVAL)
    }

    /// Meter emitting at most once per `interval`.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            smoothed: 0.0,
            interval,
            frames_since_emit: usize::MAX / 2,
        }
    }
}

impl Default for VolMeterWorklet {
    fn default() -> Self {
        Self::new()
    }
}

impl Worklet for VolMeterWorklet {
    fn process(&mut self, frames: &[f32], sample_rate: u32) -> Option<WorkletMessage> {
        if frames.is_empty() {
            return None;
        }
        let sum_sq: f32 = frames.iter().map(|s| s * s).sum();
        let rms = (sum_sq / frames.len() as f32).sqrt();
        self.smoothed = rms.max(self.smoothed * VOLUME_DECAY);

        self.frames_since_emit = self.frames_since_emit.saturating_add(frames.len());
        let interval_frames =
            (sample_rate as u128 * self.interval.as_millis() / 1000).max(1) as usize;
        if self.frames_since_emit < interval_frames {
            return None;
        }
        self.frames_since_emit = 0;
        Some(WorkletMessage::Volume(self.smoothed.clamp(0.0, 1.0)))
    }
}
