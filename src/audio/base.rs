//! Base types for the audio playback pipeline.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur in the audio output pipeline.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No audio host / output device exists in this environment
    #[error("No audio output environment available")]
    Environment,

    /// An output device exists but could not be opened
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The silent playback probe was refused; output is gated until an
    /// activation signal is observed. Surfaced only registry-internally.
    #[error("Audio output blocked pending activation")]
    ProbeBlocked,

    /// The output stream could not be built or started
    #[error("Failed to build output stream: {0}")]
    StreamBuild(String),

    /// A render add-on could not be installed
    #[error("Worklet init failed: {0}")]
    WorkletInit(String),

    /// The playback queue exceeded its configured capacity
    #[error("Playback queue overflow: {queued} samples queued, capacity {capacity}")]
    Overflow {
        /// Samples currently queued
        queued: usize,
        /// Configured capacity in samples
        capacity: usize,
    },
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

// =============================================================================
// Context Options
// =============================================================================

/// Options for acquiring an audio output context.
///
/// When an `id` is given and a context already exists for it, the cached
/// context is returned and the remaining options are ignored
/// (first-writer-wins).
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Logical id for process-wide sharing.
    pub id: Option<String>,
    /// Preferred stream sample rate in Hz.
    pub sample_rate: u32,
    /// Preferred channel count.
    pub channels: u16,
}

impl ContextOptions {
    /// Options for a shared context under the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            id: None,
            sample_rate: crate::types::LIVE_SAMPLE_RATE,
            channels: 1,
        }
    }
}

// =============================================================================
// Render Seam
// =============================================================================

/// Format the output stream actually negotiated with the device. May differ
/// from the requested [`ContextOptions`]; sources adapt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Device sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

/// A producer of audio on the real-time render thread.
///
/// `render` is called once per output quantum with an interleaved f32 buffer
/// that has already been zeroed; implementations ADD their samples so
/// multiple sources mix on one stream. The call happens on the render
/// thread: keep it allocation-light and never block on I/O.
pub trait RenderSource: Send {
    /// Mix up to `out.len()` interleaved samples into the buffer.
    fn render(&mut self, out: &mut [f32], format: StreamFormat);
}

/// A render source shared between the owner and the render thread.
pub type SharedSource = Arc<Mutex<dyn RenderSource>>;

/// The mutable set of sources mixed by one output stream.
pub type SourceSet = Arc<Mutex<Vec<SharedSource>>>;
