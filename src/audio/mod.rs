//! Audio playback pipeline module.
//!
//! Three layers sit between a stream of PCM chunks and the speaker:
//!
//! - [`AudioOutputRegistry`] hands out at most one shared [`AudioContext`]
//!   per logical id, gating creation behind a one-time activation signal
//!   when the output backend refuses the silent probe.
//! - [`AudioStreamer`] schedules chunks gap-free on the context's timeline
//!   and hosts render add-ons ([`Worklet`]).
//! - [`OutputBackend`] is the hardware seam: cpal in production, injectable
//!   for tests and headless use.
//!
//! The render callback is the only code running off the main sequence; it
//! communicates back exclusively through worklet message channels.
//!
//! # Example
//!
//! ```rust,ignore
//! use multimodal_live::audio::{
//!     AudioOutputRegistry, AudioStreamer, ContextOptions, VolMeterWorklet,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = AudioOutputRegistry::new();
//! let context = registry.acquire(ContextOptions::with_id("audio-out")).await?;
//!
//! let streamer = AudioStreamer::new();
//! streamer.attach(&context)?;
//! streamer.add_worklet("vumeter-out", VolMeterWorklet::new(), |message| {
//!     println!("{message:?}");
//! })?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod base;
mod registry;
mod streamer;
mod worklet;

pub use backend::{CpalBackend, NullBackend, OutputBackend, OutputStreamHandle};
pub use base::{
    AudioError, AudioResult, ContextOptions, RenderSource, SharedSource, SourceSet, StreamFormat,
};
pub use registry::{ActivationHandle, AudioContext, AudioOutputRegistry};
pub use streamer::{AudioStreamer, PlaybackQueue, SCHEDULE_LOOKAHEAD};
pub use worklet::{VOLUME_UPDATE_INTERVAL, VolMeterWorklet, Worklet, WorkletMessage};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_streamer_end_to_end_with_null_backend() {
        let registry = AudioOutputRegistry::with_backend(Arc::new(NullBackend::new()));
        let context = registry
            .acquire(ContextOptions::with_id("audio-out"))
            .await
            .unwrap();

        let streamer = AudioStreamer::new();
        streamer.attach(&context).unwrap();

        let chunk = crate::types::AudioChunk::new(vec![0u8; 320], 24000, 0);
        streamer.enqueue(&chunk).unwrap();
        assert_eq!(streamer.scheduled_segments(), 1);
        assert_eq!(streamer.queued_samples(), 160);

        streamer.stop();
        assert_eq!(streamer.scheduled_segments(), 0);
    }
}
