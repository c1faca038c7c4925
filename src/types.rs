//! Shared data types for the streaming subsystem.
//!
//! # Audio Format
//!
//! The endpoint streams PCM 16-bit signed little-endian mono at 24kHz.

use bytes::Bytes;

/// Default sample rate for PCM audio streamed by the endpoint.
pub const LIVE_SAMPLE_RATE: u32 = 24000;

/// One discrete unit of raw PCM audio delivered in a single wire frame.
///
/// Holds 16-bit signed little-endian samples. Instances are created by the
/// protocol client as audio envelopes arrive, tagged with arrival order, and
/// handed to the playback pipeline where they are consumed on schedule.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Raw audio bytes (PCM 16-bit, mono, little-endian).
    pub data: Bytes,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Arrival order, monotonically increasing per connection.
    pub sequence: u64,
}

impl AudioChunk {
    /// Create a chunk from raw PCM bytes.
    pub fn new(data: impl Into<Bytes>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            data: data.into(),
            sample_rate,
            sequence,
        }
    }

    /// Number of whole 16-bit frames in the chunk.
    pub fn frames(&self) -> usize {
        self.data.len() / 2
    }

    /// Decode the payload into normalized f32 samples in [-1, 1].
    ///
    /// A trailing odd byte (torn frame) is ignored.
    pub fn samples(&self) -> Vec<f32> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect()
    }

    /// Duration of the chunk at its sample rate.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as u64 * 1000) / self.sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_frames_and_samples() {
        let chunk = AudioChunk::new(vec![0x00, 0x40, 0x00, 0xC0], LIVE_SAMPLE_RATE, 0);
        assert_eq!(chunk.frames(), 2);
        let samples = chunk.samples();
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 0.5).abs() < 1e-4);
        assert!((samples[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_chunk_ignores_torn_frame() {
        let chunk = AudioChunk::new(vec![0x01, 0x00, 0xFF], LIVE_SAMPLE_RATE, 1);
        assert_eq!(chunk.frames(), 1);
        assert_eq!(chunk.samples().len(), 1);
    }

    #[test]
    fn test_chunk_duration() {
        // 24000 frames at 24kHz is one second
        let chunk = AudioChunk::new(vec![0u8; 48000], 24000, 0);
        assert_eq!(chunk.duration_ms(), 1000);

        let empty = AudioChunk::new(Vec::new(), 24000, 0);
        assert_eq!(empty.duration_ms(), 0);
    }
}
