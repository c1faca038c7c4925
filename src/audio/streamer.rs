//! PCM playback streamer: unbounded push stream in, gap-free audio out.
//!
//! Chunks are appended to a frame-addressed schedule: each one starts
//! exactly where the previous ends, and when the queue has drained the next
//! chunk is placed a small look-ahead past "now" so playback resumes
//! without an underrun click. The render thread drains the schedule one
//! quantum at a time; worklets observe each rendered quantum and report
//! back over a message channel.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::base::{AudioError, AudioResult, SharedSource, StreamFormat};
use super::registry::AudioContext;
use super::worklet::{Worklet, WorkletMessage};
use crate::types::{AudioChunk, LIVE_SAMPLE_RATE};

/// Look-ahead added when scheduling onto an idle timeline.
pub const SCHEDULE_LOOKAHEAD: Duration = Duration::from_millis(50);

// =============================================================================
// Playback Queue
// =============================================================================

struct Segment {
    /// Absolute start frame on the output timeline.
    start: u64,
    cursor: usize,
    samples: Vec<f32>,
}

/// Frame-addressed playback schedule.
///
/// Pure scheduling state: `enqueue` places chunks on the timeline and
/// `render` drains them against a monotonic frame clock. The streamer locks
/// it from both the caller side and the render thread.
pub struct PlaybackQueue {
    sample_rate: u32,
    lookahead: u64,
    /// Frames rendered so far ("now" on the output timeline).
    clock: u64,
    /// End frame of the last scheduled segment.
    tail: u64,
    segments: VecDeque<Segment>,
    queued_samples: usize,
    capacity: Option<usize>,
}

impl PlaybackQueue {
    /// Empty queue rendering at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            lookahead: lookahead_frames(sample_rate),
            clock: 0,
            tail: 0,
            segments: VecDeque::new(),
            queued_samples: 0,
            capacity: None,
        }
    }

    /// Cap the queue at `capacity` samples; `enqueue` fails with
    /// [`AudioError::Overflow`] beyond it instead of dropping audio.
    pub fn with_capacity(sample_rate: u32, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new(sample_rate)
        }
    }

    /// Queue sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Schedule a chunk immediately after the current tail.
    pub fn enqueue(&mut self, chunk: &AudioChunk) -> AudioResult<()> {
        let samples = chunk.samples();
        if samples.is_empty() {
            return Ok(());
        }
        if let Some(capacity) = self.capacity {
            if self.queued_samples + samples.len() > capacity {
                return Err(AudioError::Overflow {
                    queued: self.queued_samples + samples.len(),
                    capacity,
                });
            }
        }
        // A drained queue may adopt a new stream rate without a glitch.
        if chunk.sample_rate != self.sample_rate && self.segments.is_empty() {
            self.sample_rate = chunk.sample_rate;
            self.lookahead = lookahead_frames(chunk.sample_rate);
        }

        // Contiguous with the scheduled tail while audio is in flight;
        // from a drained timeline, resume a look-ahead past "now".
        let start = if self.tail > self.clock {
            self.tail
        } else {
            self.clock + self.lookahead
        };
        self.tail = start + samples.len() as u64;
        self.queued_samples += samples.len();
        self.segments.push_back(Segment {
            start,
            cursor: 0,
            samples,
        });
        Ok(())
    }

    /// Drop every segment not yet rendered and reset the tail to "now".
    /// The quantum currently inside the render callback finishes on its own.
    pub fn stop(&mut self) {
        let dropped = self.segments.len();
        self.segments.clear();
        self.queued_samples = 0;
        self.tail = self.clock;
        if dropped > 0 {
            tracing::debug!("cancelled {dropped} scheduled segments");
        }
    }

    /// Fill one mono quantum from the schedule. Positions before a segment's
    /// start are left untouched (the caller provides a zeroed buffer), so
    /// gaps render as silence.
    pub fn render(&mut self, out: &mut [f32]) {
        let quantum = out.len() as u64;
        let mut offset = 0usize;
        while offset < out.len() {
            let Some(segment) = self.segments.front_mut() else {
                break;
            };
            let position = segment.start + segment.cursor as u64;
            if position >= self.clock + quantum {
                break;
            }
            let now = self.clock + offset as u64;
            if position > now {
                offset = (position - self.clock) as usize;
                continue;
            }
            let n = (segment.samples.len() - segment.cursor).min(out.len() - offset);
            out[offset..offset + n]
                .copy_from_slice(&segment.samples[segment.cursor..segment.cursor + n]);
            segment.cursor += n;
            offset += n;
            if segment.cursor == segment.samples.len() {
                self.queued_samples -= segment.samples.len();
                self.segments.pop_front();
            }
        }
        self.clock += quantum;
    }

    /// Number of segments still scheduled (including one mid-render).
    pub fn scheduled_segments(&self) -> usize {
        self.segments.len()
    }

    /// Samples queued but not yet rendered.
    pub fn queued_samples(&self) -> usize {
        self.queued_samples
    }

    /// Frames rendered so far.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// End of the scheduled timeline.
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Look-ahead in frames at the current rate.
    pub fn lookahead(&self) -> u64 {
        self.lookahead
    }
}

fn lookahead_frames(sample_rate: u32) -> u64 {
    (sample_rate as u128 * SCHEDULE_LOOKAHEAD.as_millis() / 1000) as u64
}

// =============================================================================
// Streamer
// =============================================================================

struct WorkletSlot {
    name: String,
    worklet: Box<dyn Worklet>,
    tx: mpsc::UnboundedSender<WorkletMessage>,
}

/// Render source bridging the schedule onto the device stream.
struct StreamerSource {
    queue: Arc<Mutex<PlaybackQueue>>,
    worklets: Arc<Mutex<Vec<WorkletSlot>>>,
    mono: Vec<f32>,
    scratch: Vec<f32>,
    /// Fractional source-frame carry for rate adaptation.
    frac: f64,
}

impl super::base::RenderSource for StreamerSource {
    fn render(&mut self, out: &mut [f32], format: StreamFormat) {
        let channels = format.channels.max(1) as usize;
        let out_frames = out.len() / channels;
        if out_frames == 0 {
            return;
        }

        let src_rate = self.queue.lock().sample_rate();
        if src_rate == format.sample_rate {
            self.mono.clear();
            self.mono.resize(out_frames, 0.0);
            self.queue.lock().render(&mut self.mono);
        } else {
            // Nearest-sample rate adaptation with fractional carry
            let ratio = src_rate as f64 / format.sample_rate as f64;
            let want = out_frames as f64 * ratio + self.frac;
            let take = want.floor() as usize;
            self.frac = want - take as f64;
            self.scratch.clear();
            self.scratch.resize(take, 0.0);
            self.queue.lock().render(&mut self.scratch);
            self.mono.clear();
            self.mono.resize(out_frames, 0.0);
            if take > 0 {
                for (i, slot) in self.mono.iter_mut().enumerate() {
                    let idx = ((i as f64 * ratio) as usize).min(take - 1);
                    *slot = self.scratch[idx];
                }
            }
        }

        {
            let mut worklets = self.worklets.lock();
            for slot in worklets.iter_mut() {
                if let Some(message) = slot.worklet.process(&self.mono, format.sample_rate) {
                    let _ = slot.tx.send(message);
                }
            }
        }

        for (frame, sample) in self.mono.iter().enumerate() {
            let base = frame * channels;
            for ch in 0..channels {
                out[base + ch] += sample;
            }
        }
    }
}

/// Converts a push stream of [`AudioChunk`] into continuous playback and
/// hosts metering worklets.
pub struct AudioStreamer {
    queue: Arc<Mutex<PlaybackQueue>>,
    worklets: Arc<Mutex<Vec<WorkletSlot>>>,
    source: SharedSource,
    attached: Mutex<Vec<Weak<AudioContext>>>,
}

impl AudioStreamer {
    /// Streamer with an unbounded queue at the default stream rate.
    pub fn new() -> Self {
        Self::from_queue(PlaybackQueue::new(LIVE_SAMPLE_RATE))
    }

    /// Streamer whose queue is capped at `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_queue(PlaybackQueue::with_capacity(LIVE_SAMPLE_RATE, capacity))
    }

    fn from_queue(queue: PlaybackQueue) -> Self {
        let queue = Arc::new(Mutex::new(queue));
        let worklets: Arc<Mutex<Vec<WorkletSlot>>> = Arc::new(Mutex::new(Vec::new()));
        let source: SharedSource = Arc::new(Mutex::new(StreamerSource {
            queue: queue.clone(),
            worklets: worklets.clone(),
            mono: Vec::new(),
            scratch: Vec::new(),
            frac: 0.0,
        }));
        Self {
            queue,
            worklets,
            source,
            attached: Mutex::new(Vec::new()),
        }
    }

    /// Bind to an output context; idempotent per context.
    pub fn attach(&self, context: &Arc<AudioContext>) -> AudioResult<()> {
        let mut attached = self.attached.lock();
        let already = attached
            .iter()
            .any(|weak| weak.upgrade().is_some_and(|c| Arc::ptr_eq(&c, context)));
        if already {
            return Ok(());
        }
        context.register_source(self.source.clone())?;
        attached.push(Arc::downgrade(context));
        Ok(())
    }

    /// Whether the streamer is bound to at least one live context.
    pub fn is_attached(&self) -> bool {
        self.attached
            .lock()
            .iter()
            .any(|weak| weak.upgrade().is_some())
    }

    /// Install a named render add-on and wire its messages to `on_message`.
    ///
    /// Messages cross from the render thread over a channel; `on_message`
    /// runs on a forwarder task, never on the render thread.
    pub fn add_worklet<W, F>(&self, name: &str, worklet: W, on_message: F) -> AudioResult<()>
    where
        W: Worklet + 'static,
        F: Fn(WorkletMessage) + Send + 'static,
    {
        if !self.is_attached() {
            return Err(AudioError::WorkletInit(
                "streamer is not attached to an audio context".to_string(),
            ));
        }
        let mut worklets = self.worklets.lock();
        if worklets.iter().any(|slot| slot.name == name) {
            return Err(AudioError::WorkletInit(format!(
                "worklet '{name}' already installed"
            )));
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                on_message(message);
            }
        });
        worklets.push(WorkletSlot {
            name: name.to_string(),
            worklet: Box::new(worklet),
            tx,
        });
        tracing::debug!(worklet = name, "worklet installed");
        Ok(())
    }

    /// Append a chunk to the playback schedule.
    pub fn enqueue(&self, chunk: &AudioChunk) -> AudioResult<()> {
        self.queue.lock().enqueue(chunk)
    }

    /// Cancel all not-yet-rendered audio and empty the queue.
    pub fn stop(&self) {
        self.queue.lock().stop();
    }

    /// Segments currently scheduled.
    pub fn scheduled_segments(&self) -> usize {
        self.queue.lock().scheduled_segments()
    }

    /// Samples queued but not yet rendered.
    pub fn queued_samples(&self) -> usize {
        self.queue.lock().queued_samples()
    }
}

impl Default for AudioStreamer {
    fn default() -> Self {
        Self::new()
    }
}
