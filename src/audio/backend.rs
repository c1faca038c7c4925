//! Output backends: the seam between the registry and actual hardware.
//!
//! [`CpalBackend`] drives the default host audio device. The `cpal::Stream`
//! is not `Send`, so the stream lives on a dedicated render thread for its
//! whole life; the builder hands the negotiated [`StreamFormat`] back over a
//! channel (and any failure with it). [`NullBackend`] discards audio and is
//! meant for headless environments and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::base::{AudioError, AudioResult, ContextOptions, SourceSet, StreamFormat};

/// A running output stream. Dropping the handle stops the stream.
pub trait OutputStreamHandle: Send {
    /// Format the stream negotiated with the device.
    fn format(&self) -> StreamFormat;
}

/// Backend seam for creating audio output streams.
///
/// The registry is generic over this trait so tests can inject a mock and a
/// fresh registry per case; production uses [`CpalBackend`].
pub trait OutputBackend: Send + Sync {
    /// Whether this environment has any usable audio output.
    fn is_available(&self) -> bool;

    /// Silent-playback probe. `Err(AudioError::ProbeBlocked)` means output
    /// is gated until an activation signal; other errors are terminal.
    fn probe(&self, options: &ContextOptions) -> AudioResult<()>;

    /// Open an output stream mixing the given sources.
    fn open_stream(
        &self,
        options: &ContextOptions,
        sources: SourceSet,
    ) -> AudioResult<Box<dyn OutputStreamHandle>>;
}

// =============================================================================
// cpal Backend
// =============================================================================

/// Hardware output through the default cpal host.
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    /// Create the backend. Cheap; no device is touched until probe/open.
    pub fn new() -> Self {
        Self
    }
}

struct CpalStreamHandle {
    format: StreamFormat,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl OutputStreamHandle for CpalStreamHandle {
    fn format(&self) -> StreamFormat {
        self.format
    }
}

impl Drop for CpalStreamHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl OutputBackend for CpalBackend {
    fn is_available(&self) -> bool {
        cpal::default_host().default_output_device().is_some()
    }

    fn probe(&self, _options: &ContextOptions) -> AudioResult<()> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(AudioError::Environment)?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        // One silent quantum; a backend that refuses is treated as gated.
        let stream = build_silent_stream(&device, &config).map_err(|e| {
            tracing::debug!("silent probe refused: {e}");
            AudioError::ProbeBlocked
        })?;
        if stream.play().is_err() {
            return Err(AudioError::ProbeBlocked);
        }
        std::thread::sleep(Duration::from_millis(20));
        drop(stream);
        Ok(())
    }

    fn open_stream(
        &self,
        options: &ContextOptions,
        sources: SourceSet,
    ) -> AudioResult<Box<dyn OutputStreamHandle>> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let requested = options.clone();

        // The stream must be created and kept alive on one thread.
        let (init_tx, init_rx) = std::sync::mpsc::channel::<AudioResult<StreamFormat>>();
        let thread = std::thread::Builder::new()
            .name("audio-render".to_string())
            .spawn(move || {
                let stream = match open_device_stream(&requested, sources) {
                    Ok((stream, format)) => {
                        let _ = init_tx.send(Ok(format));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    tracing::error!("output stream failed to start: {e}");
                    return;
                }
                while !stop_thread.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                // stream dropped here, which stops rendering
            })
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        let format = match init_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(AudioError::StreamBuild(
                    "render thread died during init".to_string(),
                ));
            }
        };

        tracing::info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "audio output stream started"
        );
        Ok(Box::new(CpalStreamHandle {
            format,
            stop,
            thread: Some(thread),
        }))
    }
}

fn build_silent_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
) -> AudioResult<cpal::Stream> {
    let stream_config: cpal::StreamConfig = config.clone().into();
    let err_fn = |e| tracing::debug!("probe stream error: {e}");
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| data.fill(0.0),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| data.fill(0),
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [u16], _: &cpal::OutputCallbackInfo| data.fill(u16::MAX / 2),
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::StreamBuild(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    };
    stream.map_err(|e| AudioError::StreamBuild(e.to_string()))
}

/// Open an output stream, preferring the requested format and falling back
/// to the device default when the device refuses it.
fn open_device_stream(
    options: &ContextOptions,
    sources: SourceSet,
) -> AudioResult<(cpal::Stream, StreamFormat)> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::Environment)?;
    let default_config = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

    let requested = cpal::StreamConfig {
        channels: options.channels,
        sample_rate: options.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    let requested_format = StreamFormat {
        sample_rate: options.sample_rate,
        channels: options.channels,
    };

    if default_config.sample_format() == cpal::SampleFormat::F32 {
        if let Ok(stream) =
            build_mixing_stream_f32(&device, &requested, requested_format, sources.clone())
        {
            return Ok((stream, requested_format));
        }
        tracing::debug!(
            "device refused {} Hz x{}, using default config",
            requested_format.sample_rate,
            requested_format.channels
        );
    }

    let fallback_format = StreamFormat {
        sample_rate: default_config.sample_rate(),
        channels: default_config.channels(),
    };
    let stream_config: cpal::StreamConfig = default_config.clone().into();
    let stream = match default_config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_mixing_stream_f32(&device, &stream_config, fallback_format, sources)
        }
        cpal::SampleFormat::I16 => {
            build_mixing_stream_i16(&device, &stream_config, fallback_format, sources)
        }
        cpal::SampleFormat::U16 => {
            build_mixing_stream_u16(&device, &stream_config, fallback_format, sources)
        }
        other => {
            return Err(AudioError::StreamBuild(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    }
    .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

    Ok((stream, fallback_format))
}

fn mix_into(scratch: &mut [f32], sources: &SourceSet, format: StreamFormat) {
    scratch.fill(0.0);
    let sources = sources.lock();
    for source in sources.iter() {
        source.lock().render(scratch, format);
    }
}

fn build_mixing_stream_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: StreamFormat,
    sources: SourceSet,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let err_fn = |e| tracing::warn!("output stream error: {e}");
    device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            mix_into(data, &sources, format);
        },
        err_fn,
        None,
    )
}

fn build_mixing_stream_i16(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: StreamFormat,
    sources: SourceSet,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let err_fn = |e| tracing::warn!("output stream error: {e}");
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            mix_into(&mut scratch, &sources, format);
            for (out, sample) in data.iter_mut().zip(&scratch) {
                *out = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            }
        },
        err_fn,
        None,
    )
}

fn build_mixing_stream_u16(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: StreamFormat,
    sources: SourceSet,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let err_fn = |e| tracing::warn!("output stream error: {e}");
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            mix_into(&mut scratch, &sources, format);
            for (out, sample) in data.iter_mut().zip(&scratch) {
                let normalized = (sample.clamp(-1.0, 1.0) + 1.0) / 2.0;
                *out = (normalized * u16::MAX as f32) as u16;
            }
        },
        err_fn,
        None,
    )
}

// =============================================================================
// Null Backend
// =============================================================================

/// A backend that accepts streams and discards their audio.
///
/// Useful for headless deployments (the session logic runs, playback is a
/// no-op) and for tests that need a registry without hardware.
#[derive(Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

struct NullStreamHandle {
    format: StreamFormat,
}

impl OutputStreamHandle for NullStreamHandle {
    fn format(&self) -> StreamFormat {
        self.format
    }
}

impl OutputBackend for NullBackend {
    fn is_available(&self) -> bool {
        true
    }

    fn probe(&self, _options: &ContextOptions) -> AudioResult<()> {
        Ok(())
    }

    fn open_stream(
        &self,
        options: &ContextOptions,
        _sources: SourceSet,
    ) -> AudioResult<Box<dyn OutputStreamHandle>> {
        Ok(Box::new(NullStreamHandle {
            format: StreamFormat {
                sample_rate: options.sample_rate,
                channels: options.channels,
            },
        }))
    }
}
