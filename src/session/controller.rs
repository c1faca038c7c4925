//! Session controller: the single object the UI boundary talks to.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::audio::{
    ActivationHandle, AudioError, AudioOutputRegistry, AudioStreamer, ContextOptions,
    VolMeterWorklet, WorkletMessage,
};
use crate::client::{ClientError, ClientOptions, LiveClient, LiveConfig};
use crate::events::{EventKind, LiveEvent, Subscription};

/// Quiet window after the last audio event before `responding` clears.
pub const RESPONDING_QUIET_WINDOW: Duration = Duration::from_millis(300);

/// Logical id of the shared output context used by all sessions.
pub const AUDIO_CONTEXT_ID: &str = "audio-out";

// =============================================================================
// Error Types
// =============================================================================

/// Errors surfaced to the UI boundary.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `connect` was called before any config was set
    #[error("config has not been set")]
    ConfigMissing,

    /// Protocol client failure
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Audio pipeline failure
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Options
// =============================================================================

/// Deployment configuration for a session controller.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Live endpoint URL.
    pub url: String,
    /// API key passed to the client at construction.
    pub api_key: String,
}

impl SessionOptions {
    /// Options for the given endpoint and key.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

type TimerSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Composes the protocol client, the audio registry, and the streamer into
/// connect/disconnect/configure semantics with observable UI state.
///
/// Observable state is exposed as `tokio::sync::watch` channels: `connected`
/// (handshake state), `volume` (latest meter sample in [0, 1]) and
/// `responding` (audio arrived within the quiet window, approximating "the
/// assistant is speaking"). The UI boundary subscribes or polls snapshots;
/// no reactive framework is required.
pub struct SessionController {
    options: SessionOptions,
    registry: Arc<AudioOutputRegistry>,
    config: Mutex<Option<LiveConfig>>,
    client: Mutex<Option<Arc<LiveClient>>>,
    streamer: Mutex<Option<Arc<AudioStreamer>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    connected_tx: Arc<watch::Sender<bool>>,
    volume_tx: Arc<watch::Sender<f32>>,
    responding_tx: Arc<watch::Sender<bool>>,
    quiet_timer: TimerSlot,
}

impl SessionController {
    /// Controller over the default hardware audio registry.
    pub fn new(options: SessionOptions) -> Self {
        Self::with_registry(options, Arc::new(AudioOutputRegistry::new()))
    }

    /// Controller over an injected registry (shared across sessions, or a
    /// test registry with a mock backend).
    pub fn with_registry(options: SessionOptions, registry: Arc<AudioOutputRegistry>) -> Self {
        let (connected_tx, _) = watch::channel(false);
        let (volume_tx, _) = watch::channel(0.0f32);
        let (responding_tx, _) = watch::channel(false);
        Self {
            options,
            registry,
            config: Mutex::new(None),
            client: Mutex::new(None),
            streamer: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            connected_tx: Arc::new(connected_tx),
            volume_tx: Arc::new(volume_tx),
            responding_tx: Arc::new(responding_tx),
            quiet_timer: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the pending config. Has no effect on an already-open session;
    /// the new config applies from the next `connect`.
    pub fn set_config(&self, config: LiveConfig) {
        *self.config.lock() = Some(config);
    }

    /// The pending config, if any.
    pub fn config(&self) -> Option<LiveConfig> {
        self.config.lock().clone()
    }

    /// Connect a new session with the pending config.
    ///
    /// Tears down any prior session, lazily acquires the shared audio
    /// context and streamer (installing the volume meter), wires the event
    /// routes, and performs the handshake. On success `connected` flips
    /// true; on any failure it stays false.
    pub async fn connect(&self) -> SessionResult<()> {
        let config = self
            .config
            .lock()
            .clone()
            .ok_or(SessionError::ConfigMissing)?;

        self.teardown_session();

        let streamer = self.ensure_audio().await?;
        let client = self.ensure_client();

        let routes = {
            let streamer_audio = streamer.clone();
            let responding = self.responding_tx.clone();
            let timer = self.quiet_timer.clone();
            let audio = client.on(EventKind::Audio, move |event| {
                if let LiveEvent::Audio(chunk) = event {
                    if let Err(e) = streamer_audio.enqueue(chunk) {
                        tracing::warn!("dropping audio chunk: {e}");
                    }
                    mark_responding(&responding, &timer);
                }
            });

            let streamer_stop = streamer.clone();
            let responding = self.responding_tx.clone();
            let timer = self.quiet_timer.clone();
            let interrupted = client.on(EventKind::Interrupted, move |_| {
                streamer_stop.stop();
                clear_responding(&responding, &timer);
            });

            let connected = self.connected_tx.clone();
            let responding = self.responding_tx.clone();
            let timer = self.quiet_timer.clone();
            let close = client.on(EventKind::Close, move |_| {
                connected.send_replace(false);
                clear_responding(&responding, &timer);
            });

            [audio, interrupted, close]
        };
        self.subscriptions.lock().extend(routes);

        client.connect(&config).await?;
        self.connected_tx.send_replace(true);
        Ok(())
    }

    /// Tear down the socket and mark the session disconnected.
    ///
    /// The audio context is deliberately left alive: it is process-wide and
    /// reused by later sessions.
    pub fn disconnect(&self) {
        self.teardown_session();
    }

    /// Observable handshake state.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    /// Snapshot of the handshake state.
    pub fn is_connected(&self) -> bool {
        *self.connected_tx.subscribe().borrow()
    }

    /// Observable output volume in [0, 1].
    pub fn volume(&self) -> watch::Receiver<f32> {
        self.volume_tx.subscribe()
    }

    /// Snapshot of the output volume.
    pub fn current_volume(&self) -> f32 {
        *self.volume_tx.subscribe().borrow()
    }

    /// Observable "assistant is speaking" flag.
    pub fn responding(&self) -> watch::Receiver<bool> {
        self.responding_tx.subscribe()
    }

    /// Snapshot of the responding flag.
    pub fn is_responding(&self) -> bool {
        *self.responding_tx.subscribe().borrow()
    }

    /// Handle for reporting the first user interaction when audio output is
    /// gated.
    pub fn activation(&self) -> ActivationHandle {
        self.registry.activation()
    }

    /// The underlying protocol client, once constructed.
    pub fn client(&self) -> Option<Arc<LiveClient>> {
        self.client.lock().clone()
    }

    /// The playback streamer, once the audio pipeline is up.
    pub fn streamer(&self) -> Option<Arc<AudioStreamer>> {
        self.streamer.lock().clone()
    }

    fn teardown_session(&self) {
        if let Some(client) = self.client.lock().clone() {
            client.disconnect();
            for subscription in self.subscriptions.lock().drain(..) {
                client.off(subscription);
            }
        }
        self.connected_tx.send_replace(false);
        clear_responding(&self.responding_tx, &self.quiet_timer);
    }

    async fn ensure_audio(&self) -> SessionResult<Arc<AudioStreamer>> {
        if let Some(existing) = self.streamer.lock().clone() {
            return Ok(existing);
        }
        let context = self
            .registry
            .acquire(ContextOptions::with_id(AUDIO_CONTEXT_ID))
            .await?;

        let mut slot = self.streamer.lock();
        if let Some(existing) = slot.clone() {
            return Ok(existing);
        }
        let streamer = Arc::new(AudioStreamer::new());
        streamer.attach(&context)?;
        let volume = self.volume_tx.clone();
        streamer.add_worklet("vumeter-out", VolMeterWorklet::new(), move |message| {
            match message {
                WorkletMessage::Volume(value) => {
                    volume.send_replace(value);
                }
            }
        })?;
        *slot = Some(streamer.clone());
        Ok(streamer)
    }

    fn ensure_client(&self) -> Arc<LiveClient> {
        let mut slot = self.client.lock();
        if let Some(existing) = slot.clone() {
            return existing;
        }
        let client = Arc::new(LiveClient::new(ClientOptions::new(
            &self.options.url,
            &self.options.api_key,
        )));
        *slot = Some(client.clone());
        client
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(handle) = self.quiet_timer.lock().take() {
            handle.abort();
        }
    }
}

/// Flip `responding` true and restart the quiet-window timer. The previous
/// timer is aborted, never stacked, so only the most recent one is live.
fn mark_responding(responding: &Arc<watch::Sender<bool>>, timer: &TimerSlot) {
    responding.send_replace(true);
    let mut slot = timer.lock();
    if let Some(previous) = slot.take() {
        previous.abort();
    }
    let responding = responding.clone();
    *slot = Some(tokio::spawn(async move {
        tokio::time::sleep(RESPONDING_QUIET_WINDOW).await;
        responding.send_replace(false);
    }));
}

/// Force `responding` false and cancel any pending quiet-window timer.
fn clear_responding(responding: &Arc<watch::Sender<bool>>, timer: &TimerSlot) {
    if let Some(previous) = timer.lock().take() {
        previous.abort();
    }
    responding.send_replace(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullBackend;

    fn test_controller() -> SessionController {
        SessionController::with_registry(
            SessionOptions::new("wss://example.invalid/live", "test_key"),
            Arc::new(AudioOutputRegistry::with_backend(Arc::new(
                NullBackend::new(),
            ))),
        )
    }

    #[tokio::test]
    async fn test_connect_without_config_fails() {
        let controller = test_controller();
        let err = controller.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::ConfigMissing));
        assert!(!controller.is_connected());
    }

    #[tokio::test]
    async fn test_set_config_replaces_pending() {
        let controller = test_controller();
        assert!(controller.config().is_none());

        controller.set_config(LiveConfig::new("models/x"));
        controller.set_config(LiveConfig::new("models/y"));
        assert_eq!(controller.config().unwrap().model, "models/y");
    }

    #[tokio::test]
    async fn test_disconnect_is_safe_before_connect() {
        let controller = test_controller();
        controller.disconnect();
        assert!(!controller.is_connected());
        assert!(!controller.is_responding());
    }

    #[tokio::test(start_paused = true)]
    async fn test_responding_clears_after_quiet_window() {
        let (tx, rx) = watch::channel(false);
        let responding = Arc::new(tx);
        let timer: TimerSlot = Arc::new(Mutex::new(None));

        mark_responding(&responding, &timer);
        assert!(*rx.borrow());

        tokio::time::sleep(RESPONDING_QUIET_WINDOW + Duration::from_millis(10)).await;
        assert!(!*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_responding_timer_resets_without_flicker() {
        let (tx, rx) = watch::channel(false);
        let responding = Arc::new(tx);
        let timer: TimerSlot = Arc::new(Mutex::new(None));

        // Two audio events 100ms apart, window 300ms: continuously true
        mark_responding(&responding, &timer);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(*rx.borrow());
        mark_responding(&responding, &timer);

        // 250ms after the second event: the first timer would have expired,
        // but it was reset, so the flag holds
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(*rx.borrow());

        // 350ms after the second event the window has elapsed
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_responding_cancels_pending_timer() {
        let (tx, rx) = watch::channel(false);
        let responding = Arc::new(tx);
        let timer: TimerSlot = Arc::new(Mutex::new(None));

        mark_responding(&responding, &timer);
        clear_responding(&responding, &timer);
        assert!(!*rx.borrow());
        assert!(timer.lock().is_none());
    }
}
