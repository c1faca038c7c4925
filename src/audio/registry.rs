//! Process-wide registry of shared audio output contexts.
//!
//! The registry caches one [`AudioContext`] per logical id for the life of
//! the process, so every session in the page shares a single hardware
//! output. Creation honors output gating: when the backend refuses the
//! silent-playback probe, `acquire` suspends until the embedding layer
//! reports a one-time user interaction through the [`ActivationHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::backend::{CpalBackend, OutputBackend, OutputStreamHandle};
use super::base::{AudioError, AudioResult, ContextOptions, SharedSource, SourceSet, StreamFormat};

// =============================================================================
// Activation Gate
// =============================================================================

/// One-shot gate armed when output creation is blocked.
struct ActivationGate {
    activated: AtomicBool,
    notify: Notify,
}

impl ActivationGate {
    fn new() -> Self {
        Self {
            activated: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn signal(&self) {
        if !self.activated.swap(true, Ordering::Release) {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        while !self.activated.load(Ordering::Acquire) {
            let notified = self.notify.notified();
            if self.activated.load(Ordering::Acquire) {
                break;
            }
            notified.await;
        }
    }
}

/// Handle for reporting the one-time user interaction that unblocks gated
/// audio output. Cloneable; signalling twice is harmless.
#[derive(Clone)]
pub struct ActivationHandle {
    gate: Arc<ActivationGate>,
}

impl ActivationHandle {
    /// Report that a user interaction (pointer-down / key-down equivalent)
    /// has been observed.
    pub fn signal(&self) {
        self.gate.signal();
    }
}

// =============================================================================
// Audio Context
// =============================================================================

/// A shared hardware output resource.
///
/// The context owns the mixing stream; playback sources (streamers) register
/// themselves and the stream starts lazily with the first one. Lifetime is
/// the registry entry's lifetime, not any single consumer's.
pub struct AudioContext {
    options: ContextOptions,
    backend: Arc<dyn OutputBackend>,
    sources: SourceSet,
    stream: Mutex<Option<Box<dyn OutputStreamHandle>>>,
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("options", &self.options)
            .field("source_count", &self.sources.lock().len())
            .field("started", &self.stream.lock().is_some())
            .finish()
    }
}

impl AudioContext {
    fn new(options: ContextOptions, backend: Arc<dyn OutputBackend>) -> Self {
        Self {
            options,
            backend,
            sources: Arc::new(Mutex::new(Vec::new())),
            stream: Mutex::new(None),
        }
    }

    /// The logical id the context is cached under, if any.
    pub fn id(&self) -> Option<&str> {
        self.options.id.as_deref()
    }

    /// Format of the running stream, or the requested options before start.
    pub fn format(&self) -> StreamFormat {
        self.stream
            .lock()
            .as_ref()
            .map(|s| s.format())
            .unwrap_or(StreamFormat {
                sample_rate: self.options.sample_rate,
                channels: self.options.channels,
            })
    }

    /// Register a playback source, starting the output stream if needed.
    /// Registering the same source twice is a no-op.
    pub(crate) fn register_source(&self, source: SharedSource) -> AudioResult<()> {
        {
            let mut sources = self.sources.lock();
            if sources.iter().any(|s| Arc::ptr_eq(s, &source)) {
                return Ok(());
            }
            sources.push(source);
        }
        let mut stream = self.stream.lock();
        if stream.is_none() {
            *stream = Some(
                self.backend
                    .open_stream(&self.options, self.sources.clone())?,
            );
        }
        Ok(())
    }

    /// Number of registered playback sources.
    pub fn source_count(&self) -> usize {
        self.sources.lock().len()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry handing out at most one [`AudioContext`] per id.
///
/// Explicitly constructible (no module-level singleton) so tests run a fresh
/// registry with an injected backend per case; production code typically
/// creates one with [`AudioOutputRegistry::new`] and shares it.
pub struct AudioOutputRegistry {
    backend: Arc<dyn OutputBackend>,
    contexts: Mutex<HashMap<String, Arc<AudioContext>>>,
    gate: Arc<ActivationGate>,
}

impl AudioOutputRegistry {
    /// Registry over the default hardware backend.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(CpalBackend::new()))
    }

    /// Registry over an injected backend.
    pub fn with_backend(backend: Arc<dyn OutputBackend>) -> Self {
        Self {
            backend,
            contexts: Mutex::new(HashMap::new()),
            gate: Arc::new(ActivationGate::new()),
        }
    }

    /// Handle the embedding layer uses to report the first user interaction.
    pub fn activation(&self) -> ActivationHandle {
        ActivationHandle {
            gate: self.gate.clone(),
        }
    }

    /// Acquire the shared context for `options`.
    ///
    /// If `options.id` names a cached context, that context is returned
    /// unconditionally and the remaining options are ignored
    /// (first-writer-wins). Otherwise creation is probed; a gated backend
    /// suspends this call until [`ActivationHandle::signal`] is observed.
    ///
    /// Fails with [`AudioError::Environment`] when the process has no audio
    /// output at all.
    pub async fn acquire(&self, options: ContextOptions) -> AudioResult<Arc<AudioContext>> {
        if let Some(existing) = self.lookup(options.id.as_deref()) {
            return Ok(existing);
        }

        if !self.backend.is_available() {
            return Err(AudioError::Environment);
        }

        match self.backend.probe(&options) {
            Ok(()) => {}
            Err(AudioError::ProbeBlocked) => {
                tracing::info!("audio output gated, waiting for user activation");
                self.gate.wait().await;
                // Another waiter may have created the context meanwhile.
                if let Some(existing) = self.lookup(options.id.as_deref()) {
                    return Ok(existing);
                }
            }
            Err(e) => return Err(e),
        }

        let mut contexts = self.contexts.lock();
        if let Some(id) = options.id.as_deref() {
            // Double-check under the map lock: never two contexts per id.
            if let Some(existing) = contexts.get(id) {
                return Ok(existing.clone());
            }
        }
        let context = Arc::new(AudioContext::new(options.clone(), self.backend.clone()));
        if let Some(id) = options.id {
            contexts.insert(id, context.clone());
        }
        Ok(context)
    }

    fn lookup(&self, id: Option<&str>) -> Option<Arc<AudioContext>> {
        id.and_then(|id| self.contexts.lock().get(id).cloned())
    }
}

impl Default for AudioOutputRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::NullBackend;
    use std::time::Duration;

    /// Backend whose probe stays blocked until released.
    struct GatedBackend {
        blocked: AtomicBool,
        inner: NullBackend,
    }

    impl GatedBackend {
        fn new() -> Self {
            Self {
                blocked: AtomicBool::new(true),
                inner: NullBackend::new(),
            }
        }
    }

    impl OutputBackend for GatedBackend {
        fn is_available(&self) -> bool {
            true
        }

        fn probe(&self, _options: &ContextOptions) -> AudioResult<()> {
            if self.blocked.load(Ordering::SeqCst) {
                Err(AudioError::ProbeBlocked)
            } else {
                Ok(())
            }
        }

        fn open_stream(
            &self,
            options: &ContextOptions,
            sources: SourceSet,
        ) -> AudioResult<Box<dyn OutputStreamHandle>> {
            self.inner.open_stream(options, sources)
        }
    }

    /// Backend reporting no environment at all.
    struct HeadlessBackend;

    impl OutputBackend for HeadlessBackend {
        fn is_available(&self) -> bool {
            false
        }

        fn probe(&self, _options: &ContextOptions) -> AudioResult<()> {
            Err(AudioError::Environment)
        }

        fn open_stream(
            &self,
            _options: &ContextOptions,
            _sources: SourceSet,
        ) -> AudioResult<Box<dyn OutputStreamHandle>> {
            Err(AudioError::Environment)
        }
    }

    #[tokio::test]
    async fn test_same_id_returns_identical_context() {
        let registry = AudioOutputRegistry::with_backend(Arc::new(NullBackend::new()));

        let first = registry
            .acquire(ContextOptions::with_id("audio-out"))
            .await
            .unwrap();
        // Different options on the second call are ignored
        let second = registry
            .acquire(ContextOptions {
                id: Some("audio-out".to_string()),
                sample_rate: 48000,
                channels: 2,
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.format().sample_rate, 24000);
    }

    #[tokio::test]
    async fn test_anonymous_contexts_are_not_shared() {
        let registry = AudioOutputRegistry::with_backend(Arc::new(NullBackend::new()));
        let first = registry.acquire(ContextOptions::default()).await.unwrap();
        let second = registry.acquire(ContextOptions::default()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_headless_environment_errors() {
        let registry = AudioOutputRegistry::with_backend(Arc::new(HeadlessBackend));
        let err = registry
            .acquire(ContextOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AudioError::Environment));
    }

    #[tokio::test]
    async fn test_gated_acquire_waits_for_activation() {
        let backend = Arc::new(GatedBackend::new());
        let registry = Arc::new(AudioOutputRegistry::with_backend(backend.clone()));
        let activation = registry.activation();

        let acquiring = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.acquire(ContextOptions::with_id("gated")).await })
        };

        // Still gated: the acquire must not resolve yet
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!acquiring.is_finished());

        backend.blocked.store(false, Ordering::SeqCst);
        activation.signal();

        let context = tokio::time::timeout(Duration::from_secs(1), acquiring)
            .await
            .expect("acquire did not resolve after activation")
            .unwrap()
            .unwrap();
        assert_eq!(context.id(), Some("gated"));
    }

    #[tokio::test]
    async fn test_activation_signal_is_idempotent() {
        let registry = AudioOutputRegistry::with_backend(Arc::new(NullBackend::new()));
        let activation = registry.activation();
        activation.signal();
        activation.signal();
        // An already-activated gate must not break unblocked acquires
        assert!(registry.acquire(ContextOptions::default()).await.is_ok());
    }
}
