//! Live streaming protocol client.
//!
//! Owns the persistent WebSocket and exposes the wire protocol as a typed
//! event source: `open`, `audio`, `interrupted`, `close`, `error`.
//!
//! # Connection Lifecycle
//!
//! `connect` performs the setup handshake inline: it opens the socket,
//! sends the setup envelope built from [`LiveConfig`], and resolves only
//! once the server acknowledges it (or fails with
//! [`ClientError::Handshake`] on timeout/rejection). The frame pump is
//! spawned after acknowledgment, so no event is observable before `Open`.
//!
//! Every way a connection can end (server close, transport fault, local
//! `disconnect`) is normalized to exactly one `Close` event. The client
//! performs no automatic reconnection; retry policy belongs to the caller,
//! which sees truthful connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::base::{ClientError, ClientOptions, ClientResult, ClientState};
use super::config::{API_KEY_PARAM, HANDSHAKE_TIMEOUT, LiveConfig};
use super::messages::{ClientEnvelope, ServerEnvelope, decode_audio_payload, parse_frames};
use crate::events::{CloseReason, EventBus, EventHandler, EventKind, LiveEvent, Subscription};
use crate::types::AudioChunk;

/// Channel capacity for outbound envelopes.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Protocol client for one live streaming session at a time.
///
/// The socket is exclusively owned by the client; calling `connect` while a
/// connection is open first performs an implicit `disconnect`, so two live
/// sockets never race to deliver events.
pub struct LiveClient {
    options: ClientOptions,
    events: Arc<EventBus>,
    state: Arc<Mutex<ClientState>>,
    /// Connected flag shared with the pump task for lock-free checks.
    connected: Arc<AtomicBool>,
    /// Outbound envelope channel; `None` whenever the socket is not open.
    sender: Arc<Mutex<Option<mpsc::Sender<ClientEnvelope>>>>,
    /// Frame pump task handle.
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Serializes connection attempts; only one may be in flight.
    connect_guard: tokio::sync::Mutex<()>,
    /// Arrival-order stamp for inbound audio chunks.
    sequence: Arc<AtomicU64>,
}

impl LiveClient {
    /// Create a client for the given endpoint. No I/O happens until
    /// `connect`.
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            events: Arc::new(EventBus::new()),
            state: Arc::new(Mutex::new(ClientState::Idle)),
            connected: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(None)),
            pump: Mutex::new(None),
            connect_guard: tokio::sync::Mutex::new(()),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The event bus carrying `open`/`audio`/`interrupted`/`close`/`error`.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Subscribe a handler; shorthand for `events().subscribe_fn`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, Arc::new(handler) as EventHandler)
    }

    /// Revoke a subscription; shorthand for `events().unsubscribe`.
    pub fn off(&self, subscription: Subscription) -> bool {
        self.events.unsubscribe(subscription)
    }

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    /// Whether the handshake completed and the socket is open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the socket, negotiate the session, and start streaming.
    ///
    /// Resolves once the server has acknowledged setup. Rejects with
    /// [`ClientError::Handshake`] if the acknowledgment does not arrive
    /// within [`HANDSHAKE_TIMEOUT`] or the server refuses the session.
    pub async fn connect(&self, config: &LiveConfig) -> ClientResult<()> {
        let _guard = self.connect_guard.lock().await;

        // A prior session must be fully closed before the next socket opens.
        self.disconnect();

        let url = self.build_url()?;
        let setup = serde_json::to_string(&ClientEnvelope::setup(config))
            .map_err(|e| ClientError::Serialization(e.to_string()))?;

        *self.state.lock() = ClientState::Handshaking;
        self.sequence.store(0, Ordering::Relaxed);

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| {
                *self.state.lock() = ClientState::Closed;
                ClientError::ConnectionFailed(e.to_string())
            })?;
        tracing::info!("connected to live endpoint, negotiating session");

        let (mut sink, mut stream) = ws.split();

        if let Err(e) = sink.send(Message::Text(setup.into())).await {
            *self.state.lock() = ClientState::Closed;
            return Err(ClientError::ConnectionFailed(e.to_string()));
        }

        if let Err(e) = await_setup_ack(&mut stream).await {
            *self.state.lock() = ClientState::Closed;
            return Err(e);
        }
        tracing::info!(model = %config.model, "live session negotiated");

        let (tx, rx) = mpsc::channel::<ClientEnvelope>(OUTBOUND_CHANNEL_CAPACITY);
        *self.sender.lock() = Some(tx);
        *self.state.lock() = ClientState::Open;
        self.connected.store(true, Ordering::SeqCst);
        self.events.emit(&LiveEvent::Open);

        let events = self.events.clone();
        let connected = self.connected.clone();
        let state = self.state.clone();
        let sender = self.sender.clone();
        let sequence = self.sequence.clone();
        let handle = tokio::spawn(async move {
            run_pump(sink, stream, rx, events, connected, state, sender, sequence).await;
        });
        *self.pump.lock() = Some(handle);

        Ok(())
    }

    /// Close the socket if open. Synchronous, idempotent, never errs.
    ///
    /// Emits the normalized `Close` event when a connection was actually
    /// torn down; calling it while disconnected is a no-op.
    pub fn disconnect(&self) {
        let sender = self.sender.lock().take();
        let pump = self.pump.lock().take();
        drop(sender);
        if let Some(handle) = pump {
            handle.abort();
        }
        *self.state.lock() = ClientState::Closed;
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("disconnected from live endpoint");
            self.events.emit(&LiveEvent::Close(CloseReason::Local));
        }
    }

    /// Serialize and transmit a client envelope.
    pub async fn send(&self, envelope: ClientEnvelope) -> ClientResult<()> {
        let tx = self.sender.lock().clone().ok_or(ClientError::NotConnected)?;
        tx.send(envelope)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Send a user text turn.
    pub async fn send_text(&self, text: impl Into<String>) -> ClientResult<()> {
        self.send(ClientEnvelope::user_text(text)).await
    }

    /// Send raw PCM audio (16-bit little-endian).
    pub async fn send_audio(&self, data: &[u8], sample_rate: u32) -> ClientResult<()> {
        self.send(ClientEnvelope::audio(data, sample_rate)).await
    }

    fn build_url(&self) -> ClientResult<Url> {
        let mut url = Url::parse(&self.options.url)
            .map_err(|e| ClientError::InvalidEndpoint(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair(API_KEY_PARAM, &self.options.api_key);
        Ok(url)
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        // Abort the pump without emitting into handlers that may be gone.
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

/// Wait for the server's setup acknowledgment, bounded by the handshake
/// timeout. Audio before the ack would violate the protocol; it is dropped
/// with a warning rather than delivered out of state.
async fn await_setup_ack(stream: &mut WsSource) -> ClientResult<()> {
    let negotiation = async {
        while let Some(message) = stream.next().await {
            let frame = match message {
                Ok(Message::Text(text)) => text.as_str().to_string(),
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => text.to_string(),
                    Err(_) => {
                        tracing::warn!("dropping non-UTF-8 frame during handshake");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => {
                    return Err(ClientError::Handshake(
                        "socket closed during negotiation".to_string(),
                    ));
                }
                Ok(_) => continue,
                Err(e) => return Err(ClientError::Handshake(e.to_string())),
            };
            for parsed in parse_frames(&frame) {
                match parsed {
                    Ok(ServerEnvelope::Setup { session_id }) => {
                        if let Some(id) = session_id {
                            tracing::debug!(session_id = %id, "setup acknowledged");
                        }
                        return Ok(());
                    }
                    Ok(ServerEnvelope::Error { message }) => {
                        return Err(ClientError::Handshake(message));
                    }
                    Ok(ServerEnvelope::Close {}) => {
                        return Err(ClientError::Handshake(
                            "server closed during negotiation".to_string(),
                        ));
                    }
                    Ok(other) => {
                        tracing::warn!("dropping pre-ack envelope: {other:?}");
                    }
                    Err(e) => {
                        tracing::warn!("dropping malformed envelope during handshake: {e}");
                    }
                }
            }
        }
        Err(ClientError::Handshake(
            "socket ended during negotiation".to_string(),
        ))
    };

    tokio::time::timeout(HANDSHAKE_TIMEOUT, negotiation)
        .await
        .map_err(|_| ClientError::Handshake("setup not acknowledged within timeout".to_string()))?
}

/// Frame pump: forwards outbound envelopes and translates inbound frames
/// into events until the connection ends for any reason.
#[allow(clippy::too_many_arguments)]
async fn run_pump(
    mut sink: WsSink,
    mut stream: WsSource,
    mut rx: mpsc::Receiver<ClientEnvelope>,
    events: Arc<EventBus>,
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<ClientState>>,
    sender: Arc<Mutex<Option<mpsc::Sender<ClientEnvelope>>>>,
    sequence: Arc<AtomicU64>,
) {
    let reason = loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(envelope) => {
                    let json = match serde_json::to_string(&envelope) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("failed to serialize envelope: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        tracing::error!("failed to send frame: {e}");
                        events.emit(&LiveEvent::Error(e.to_string()));
                        break CloseReason::Transport;
                    }
                }
                None => {
                    // Local teardown: best-effort orderly close
                    let _ = sink.send(Message::Close(None)).await;
                    break CloseReason::Local;
                }
            },

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reason) = dispatch_frame(text.as_str(), &events, &sequence) {
                        break reason;
                    }
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        if let Some(reason) = dispatch_frame(text, &events, &sequence) {
                            break reason;
                        }
                    }
                    Err(_) => {
                        tracing::warn!("dropping non-UTF-8 binary frame ({} bytes)", data.len());
                        events.emit(&LiveEvent::Error("non-UTF-8 binary frame".to_string()));
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = sink.send(Message::Pong(payload)).await {
                        tracing::error!("failed to send pong: {e}");
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::info!("socket closed by server");
                    break CloseReason::Server;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("socket error: {e}");
                    events.emit(&LiveEvent::Error(e.to_string()));
                    break CloseReason::Transport;
                }
                None => break CloseReason::Transport,
            },
        }
    };

    *sender.lock() = None;
    *state.lock() = ClientState::Closed;
    if connected.swap(false, Ordering::SeqCst) {
        events.emit(&LiveEvent::Close(reason));
    }
    tracing::debug!("live connection task ended ({reason})");
}

/// Translate one socket frame into events. Returns the close reason when the
/// frame carried a close envelope.
fn dispatch_frame(
    frame: &str,
    events: &EventBus,
    sequence: &AtomicU64,
) -> Option<CloseReason> {
    for parsed in parse_frames(frame) {
        match parsed {
            Ok(ServerEnvelope::AudioChunk { data, sample_rate }) => {
                match decode_audio_payload(&data) {
                    Ok(bytes) => {
                        let seq = sequence.fetch_add(1, Ordering::Relaxed);
                        events.emit(&LiveEvent::Audio(AudioChunk::new(bytes, sample_rate, seq)));
                    }
                    Err(e) => {
                        tracing::warn!("dropping audio envelope with bad payload: {e}");
                        events.emit(&LiveEvent::Error(format!("bad audio payload: {e}")));
                    }
                }
            }
            Ok(ServerEnvelope::Interrupted {}) => {
                tracing::debug!("assistant turn interrupted");
                events.emit(&LiveEvent::Interrupted);
            }
            Ok(ServerEnvelope::Close {}) => return Some(CloseReason::Server),
            Ok(ServerEnvelope::Error { message }) => {
                tracing::warn!("server error: {message}");
                events.emit(&LiveEvent::Error(message));
            }
            Ok(ServerEnvelope::Setup { .. }) => {
                tracing::debug!("ignoring setup envelope after negotiation");
            }
            Err(e) => {
                tracing::warn!("dropping malformed envelope: {e}");
                events.emit(&LiveEvent::Error(format!("malformed envelope: {e}")));
            }
        }
    }
    None
}
