//! Typed publish/subscribe event bus for the protocol client.
//!
//! Handlers are registered per event kind and invoked in insertion order.
//! `subscribe` returns an opaque [`Subscription`] token; tokens revoke one
//! handler each, so independent consumers never interfere with each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::AudioChunk;

/// Why the connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by a local `disconnect` call.
    Local,
    /// Closed by the server.
    Server,
    /// Closed by a transport fault.
    Transport,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Local => write!(f, "local"),
            CloseReason::Server => write!(f, "server"),
            CloseReason::Transport => write!(f, "transport"),
        }
    }
}

/// Events emitted by the protocol client.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Handshake complete; the session is streaming.
    Open,
    /// A decoded PCM chunk extracted from a server frame.
    Audio(AudioChunk),
    /// The server cut off the assistant turn; playback must stop now.
    Interrupted,
    /// The socket closed. Exactly one `Close` is emitted per connection,
    /// whatever the cause.
    Close(CloseReason),
    /// Non-fatal transport-level fault (malformed frame, server error).
    Error(String),
}

impl LiveEvent {
    /// The kind used for subscription routing.
    pub fn kind(&self) -> EventKind {
        match self {
            LiveEvent::Open => EventKind::Open,
            LiveEvent::Audio(_) => EventKind::Audio,
            LiveEvent::Interrupted => EventKind::Interrupted,
            LiveEvent::Close(_) => EventKind::Close,
            LiveEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Subscription routing key, one per [`LiveEvent`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Handshake complete.
    Open,
    /// Audio chunk arrived.
    Audio,
    /// Assistant turn cut off.
    Interrupted,
    /// Socket closed.
    Close,
    /// Transport fault.
    Error,
}

/// Handler invoked for each matching event.
pub type EventHandler = Arc<dyn Fn(&LiveEvent) + Send + Sync>;

/// Opaque revocation token returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// The event kind this subscription listens to.
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// Event bus mapping event kinds to ordered handler lists.
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<(u64, EventHandler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a handler for `kind`. Handlers fire in subscription order.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, handler));
        Subscription { kind, id }
    }

    /// Convenience wrapper accepting a closure.
    pub fn subscribe_fn<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(handler))
    }

    /// Remove one handler. Returns false if the token was already revoked.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut handlers = self.handlers.lock();
        match handlers.get_mut(&subscription.kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|(id, _)| *id != subscription.id);
                list.len() != before
            }
            None => false,
        }
    }

    /// Invoke every handler registered for the event's kind.
    ///
    /// Handlers run outside the bus lock, so they may subscribe/unsubscribe;
    /// such changes take effect from the next emission.
    pub fn emit(&self, event: &LiveEvent) {
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.lock();
            match handlers.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };
        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of live handlers for a kind.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
