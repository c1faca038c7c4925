//! Base types for the protocol client.

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during protocol client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint URL could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Connection to the endpoint failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Setup was not acknowledged within the timeout, or was rejected
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Send attempted while the socket is not open
    #[error("Not connected")]
    NotConnected,

    /// A client envelope could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for protocol client operations.
pub type ClientResult<T> = Result<T, ClientError>;

// =============================================================================
// Connection State
// =============================================================================

/// Internal connection state of one client instance.
///
/// `Closed` is terminal for a given connection; a new `connect` call starts
/// the machine over from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// No connection attempt yet
    #[default]
    Idle,
    /// Socket open, waiting for the setup acknowledgment
    Handshaking,
    /// Handshake acknowledged, streaming
    Open,
    /// Socket closed
    Closed,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Idle => write!(f, "Idle"),
            ClientState::Handshaking => write!(f, "Handshaking"),
            ClientState::Open => write!(f, "Open"),
            ClientState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Client Options
// =============================================================================

/// Transport configuration injected at client construction.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// WebSocket endpoint URL.
    pub url: String,
    /// API key, sent as a query parameter.
    pub api_key: String,
}

impl ClientOptions {
    /// Create options for the given endpoint and key.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}
