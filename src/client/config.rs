//! Live session configuration types.
//!
//! This module contains the session-negotiation payload sent in the setup
//! envelope, plus the endpoint constants:
//! - Endpoint URL and authentication query parameter
//! - Default model identifier
//! - Handshake timeout

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default WebSocket endpoint for the live streaming API.
pub const DEFAULT_LIVE_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Query parameter carrying the API key.
pub const API_KEY_PARAM: &str = "key";

/// Default model negotiated when none is configured explicitly.
pub const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.0-flash-exp";

/// How long `connect` waits for the server to acknowledge setup.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Session-negotiation payload.
///
/// Immutable once passed to `connect`; changing the configuration requires a
/// new connect cycle. `generation_config` and `system_instruction` are
/// opaque pass-through values forwarded to the endpoint unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Model identifier (e.g. "models/gemini-2.0-flash-exp").
    pub model: String,

    /// Generation options forwarded verbatim in the setup envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<serde_json::Value>,

    /// System instruction forwarded verbatim in the setup envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<serde_json::Value>,
}

impl LiveConfig {
    /// Create a configuration for the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            generation_config: None,
            system_instruction: None,
        }
    }

    /// Set the generation options.
    pub fn with_generation_config(mut self, config: serde_json::Value) -> Self {
        self.generation_config = Some(config);
        self
    }

    /// Set the system instruction.
    pub fn with_system_instruction(mut self, instruction: serde_json::Value) -> Self {
        self.system_instruction = Some(instruction);
        self
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LIVE_MODEL)
    }
}
