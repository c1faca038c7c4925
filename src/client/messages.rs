//! Wire envelope types for the live streaming protocol.
//!
//! Every frame is a JSON object with a `type` discriminator:
//!
//! Client envelopes (sent to server):
//! - setup - Session negotiation, built from [`LiveConfig`]
//! - clientContent - Text turns from the user
//! - audioChunk - Base64 PCM audio from the user
//! - close - Orderly local teardown
//!
//! Server envelopes (received from server):
//! - setup - Acknowledgment that negotiation completed
//! - audioChunk - Base64 PCM audio from the assistant
//! - interrupted - The prior assistant turn was cut off by new user input
//! - close - Orderly remote teardown
//! - error - Server-side fault, non-fatal for the connection
//!
//! A single socket frame may carry one envelope or several newline-delimited
//! envelopes; [`parse_frames`] handles both. Malformed envelopes surface as
//! per-envelope parse errors so the caller can drop them without tearing
//! down the connection.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::LiveConfig;
use crate::types::LIVE_SAMPLE_RATE;

// =============================================================================
// Client Envelopes (sent to server)
// =============================================================================

/// Client envelopes sent to the live endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEnvelope {
    /// Session negotiation payload
    #[serde(rename_all = "camelCase")]
    Setup {
        /// Model identifier
        model: String,
        /// Generation options, forwarded verbatim
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation_config: Option<serde_json::Value>,
        /// System instruction, forwarded verbatim
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_instruction: Option<serde_json::Value>,
    },

    /// User content turns
    #[serde(rename_all = "camelCase")]
    ClientContent {
        /// Conversation turns
        turns: Vec<ContentTurn>,
        /// Whether the user turn is complete
        turn_complete: bool,
    },

    /// User audio
    #[serde(rename_all = "camelCase")]
    AudioChunk {
        /// Base64-encoded PCM 16-bit little-endian payload
        data: String,
        /// Sample rate of the payload in Hz
        sample_rate: u32,
    },

    /// Orderly local teardown
    Close {},
}

/// One conversation turn inside a clientContent envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentTurn {
    /// Speaker role ("user")
    pub role: String,
    /// Turn text
    pub text: String,
}

impl ClientEnvelope {
    /// Build the setup envelope from a session configuration.
    pub fn setup(config: &LiveConfig) -> Self {
        ClientEnvelope::Setup {
            model: config.model.clone(),
            generation_config: config.generation_config.clone(),
            system_instruction: config.system_instruction.clone(),
        }
    }

    /// Build a single-turn user text envelope.
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientEnvelope::ClientContent {
            turns: vec![ContentTurn {
                role: "user".to_string(),
                text: text.into(),
            }],
            turn_complete: true,
        }
    }

    /// Build an audio envelope from raw PCM bytes.
    pub fn audio(data: &[u8], sample_rate: u32) -> Self {
        ClientEnvelope::AudioChunk {
            data: BASE64_STANDARD.encode(data),
            sample_rate,
        }
    }
}

// =============================================================================
// Server Envelopes (received from server)
// =============================================================================

/// Server envelopes received from the live endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEnvelope {
    /// Setup acknowledgment; negotiation is complete
    #[serde(rename_all = "camelCase")]
    Setup {
        /// Session identifier assigned by the server, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Assistant audio
    #[serde(rename_all = "camelCase")]
    AudioChunk {
        /// Base64-encoded PCM 16-bit little-endian payload
        data: String,
        /// Sample rate of the payload in Hz
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
    },

    /// The prior assistant turn was cut off by new user input
    Interrupted {},

    /// Orderly remote teardown
    Close {},

    /// Server-side fault
    Error {
        /// Human-readable description
        message: String,
    },
}

fn default_sample_rate() -> u32 {
    LIVE_SAMPLE_RATE
}

/// Decode a base64 PCM payload back to raw bytes.
pub fn decode_audio_payload(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_STANDARD.decode(data)
}

/// Parse one socket frame into envelopes.
///
/// Frames carry either a single JSON envelope or several envelopes separated
/// by newlines. Each line parses independently; a malformed line yields an
/// `Err` entry without affecting its neighbors.
pub fn parse_frames(frame: &str) -> Vec<Result<ServerEnvelope, serde_json::Error>> {
    frame
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str::<ServerEnvelope>)
        .collect()
}
