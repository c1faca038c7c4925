//! Live streaming protocol client module.
//!
//! This module owns the persistent socket to the live endpoint and exposes
//! the wire protocol as a typed event source.
//!
//! # Protocol Overview
//!
//! One WebSocket per session. Frames are JSON envelopes with a `type`
//! discriminator; audio rides inside envelopes as base64-encoded PCM 16-bit
//! little-endian samples. The session starts with a `setup` envelope built
//! from [`LiveConfig`] and begins streaming once the server acknowledges it.
//!
//! # Example
//!
//! ```rust,ignore
//! use multimodal_live::client::{ClientOptions, LiveClient, LiveConfig};
//! use multimodal_live::events::{EventKind, LiveEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = LiveClient::new(ClientOptions::new(
//!         "wss://example.com/live",
//!         std::env::var("LIVE_API_KEY").unwrap(),
//!     ));
//!
//!     client.on(EventKind::Audio, |event| {
//!         if let LiveEvent::Audio(chunk) = event {
//!             // Route the chunk into playback
//!             println!("{} bytes at {} Hz", chunk.data.len(), chunk.sample_rate);
//!         }
//!     });
//!
//!     client.connect(&LiveConfig::default()).await.unwrap();
//!     client.send_text("Hello!").await.unwrap();
//! }
//! ```

mod base;
#[allow(clippy::module_inception)]
mod client;
mod config;
mod messages;

pub use base::{ClientError, ClientOptions, ClientResult, ClientState};
pub use client::LiveClient;
pub use config::{
    API_KEY_PARAM, DEFAULT_LIVE_MODEL, DEFAULT_LIVE_URL, HANDSHAKE_TIMEOUT, LiveConfig,
};
pub use messages::{
    ClientEnvelope, ContentTurn, ServerEnvelope, decode_audio_payload, parse_frames,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_defaults() {
        let client = LiveClient::new(ClientOptions::new(DEFAULT_LIVE_URL, "test_key"));
        assert_eq!(client.state(), ClientState::Idle);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_default_model_is_live_capable() {
        assert!(DEFAULT_LIVE_MODEL.starts_with("models/"));
        assert_eq!(LiveConfig::default().model, DEFAULT_LIVE_MODEL);
    }
}
