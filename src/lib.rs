//! Realtime bidirectional multimodal streaming client.
//!
//! This crate lets an application hold a realtime session with a cloud
//! generative-AI endpoint: it streams text and audio up one persistent
//! WebSocket and plays streamed PCM audio back with near-zero added
//! latency, while exposing connection and activity state to a UI layer.
//!
//! # Architecture
//!
//! - [`client`] - the protocol client owning the socket lifecycle, JSON
//!   envelope framing, and typed event emission
//! - [`audio`] - the playback pipeline: shared output contexts, gap-free
//!   chunk scheduling, and metering worklets on the render thread
//! - [`session`] - the controller composing both into
//!   connect/disconnect/configure semantics with observable UI state
//! - [`events`] - the typed publish/subscribe bus carrying client events
//!
//! # Example
//!
//! ```rust,ignore
//! use multimodal_live::{LiveConfig, SessionController, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = SessionController::new(SessionOptions::new(
//!         multimodal_live::client::DEFAULT_LIVE_URL,
//!         std::env::var("LIVE_API_KEY")?,
//!     ));
//!     controller.set_config(LiveConfig::default());
//!     controller.connect().await?;
//!     controller.client().unwrap().send_text("Hello!").await?;
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod client;
pub mod events;
pub mod session;
pub mod types;

// Re-export commonly used items for convenience
pub use audio::{AudioError, AudioOutputRegistry, AudioStreamer, ContextOptions};
pub use client::{ClientError, ClientOptions, LiveClient, LiveConfig};
pub use events::{CloseReason, EventBus, EventKind, LiveEvent, Subscription};
pub use session::{SessionController, SessionError, SessionOptions};
pub use types::{AudioChunk, LIVE_SAMPLE_RATE};
