//! Session orchestration module.
//!
//! [`SessionController`] is the only component the UI boundary talks to. It
//! composes the protocol client, the audio-output registry, and the playback
//! streamer into connect/disconnect/configure semantics and derives the
//! observable state the UI renders: `connected`, `volume`, and `responding`.
//!
//! # Example
//!
//! ```rust,ignore
//! use multimodal_live::session::{SessionController, SessionOptions};
//! use multimodal_live::client::LiveConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = SessionController::new(SessionOptions::new(
//!         "wss://example.com/live",
//!         std::env::var("LIVE_API_KEY")?,
//!     ));
//!
//!     controller.set_config(LiveConfig::default());
//!     controller.connect().await?;
//!
//!     let mut responding = controller.responding();
//!     while responding.changed().await.is_ok() {
//!         println!("assistant speaking: {}", *responding.borrow());
//!     }
//!     Ok(())
//! }
//! ```

mod controller;

pub use controller::{
    AUDIO_CONTEXT_ID, RESPONDING_QUIET_WINDOW, SessionController, SessionError, SessionOptions,
    SessionResult,
};
