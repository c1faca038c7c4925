//! End-to-end session tests against a scripted in-process endpoint.
//!
//! Each test runs a real WebSocket server on a loopback port that plays the
//! server side of the live protocol: reads the setup envelope, acknowledges
//! it, then streams whatever the scenario calls for. Audio output goes
//! through the null backend so the tests run headless.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use multimodal_live::audio::NullBackend;
use multimodal_live::client::{
    ClientEnvelope, ClientError, LiveConfig, ServerEnvelope,
};
use multimodal_live::events::EventKind;
use multimodal_live::session::{SessionController, SessionError, SessionOptions};
use multimodal_live::{AudioOutputRegistry, LIVE_SAMPLE_RATE};

fn envelope_text(envelope: &ServerEnvelope) -> String {
    serde_json::to_string(envelope).unwrap()
}

fn audio_envelope(pcm: &[u8]) -> String {
    envelope_text(&ServerEnvelope::AudioChunk {
        data: base64_encode(pcm),
        sample_rate: LIVE_SAMPLE_RATE,
    })
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::prelude::*;
    BASE64_STANDARD.encode(bytes)
}

fn headless_controller(addr: std::net::SocketAddr) -> SessionController {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    SessionController::with_registry(
        SessionOptions::new(format!("ws://{addr}"), "test_key"),
        Arc::new(AudioOutputRegistry::with_backend(Arc::new(
            NullBackend::new(),
        ))),
    )
}

/// Poll `condition` until it holds or the deadline passes.
async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn test_full_session_scenario() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (script_tx, mut script_rx) = tokio::sync::mpsc::unbounded_channel::<Option<String>>();
    let (setup_tx, setup_rx) = tokio::sync::oneshot::channel::<ClientEnvelope>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let setup: ClientEnvelope = serde_json::from_str(first.to_text().unwrap()).unwrap();
        setup_tx.send(setup).unwrap();

        ws.send(Message::Text(
            envelope_text(&ServerEnvelope::Setup {
                session_id: Some("session-1".to_string()),
            })
            .into(),
        ))
        .await
        .unwrap();

        while let Some(frame) = script_rx.recv().await {
            match frame {
                Some(text) => ws.send(Message::Text(text.into())).await.unwrap(),
                None => {
                    let _ = ws.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let controller = headless_controller(addr);
    controller.set_config(LiveConfig::new("models/x"));
    controller.connect().await.unwrap();
    assert!(controller.is_connected());

    match setup_rx.await.unwrap() {
        ClientEnvelope::Setup { model, .. } => assert_eq!(model, "models/x"),
        other => panic!("expected setup envelope, got {other:?}"),
    }

    // A 320-byte audio frame becomes one scheduled segment and flips
    // responding within the quiet window
    script_tx
        .send(Some(audio_envelope(&vec![0x10u8; 320])))
        .unwrap();
    wait_until("audio chunk scheduled", || {
        controller
            .streamer()
            .is_some_and(|s| s.scheduled_segments() == 1)
    })
    .await;
    wait_until("responding set", || controller.is_responding()).await;
    assert_eq!(controller.streamer().unwrap().queued_samples(), 160);

    // interrupted cancels all scheduled playback and clears responding
    script_tx
        .send(Some(envelope_text(&ServerEnvelope::Interrupted {})))
        .unwrap();
    wait_until("playback cancelled", || {
        controller.streamer().unwrap().scheduled_segments() == 0
            && !controller.is_responding()
    })
    .await;

    // enqueueing after an interrupt resumes playback
    script_tx
        .send(Some(audio_envelope(&vec![0x08u8; 480])))
        .unwrap();
    wait_until("playback resumed", || {
        controller.streamer().unwrap().scheduled_segments() == 1
    })
    .await;

    // close normalizes: connected and responding both drop
    script_tx.send(None).unwrap();
    wait_until("session closed", || {
        !controller.is_connected() && !controller.is_responding()
    })
    .await;

    server.await.unwrap();
}

#[tokio::test]
async fn test_handshake_rejection_surfaces_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _setup = ws.next().await.unwrap().unwrap();
        ws.send(Message::Text(
            envelope_text(&ServerEnvelope::Error {
                message: "model not available".to_string(),
            })
            .into(),
        ))
        .await
        .unwrap();
    });

    let controller = headless_controller(addr);
    controller.set_config(LiveConfig::new("models/unavailable"));

    let err = controller.connect().await.unwrap_err();
    match err {
        SessionError::Client(ClientError::Handshake(message)) => {
            assert!(message.contains("model not available"));
        }
        other => panic!("expected handshake error, got {other:?}"),
    }
    assert!(!controller.is_connected());

    server.await.unwrap();
}

#[tokio::test]
async fn test_malformed_frames_do_not_kill_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (script_tx, mut script_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _setup = ws.next().await.unwrap().unwrap();
        ws.send(Message::Text(
            envelope_text(&ServerEnvelope::Setup { session_id: None }).into(),
        ))
        .await
        .unwrap();

        while let Some(text) = script_rx.recv().await {
            ws.send(Message::Text(text.into())).await.unwrap();
        }
    });

    let controller = headless_controller(addr);
    controller.set_config(LiveConfig::new("models/x"));
    controller.connect().await.unwrap();

    let client = controller.client().unwrap();
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    client.events().subscribe_fn(EventKind::Error, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // Garbage, then a valid audio frame: the garbage is dropped with an
    // error event and the connection keeps streaming
    script_tx.send("{\"not\": \"an envelope\"".to_string()).unwrap();
    script_tx.send(audio_envelope(&[0u8; 320])).unwrap();

    wait_until("audio after malformed frame", || {
        controller
            .streamer()
            .is_some_and(|s| s.scheduled_segments() == 1)
    })
    .await;
    assert!(errors.load(Ordering::SeqCst) >= 1);
    assert!(controller.is_connected());

    drop(script_tx);
    server.await.unwrap();
    controller.disconnect();
}

#[tokio::test]
async fn test_newline_delimited_envelopes_in_one_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _setup = ws.next().await.unwrap().unwrap();
        ws.send(Message::Text(
            envelope_text(&ServerEnvelope::Setup { session_id: None }).into(),
        ))
        .await
        .unwrap();

        // Two audio envelopes in a single socket frame
        let frame = format!(
            "{}\n{}",
            audio_envelope(&[1u8; 64]),
            audio_envelope(&[2u8; 64])
        );
        ws.send(Message::Text(frame.into())).await.unwrap();

        // Keep the socket open until the client disconnects
        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let controller = headless_controller(addr);
    controller.set_config(LiveConfig::new("models/x"));
    controller.connect().await.unwrap();

    wait_until("both chunks scheduled", || {
        controller
            .streamer()
            .is_some_and(|s| s.scheduled_segments() == 2)
    })
    .await;

    controller.disconnect();
    assert!(!controller.is_connected());
    server.await.unwrap();
}

#[tokio::test]
async fn test_send_text_reaches_the_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (content_tx, content_rx) = tokio::sync::oneshot::channel::<ClientEnvelope>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _setup = ws.next().await.unwrap().unwrap();
        ws.send(Message::Text(
            envelope_text(&ServerEnvelope::Setup { session_id: None }).into(),
        ))
        .await
        .unwrap();

        let next = ws.next().await.unwrap().unwrap();
        let envelope: ClientEnvelope = serde_json::from_str(next.to_text().unwrap()).unwrap();
        content_tx.send(envelope).unwrap();
    });

    let controller = headless_controller(addr);
    controller.set_config(LiveConfig::new("models/x"));
    controller.connect().await.unwrap();

    controller
        .client()
        .unwrap()
        .send_text("how are you?")
        .await
        .unwrap();

    match content_rx.await.unwrap() {
        ClientEnvelope::ClientContent {
            turns,
            turn_complete,
        } => {
            assert!(turn_complete);
            assert_eq!(turns.len(), 1);
            assert_eq!(turns[0].role, "user");
            assert_eq!(turns[0].text, "how are you?");
        }
        other => panic!("expected clientContent, got {other:?}"),
    }

    server.await.unwrap();
    controller.disconnect();
}

#[tokio::test]
async fn test_reconnect_replaces_the_session() {
    // Two sequential sessions against two accepts on the same listener
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _setup = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text(
                envelope_text(&ServerEnvelope::Setup { session_id: None }).into(),
            ))
            .await
            .unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
        }
    });

    let controller = headless_controller(addr);
    controller.set_config(LiveConfig::new("models/x"));

    controller.connect().await.unwrap();
    assert!(controller.is_connected());

    // A second connect implicitly tears down the first socket
    controller.connect().await.unwrap();
    assert!(controller.is_connected());

    controller.disconnect();
    assert!(!controller.is_connected());
    server.await.unwrap();
}
