// Integration tests for the live endpoint transport
//
// These run against an in-process WebSocket server standing in for the model.

mod common;

use callsim::audio::AudioFrame;
use callsim::config::EndpointConfig;
use callsim::transport::{ContentPart, ServerEvent, SetupMessage, TransportEvent, TransportSession};
use callsim::{CallError, VoiceId};
use common::*;
use serde_json::json;
use std::time::Duration;

fn endpoint(url: &str) -> EndpointConfig {
    test_config(url).endpoint
}

fn setup() -> SetupMessage {
    SetupMessage::new("models/test", VoiceId::Kore, "You are a purchasing manager.")
}

async fn next_event(events: &mut tokio::sync::mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_setup_is_first_message_even_with_immediate_audio() {
    let server = MockLiveServer::start().await;
    let transport = TransportSession::connect(&endpoint(&server.url), &setup()).await.unwrap();

    // Audio queued the instant connect returns
    let sender = transport.sender();
    for _ in 0..5 {
        sender
            .send_audio(&AudioFrame {
                samples: vec![42; 128],
                sample_rate: 16000,
                timestamp_ms: 0,
            })
            .await
            .unwrap();
    }

    assert!(server.wait_for(is_audio).await);
    let received = server.received();
    assert!(is_setup(&received[0]), "first message was {}", received[0]);
    assert!(received[1..].iter().all(|m| !is_setup(m)));

    let setup = &received[0]["setup"];
    assert_eq!(setup["model"], "models/test");
    assert_eq!(
        setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
        "Kore"
    );
    assert_eq!(
        received[1]["realtimeInput"]["mediaChunks"][0]["mimeType"],
        "audio/pcm;rate=16000"
    );
    assert_eq!(server.audio_samples()[..128], [42i16; 128]);
}

#[tokio::test]
async fn test_server_messages_become_events() {
    let server = MockLiveServer::start().await;
    let mut transport = TransportSession::connect(&endpoint(&server.url), &setup()).await.unwrap();
    let mut events = transport.take_events().unwrap();
    assert!(transport.take_events().is_none());

    assert_eq!(next_event(&mut events).await, TransportEvent::Server(ServerEvent::SetupComplete));

    server.send(json!({"serverContent": {"modelTurn": {"parts": [
        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": pcm_base64(&[1, 2, 3])}}
    ]}}}));
    match next_event(&mut events).await {
        TransportEvent::Server(ServerEvent::ModelContent(parts)) => {
            assert!(matches!(&parts[0], ContentPart::Audio { .. }));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Unknown messages are skipped without ending the stream
    server.send(json!({"goAway": {}}));
    server.send(json!({"serverContent": {"turnComplete": true}}));
    assert_eq!(next_event(&mut events).await, TransportEvent::Server(ServerEvent::TurnComplete));
}

#[tokio::test]
async fn test_turn_message_shape() {
    let server = MockLiveServer::start().await;
    let transport = TransportSession::connect(&endpoint(&server.url), &setup()).await.unwrap();

    transport.sender().send_turn("Is now a bad time?").await.unwrap();

    assert!(server.wait_for(|m| turn_text(m).is_some()).await);
    let turn = server.received().into_iter().find(|m| turn_text(m).is_some()).unwrap();
    assert_eq!(turn["clientContent"]["turns"][0]["role"], "user");
    assert_eq!(turn["clientContent"]["turnComplete"], true);
    assert_eq!(turn_text(&turn), Some("Is now a bad time?"));
}

#[tokio::test]
async fn test_normal_close_is_not_abnormal() {
    let server = MockLiveServer::start().await;
    let mut transport = TransportSession::connect(&endpoint(&server.url), &setup()).await.unwrap();
    let mut events = transport.take_events().unwrap();
    next_event(&mut events).await; // setupComplete

    server.close(1000);
    match next_event(&mut events).await {
        TransportEvent::Closed { abnormal, .. } => assert!(!abnormal),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_error_close_is_abnormal() {
    let server = MockLiveServer::start().await;
    let mut transport = TransportSession::connect(&endpoint(&server.url), &setup()).await.unwrap();
    let mut events = transport.take_events().unwrap();
    next_event(&mut events).await;

    server.close(1011);
    match next_event(&mut events).await {
        TransportEvent::Closed { abnormal, reason } => {
            assert!(abnormal);
            assert!(reason.starts_with("1011"), "reason: {}", reason);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_credential_fails_before_connecting() {
    let server = MockLiveServer::start().await;
    let mut endpoint = endpoint(&server.url);
    endpoint.api_key = None;

    let result = TransportSession::connect(&endpoint, &setup()).await;
    assert!(matches!(result, Err(CallError::ConfigurationMissing(_))));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_connection_error() {
    // Bind then drop to get a port nobody is listening on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = TransportSession::connect(&endpoint(&format!("ws://{}", addr)), &setup()).await;
    assert!(matches!(result, Err(CallError::Connection(_))));
}

#[tokio::test]
async fn test_shutdown_closes_socket_and_is_repeatable() {
    let server = MockLiveServer::start().await;
    let mut transport = TransportSession::connect(&endpoint(&server.url), &setup()).await.unwrap();
    let sender = transport.sender();

    transport.shutdown().await;
    transport.shutdown().await;

    assert!(eventually(|| sender.is_closed()).await);
    let frame = AudioFrame {
        samples: vec![0; 128],
        sample_rate: 16000,
        timestamp_ms: 0,
    };
    assert!(matches!(sender.send_audio(&frame).await, Err(CallError::Connection(_))));
}
