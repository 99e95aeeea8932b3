// Shared test doubles: an in-process live endpoint and fake audio devices
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use callsim::audio::{
    AudioFrame, CaptureBackend, CaptureConfig, CaptureStreams, DeviceProvider, FrameSink, PlaybackBuffer,
    PlaybackOutput,
};
use callsim::audio::pcm::decode_base64_pcm;
use callsim::{CallError, CallResult, CallState, CallStatus, Config, Persona};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Live endpoint stand-in
// ============================================================================

pub enum ServerAction {
    Send(Value),
    Close(u16),
}

/// Accepts one WebSocket connection and records every JSON message it receives
pub struct MockLiveServer {
    pub url: String,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    actions: mpsc::UnboundedSender<ServerAction>,
}

impl MockLiveServer {
    /// Server that answers the setup message with `setupComplete`
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    pub async fn start_with(ack_setup: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (actions_tx, mut actions_rx) = mpsc::unbounded_channel();

        let log = Arc::clone(&received);
        let count = Arc::clone(&connections);
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            count.fetch_add(1, Ordering::SeqCst);
            let (mut tx, mut rx) = ws.split();

            loop {
                tokio::select! {
                    msg = rx.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let value: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                            let is_setup = value.get("setup").is_some();
                            log.lock().unwrap().push(value);
                            if is_setup && ack_setup {
                                let ack = json!({"setupComplete": {}}).to_string();
                                if tx.send(Message::Text(ack)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(_)) => {}
                    },
                    action = actions_rx.recv() => match action {
                        Some(ServerAction::Send(value)) => {
                            if tx.send(Message::Text(value.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Some(ServerAction::Close(code)) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: "server closing".into(),
                            };
                            let _ = tx.send(Message::Close(Some(frame))).await;
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            url: format!("ws://{}/live", addr),
            received,
            connections,
            actions: actions_tx,
        }
    }

    pub fn send(&self, value: Value) {
        let _ = self.actions.send(ServerAction::Send(value));
    }

    pub fn close(&self, code: u16) {
        let _ = self.actions.send(ServerAction::Close(code));
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Poll until some received message satisfies `pred`
    pub async fn wait_for(&self, pred: impl Fn(&Value) -> bool) -> bool {
        for _ in 0..300 {
            if self.received().iter().any(&pred) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Every sample sent as realtime audio, in order
    pub fn audio_samples(&self) -> Vec<i16> {
        self.received()
            .iter()
            .filter_map(|m| m["realtimeInput"]["mediaChunks"][0]["data"].as_str())
            .flat_map(|data| decode_base64_pcm(data).unwrap())
            .collect()
    }
}

pub fn is_setup(msg: &Value) -> bool {
    msg.get("setup").is_some()
}

pub fn is_audio(msg: &Value) -> bool {
    msg.get("realtimeInput").is_some()
}

pub fn turn_text(msg: &Value) -> Option<&str> {
    msg["clientContent"]["turns"][0]["parts"][0]["text"].as_str()
}

/// Base64 of `samples` as little-endian PCM
pub fn pcm_base64(samples: &[i16]) -> String {
    callsim::audio::pcm::encode_base64_pcm(samples)
}

// ============================================================================
// Fake devices
// ============================================================================

/// Shared state of a fake microphone, inspectable from tests
#[derive(Default)]
pub struct FakeMicState {
    sink: Mutex<Option<FrameSink>>,
    enabled: AtomicBool,
    /// When false the fake keeps producing while disabled, leaving only the software gate
    honor_enabled: bool,
    /// Device opens but the stream refuses to start (permission prompt denied)
    fail_start: bool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeMicState {
    pub fn new(honor_enabled: bool, fail_start: bool) -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            honor_enabled,
            fail_start,
            ..Default::default()
        })
    }

    /// Emit one frame filled with `value`; returns whether anything was emitted
    pub fn push(&self, value: i16, len: usize) -> bool {
        if self.honor_enabled && !self.enabled.load(Ordering::SeqCst) {
            return false;
        }
        let guard = self.sink.lock().unwrap();
        match guard.as_ref() {
            Some(sink) => {
                sink.emit(AudioFrame {
                    samples: vec![value; len],
                    sample_rate: 16000,
                    timestamp_ms: 0,
                });
                true
            }
            None => false,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

pub struct FakeMicrophone {
    state: Arc<FakeMicState>,
    capacity: usize,
}

#[async_trait::async_trait]
impl CaptureBackend for FakeMicrophone {
    async fn start(&mut self) -> CallResult<CaptureStreams> {
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_start {
            return Err(CallError::MicrophoneUnavailable("stream start denied".to_string()));
        }
        let (sink, streams) = FrameSink::channel(self.capacity);
        *self.state.sink.lock().unwrap() = Some(sink);
        Ok(streams)
    }

    async fn stop(&mut self) -> CallResult<()> {
        // Dropping the sink closes both consumer channels
        self.state.sink.lock().unwrap().take();
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_enabled(&self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.state.is_capturing()
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

/// Output with a hand-driven clock that records what was scheduled
#[derive(Default)]
pub struct ManualOutput {
    now: Mutex<f64>,
    pub scheduled: Mutex<Vec<(f64, f64)>>,
    pub silenced: AtomicUsize,
}

impl ManualOutput {
    pub fn set_now(&self, secs: f64) {
        *self.now.lock().unwrap() = secs;
    }

    /// (start, duration) pairs in scheduling order
    pub fn schedule_log(&self) -> Vec<(f64, f64)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn silence_count(&self) -> usize {
        self.silenced.load(Ordering::SeqCst)
    }
}

impl PlaybackOutput for ManualOutput {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap()
    }

    fn schedule(&self, buffer: PlaybackBuffer, start_at: f64) {
        self.scheduled.lock().unwrap().push((start_at, buffer.duration()));
    }

    fn silence(&self) {
        self.silenced.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {}
}

/// Device provider handing out a fake microphone (or refusing to)
pub struct FakeDevices {
    pub mic: Arc<FakeMicState>,
    pub output: Arc<ManualOutput>,
    deny_microphone: bool,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Self::build(true, false, false)
    }

    /// Fake whose track keeps producing when disabled
    pub fn leaky() -> Arc<Self> {
        Self::build(false, false, false)
    }

    /// Microphone cannot even be opened
    pub fn denied() -> Arc<Self> {
        Self::build(true, true, false)
    }

    /// Microphone opens but its stream fails to start
    pub fn failing_start() -> Arc<Self> {
        Self::build(true, false, true)
    }

    fn build(honor_enabled: bool, deny_microphone: bool, fail_start: bool) -> Arc<Self> {
        Arc::new(Self {
            mic: FakeMicState::new(honor_enabled, fail_start),
            output: Arc::new(ManualOutput::default()),
            deny_microphone,
        })
    }
}

impl DeviceProvider for FakeDevices {
    fn open_capture(&self, config: &CaptureConfig) -> CallResult<Box<dyn CaptureBackend>> {
        if self.deny_microphone {
            return Err(CallError::MicrophoneUnavailable("permission denied".to_string()));
        }
        Ok(Box::new(FakeMicrophone {
            state: Arc::clone(&self.mic),
            capacity: config.channel_capacity,
        }))
    }

    fn output(&self) -> CallResult<Arc<dyn PlaybackOutput>> {
        Ok(Arc::clone(&self.output) as Arc<dyn PlaybackOutput>)
    }
}

// ============================================================================
// Config and helpers
// ============================================================================

pub fn test_config(url: &str) -> Config {
    let mut config = Config::default();
    config.endpoint.url = Some(url.to_string());
    config.endpoint.api_key = Some("test-key".to_string());
    config.endpoint.connect_timeout_secs = 5;
    config.call.ring_duration_ms = 0;
    config.call.answer_delay_ms = 50;
    config.audio.recording_flush_ms = 100;
    config
}

pub fn persona() -> Persona {
    Persona {
        name: "Skeptical Steve".to_string(),
        instruction: "You are Steve, a busy IT director.".to_string(),
        voice: None,
    }
}

/// Wait until the status reaches `state`, failing the test after a few seconds
pub async fn wait_for_state(status: &mut watch::Receiver<CallStatus>, state: CallState) -> CallStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = status.borrow_and_update().clone();
        if current.state == state {
            return current;
        }
        match tokio::time::timeout_at(deadline, status.changed()).await {
            Ok(Ok(())) => continue,
            _ => panic!("timed out waiting for {} (last state {})", state, current.state),
        }
    }
}

/// Poll `check` until it holds or a few seconds pass
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
