//! Call lifecycle controller.
//!
//! `CallController` is a cheap handle; the call itself runs in a driver task
//! that exclusively owns the `Session`, the ring tone and every timer. The
//! handle talks to it over a command channel and observes it through a
//! `watch` channel of `CallStatus`. Dropping the handle ends the call.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::session::{Session, SessionSignal};
use super::state::{CallState, CallStatus};
use super::stats::CallStats;
use super::transcript::TranscriptEntry;
use super::voice::Persona;
use crate::audio::{CaptureBackend, CaptureConfig, CaptureStreams, DeviceProvider, PlaybackOutput, Ringer};
use crate::config::Config;
use crate::error::{CallError, CallResult};
use crate::scoring::{ScoreRequest, ScoringClient};
use crate::transport::TransportEvent;

const COMMAND_CAPACITY: usize = 32;
const TICK: Duration = Duration::from_secs(1);

/// Why a call stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    HangUp,
    DurationCap,
    RemoteClosed,
    /// The controller handle went away
    Dropped,
    Failed(String),
}

/// Everything left over once a call is finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOutcome {
    pub call_id: String,
    pub state: CallState,
    pub reason: EndReason,
    pub transcript: Vec<TranscriptEntry>,
    /// Whole seconds the call was connected
    pub duration_secs: u64,
    pub recording_base64: Option<String>,
    /// Opaque result from the scoring service
    pub score: Option<serde_json::Value>,
    pub stats: Option<CallStats>,
}

enum Command {
    Dial(oneshot::Sender<CallResult<()>>),
    HangUp(oneshot::Sender<()>),
    ToggleMute(oneshot::Sender<CallResult<bool>>),
    SendTurn(String, oneshot::Sender<CallResult<()>>),
    Transcript(oneshot::Sender<Vec<TranscriptEntry>>),
}

/// Handle to one call
pub struct CallController {
    call_id: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<CallStatus>,
    outcome: Option<oneshot::Receiver<CallOutcome>>,
}

impl CallController {
    /// Validate configuration and start the driver in `idle`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        call_id: impl Into<String>,
        persona: Persona,
        config: Config,
        devices: Arc<dyn DeviceProvider>,
        scorer: Option<Arc<dyn ScoringClient>>,
    ) -> CallResult<Self> {
        config.endpoint.validate()?;

        let call_id = call_id.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (status_tx, status_rx) = watch::channel(CallStatus::default());
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let driver = Driver {
            session_config: SessionConfig::for_call(call_id.clone(), &persona, &config),
            config,
            devices,
            scorer,
            status: status_tx,
            state: CallState::Idle,
            capture: None,
            capture_streams: None,
            output: None,
            ringer: None,
            session: None,
            events: None,
            ring_deadline: None,
            answer_deadline: None,
            next_tick: None,
            connected_at: None,
            muted: false,
            queued_turns: Vec::new(),
            final_transcript: Vec::new(),
            outcome: Some(outcome_tx),
        };

        info!("Call controller created: {} (persona {})", call_id, persona.name);
        tokio::spawn(driver.run(cmd_rx));

        Ok(Self {
            call_id,
            commands: cmd_tx,
            status: status_rx,
            outcome: Some(outcome_rx),
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Start ringing; the microphone is opened and started before this returns.
    ///
    /// A controller places one call. Once that call has ended or failed,
    /// `dial` returns `CallError::Closed` and a retry needs a new controller.
    pub async fn dial(&self) -> CallResult<()> {
        self.request(Command::Dial).await?
    }

    /// End the call; does nothing once the call has ended
    pub async fn hang_up(&self) -> CallResult<()> {
        self.request(Command::HangUp).await
    }

    /// Returns the new muted state
    pub async fn toggle_mute(&self) -> CallResult<bool> {
        self.request(Command::ToggleMute).await?
    }

    /// Send a typed user turn
    pub async fn send_turn(&self, text: impl Into<String>) -> CallResult<()> {
        let text = text.into();
        self.request(|tx| Command::SendTurn(text, tx)).await?
    }

    pub async fn transcript(&self) -> CallResult<Vec<TranscriptEntry>> {
        self.request(Command::Transcript).await
    }

    pub fn status(&self) -> CallStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }

    /// Wait for the call to finish; the outcome can be taken once
    pub async fn outcome(&mut self) -> CallResult<CallOutcome> {
        let rx = self.outcome.take().ok_or(CallError::Closed)?;
        rx.await.map_err(|_| CallError::Closed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> CallResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| CallError::Closed)?;
        rx.await.map_err(|_| CallError::Closed)
    }
}

struct Driver {
    config: Config,
    session_config: SessionConfig,
    devices: Arc<dyn DeviceProvider>,
    scorer: Option<Arc<dyn ScoringClient>>,
    status: watch::Sender<CallStatus>,
    state: CallState,

    /// Input device held from dial until the session takes it
    capture: Option<Box<dyn CaptureBackend>>,
    capture_streams: Option<CaptureStreams>,
    output: Option<Arc<dyn PlaybackOutput>>,
    ringer: Option<Ringer>,
    session: Option<Session>,
    events: Option<mpsc::Receiver<TransportEvent>>,

    ring_deadline: Option<Instant>,
    answer_deadline: Option<Instant>,
    next_tick: Option<Instant>,
    connected_at: Option<Instant>,

    muted: bool,
    /// Turns typed before the session connected
    queued_turns: Vec<String>,
    final_transcript: Vec<TranscriptEntry>,
    outcome: Option<oneshot::Sender<CallOutcome>>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        if self.state.is_live() {
                            info!("Controller dropped during call; tearing down");
                            self.end(EndReason::Dropped).await;
                        }
                        break;
                    }
                },
                event = next_event(&mut self.events) => self.handle_transport(event).await,
                _ = sleep_until(self.ring_deadline) => {
                    self.ring_deadline = None;
                    self.connect().await;
                }
                _ = sleep_until(self.answer_deadline) => {
                    self.answer_deadline = None;
                    self.answer().await;
                }
                _ = sleep_until(self.next_tick) => self.tick().await,
            }
        }
        debug!("Call driver stopped: {}", self.session_config.call_id);
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Dial(reply) => {
                let result = self.dial().await;
                let _ = reply.send(result);
            }
            Command::HangUp(reply) => {
                if self.state.is_live() {
                    self.end(EndReason::HangUp).await;
                }
                let _ = reply.send(());
            }
            Command::ToggleMute(reply) => {
                let result = if self.state.is_terminal() {
                    Err(CallError::Closed)
                } else {
                    self.muted = match self.session.as_mut() {
                        Some(session) => session.toggle_mute(),
                        None => !self.muted,
                    };
                    let muted = self.muted;
                    self.status.send_modify(|s| s.muted = muted);
                    Ok(muted)
                };
                let _ = reply.send(result);
            }
            Command::SendTurn(text, reply) => {
                let result = match (self.state, self.session.as_mut()) {
                    (CallState::Connected, Some(session)) => session.send_synthetic_turn(&text, true).await,
                    (state, _) if state.is_terminal() => Err(CallError::Closed),
                    _ => {
                        self.queued_turns.push(text);
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }
            Command::Transcript(reply) => {
                let transcript = match &self.session {
                    Some(session) => session.transcript(),
                    None => self.final_transcript.clone(),
                };
                let _ = reply.send(transcript);
            }
        }
    }

    /// idle -> dialing: acquire and start the microphone, then ring
    async fn dial(&mut self) -> CallResult<()> {
        if self.state.is_terminal() {
            warn!("Dial rejected: call already {}", self.state);
            return Err(CallError::Closed);
        }
        if self.state != CallState::Idle {
            warn!("Dial rejected: call is {}", self.state);
            return Err(CallError::SessionActive);
        }
        self.transition(CallState::Dialing)?;

        let capture_config = CaptureConfig::from(&self.config.audio);
        let capture = match self.devices.open_capture(&capture_config) {
            Ok(capture) => capture,
            Err(e) => {
                self.fail(e.clone()).await;
                return Err(e);
            }
        };
        info!("Acquired {} capture", capture.name());

        // Start the stream now so permission and busy-device errors surface
        // while dialing; the track stays disabled until the session connects
        capture.set_enabled(false);
        let started = self.capture.insert(capture).start().await;
        match started {
            Ok(streams) => self.capture_streams = Some(streams),
            Err(e) => {
                self.fail(e.clone()).await;
                return Err(e);
            }
        }

        let output = match self.devices.output() {
            Ok(output) => output,
            Err(e) => {
                self.fail(e.clone()).await;
                return Err(e);
            }
        };

        let ring = Duration::from_millis(self.config.call.ring_duration_ms);
        if !ring.is_zero() {
            let mut ringer = Ringer::new(Arc::clone(&output), self.config.audio.receive_sample_rate);
            ringer.start(ring.as_secs_f32());
            self.ringer = Some(ringer);
        }
        self.output = Some(output);
        // Zero ring connects on the next loop iteration
        self.ring_deadline = Some(Instant::now() + ring);

        Ok(())
    }

    /// dialing -> connecting -> connected
    async fn connect(&mut self) {
        if let Some(mut ringer) = self.ringer.take() {
            ringer.stop();
        }
        if let Err(e) = self.transition(CallState::Connecting) {
            error!("{}", e);
            return;
        }

        let held = (self.capture.take(), self.capture_streams.take(), self.output.clone());
        let (capture, streams, output) = match held {
            (Some(capture), Some(streams), Some(output)) => (capture, streams, output),
            (capture, _, _) => {
                if let Some(mut capture) = capture {
                    if let Err(e) = capture.stop().await {
                        error!("Failed to release {} capture: {}", capture.name(), e);
                    }
                }
                self.fail(CallError::MicrophoneUnavailable("capture device not held".to_string()))
                    .await;
                return;
            }
        };

        let mut session_config = self.session_config.clone();
        session_config.start_muted = self.muted;
        let result = Session::connect(session_config, &self.config.endpoint, capture, streams, output).await;

        let (mut session, events) = match result {
            Ok(connected) => connected,
            Err(e) => {
                error!("Failed to connect call: {}", e);
                self.fail(e).await;
                return;
            }
        };

        for text in self.queued_turns.drain(..) {
            if let Err(e) = session.send_synthetic_turn(&text, true).await {
                warn!("Failed to send queued turn: {}", e);
            }
        }

        self.session = Some(session);
        self.events = Some(events);

        if let Err(e) = self.transition(CallState::Connected) {
            error!("{}", e);
            return;
        }

        let now = Instant::now();
        self.connected_at = Some(now);
        self.next_tick = Some(now + TICK);
        self.answer_deadline = Some(now + Duration::from_millis(self.config.call.answer_delay_ms));
    }

    /// Prompt the prospect to pick up
    async fn answer(&mut self) {
        let text = self.config.call.answer_text.clone();
        let record = self.config.call.record_answer_turn;
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.send_synthetic_turn(&text, record).await {
                warn!("Failed to send answer turn: {}", e);
            }
        }
    }

    async fn tick(&mut self) {
        let Some(connected_at) = self.connected_at else {
            self.next_tick = None;
            return;
        };
        self.next_tick = self.next_tick.map(|t| t + TICK);

        let elapsed = connected_at.elapsed().as_secs();
        self.status.send_modify(|s| s.elapsed_secs = elapsed);

        if elapsed >= self.config.call.max_duration_secs {
            info!("Call reached the {}s limit", self.config.call.max_duration_secs);
            self.end(EndReason::DurationCap).await;
        }
    }

    async fn handle_transport(&mut self, event: Option<TransportEvent>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let signal = match event {
            Some(event) => session.handle_event(event).await,
            None => SessionSignal::Failed(CallError::Connection("transport stopped".to_string())),
        };
        let speaker = session.current_speaker();

        match signal {
            SessionSignal::Continue => {
                self.status.send_if_modified(|s| {
                    let changed = s.speaker != speaker;
                    s.speaker = speaker;
                    changed
                });
            }
            SessionSignal::RemoteHangUp => self.end(EndReason::RemoteClosed).await,
            SessionSignal::Failed(e) => self.fail(e).await,
        }
    }

    /// connected (or earlier) -> ending -> ended
    async fn end(&mut self, reason: EndReason) {
        if !self.state.is_live() || self.state == CallState::Ending {
            return;
        }
        if let Err(e) = self.transition(CallState::Ending) {
            error!("{}", e);
            return;
        }

        let duration_secs = self.connected_secs();
        let torn = self.teardown().await;

        if let Err(e) = self.transition(CallState::Ended) {
            error!("{}", e);
        }

        let score = match (&self.scorer, torn.connected) {
            (Some(scorer), true) => {
                let request = ScoreRequest {
                    call_id: self.session_config.call_id.clone(),
                    transcript: torn.transcript.clone(),
                    duration_seconds: duration_secs,
                    recording_base64: torn.recording.clone(),
                };
                let timeout = Duration::from_secs(self.config.scoring.timeout_secs.max(1));
                match tokio::time::timeout(timeout, scorer.score(&request)).await {
                    Ok(Ok(score)) => Some(score),
                    Ok(Err(e)) => {
                        warn!("Scoring failed: {}", e);
                        None
                    }
                    Err(_) => {
                        warn!("Scoring timed out after {:?}", timeout);
                        None
                    }
                }
            }
            _ => None,
        };

        info!("Call ended: {} ({:?}, {}s)", self.session_config.call_id, reason, duration_secs);
        self.deliver(CallState::Ended, reason, duration_secs, torn, score);
    }

    /// any live state -> error
    async fn fail(&mut self, err: CallError) {
        if self.state.is_terminal() {
            return;
        }
        error!("Call failed: {}", err);

        let duration_secs = self.connected_secs();
        let torn = self.teardown().await;

        let message = err.user_message().to_string();
        if let Err(e) = self.transition(CallState::Error) {
            error!("{}", e);
        }
        self.status.send_modify(|s| s.error = Some(message));

        self.deliver(CallState::Error, EndReason::Failed(err.to_string()), duration_secs, torn, None);
    }

    /// Release every resource the call holds; safe to run more than once
    async fn teardown(&mut self) -> Torn {
        self.ring_deadline = None;
        self.answer_deadline = None;
        self.next_tick = None;
        self.events = None;
        self.capture_streams = None;
        self.queued_turns.clear();

        if let Some(mut ringer) = self.ringer.take() {
            ringer.stop();
        }

        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop().await {
                error!("Failed to release {} capture: {}", capture.name(), e);
            }
        }

        let mut torn = Torn::default();
        if let Some(mut session) = self.session.take() {
            // Snapshot before disconnect so nothing committed late is lost
            torn.transcript = session.transcript();
            torn.connected = true;

            session.disconnect().await;

            torn.stats = Some(session.stats());
            torn.recording = match session.recording_base64().await {
                Ok(recording) => recording,
                Err(e) => {
                    warn!("Recording unavailable: {}", e);
                    None
                }
            };
            self.final_transcript = torn.transcript.clone();
        }

        self.output = None;
        self.status.send_modify(|s| s.speaker = None);
        torn
    }

    fn deliver(
        &mut self,
        state: CallState,
        reason: EndReason,
        duration_secs: u64,
        torn: Torn,
        score: Option<serde_json::Value>,
    ) {
        let outcome = CallOutcome {
            call_id: self.session_config.call_id.clone(),
            state,
            reason,
            transcript: torn.transcript,
            duration_secs,
            recording_base64: torn.recording,
            score,
            stats: torn.stats,
        };
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(outcome);
        }
    }

    fn connected_secs(&self) -> u64 {
        self.connected_at.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    fn transition(&mut self, next: CallState) -> CallResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CallError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        info!("Call {}: {} -> {}", self.session_config.call_id, self.state, next);
        self.state = next;
        self.status.send_modify(|s| s.state = next);
        Ok(())
    }
}

#[derive(Default)]
struct Torn {
    transcript: Vec<TranscriptEntry>,
    recording: Option<String>,
    stats: Option<CallStats>,
    connected: bool,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
