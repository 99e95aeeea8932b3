use super::config::SessionConfig;
use super::stats::CallStats;
use super::transcript::{Role, TranscriptAssembler, TranscriptEntry};
use crate::audio::pcm::decode_base64_pcm;
use crate::audio::{CaptureBackend, CaptureStreams, LocalRecorder, PlaybackOutput, PlaybackScheduler};
use crate::config::EndpointConfig;
use crate::error::{CallError, CallResult};
use crate::transport::{
    ActivitySpeaker, ContentPart, ServerEvent, SetupMessage, TransportEvent, TransportSender, TransportSession,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long teardown waits for the recorder to drain
const RECORDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What the owner should do after an event has been handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Continue,
    /// The endpoint closed the socket normally
    RemoteHangUp,
    Failed(CallError),
}

/// One live call: transport, capture, playback, transcript and recording.
///
/// Created by `connect` and torn down by `disconnect`; never reused.
pub struct Session {
    /// Session configuration
    config: SessionConfig,

    transport: TransportSession,
    sender: TransportSender,

    /// Capture backend; already running when handed to `connect`, stopped in `disconnect`
    capture: Box<dyn CaptureBackend>,

    scheduler: PlaybackScheduler,
    transcript: TranscriptAssembler,
    recorder: LocalRecorder,

    /// Software gate checked by the frame pump
    muted: Arc<AtomicBool>,

    /// Handle for the capture -> transport pump
    pump: Option<JoinHandle<()>>,

    /// Set once the endpoint acknowledges setup
    ready: bool,

    /// Synthetic turns waiting for setup to complete
    pending_turns: VecDeque<(String, bool)>,

    started_at: DateTime<Utc>,
    frames_sent: Arc<AtomicU64>,
    frames_gated: Arc<AtomicU64>,
    disconnected: bool,
}

impl Session {
    /// Open the transport, start recording, and begin streaming.
    ///
    /// `capture` must already be running with its track disabled; `streams`
    /// are the receivers it handed out. Frames captured before this point are
    /// discarded. On failure the capture is stopped before the error is
    /// returned.
    pub async fn connect(
        config: SessionConfig,
        endpoint: &EndpointConfig,
        mut capture: Box<dyn CaptureBackend>,
        mut streams: CaptureStreams,
        output: Arc<dyn PlaybackOutput>,
    ) -> CallResult<(Self, mpsc::Receiver<TransportEvent>)> {
        info!("Connecting session for call {}", config.call_id);

        let setup = SetupMessage::new(config.model.clone(), config.voice, config.instruction.clone());

        let mut transport = match TransportSession::connect(endpoint, &setup).await {
            Ok(transport) => transport,
            Err(e) => {
                Self::release_capture(capture.as_mut()).await;
                return Err(e);
            }
        };

        let events = match transport.take_events() {
            Some(events) => events,
            None => {
                transport.shutdown().await;
                Self::release_capture(capture.as_mut()).await;
                return Err(CallError::Connection("transport events already taken".to_string()));
            }
        };

        // Nothing from before the line went live is streamed or recorded
        let mut stale = 0;
        while streams.frames.try_recv().is_ok() {
            stale += 1;
        }
        while streams.recording.try_recv().is_ok() {}
        if stale > 0 {
            debug!("Discarded {} frames captured before connect", stale);
        }

        let muted = Arc::new(AtomicBool::new(config.start_muted));
        capture.set_enabled(!config.start_muted);

        let recorder = LocalRecorder::start(streams.recording, config.send_sample_rate, config.recording_flush);

        let sender = transport.sender();
        let frames_sent = Arc::new(AtomicU64::new(0));
        let frames_gated = Arc::new(AtomicU64::new(0));

        // Spawn the capture -> transport pump
        let pump = {
            let sender = sender.clone();
            let muted = Arc::clone(&muted);
            let frames_sent = Arc::clone(&frames_sent);
            let frames_gated = Arc::clone(&frames_gated);
            let mut frames = streams.frames;

            tokio::spawn(async move {
                info!("Audio pump started");

                while let Some(frame) = frames.recv().await {
                    if muted.load(Ordering::SeqCst) {
                        frames_gated.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    if let Err(e) = sender.send_audio(&frame).await {
                        debug!("Audio pump stopping: {}", e);
                        break;
                    }

                    let seq = frames_sent.fetch_add(1, Ordering::Relaxed);
                    if seq % 1000 == 0 {
                        debug!("Sent {} audio frames", seq + 1);
                    }
                }

                info!("Audio pump stopped");
            })
        };

        let scheduler = PlaybackScheduler::new(output, config.receive_sample_rate);

        info!("Session connected: {} (voice {})", config.call_id, config.voice);

        Ok((
            Self {
                config,
                transport,
                sender,
                capture,
                scheduler,
                transcript: TranscriptAssembler::new(),
                recorder,
                muted,
                pump: Some(pump),
                ready: false,
                pending_turns: VecDeque::new(),
                started_at: Utc::now(),
                frames_sent,
                frames_gated,
                disconnected: false,
            },
            events,
        ))
    }

    /// Apply one transport event to the session
    pub async fn handle_event(&mut self, event: TransportEvent) -> SessionSignal {
        match event {
            TransportEvent::Server(server) => {
                self.handle_server_event(server).await;
                SessionSignal::Continue
            }
            TransportEvent::Closed { abnormal: false, reason } => {
                info!("Remote hang-up: {}", reason);
                SessionSignal::RemoteHangUp
            }
            TransportEvent::Closed { abnormal: true, reason } => {
                error!("Connection closed abnormally: {}", reason);
                SessionSignal::Failed(CallError::Connection(reason))
            }
            TransportEvent::Failed(reason) => SessionSignal::Failed(CallError::Connection(reason)),
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SetupComplete => {
                info!("Setup complete");
                self.ready = true;
                while let Some((text, mark_as_user)) = self.pending_turns.pop_front() {
                    if let Err(e) = self.send_turn_now(&text, mark_as_user).await {
                        warn!("Failed to send queued turn: {}", e);
                    }
                }
            }
            ServerEvent::ModelContent(parts) => {
                for part in parts {
                    match part {
                        ContentPart::Audio { data, .. } => match decode_base64_pcm(&data) {
                            Ok(pcm) => {
                                self.scheduler.play_chunk(&pcm);
                                self.transcript.set_speaker(Some(Role::Assistant));
                            }
                            Err(e) => warn!("Dropping audio chunk: {}", e),
                        },
                        ContentPart::Text(text) => self.transcript.push_assistant_fragment(&text),
                    }
                }
            }
            ServerEvent::OutputTranscript(text) => self.transcript.push_assistant_transcription(&text),
            ServerEvent::TurnComplete => {
                self.transcript.complete_turn();
            }
            ServerEvent::SpeechActivity { speaker, active } => {
                let role = match speaker {
                    ActivitySpeaker::User => Role::User,
                    ActivitySpeaker::Assistant => Role::Assistant,
                };
                if active {
                    self.transcript.set_speaker(Some(role));
                } else if self.transcript.current_speaker() == Some(role) {
                    self.transcript.set_speaker(None);
                }
            }
            ServerEvent::Interrupted => {
                debug!("Assistant interrupted");
                // Cut off the rest of the assistant's turn and keep what was said
                self.scheduler.stop();
                self.transcript.complete_turn();
                self.transcript.set_speaker(Some(Role::User));
            }
            ServerEvent::InputTranscript(text) => {
                self.transcript.commit_user(&text);
            }
            ServerEvent::Unrecognized => {}
        }
    }

    /// Send a text turn as the user; queued until setup completes
    pub async fn send_synthetic_turn(&mut self, text: &str, mark_as_user: bool) -> CallResult<()> {
        if self.disconnected {
            return Err(CallError::Closed);
        }
        if !self.ready {
            debug!("Queueing synthetic turn until setup completes");
            self.pending_turns.push_back((text.to_string(), mark_as_user));
            return Ok(());
        }
        self.send_turn_now(text, mark_as_user).await
    }

    async fn send_turn_now(&mut self, text: &str, mark_as_user: bool) -> CallResult<()> {
        self.sender.send_turn(text).await?;
        if mark_as_user {
            self.transcript.commit_user(text);
        }
        Ok(())
    }

    /// Flip mute; returns the new muted state
    pub fn toggle_mute(&mut self) -> bool {
        let muted = !self.muted.load(Ordering::SeqCst);
        self.muted.store(muted, Ordering::SeqCst);
        self.capture.set_enabled(!muted);
        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn current_speaker(&self) -> Option<Role> {
        self.transcript.current_speaker()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.snapshot()
    }

    pub fn call_id(&self) -> &str {
        &self.config.call_id
    }

    pub fn stats(&self) -> CallStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        CallStats {
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_gated: self.frames_gated.load(Ordering::Relaxed),
            chunks_played: self.scheduler.chunks_scheduled(),
            transcript_entries: self.transcript.len(),
            muted: self.is_muted(),
        }
    }

    /// Stop capture, close the socket, silence playback and drain the recorder.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub async fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;

        info!("Disconnecting session: {}", self.config.call_id);

        Self::release_capture(self.capture.as_mut()).await;

        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        self.transport.shutdown().await;
        self.scheduler.stop();
        self.pending_turns.clear();

        if tokio::time::timeout(RECORDER_DRAIN_TIMEOUT, self.recorder.finish())
            .await
            .is_err()
        {
            warn!("Recorder did not drain within {:?}", RECORDER_DRAIN_TIMEOUT);
        }

        info!("Session disconnected");
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Base64 WAV of everything captured; available once
    pub async fn recording_base64(&self) -> CallResult<Option<String>> {
        self.recorder.take_base64().await
    }

    async fn release_capture(capture: &mut dyn CaptureBackend) {
        if let Err(e) = capture.stop().await {
            error!("Failed to stop {} capture: {}", capture.name(), e);
        }
    }
}
