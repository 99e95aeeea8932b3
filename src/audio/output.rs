//! Playback output with a sample-accurate clock.
//!
//! `DeviceOutput` keeps a timeline counted in frames of the playback rate. The
//! cpal output callback advances it and mixes in whatever buffers are
//! scheduled at the current position, so `now()` is the hardware clock.

use std::sync::{mpsc as std_mpsc, Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, warn};

use crate::error::{CallError, CallResult};

/// Single-channel float buffer ready to be scheduled
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }
}

/// Audio output with a clock that buffers can be scheduled against
pub trait PlaybackOutput: Send + Sync {
    /// Current output clock in seconds
    fn now(&self) -> f64;

    /// Queue a buffer to start playing at `start_at` seconds on the output clock
    fn schedule(&self, buffer: PlaybackBuffer, start_at: f64);

    /// Drop everything scheduled that has not finished playing
    fn silence(&self);

    /// Release the output device
    fn close(&self);
}

struct ScheduledBuffer {
    start_frame: u64,
    samples: Vec<f32>,
}

impl ScheduledBuffer {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Shared between the output callback and the scheduling side
struct Timeline {
    sample_rate: u32,
    /// Position in timeline frames (fractional when the device rate differs)
    position: f64,
    scheduled: Vec<ScheduledBuffer>,
}

impl Timeline {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0.0,
            scheduled: Vec::new(),
        }
    }

    fn now(&self) -> f64 {
        self.position / self.sample_rate as f64
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) {
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        if buffer.sample_rate != self.sample_rate {
            warn!(
                "Scheduled buffer at {}Hz on a {}Hz timeline",
                buffer.sample_rate, self.sample_rate
            );
        }
        self.scheduled.push(ScheduledBuffer {
            start_frame,
            samples: buffer.samples,
        });
    }

    /// Fill one device buffer; `step` is timeline frames per device frame
    fn render(&mut self, out: &mut [f32], channels: usize, step: f64) {
        for frame in out.chunks_mut(channels.max(1)) {
            let t = self.position.floor() as u64;
            let mut value = 0.0f32;
            for buffer in &self.scheduled {
                if t >= buffer.start_frame && t < buffer.end_frame() {
                    value += buffer.samples[(t - buffer.start_frame) as usize];
                }
            }
            let value = value.clamp(-1.0, 1.0);
            for sample in frame.iter_mut() {
                *sample = value;
            }
            self.position += step;
        }

        let played = self.position.floor() as u64;
        self.scheduled.retain(|b| b.end_frame() > played);
    }
}

/// Default output device driven by cpal
pub struct DeviceOutput {
    timeline: Arc<Mutex<Timeline>>,
    shutdown_tx: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl DeviceOutput {
    /// Open the default output device with a timeline at `sample_rate`
    pub fn open(sample_rate: u32) -> CallResult<Self> {
        let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate)));
        let (ready_tx, ready_rx) = std_mpsc::channel::<CallResult<()>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let shared = Arc::clone(&timeline);

        std::thread::Builder::new()
            .name("callsim-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(shared, sample_rate) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CallError::Playback(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                let _ = shutdown_rx.recv();
                drop(stream);
                info!("Playback stream released");
            })
            .map_err(|e| CallError::Playback(format!("Failed to spawn playback thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| CallError::Playback("Playback thread exited before starting".to_string()))??;

        Ok(Self {
            timeline,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        })
    }

    fn with_timeline<R>(&self, f: impl FnOnce(&mut Timeline) -> R) -> R {
        let mut guard = match self.timeline.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

fn build_output_stream(timeline: Arc<Mutex<Timeline>>, sample_rate: u32) -> CallResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| CallError::Playback("No output device available".to_string()))?;

    let default_config = device
        .default_output_config()
        .map_err(|e| CallError::Playback(e.to_string()))?;

    // Ask for the playback rate directly; otherwise run at the device rate and step the timeline
    let wants = cpal::SampleRate(sample_rate);
    let exact = device.supported_output_configs().ok().and_then(|mut ranges| {
        ranges.find(|r| {
            r.sample_format() == cpal::SampleFormat::F32
                && r.min_sample_rate() <= wants
                && r.max_sample_rate() >= wants
        })
    });

    let (config, sample_format) = match exact {
        Some(range) => (range.with_sample_rate(wants).config(), cpal::SampleFormat::F32),
        None => (default_config.config(), default_config.sample_format()),
    };

    if sample_format != cpal::SampleFormat::F32 {
        return Err(CallError::Playback(format!(
            "Unsupported output sample format: {:?}",
            sample_format
        )));
    }

    let channels = config.channels as usize;
    let step = sample_rate as f64 / config.sample_rate.0 as f64;

    info!(
        "Opening output stream: {}Hz, {} channels (timeline {}Hz)",
        config.sample_rate.0, channels, sample_rate
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut guard = match timeline.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.render(data, channels, step);
            },
            |err| error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| CallError::Playback(e.to_string()))?;

    Ok(stream)
}

impl PlaybackOutput for DeviceOutput {
    fn now(&self) -> f64 {
        self.with_timeline(|t| t.now())
    }

    fn schedule(&self, buffer: PlaybackBuffer, start_at: f64) {
        self.with_timeline(|t| t.schedule(buffer, start_at));
    }

    fn silence(&self) {
        self.with_timeline(|t| t.scheduled.clear());
    }

    fn close(&self) {
        self.silence();
        let sender = match self.shutdown_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.close();
    }
}
