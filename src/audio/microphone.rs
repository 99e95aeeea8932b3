//! Microphone capture using cpal.
//!
//! The cpal stream is owned by a dedicated thread for the lifetime of the
//! capture; its callback converts samples and hands frames to the session
//! through channels so the audio thread never blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, warn};

use super::backend::{CaptureBackend, CaptureConfig, CaptureStreams, DeviceLease, FrameSink};
use super::converter::FrameConverter;
use super::pcm::downmix_to_mono;
use crate::error::{CallError, CallResult};

/// Capture from the default input device
pub struct MicrophoneBackend {
    config: CaptureConfig,
    device_name: String,
    enabled: Arc<AtomicBool>,
    worker: Option<CaptureWorker>,
    lease: Option<DeviceLease>,
}

struct CaptureWorker {
    shutdown_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl MicrophoneBackend {
    /// Check that an input device exists and can report a config
    pub fn new(config: CaptureConfig, lease: DeviceLease) -> CallResult<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| CallError::MicrophoneUnavailable("No input device available".to_string()))?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let default_config = device.default_input_config()?;

        info!(
            "Microphone ready: {} (native {}Hz, {} channels)",
            device_name,
            default_config.sample_rate().0,
            default_config.channels()
        );

        Ok(Self {
            config,
            device_name,
            enabled: Arc::new(AtomicBool::new(true)),
            worker: None,
            lease: Some(lease),
        })
    }
}

/// Prefer a mono config at the target rate; fall back to the device default
fn choose_stream_config(
    device: &cpal::Device,
    target_rate: u32,
) -> CallResult<(cpal::StreamConfig, cpal::SampleFormat)> {
    if let Ok(ranges) = device.supported_input_configs() {
        let exact = ranges
            .filter(|r| r.channels() == 1)
            .filter(|r| r.min_sample_rate().0 <= target_rate && r.max_sample_rate().0 >= target_rate)
            .find(|r| matches!(r.sample_format(), cpal::SampleFormat::F32 | cpal::SampleFormat::I16));

        if let Some(range) = exact {
            let supported = range.with_sample_rate(cpal::SampleRate(target_rate));
            return Ok((supported.config(), supported.sample_format()));
        }
    }

    let default_config = device.default_input_config()?;
    Ok((default_config.config(), default_config.sample_format()))
}

fn build_stream(
    device: &cpal::Device,
    config: &CaptureConfig,
    enabled: Arc<AtomicBool>,
    sink: FrameSink,
) -> CallResult<cpal::Stream> {
    let (stream_config, sample_format) = choose_stream_config(device, config.target_sample_rate)?;
    let channels = stream_config.channels;

    info!(
        "Opening input stream: {}Hz, {} channels, {:?} -> {}Hz mono",
        stream_config.sample_rate.0, channels, sample_format, config.target_sample_rate
    );

    let mut converter = FrameConverter::new(
        stream_config.sample_rate.0,
        config.target_sample_rate,
        config.quantum_samples,
    );

    let mut handle = move |data: &[f32]| {
        if !enabled.load(Ordering::Relaxed) {
            converter.reset();
            return;
        }
        let mono = downmix_to_mono(data, channels);
        for frame in converter.push(&mono) {
            sink.emit(frame);
        }
    };

    let err_fn = |err: cpal::StreamError| error!("Input stream error: {}", err);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| handle(data),
            err_fn,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                handle(&samples)
            },
            err_fn,
            None,
        )?,
        other => {
            return Err(CallError::MicrophoneUnavailable(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    Ok(stream)
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneBackend {
    async fn start(&mut self) -> CallResult<CaptureStreams> {
        if self.worker.is_some() {
            return Err(CallError::MicrophoneUnavailable("Already capturing".to_string()));
        }

        info!("Starting microphone capture");

        let (sink, streams) = FrameSink::channel(self.config.channel_capacity);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<CallResult<()>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();
        let enabled = Arc::clone(&self.enabled);

        let thread = std::thread::Builder::new()
            .name("callsim-capture".to_string())
            .spawn(move || {
                let device = match cpal::default_host().default_input_device() {
                    Some(device) => device,
                    None => {
                        let _ = ready_tx.send(Err(CallError::MicrophoneUnavailable(
                            "Input device disappeared".to_string(),
                        )));
                        return;
                    }
                };

                let stream = match build_stream(&device, &config, enabled, sink) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CallError::MicrophoneUnavailable(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                // Hold the stream until asked to stop (or the backend is dropped)
                let _ = shutdown_rx.recv();
                drop(stream);
                info!("Microphone stream released");
            })
            .map_err(|e| CallError::MicrophoneUnavailable(format!("Failed to spawn capture thread: {}", e)))?;

        let failure = match ready_rx.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(CallError::MicrophoneUnavailable(
                "Capture thread exited before starting".to_string(),
            )),
        };
        if let Some(e) = failure {
            // The thread is exiting; join it off the runtime
            if tokio::task::spawn_blocking(move || thread.join()).await.is_err() {
                warn!("Capture thread could not be joined");
            }
            return Err(e);
        }

        self.worker = Some(CaptureWorker { shutdown_tx, thread });

        info!("Microphone capture started on {}", self.device_name);

        Ok(streams)
    }

    async fn stop(&mut self) -> CallResult<()> {
        if let Some(worker) = self.worker.take() {
            info!("Stopping microphone capture");
            let _ = worker.shutdown_tx.send(());
            let joined = tokio::task::spawn_blocking(move || worker.thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Capture thread did not shut down cleanly");
            }
        }

        // Release the device for the next call
        self.lease.take();

        Ok(())
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown_tx.send(());
        }
    }
}

/// List available input device names
pub fn list_input_devices() -> CallResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CallError::MicrophoneUnavailable(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}
