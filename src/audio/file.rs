use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hound::WavReader;
use tokio::task::JoinHandle;
use tracing::info;

use super::backend::{CaptureBackend, CaptureConfig, CaptureStreams, DeviceLease, FrameSink};
use super::converter::FrameConverter;
use super::pcm::downmix_to_mono;
use crate::error::{CallError, CallResult};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> CallResult<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).map_err(|e| {
            CallError::MicrophoneUnavailable(format!("Failed to open WAV file {}: {}", path.display(), e))
        })?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(CallError::MicrophoneUnavailable(format!(
                "Expected 16-bit PCM WAV, got {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CallError::MicrophoneUnavailable(format!("Failed to read audio samples: {}", e)))?;

        let duration_seconds = samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono float samples at the file's native rate
    pub fn to_mono_f32(&self) -> Vec<f32> {
        let floats: Vec<f32> = self.samples.iter().map(|&s| s as f32 / 32768.0).collect();
        downmix_to_mono(&floats, self.channels)
    }
}

/// Replays a WAV file as if it were the microphone, paced in real time
pub struct FileBackend {
    file: Arc<AudioFile>,
    config: CaptureConfig,
    enabled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    lease: Option<DeviceLease>,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>, config: CaptureConfig, lease: DeviceLease) -> CallResult<Self> {
        let file = AudioFile::open(path)?;
        Ok(Self {
            file: Arc::new(file),
            config,
            enabled: Arc::new(AtomicBool::new(true)),
            task: None,
            lease: Some(lease),
        })
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileBackend {
    async fn start(&mut self) -> CallResult<CaptureStreams> {
        if self.task.is_some() {
            return Err(CallError::MicrophoneUnavailable("Already capturing".to_string()));
        }

        info!("Starting file capture: {}", self.file.path);

        let (sink, streams) = FrameSink::channel(self.config.channel_capacity);
        let file = Arc::clone(&self.file);
        let config = self.config.clone();
        let enabled = Arc::clone(&self.enabled);

        let task = tokio::spawn(async move {
            // Feed the converter in 10ms slices of the source, one slice per tick
            let slice = (file.sample_rate as usize / 100).max(1);
            let mono = file.to_mono_f32();
            let mut converter =
                FrameConverter::new(file.sample_rate, config.target_sample_rate, config.quantum_samples);
            let mut ticker = tokio::time::interval(Duration::from_millis(10));

            // Playback holds at the start until the track is first enabled;
            // after that a disabled track skips ahead like a muted microphone
            let mut position = 0;
            let mut live = false;
            while position < mono.len() {
                ticker.tick().await;
                if sink.is_closed() {
                    break;
                }
                let end = (position + slice).min(mono.len());
                if !enabled.load(Ordering::SeqCst) {
                    converter.reset();
                    if live {
                        position = end;
                    }
                    continue;
                }
                live = true;
                for frame in converter.push(&mono[position..end]) {
                    sink.emit(frame);
                }
                position = end;
            }

            info!("File capture reached end of {}", file.path);
        });

        self.task = Some(task);
        Ok(streams)
    }

    async fn stop(&mut self) -> CallResult<()> {
        if let Some(task) = self.task.take() {
            info!("Stopping file capture");
            task.abort();
            let _ = task.await;
        }
        self.lease.take();
        Ok(())
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        "wav file"
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
