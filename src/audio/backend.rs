use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::audio::file::FileBackend;
use crate::audio::microphone::MicrophoneBackend;
use crate::audio::output::{DeviceOutput, PlaybackOutput};
use crate::config::AudioConfig;
use crate::error::{CallError, CallResult};

/// Outbound audio frame (16-bit PCM, mono)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// One processing quantum of samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / self.sample_rate.max(1) as u64
    }
}

/// Configuration for a capture backend
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate (advisory to the device; resampled if needed)
    pub target_sample_rate: u32,
    /// Samples per emitted frame
    pub quantum_samples: usize,
    /// Channel capacity for each consumer (frames)
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // Endpoint expects 16kHz
            quantum_samples: 128,      // One processing quantum
            channel_capacity: 512,
        }
    }
}

impl From<&AudioConfig> for CaptureConfig {
    fn from(audio: &AudioConfig) -> Self {
        Self {
            target_sample_rate: audio.send_sample_rate,
            quantum_samples: audio.quantum_samples,
            channel_capacity: audio.channel_capacity,
        }
    }
}

/// Receivers handed out by a started capture backend.
///
/// Every frame goes to both: `frames` feeds the transport, `recording`
/// feeds the local recorder.
#[derive(Debug)]
pub struct CaptureStreams {
    pub frames: mpsc::Receiver<AudioFrame>,
    pub recording: mpsc::Receiver<AudioFrame>,
}

/// Sending half shared with the producer (audio thread or file task)
#[derive(Debug, Clone)]
pub struct FrameSink {
    frames: mpsc::Sender<AudioFrame>,
    recording: mpsc::Sender<AudioFrame>,
}

impl FrameSink {
    /// Create a sink/streams pair with the given per-consumer capacity
    pub fn channel(capacity: usize) -> (Self, CaptureStreams) {
        let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
        let (recording_tx, recording_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                frames: frames_tx,
                recording: recording_tx,
            },
            CaptureStreams {
                frames: frames_rx,
                recording: recording_rx,
            },
        )
    }

    /// Non-blocking fan-out; a full consumer drops the frame rather than stall the producer
    pub fn emit(&self, frame: AudioFrame) {
        if let Err(e) = self.recording.try_send(frame.clone()) {
            debug!("Recorder channel dropped frame: {}", e);
        }
        if let Err(e) = self.frames.try_send(frame) {
            debug!("Transport channel dropped frame: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed() && self.recording.is_closed()
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - `MicrophoneBackend`: default input device via cpal
/// - `FileBackend`: WAV file replayed in real time
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns the channel receivers that will receive audio frames
    async fn start(&mut self) -> CallResult<CaptureStreams>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> CallResult<()>;

    /// Enable or disable the capture track; a disabled track produces no frames
    fn set_enabled(&self, enabled: bool);

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Source of audio devices for a call
pub trait DeviceProvider: Send + Sync {
    /// Acquire the capture device; fails with `MicrophoneUnavailable`
    fn open_capture(&self, config: &CaptureConfig) -> CallResult<Box<dyn CaptureBackend>>;

    /// Playback output, created on first use and reused afterwards
    fn output(&self) -> CallResult<Arc<dyn PlaybackOutput>>;
}

/// Exclusive hold on a capture device, released on drop
#[derive(Debug)]
pub struct DeviceLease {
    in_use: Arc<AtomicBool>,
}

impl DeviceLease {
    pub fn acquire(in_use: &Arc<AtomicBool>, device: &str) -> CallResult<Self> {
        if in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CallError::MicrophoneUnavailable(format!(
                "{} is already in use by another call",
                device
            )));
        }
        Ok(Self {
            in_use: Arc::clone(in_use),
        })
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default microphone input
    Microphone,
    /// WAV file played back as if it were the microphone
    File(String),
}

/// Devices backed by the host audio system
pub struct SystemDevices {
    source: AudioSource,
    output_sample_rate: u32,
    capture_in_use: Arc<AtomicBool>,
    output: Mutex<Option<Arc<DeviceOutput>>>,
}

impl SystemDevices {
    pub fn new(source: AudioSource, output_sample_rate: u32) -> Self {
        Self {
            source,
            output_sample_rate,
            capture_in_use: Arc::new(AtomicBool::new(false)),
            output: Mutex::new(None),
        }
    }

    /// Close the shared output; a later call reopens it
    pub fn close(&self) {
        let output = match self.output.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(output) = output {
            info!("Closing playback output");
            output.close();
        }
    }
}

impl DeviceProvider for SystemDevices {
    fn open_capture(&self, config: &CaptureConfig) -> CallResult<Box<dyn CaptureBackend>> {
        match &self.source {
            AudioSource::Microphone => {
                let lease = DeviceLease::acquire(&self.capture_in_use, "microphone")?;
                Ok(Box::new(MicrophoneBackend::new(config.clone(), lease)?))
            }
            AudioSource::File(path) => {
                let lease = DeviceLease::acquire(&self.capture_in_use, path)?;
                Ok(Box::new(FileBackend::open(path, config.clone(), lease)?))
            }
        }
    }

    fn output(&self) -> CallResult<Arc<dyn PlaybackOutput>> {
        let mut guard = self
            .output
            .lock()
            .map_err(|_| CallError::Playback("output lock poisoned".to_string()))?;

        if let Some(output) = guard.as_ref() {
            return Ok(Arc::clone(output) as Arc<dyn PlaybackOutput>);
        }

        let output = Arc::new(DeviceOutput::open(self.output_sample_rate)?);
        *guard = Some(Arc::clone(&output));
        Ok(output as Arc<dyn PlaybackOutput>)
    }
}

impl Drop for SystemDevices {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: i16) -> AudioFrame {
        AudioFrame {
            samples: vec![value; 128],
            sample_rate: 16000,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(frame(0).duration_ms(), 8);
    }

    #[test]
    fn test_sink_fans_out_to_both_consumers() {
        let (sink, mut streams) = FrameSink::channel(4);
        sink.emit(frame(7));

        assert_eq!(streams.frames.try_recv().unwrap().samples[0], 7);
        assert_eq!(streams.recording.try_recv().unwrap().samples[0], 7);
    }

    #[test]
    fn test_sink_drops_when_consumer_full() {
        let (sink, mut streams) = FrameSink::channel(1);
        sink.emit(frame(1));
        sink.emit(frame(2));

        assert_eq!(streams.frames.try_recv().unwrap().samples[0], 1);
        assert!(streams.frames.try_recv().is_err());
    }

    #[test]
    fn test_lease_is_exclusive_until_dropped() {
        let in_use = Arc::new(AtomicBool::new(false));
        let lease = DeviceLease::acquire(&in_use, "mic").unwrap();
        assert!(matches!(
            DeviceLease::acquire(&in_use, "mic"),
            Err(CallError::MicrophoneUnavailable(_))
        ));
        drop(lease);
        assert!(DeviceLease::acquire(&in_use, "mic").is_ok());
    }
}
