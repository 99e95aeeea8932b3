pub mod backend;
pub mod converter;
pub mod file;
pub mod microphone;
pub mod output;
pub mod pcm;
pub mod playback;
pub mod recorder;
pub mod tone;

pub use backend::{
    AudioFrame, AudioSource, CaptureBackend, CaptureConfig, CaptureStreams, DeviceLease, DeviceProvider,
    FrameSink, SystemDevices,
};
pub use file::{AudioFile, FileBackend};
pub use microphone::MicrophoneBackend;
pub use output::{DeviceOutput, PlaybackBuffer, PlaybackOutput};
pub use playback::{PlaybackScheduler, ScheduledChunk};
pub use recorder::{LocalRecorder, RecordingBuffer, RecordingChunk};
pub use tone::{RingTone, Ringer};
