use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::AudioFrame;
use crate::error::{CallError, CallResult};

/// One flushed slice of recorded microphone audio
#[derive(Debug, Clone)]
pub struct RecordingChunk {
    /// Chunk number (0-indexed)
    pub chunk_index: usize,
    /// Start time in milliseconds since capture started
    pub start_ms: u64,
    /// Samples (16-bit PCM mono)
    pub samples: Vec<i16>,
}

/// Recorded chunks in arrival order
#[derive(Debug, Clone, Default)]
pub struct RecordingBuffer {
    pub sample_rate: u32,
    pub chunks: Vec<RecordingChunk>,
}

impl RecordingBuffer {
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.samples.is_empty())
    }

    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(|c| c.samples.len()).sum()
    }

    pub fn duration_secs(&self) -> f64 {
        self.sample_count() as f64 / self.sample_rate.max(1) as f64
    }

    /// Encode all chunks into a single WAV container
    pub fn encode_wav(&self) -> CallResult<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate.max(1),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for chunk in &self.chunks {
                for &sample in &chunk.samples {
                    writer.write_sample(sample)?;
                }
            }
            writer.finalize()?;
        }

        Ok(cursor.into_inner())
    }

    pub fn encode_base64(&self) -> CallResult<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.encode_wav()?))
    }
}

/// Local recorder
///
/// Collects raw microphone frames into fixed-interval chunks, independently of
/// the transport. Chunks become visible in the shared buffer at each flush;
/// the final partial chunk is flushed when the capture channel closes.
pub struct LocalRecorder {
    buffer: Arc<Mutex<Option<RecordingBuffer>>>,
    task: Option<JoinHandle<()>>,
}

impl LocalRecorder {
    pub fn start(mut frames: mpsc::Receiver<AudioFrame>, sample_rate: u32, flush_interval: Duration) -> Self {
        let buffer = Arc::new(Mutex::new(Some(RecordingBuffer {
            sample_rate,
            chunks: Vec::new(),
        })));
        let shared = Arc::clone(&buffer);
        let flush_ms = flush_interval.as_millis().max(1) as u64;

        info!("Local recorder started (flush every {}ms)", flush_ms);

        let task = tokio::spawn(async move {
            let mut current: Option<RecordingChunk> = None;
            let mut chunk_index = 0;

            while let Some(frame) = frames.recv().await {
                let rotate = match &current {
                    None => false,
                    Some(chunk) => frame.timestamp_ms.saturating_sub(chunk.start_ms) >= flush_ms,
                };
                if rotate {
                    if let Some(chunk) = current.take() {
                        Self::flush(&shared, chunk).await;
                    }
                }

                let chunk = current.get_or_insert_with(|| {
                    let chunk = RecordingChunk {
                        chunk_index,
                        start_ms: frame.timestamp_ms,
                        samples: Vec::new(),
                    };
                    chunk_index += 1;
                    chunk
                });
                chunk.samples.extend_from_slice(&frame.samples);
            }

            if let Some(chunk) = current.take() {
                Self::flush(&shared, chunk).await;
            }

            info!("Local recorder finished after {} chunks", chunk_index);
        });

        Self {
            buffer,
            task: Some(task),
        }
    }

    async fn flush(shared: &Arc<Mutex<Option<RecordingBuffer>>>, chunk: RecordingChunk) {
        debug!(
            "Recording chunk {} flushed: {:.1}s ({} samples)",
            chunk.chunk_index,
            chunk.start_ms as f64 / 1000.0,
            chunk.samples.len()
        );
        let mut guard = shared.lock().await;
        // A buffer already taken means the recording was consumed; late audio is dropped
        if let Some(buffer) = guard.as_mut() {
            buffer.chunks.push(chunk);
        }
    }

    /// Wait for the recorder to drain after capture has stopped
    pub async fn finish(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Recorder task panicked: {}", e);
            }
        }
    }

    /// Take the recording collected so far; a second call returns `None`
    pub async fn take(&self) -> Option<RecordingBuffer> {
        self.buffer.lock().await.take()
    }

    /// Take the recording and encode it as base64 WAV
    pub async fn take_base64(&self) -> CallResult<Option<String>> {
        match self.take().await {
            Some(buffer) if !buffer.is_empty() => buffer.encode_base64().map(Some),
            Some(_) => Ok(None),
            None => Err(CallError::Recording("Recording already consumed".to_string())),
        }
    }
}

impl Drop for LocalRecorder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
