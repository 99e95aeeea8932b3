use std::sync::Arc;

use tracing::debug;

use super::output::{PlaybackBuffer, PlaybackOutput};
use super::pcm::pcm16_to_f32;

/// Where a chunk landed on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub start: f64,
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Gapless playback scheduler
///
/// Each chunk starts at `max(now, end of previous chunk)`, so bursts queue
/// back-to-back and late chunks start immediately. The only state is the
/// next-available start time.
pub struct PlaybackScheduler {
    output: Arc<dyn PlaybackOutput>,
    sample_rate: u32,
    next_start: f64,
    chunks_scheduled: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn PlaybackOutput>, sample_rate: u32) -> Self {
        Self {
            output,
            sample_rate,
            next_start: 0.0,
            chunks_scheduled: 0,
        }
    }

    /// Schedule one chunk of 16-bit PCM at the receive rate
    pub fn play_chunk(&mut self, pcm: &[i16]) -> Option<ScheduledChunk> {
        if pcm.is_empty() {
            return None;
        }

        let buffer = PlaybackBuffer::new(pcm16_to_f32(pcm), self.sample_rate);
        let duration = buffer.duration();
        let start = self.output.now().max(self.next_start);

        self.output.schedule(buffer, start);
        self.next_start = start + duration;
        self.chunks_scheduled += 1;

        debug!(
            "Scheduled chunk {} at {:.3}s ({:.3}s)",
            self.chunks_scheduled, start, duration
        );

        Some(ScheduledChunk { start, duration })
    }

    /// Cut off anything still queued and reset the cursor
    pub fn stop(&mut self) {
        self.output.silence();
        self.next_start = 0.0;
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn chunks_scheduled(&self) -> u64 {
        self.chunks_scheduled
    }

    /// Whether scheduled audio is still playing
    pub fn is_playing(&self) -> bool {
        self.next_start > self.output.now()
    }
}
