// Sample converter run on the capture thread: resample, clamp, quantize to
// 16-bit PCM and cut into fixed-size frames.

use std::time::Instant;

use super::backend::AudioFrame;
use super::pcm::{f32_to_pcm16, LinearResampler};

pub struct FrameConverter {
    resampler: LinearResampler,
    target_sample_rate: u32,
    quantum_samples: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    started_at: Instant,
    emitted_samples: u64,
}

impl FrameConverter {
    pub fn new(input_sample_rate: u32, target_sample_rate: u32, quantum_samples: usize) -> Self {
        let quantum_samples = quantum_samples.max(1);
        Self {
            resampler: LinearResampler::new(input_sample_rate, target_sample_rate),
            target_sample_rate,
            quantum_samples,
            pending: Vec::with_capacity(quantum_samples * 2),
            scratch: Vec::new(),
            started_at: Instant::now(),
            emitted_samples: 0,
        }
    }

    /// Feed mono samples at the input rate; returns every completed frame
    pub fn push(&mut self, mono: &[f32]) -> Vec<AudioFrame> {
        self.scratch.clear();
        self.resampler.process(mono, &mut self.scratch);
        self.pending.extend_from_slice(&self.scratch);

        let mut frames = Vec::new();
        while self.pending.len() >= self.quantum_samples {
            let quantum: Vec<f32> = self.pending.drain(..self.quantum_samples).collect();
            frames.push(self.frame(&quantum));
        }
        frames
    }

    /// Drop any partial quantum (used when the track is disabled)
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn frame(&mut self, quantum: &[f32]) -> AudioFrame {
        // Timestamps follow the sample clock; wall time only anchors the first frame
        let offset_ms = if self.emitted_samples == 0 {
            let elapsed = self.started_at.elapsed().as_millis() as u64;
            self.emitted_samples = elapsed * self.target_sample_rate as u64 / 1000;
            elapsed
        } else {
            self.emitted_samples * 1000 / self.target_sample_rate.max(1) as u64
        };
        self.emitted_samples += quantum.len() as u64;

        AudioFrame {
            samples: f32_to_pcm16(quantum),
            sample_rate: self.target_sample_rate,
            timestamp_ms: offset_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_fixed_size_frames() {
        let mut converter = FrameConverter::new(16000, 16000, 128);

        let frames = converter.push(&vec![0.25; 300]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.samples.len() == 128));
        assert!(frames.iter().all(|f| f.sample_rate == 16000));

        // 44 samples carried over, 84 more complete the next quantum
        let frames = converter.push(&vec![0.25; 84]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_clamps_before_quantizing() {
        let mut converter = FrameConverter::new(16000, 16000, 4);
        let frames = converter.push(&[2.0, -2.0, 0.5, -0.5]);
        assert_eq!(frames[0].samples, vec![32767, -32768, 16383, -16384]);
    }

    #[test]
    fn test_timestamps_advance_with_samples() {
        let mut converter = FrameConverter::new(16000, 16000, 160);
        let frames = converter.push(&vec![0.0; 480]);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].timestamp_ms - frames[0].timestamp_ms, 10);
        assert_eq!(frames[2].timestamp_ms - frames[1].timestamp_ms, 10);
    }

    #[test]
    fn test_resamples_to_target_rate() {
        let mut converter = FrameConverter::new(48000, 16000, 128);
        let frames = converter.push(&vec![0.1; 48000]);
        let total: usize = frames.iter().map(|f| f.samples.len()).sum();
        assert!(total >= 15872 && total <= 16000, "got {}", total);
    }
}
