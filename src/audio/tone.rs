//! Local ringback tone played while dialing

use std::f32::consts::PI;
use std::sync::Arc;

use tracing::debug;

use super::output::{PlaybackBuffer, PlaybackOutput};

/// North American ringback: 440 Hz + 480 Hz, 2s on / 4s off
#[derive(Debug, Clone)]
pub struct RingTone {
    pub frequencies: [f32; 2],
    pub on_secs: f32,
    pub off_secs: f32,
    pub amplitude: f32,
}

impl Default for RingTone {
    fn default() -> Self {
        Self {
            frequencies: [440.0, 480.0],
            on_secs: 2.0,
            off_secs: 4.0,
            amplitude: 0.15,
        }
    }
}

impl RingTone {
    pub fn cycle_secs(&self) -> f32 {
        self.on_secs + self.off_secs
    }

    /// One ring burst (the audible part of a cycle)
    pub fn burst(&self, sample_rate: u32) -> Vec<f32> {
        let len = (self.on_secs * sample_rate as f32) as usize;
        // Short linear fade at both ends avoids clicks
        let fade = (sample_rate as usize / 100).min(len / 2).max(1);
        let per_tone = self.amplitude / self.frequencies.len() as f32;

        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let raw: f32 = self
                    .frequencies
                    .iter()
                    .map(|f| (2.0 * PI * f * t).sin() * per_tone)
                    .sum();
                let edge = i.min(len - 1 - i);
                let gain = if edge < fade { edge as f32 / fade as f32 } else { 1.0 };
                raw * gain
            })
            .collect()
    }
}

/// Schedules ring bursts on the playback output for the dialing phase
pub struct Ringer {
    output: Arc<dyn PlaybackOutput>,
    tone: RingTone,
    sample_rate: u32,
    ringing: bool,
}

impl Ringer {
    pub fn new(output: Arc<dyn PlaybackOutput>, sample_rate: u32) -> Self {
        Self {
            output,
            tone: RingTone::default(),
            sample_rate,
            ringing: false,
        }
    }

    /// Schedule enough ring cycles to cover `duration_secs`
    pub fn start(&mut self, duration_secs: f32) {
        let burst = self.tone.burst(self.sample_rate);
        let cycles = (duration_secs / self.tone.cycle_secs()).ceil().max(1.0) as usize;
        let now = self.output.now();

        for cycle in 0..cycles {
            let start = now + (cycle as f32 * self.tone.cycle_secs()) as f64;
            self.output
                .schedule(PlaybackBuffer::new(burst.clone(), self.sample_rate), start);
        }

        debug!("Ringing ({} cycles)", cycles);
        self.ringing = true;
    }

    pub fn stop(&mut self) {
        if self.ringing {
            self.output.silence();
            self.ringing = false;
        }
    }

    pub fn is_ringing(&self) -> bool {
        self.ringing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_length_and_level() {
        let tone = RingTone::default();
        let burst = tone.burst(24000);
        assert_eq!(burst.len(), 48000);
        assert!(burst.iter().all(|s| s.abs() <= tone.amplitude + 1e-6));
        assert!(burst.iter().any(|s| s.abs() > tone.amplitude / 2.0));
    }

    #[test]
    fn test_burst_fades_in_and_out() {
        let burst = RingTone::default().burst(24000);
        assert_eq!(burst[0], 0.0);
        assert_eq!(burst[burst.len() - 1], 0.0);
    }
}
