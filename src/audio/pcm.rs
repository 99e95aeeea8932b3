//! PCM sample conversion and the streaming resampler used on the capture thread.

use base64::Engine;

use crate::error::{CallError, CallResult};

/// Convert one float sample to 16-bit PCM.
///
/// Input is clamped to [-1, 1] first; negative values scale by 32768 and
/// non-negative values by 32767 so both ends of the range are reachable.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_i16(s)).collect()
}

pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| i16_to_f32(s)).collect()
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode little-endian PCM bytes; a trailing odd byte is ignored
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn encode_base64_pcm(samples: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_to_le_bytes(samples))
}

pub fn decode_base64_pcm(data: &str) -> CallResult<Vec<i16>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| CallError::Parse(format!("invalid base64 audio: {}", e)))?;
    Ok(le_bytes_to_pcm16(&bytes))
}

/// Average interleaved channels down to mono
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler that keeps its phase across calls,
/// so consecutive device buffers resample as one continuous stream.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    step: f64,
    pos: f64,
    prev: Option<f32>,
}

impl LinearResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            step: input_rate as f64 / output_rate.max(1) as f64,
            pos: 0.0,
            prev: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        (self.step - 1.0).abs() < f64::EPSILON
    }

    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }
        if input.is_empty() {
            return;
        }

        // Index 0 is the last sample of the previous call when there was one
        let base: Vec<f32> = self.prev.into_iter().chain(input.iter().copied()).collect();
        let last = base.len() - 1;

        while self.pos < last as f64 {
            let i = self.pos.floor() as usize;
            let frac = (self.pos - i as f64) as f32;
            out.push(base[i] * (1.0 - frac) + base[i + 1] * frac);
            self.pos += self.step;
        }

        self.pos -= last as f64;
        self.prev = Some(base[last]);
    }
}
