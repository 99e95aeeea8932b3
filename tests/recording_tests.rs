// Integration tests for the local call recording
//
// These tests verify that captured frames are collected into chunks and
// materialized as a single WAV recording.

use anyhow::Result;
use base64::Engine;
use callsim::audio::{AudioFrame, LocalRecorder};
use std::io::Cursor;
use std::time::Duration;
use tokio::sync::mpsc;

fn frame(index: u64, value: i16) -> AudioFrame {
    // 100ms frames at 16kHz
    AudioFrame {
        samples: vec![value; 1600],
        sample_rate: 16000,
        timestamp_ms: index * 100,
    }
}

#[tokio::test]
async fn test_recording_decodes_as_wav() -> Result<()> {
    let (tx, rx) = mpsc::channel(100);
    let mut recorder = LocalRecorder::start(rx, 16000, Duration::from_millis(1000));

    // 3.5 seconds of audio
    for i in 0..35 {
        tx.send(frame(i, (i as i16) * 10)).await?;
    }
    drop(tx);
    recorder.finish().await;

    let encoded = recorder.take_base64().await?.expect("recording should not be empty");
    let wav = base64::engine::general_purpose::STANDARD.decode(encoded)?;

    let mut reader = hound::WavReader::new(Cursor::new(wav))?;
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let samples: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;
    assert_eq!(samples.len(), 35 * 1600);
    // Chunks are stitched back in capture order
    assert_eq!(samples[0], 0);
    assert_eq!(samples[1600 * 20], 200);
    assert_eq!(samples[samples.len() - 1], 340);

    Ok(())
}

#[tokio::test]
async fn test_final_partial_chunk_is_kept() -> Result<()> {
    let (tx, rx) = mpsc::channel(100);
    let mut recorder = LocalRecorder::start(rx, 16000, Duration::from_millis(1000));

    // 1.2 seconds: one full chunk plus a 200ms tail
    for i in 0..12 {
        tx.send(frame(i, 1)).await?;
    }
    drop(tx);
    recorder.finish().await;

    let buffer = recorder.take().await.expect("buffer available");
    assert_eq!(buffer.chunks.len(), 2);
    assert_eq!(buffer.chunks[1].samples.len(), 2 * 1600);
    assert!((buffer.duration_secs() - 1.2).abs() < 1e-9);

    Ok(())
}
