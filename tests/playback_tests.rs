// Integration tests for gapless playback scheduling

mod common;

use std::sync::Arc;

use callsim::audio::{PlaybackScheduler, Ringer};
use common::ManualOutput;

const RATE: u32 = 24000;

fn samples(secs: f64) -> Vec<i16> {
    vec![1000; (secs * RATE as f64) as usize]
}

#[test]
fn test_burst_arrival_queues_back_to_back() {
    let output = Arc::new(ManualOutput::default());
    output.set_now(7.25);
    let mut scheduler = PlaybackScheduler::new(output.clone(), RATE);

    // Three chunks arrive together: 0.5s, 1.5s, 0.25s
    let a = scheduler.play_chunk(&samples(0.5)).unwrap();
    let b = scheduler.play_chunk(&samples(1.5)).unwrap();
    let c = scheduler.play_chunk(&samples(0.25)).unwrap();

    assert!((a.start - 7.25).abs() < 1e-9);
    assert!((b.start - 7.75).abs() < 1e-9);
    assert!((c.start - 9.25).abs() < 1e-9);
    assert_eq!(output.schedule_log().len(), 3);
}

#[test]
fn test_late_chunk_starts_immediately() {
    let output = Arc::new(ManualOutput::default());
    let mut scheduler = PlaybackScheduler::new(output.clone(), RATE);

    let first = scheduler.play_chunk(&samples(0.5)).unwrap();
    assert_eq!(first.start, 0.0);

    // Playback drained and the clock moved on before the next chunk
    output.set_now(3.0);
    let second = scheduler.play_chunk(&samples(0.5)).unwrap();
    assert_eq!(second.start, 3.0);
    assert!(scheduler.is_playing());
    assert!((scheduler.next_start() - 3.5).abs() < 1e-9);
}

#[test]
fn test_stop_resets_cursor() {
    let output = Arc::new(ManualOutput::default());
    let mut scheduler = PlaybackScheduler::new(output.clone(), RATE);
    scheduler.play_chunk(&samples(2.0));

    scheduler.stop();
    assert_eq!(output.silence_count(), 1);

    output.set_now(0.1);
    let next = scheduler.play_chunk(&samples(0.5)).unwrap();
    assert!((next.start - 0.1).abs() < 1e-9);
}

#[test]
fn test_ringer_covers_ring_duration() {
    let output = Arc::new(ManualOutput::default());
    output.set_now(1.0);
    let mut ringer = Ringer::new(output.clone(), RATE);

    ringer.start(13.0);
    let log = output.schedule_log();
    // 6s cadence: bursts at 1, 7 and 13
    assert_eq!(log.len(), 3);
    assert!((log[1].0 - 7.0).abs() < 1e-6);
    assert!((log[0].1 - 2.0).abs() < 1e-6);
    assert!(ringer.is_ringing());

    ringer.stop();
    ringer.stop();
    assert_eq!(output.silence_count(), 1);
    assert!(!ringer.is_ringing());
}
