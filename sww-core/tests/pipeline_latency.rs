use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use sww_core::{
    AcquisitionState, CaptureCompleteEvent, DetectionEvent, EngineConfig, ModelHandle,
    ReplayConfig, ReplaySource, StubModel, TransferEvent, WakewordEngine,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

fn tone_burst(len: usize, start: usize, end: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            if (start..end).contains(&i) {
                let t = i as f32 / 16_000.0;
                ((2.0 * std::f32::consts::PI * 3_000.0 * t).sin() * 30_000.0) as i16
            } else {
                0
            }
        })
        .collect()
}

fn fast_replay(waveform: Vec<i16>) -> (ReplaySource, Receiver<TransferEvent>) {
    ReplaySource::spawn(
        waveform,
        ReplayConfig {
            realtime: false,
            ..ReplayConfig::default()
        },
    )
    .expect("replay source")
}

fn engine_over(waveform: Vec<i16>) -> (WakewordEngine, Receiver<TransferEvent>) {
    let (source, events) = fast_replay(waveform);
    let engine = WakewordEngine::new(
        EngineConfig::default(),
        ModelHandle::new(StubModel::default()),
        Box::new(source),
    )
    .expect("engine");
    (engine, events)
}

/// Hand transfer events to the engine until `done` returns a value.
fn pump_until<T>(
    engine: &mut WakewordEngine,
    events: &Receiver<TransferEvent>,
    timeout: Duration,
    mut done: impl FnMut(&mut WakewordEngine) -> Option<T>,
) -> T {
    let start = Instant::now();
    loop {
        if let Some(value) = done(engine) {
            return value;
        }
        if start.elapsed() >= timeout {
            panic!("timed out; engine: {engine:?}");
        }
        if let Ok(ev) = events.recv_timeout(Duration::from_millis(20)) {
            engine.on_transfer_event(ev);
        }
    }
}

fn try_event<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match rx.try_recv() {
            Ok(ev) => return Some(ev),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("event channel closed unexpectedly"),
        }
    }
}

#[test]
fn replayed_tone_burst_raises_one_detection() {
    let (mut engine, events) = engine_over(tone_burst(24_000, 8_000, 16_000));
    let mut detections = engine.subscribe_detections();

    engine.start().expect("start");
    let first: DetectionEvent = pump_until(&mut engine, &events, Duration::from_secs(5), |_| {
        try_event(&mut detections)
    });
    assert!(first.score > 110);
    assert!(first.cycle > 0, "silence lead-in must not detect");

    // Let the burst finish so a second rising edge would have shown up.
    pump_until(&mut engine, &events, Duration::from_secs(5), |e| {
        (e.diagnostics_snapshot().chunks_received >= 40).then_some(())
    });
    assert!(try_event(&mut detections).is_none(), "detection must be edge-triggered");

    let report = engine.stop().expect("stop");
    assert_eq!(report.previous, AcquisitionState::Streaming);
    assert!(report.activations.iter().any(|&s| s > 110));
    assert!(report.activations.iter().any(|&s| s <= 110));

    pump_until(&mut engine, &events, Duration::from_secs(2), |e| {
        (e.state().0 == AcquisitionState::Idle).then_some(())
    });

    let diag = engine.diagnostics_snapshot();
    assert_eq!(diag.detections, 1);
    assert_eq!(diag.inference_errors, 0);
    assert_eq!(diag.windows_processed, diag.inference_calls);
}

#[test]
fn capture_records_left_and_right_samples_in_order() {
    let wave: Vec<i16> = (0..4_000).map(|i| (i % 1_000) as i16).collect();
    let (mut engine, events) = engine_over(wave);
    let mut captures = engine.subscribe_captures();

    let request = engine.capture(Some(5_000)).expect("capture");
    assert_eq!(request.samples, 5_000);
    assert!(!request.clamped);

    let done: CaptureCompleteEvent =
        pump_until(&mut engine, &events, Duration::from_secs(5), |_| {
            try_event(&mut captures)
        });
    assert_eq!(done.samples_requested, 5_000);
    assert!(done.samples_read <= 5_000);
    assert_eq!(done.samples_read % engine.config().chunk_len(), 0);
    assert_eq!(engine.state().0, AcquisitionState::Idle);

    let recorded = engine.recording().expect("recording buffer");
    assert_eq!(recorded.len(), done.samples_read);
    for (i, frame) in recorded.chunks_exact(2).enumerate() {
        assert_eq!(frame, [(i % 1_000) as i16; 2]);
    }
}

#[test]
fn cycles_finish_well_inside_the_chunk_period() {
    let (mut engine, events) = engine_over(vec![0; 16_000]);
    engine.warm_up().expect("warm up");
    engine.start().expect("start");

    pump_until(&mut engine, &events, Duration::from_secs(5), |e| {
        (e.diagnostics_snapshot().chunks_received >= 20).then_some(())
    });
    engine.stop().expect("stop");

    let diag = engine.diagnostics_snapshot();
    let period_us = engine.config().chunk_period().as_micros() as u64;
    assert!(
        diag.max_cycle_us < period_us,
        "slowest cycle {}us exceeds the {}us chunk period",
        diag.max_cycle_us,
        period_us
    );
    assert_eq!(diag.deadline_misses, 0);
}
