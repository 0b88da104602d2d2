//! `ReplaySource`: paced playback of a mono waveform as an I2S-like stream.
//!
//! A pacing thread writes the waveform (duplicated onto every channel) into an
//! SPSC ring at the configured sample rate. When a receive is armed and the
//! ring holds enough samples, the thread raises `TransferEvent::Complete`;
//! `complete_transfer` then pops exactly the requested samples.
//!
//! The pacing thread never allocates after start-up: the frame scratch buffer
//! is sized once, `push_slice` is lock-free, and the event channel is
//! unbounded.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::audio::{AudioSource, TransferEvent};
use crate::buffering::{
    create_sample_ring, Consumer, Observer, Producer, SampleConsumer, SampleProducer,
};
use crate::error::{Result, SwwError};
use crate::ipc::events::TransferStatus;

/// Back-off while the ring is full in non-realtime mode.
const FULL_RING_BACKOFF: Duration = Duration::from_micros(200);

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Hz. Default: 16000.
    pub sample_rate: u32,
    /// Interleaved channels produced per frame. Default: 2.
    pub channels: usize,
    /// Frames written per pacing tick. Default: 256 (16 ms).
    pub tick_frames: usize,
    /// Pace writes to wall-clock time. When `false`, the thread writes as fast
    /// as the ring drains and never drops samples.
    pub realtime: bool,
    /// Restart from the beginning when the waveform runs out.
    pub looping: bool,
    /// Ring capacity in raw samples. Default: 16384.
    pub ring_capacity: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 2,
            tick_frames: 256,
            realtime: true,
            looping: false,
            ring_capacity: 16_384,
        }
    }
}

/// State shared between the engine side and the pacing thread.
#[derive(Default)]
struct ReplayShared {
    running: AtomicBool,
    exhausted: AtomicBool,
    /// Raw samples requested by the armed receive; 0 when none is armed.
    pending: AtomicUsize,
    dropped: AtomicUsize,
}

pub struct ReplaySource {
    consumer: SampleConsumer,
    shared: Arc<ReplayShared>,
    events: Sender<TransferEvent>,
    channels: usize,
    thread: Option<JoinHandle<()>>,
}

impl ReplaySource {
    /// Start the pacing thread. Returns the source and the receiver on which
    /// its completion events arrive.
    ///
    /// # Errors
    /// `SwwError::InvalidConfig` for zero channels, ticks or rate, or a ring
    /// smaller than one tick; `SwwError::Io` if the thread cannot be spawned.
    pub fn spawn(
        waveform: Vec<i16>,
        config: ReplayConfig,
    ) -> Result<(Self, Receiver<TransferEvent>)> {
        let tick_len = config.tick_frames * config.channels;
        if config.channels == 0 || config.tick_frames == 0 || config.sample_rate == 0 {
            return Err(SwwError::InvalidConfig(
                "replay needs non-zero channels, tick and sample rate".into(),
            ));
        }
        if config.ring_capacity < tick_len {
            return Err(SwwError::InvalidConfig(format!(
                "replay ring ({}) smaller than one tick ({tick_len})",
                config.ring_capacity
            )));
        }

        let (producer, consumer) = create_sample_ring(config.ring_capacity);
        let (events, rx) = unbounded();
        let shared = Arc::new(ReplayShared::default());
        shared.running.store(true, Ordering::SeqCst);

        let channels = config.channels;
        let thread = {
            let shared = Arc::clone(&shared);
            let events = events.clone();
            thread::Builder::new()
                .name("sww-replay".into())
                .spawn(move || pace(waveform, config, producer, shared, events))?
        };

        Ok((
            Self {
                consumer,
                shared,
                events,
                channels,
                thread: Some(thread),
            },
            rx,
        ))
    }

    /// Raw samples discarded because the ring was full (realtime mode only).
    pub fn dropped_samples(&self) -> usize {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.shared.exhausted.load(Ordering::Acquire)
    }

    /// Serve a receive from what is left in the ring once playback has ended.
    fn complete_from_backlog(&self, len: usize) -> TransferStatus {
        if self.consumer.occupied_len() < len {
            return TransferStatus::Timeout;
        }
        let _ = self.events.send(TransferEvent::Complete);
        TransferStatus::Ok
    }
}

impl AudioSource for ReplaySource {
    fn request_receive(&mut self, len: usize) -> TransferStatus {
        if len == 0 {
            return TransferStatus::Error;
        }
        if self.is_exhausted() {
            return self.complete_from_backlog(len);
        }
        if self
            .shared
            .pending
            .compare_exchange(0, len, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TransferStatus::Busy;
        }
        // The pacing thread may have finished between the check and the arm.
        if self.is_exhausted() && self.shared.pending.swap(0, Ordering::AcqRel) != 0 {
            return self.complete_from_backlog(len);
        }
        TransferStatus::Ok
    }

    fn complete_transfer(&mut self, dst: &mut [i16]) -> usize {
        self.consumer.pop_slice(dst)
    }

    fn abort(&mut self) -> TransferStatus {
        if self.shared.pending.swap(0, Ordering::AcqRel) != 0 {
            let _ = self.events.send(TransferEvent::Aborted);
        }
        TransferStatus::Ok
    }

    fn channels(&self) -> usize {
        self.channels
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("replay thread panicked");
            }
        }
    }
}

/// Raise `Complete` if an armed receive can now be satisfied.
fn signal_if_ready(
    producer: &SampleProducer,
    shared: &ReplayShared,
    events: &Sender<TransferEvent>,
) {
    let want = shared.pending.load(Ordering::Acquire);
    if want > 0
        && producer.occupied_len() >= want
        && shared
            .pending
            .compare_exchange(want, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    {
        let _ = events.send(TransferEvent::Complete);
    }
}

fn pace(
    waveform: Vec<i16>,
    config: ReplayConfig,
    mut producer: SampleProducer,
    shared: Arc<ReplayShared>,
    events: Sender<TransferEvent>,
) {
    let channels = config.channels;
    let tick = Duration::from_secs_f64(config.tick_frames as f64 / config.sample_rate as f64);
    let mut scratch = vec![0i16; config.tick_frames * channels];
    let mut pos = 0usize;
    let mut next_tick = Instant::now();

    info!(
        frames = waveform.len(),
        sample_rate = config.sample_rate,
        realtime = config.realtime,
        "replay started"
    );

    while shared.running.load(Ordering::Relaxed) {
        if config.realtime {
            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            }
            next_tick += tick;
        } else if producer.vacant_len() < scratch.len() {
            signal_if_ready(&producer, &shared, &events);
            thread::sleep(FULL_RING_BACKOFF);
            continue;
        }

        if pos >= waveform.len() {
            if config.looping && !waveform.is_empty() {
                pos = 0;
            } else {
                break;
            }
        }

        let frames = config.tick_frames.min(waveform.len() - pos);
        for (frame, &sample) in scratch
            .chunks_exact_mut(channels)
            .zip(&waveform[pos..pos + frames])
        {
            frame.fill(sample);
        }
        let len = frames * channels;
        let pushed = producer.push_slice(&scratch[..len]);
        if pushed < len {
            shared.dropped.fetch_add(len - pushed, Ordering::Relaxed);
        }
        pos += frames;

        signal_if_ready(&producer, &shared, &events);
    }

    shared.exhausted.store(true, Ordering::Release);
    // Flush whatever is already buffered, then fail a receive that can never fill.
    signal_if_ready(&producer, &shared, &events);
    if shared.pending.swap(0, Ordering::AcqRel) != 0 {
        let _ = events.send(TransferEvent::Error(TransferStatus::Timeout));
    }
    debug!(
        dropped = shared.dropped.load(Ordering::Relaxed),
        "replay finished"
    );
}
