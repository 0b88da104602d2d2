//! `WakewordEngine`: acquisition state machine and pipeline owner.
//!
//! ## Lifecycle
//!
//! ```text
//!            start()                      stop()
//!   Idle ───────────────► Streaming ───────────────► Stopping
//!    │  ▲                                               │
//!    │  │ capture target reached        event drains    │
//!    │  └──────────── FileCapture ◄─┐   the transfer    │
//!    │   capture(n)                 │                   │
//!    └──────────────────────────────┘  Idle ◄───────────┘
//! ```
//!
//! Foreground commands (`start`, `stop`, `capture`) and transfer completions
//! (`on_transfer_event`) both take `&mut self`, so the two never interleave
//! inside one call. The source raises completions on its own thread and they
//! reach the engine over a channel; the owner drains that channel and hands
//! each event in. Other threads observe the state through a
//! [`StateProbe`](state::SharedState).
//!
//! `start()`/`capture()` while busy and `stop()` while idle are rejected with
//! an error and a warning rather than queued.

pub mod offline;
pub mod pipeline;
pub mod state;

use std::sync::{atomic::Ordering, Arc};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::{AudioSource, TransferEvent},
    error::{Result, SwwError},
    features::FeatureConfig,
    inference::ModelHandle,
    ipc::events::{
        AcquisitionState, CaptureCompleteEvent, DetectionEvent, EngineStatusEvent, TransferStatus,
    },
};

pub use pipeline::{DiagnosticsSnapshot, PipelineDiagnostics};
pub use state::SharedState as StateProbe;

/// Broadcast channel capacity: events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `WakewordEngine`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Hz. Default: 16000.
    pub sample_rate: u32,
    /// Samples per analysis window. Power of two. Default: 1024.
    pub window_len: usize,
    /// New mono samples per cycle. Default: 512.
    pub window_stride: usize,
    /// Interleaved channels delivered by the source. Default: 2.
    pub channels: usize,
    /// Default: 40.
    pub num_mel_filters: usize,
    /// int8 values in the model input. Default: 1200 (30 frames of 40).
    pub model_input_size: usize,
    /// Default: 0.96875.
    pub preemphasis_coef: f32,
    /// Default: 125 Hz.
    pub mel_lower_hz: f32,
    /// Default: 3800 Hz.
    pub mel_upper_hz: f32,
    /// Detection when `output[0]` is strictly greater. Default: 110.
    pub detect_threshold: i8,
    /// Offline runs flag scores strictly above this as near misses. Default: 100.
    pub near_miss_threshold: i8,
    /// Size of the optional general-purpose buffer backing capture
    /// (`bytes / 2` samples) and the activation log (`bytes` entries).
    /// `0` disables both. Default: 64000.
    pub general_buffer_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_len: 1024,
            window_stride: 512,
            channels: 2,
            num_mel_filters: 40,
            model_input_size: 1200,
            preemphasis_coef: 0.96875,
            mel_lower_hz: 125.0,
            mel_upper_hz: 3800.0,
            detect_threshold: 110,
            near_miss_threshold: 100,
            general_buffer_bytes: 64_000,
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// `SwwError::InvalidConfig` for a non-power-of-two window, a stride
    /// outside `1..=window_len`, zero channels or a model input that is not a
    /// multiple of the filter count.
    pub fn validate(&self) -> Result<()> {
        self.feature_config().validate()?;
        if self.channels == 0 {
            return Err(SwwError::InvalidConfig("channels must be > 0".into()));
        }
        if self.sample_rate == 0 {
            return Err(SwwError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if self.model_input_size == 0 || self.model_input_size % self.num_mel_filters != 0 {
            return Err(SwwError::InvalidConfig(format!(
                "model_input_size {} must be a non-zero multiple of num_mel_filters {}",
                self.model_input_size, self.num_mel_filters
            )));
        }
        Ok(())
    }

    pub fn feature_config(&self) -> FeatureConfig {
        FeatureConfig {
            sample_rate: self.sample_rate,
            window_len: self.window_len,
            window_stride: self.window_stride,
            num_mel_filters: self.num_mel_filters,
            preemphasis_coef: self.preemphasis_coef,
            mel_lower_hz: self.mel_lower_hz,
            mel_upper_hz: self.mel_upper_hz,
        }
    }

    /// Raw interleaved samples per transfer.
    pub fn chunk_len(&self) -> usize {
        self.window_stride * self.channels
    }

    /// Hard deadline for one cycle: `window_stride / sample_rate`.
    pub fn chunk_period(&self) -> Duration {
        Duration::from_nanos(self.window_stride as u64 * 1_000_000_000 / self.sample_rate.max(1) as u64)
    }

    /// Samples the recording buffer can hold.
    pub fn recording_capacity(&self) -> usize {
        self.general_buffer_bytes / std::mem::size_of::<i16>()
    }

    /// Entries the activation log can hold.
    pub fn activation_capacity(&self) -> usize {
        self.general_buffer_bytes / std::mem::size_of::<i8>()
    }

    /// Feature vectors held by the model input.
    pub fn frames_per_input(&self) -> usize {
        self.model_input_size / self.num_mel_filters.max(1)
    }
}

/// Accepted `capture` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Target length after clamping.
    pub samples: usize,
    /// `true` when the requested length exceeded the buffer capacity.
    pub clamped: bool,
    pub status: TransferStatus,
}

/// What `stop` interrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub previous: AcquisitionState,
    /// `Stopping` while a transfer is still in flight, otherwise `Idle`.
    pub state: AcquisitionState,
    /// Per-cycle class-0 scores recorded since `start` (streaming only).
    pub activations: Vec<i8>,
    /// Samples recorded before the stop (capture only).
    pub samples_captured: usize,
}

/// Output of one command-driven mono cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoCycle {
    /// Newest quantized feature block.
    pub features: Vec<i8>,
    /// Full model output.
    pub output: Vec<i8>,
}

/// Output of a direct model invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRun {
    pub output: Vec<i8>,
    pub elapsed: Duration,
}

/// The top-level engine. Owns the audio source and the pipeline context.
pub struct WakewordEngine {
    config: EngineConfig,
    source: Box<dyn AudioSource>,
    ctx: pipeline::PipelineContext,
    state: StateProbe,
    last_status: TransferStatus,
    /// A receive has been accepted and its event not yet consumed.
    in_flight: bool,
    /// The mono path has zeroed the model input since the last activation.
    mono_primed: bool,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    detection_tx: broadcast::Sender<DetectionEvent>,
    capture_tx: broadcast::Sender<CaptureCompleteEvent>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl WakewordEngine {
    /// Validate `config` and allocate every working buffer.
    ///
    /// # Errors
    /// `SwwError::InvalidConfig` if the config, model or source disagree on
    /// sizes; `SwwError::Allocation` if a core buffer cannot be allocated.
    pub fn new(
        config: EngineConfig,
        model: ModelHandle,
        source: Box<dyn AudioSource>,
    ) -> Result<Self> {
        config.validate()?;
        {
            let m = model.0.lock();
            if m.input_len() != config.model_input_size {
                return Err(SwwError::InvalidConfig(format!(
                    "model expects {} inputs, config provides {}",
                    m.input_len(),
                    config.model_input_size
                )));
            }
            if m.output_len() == 0 {
                return Err(SwwError::InvalidConfig("model has no outputs".into()));
            }
        }
        if source.channels() != config.channels {
            return Err(SwwError::InvalidConfig(format!(
                "source delivers {} channels, config expects {}",
                source.channels(),
                config.channels
            )));
        }

        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let ctx = pipeline::PipelineContext::new(&config, model, Arc::clone(&diagnostics))?;
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (detection_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (capture_tx, _) = broadcast::channel(BROADCAST_CAP);

        info!(
            chunk_len = config.chunk_len(),
            window_len = config.window_len,
            model_input = config.model_input_size,
            general_buffer = ctx.recording.is_some(),
            "engine initialised"
        );

        Ok(Self {
            config,
            source,
            ctx,
            state: StateProbe::new(),
            last_status: TransferStatus::Ok,
            in_flight: false,
            mono_primed: false,
            status_tx,
            detection_tx,
            capture_tx,
            diagnostics,
        })
    }

    /// Warm up the classifier. Call once before the first `start()`.
    pub fn warm_up(&self) -> Result<()> {
        info!("warming up classifier");
        self.ctx.model.0.lock().warm_up()?;
        info!("classifier ready");
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model(&self) -> &ModelHandle {
        &self.ctx.model
    }

    /// `(state, status of the most recent transport request)`.
    pub fn state(&self) -> (AcquisitionState, TransferStatus) {
        (self.state.load(), self.last_status)
    }

    /// Cloneable read-only view of the state for other threads.
    pub fn state_probe(&self) -> StateProbe {
        self.state.clone()
    }

    /// Begin continuous detection.
    ///
    /// # Errors
    /// - `SwwError::Busy` if not `Idle` (nothing changes).
    /// - `SwwError::Transport` if the source rejects the first receive; the
    ///   state stays `Idle` and `state()` reports the status.
    pub fn start(&mut self) -> Result<TransferStatus> {
        self.ensure_idle("start")?;
        self.activate();
        if self.ctx.activations.is_none() {
            debug!("activation logging disabled for this session");
        }

        let status = self.arm_receive()?;
        self.set_state(AcquisitionState::Streaming, None);
        info!("listening for audio");
        Ok(status)
    }

    /// Record `samples` raw samples (default: the whole buffer) into the
    /// general-purpose buffer.
    ///
    /// # Errors
    /// - `SwwError::Busy` if not `Idle`.
    /// - `SwwError::BufferUnavailable` if the buffer was never allocated or
    ///   holds no whole sample.
    /// - `SwwError::InvalidConfig` for a zero-length request.
    /// - `SwwError::Transport` if the first receive is rejected.
    pub fn capture(&mut self, samples: Option<usize>) -> Result<CaptureRequest> {
        self.ensure_idle("capture")?;
        let capacity = match self.ctx.recording.as_ref() {
            Some(rec) if rec.capacity() > 0 => rec.capacity(),
            _ => {
                warn!("recording buffer has no allocated memory; capture unavailable");
                return Err(SwwError::BufferUnavailable("general-purpose"));
            }
        };

        let (target, clamped) = match samples {
            Some(0) => {
                return Err(SwwError::InvalidConfig(
                    "capture length must be greater than 0".into(),
                ))
            }
            Some(n) if n > capacity => {
                warn!(
                    requested = n,
                    capacity, "requested length exceeds available memory, clamping"
                );
                (capacity, true)
            }
            Some(n) => (n, false),
            None => (capacity, false),
        };

        self.activate();
        if let Some(rec) = self.ctx.recording.as_mut() {
            rec.begin(target);
        }

        let status = self.arm_receive()?;
        self.set_state(
            AcquisitionState::FileCapture,
            Some(format!("capturing {target} samples")),
        );
        info!(target, "capture started");
        Ok(CaptureRequest {
            samples: target,
            clamped,
            status,
        })
    }

    /// Request cancellation.
    ///
    /// # Errors
    /// - `SwwError::NotRunning` when already `Idle`.
    /// - `SwwError::StopPending` when a stop is already in progress.
    pub fn stop(&mut self) -> Result<StopReport> {
        let previous = self.state.load();
        match previous {
            AcquisitionState::Idle => {
                warn!("acquisition is already idle, ignoring stop request");
                return Err(SwwError::NotRunning);
            }
            AcquisitionState::Stopping => {
                warn!("stop already requested");
                return Err(SwwError::StopPending);
            }
            AcquisitionState::Streaming | AcquisitionState::FileCapture => {}
        }

        if self.in_flight {
            let status = self.source.abort();
            if !status.is_ok() {
                warn!(?status, "transport rejected abort");
            }
            self.set_state(AcquisitionState::Stopping, None);
        } else {
            // Nothing will complete, so there is nothing to drain.
            self.set_state(AcquisitionState::Idle, Some("stopped".into()));
        }

        let activations = match (previous, self.ctx.activations.as_mut()) {
            (AcquisitionState::Streaming, Some(log)) => log.take(),
            _ => Vec::new(),
        };
        let samples_captured = match (previous, self.ctx.recording.as_ref()) {
            (AcquisitionState::FileCapture, Some(rec)) => rec.captured().len(),
            _ => 0,
        };

        info!(
            ?previous,
            activations = activations.len(),
            samples_captured,
            "stop requested"
        );
        Ok(StopReport {
            previous,
            state: self.state.load(),
            activations,
            samples_captured,
        })
    }

    /// Consume one completion event from the source.
    ///
    /// Transport and inference failures are recorded and logged; they never
    /// abort the session. Recovery from a dead transport is `stop` + `start`.
    pub fn on_transfer_event(&mut self, event: TransferEvent) {
        self.in_flight = false;
        let state = self.state.load();

        match (state, event) {
            (_, TransferEvent::Error(status)) => {
                self.last_status = status;
                self.diagnostics
                    .transfer_errors
                    .fetch_add(1, Ordering::Relaxed);
                warn!(?status, ?state, "audio transfer failed");
                if state == AcquisitionState::Stopping {
                    self.set_state(AcquisitionState::Idle, Some("stopped".into()));
                } else {
                    self.publish_status(Some(format!("transfer failed: {status:?}")));
                }
            }
            (AcquisitionState::Stopping, ev) => {
                if ev == TransferEvent::Complete {
                    // Final partial chunk is dropped.
                    self.source.complete_transfer(self.ctx.buffers.active_mut());
                }
                info!("streaming stopped");
                self.set_state(AcquisitionState::Idle, Some("stopped".into()));
            }
            (AcquisitionState::Streaming, TransferEvent::Complete) => self.on_stream_complete(),
            (AcquisitionState::FileCapture, TransferEvent::Complete) => {
                self.on_capture_complete()
            }
            (AcquisitionState::Streaming | AcquisitionState::FileCapture, TransferEvent::Aborted) => {
                warn!(?state, "transfer aborted without a stop request");
                self.set_state(AcquisitionState::Idle, Some("aborted".into()));
            }
            (AcquisitionState::Idle, ev) => {
                if ev == TransferEvent::Complete {
                    self.source.complete_transfer(self.ctx.buffers.active_mut());
                }
                debug!(?ev, "stray transfer event while idle");
            }
        }
    }

    /// Run one mono stride of samples through the full pipeline (the
    /// command-driven test path). The model input is zeroed on the first
    /// call after construction or after an acquisition session.
    ///
    /// # Errors
    /// - `SwwError::Busy` unless `Idle`.
    /// - `SwwError::FrameLength` unless exactly `window_stride` samples.
    pub fn process_mono_chunk(&mut self, samples: &[i16]) -> Result<MonoCycle> {
        self.ensure_idle("mono chunk")?;
        if !self.mono_primed {
            self.ctx.model_input.reset();
            self.mono_primed = true;
        }
        self.ctx.window.advance(samples)?;
        pipeline::infer_current_window(&mut self.ctx)?;
        Ok(MonoCycle {
            features: self.ctx.model_input.newest_block().to_vec(),
            output: self.ctx.output.clone(),
        })
    }

    /// Run the classifier once on `input`, or on the current model input.
    ///
    /// # Errors
    /// `SwwError::Busy` unless `Idle`; `SwwError::FrameLength` for a
    /// wrongly sized `input`; any inference error.
    pub fn run_model(&mut self, input: Option<&[i8]>) -> Result<ModelRun> {
        self.ensure_idle("run_model")?;
        let input = input.unwrap_or(self.ctx.model_input.as_slice());
        if input.len() != self.ctx.model_input.len() {
            return Err(SwwError::FrameLength {
                expected: self.ctx.model_input.len(),
                given: input.len(),
            });
        }
        let mut output = vec![0i8; self.ctx.output.len()];
        let started = Instant::now();
        self.ctx.model.0.lock().run(input, &mut output)?;
        let elapsed = started.elapsed();
        debug!(?elapsed, "model self-test");
        Ok(ModelRun { output, elapsed })
    }

    /// Current rolling model input.
    pub fn model_input(&self) -> &[i8] {
        self.ctx.model_input.as_slice()
    }

    /// Most recent class-0 score, if any cycle has run since `start`.
    pub fn latest_score(&self) -> Option<i8> {
        self.ctx.detector.latest()
    }

    /// Scores logged so far in the current streaming session.
    pub fn activation_log(&self) -> &[i8] {
        self.ctx
            .activations
            .as_ref()
            .map(|log| log.as_slice())
            .unwrap_or(&[])
    }

    /// Samples recorded by the most recent capture.
    pub fn recording(&self) -> Option<&[i16]> {
        self.ctx.recording.as_ref().map(|rec| rec.captured())
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionEvent> {
        self.detection_tx.subscribe()
    }

    pub fn subscribe_captures(&self) -> broadcast::Receiver<CaptureCompleteEvent> {
        self.capture_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn ensure_idle(&self, what: &str) -> Result<()> {
        let state = self.state.load();
        if state.is_busy() {
            warn!(?state, "acquisition in progress, ignoring {what} request");
            return Err(SwwError::Busy(state));
        }
        Ok(())
    }

    /// Reset all per-session state ahead of a new activation.
    fn activate(&mut self) {
        self.ctx.reset();
        self.diagnostics.reset();
        self.mono_primed = false;
    }

    /// Issue a receive into the active half.
    fn arm_receive(&mut self) -> Result<TransferStatus> {
        let status = self.source.request_receive(self.config.chunk_len());
        self.last_status = status;
        if !status.is_ok() {
            self.diagnostics
                .transfer_errors
                .fetch_add(1, Ordering::Relaxed);
            warn!(?status, "receive request rejected");
            return Err(SwwError::Transport(status));
        }
        self.in_flight = true;
        Ok(status)
    }

    /// Pull the completed transfer into the active half and flip the selector.
    fn collect_transfer(&mut self) {
        let expected = self.config.chunk_len();
        let got = self.source.complete_transfer(self.ctx.buffers.active_mut());
        if got < expected {
            self.diagnostics
                .short_transfers
                .fetch_add(1, Ordering::Relaxed);
            debug!(got, expected, "short transfer");
        }
        self.ctx.buffers.swap();
        self.diagnostics
            .chunks_received
            .fetch_add(1, Ordering::Relaxed);
    }

    fn on_stream_complete(&mut self) {
        let started = Instant::now();
        self.collect_transfer();

        // Re-arm before processing so the next chunk lands while this one is drained.
        let status = self.source.request_receive(self.config.chunk_len());
        self.last_status = status;
        self.in_flight = status.is_ok();
        if !status.is_ok() {
            self.diagnostics
                .transfer_errors
                .fetch_add(1, Ordering::Relaxed);
            warn!(?status, "failed to re-arm receive");
        }

        match pipeline::process_stream_chunk(&mut self.ctx) {
            Ok(outcome) => {
                if let Some(event) = outcome.detection {
                    info!(cycle = event.cycle, score = event.score, "wakeword detected");
                    let _ = self.detection_tx.send(event);
                }
            }
            Err(e) => warn!("cycle failed: {e}"),
        }

        self.check_deadline(started.elapsed());
    }

    fn on_capture_complete(&mut self) {
        self.collect_transfer();

        let target = self.ctx.recording.as_ref().map_or(0, |r| r.target());
        let complete = pipeline::process_capture_chunk(&mut self.ctx);
        if !complete {
            if let Err(e) = self.arm_receive() {
                warn!("capture ended early: {e}");
                self.finish_capture(target);
            }
            return;
        }
        self.finish_capture(target);
    }

    fn finish_capture(&mut self, target: usize) {
        let read = self.ctx.recording.as_ref().map_or(0, |r| r.read());
        info!(read, target, "capture complete");
        let _ = self.capture_tx.send(CaptureCompleteEvent {
            samples_read: read,
            samples_requested: target,
        });
        self.set_state(
            AcquisitionState::Idle,
            Some(format!("{read} samples read out of {target} requested")),
        );
    }

    fn check_deadline(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.diagnostics.max_cycle_us.fetch_max(us, Ordering::Relaxed);
        let period = self.config.chunk_period();
        if elapsed > period {
            self.diagnostics
                .deadline_misses
                .fetch_add(1, Ordering::Relaxed);
            warn!(?elapsed, ?period, "cycle overran the chunk period");
        }
    }

    fn set_state(&mut self, state: AcquisitionState, detail: Option<String>) {
        self.state.store(state);
        self.publish_status(detail);
    }

    fn publish_status(&self, detail: Option<String>) {
        let _ = self.status_tx.send(EngineStatusEvent {
            state: self.state.load(),
            last_status: self.last_status,
            detail,
        });
    }
}

impl std::fmt::Debug for WakewordEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakewordEngine")
            .field("state", &self.state.load())
            .field("last_status", &self.last_status)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::inference::{QuantParams, StubModel, WakewordModel};

    #[derive(Default)]
    struct MockState {
        requests: Vec<usize>,
        aborts: usize,
        statuses: VecDeque<TransferStatus>,
        fill: i16,
        /// Added to `fill` after every transfer.
        step: i16,
    }

    struct MockSource {
        shared: Arc<Mutex<MockState>>,
        channels: usize,
    }

    impl AudioSource for MockSource {
        fn request_receive(&mut self, len: usize) -> TransferStatus {
            let mut s = self.shared.lock();
            s.requests.push(len);
            s.statuses.pop_front().unwrap_or(TransferStatus::Ok)
        }

        fn complete_transfer(&mut self, dst: &mut [i16]) -> usize {
            let mut s = self.shared.lock();
            dst.fill(s.fill);
            s.fill = s.fill.wrapping_add(s.step);
            dst.len()
        }

        fn abort(&mut self) -> TransferStatus {
            self.shared.lock().aborts += 1;
            TransferStatus::Ok
        }

        fn channels(&self) -> usize {
            self.channels
        }
    }

    /// Replays a fixed score sequence and records every input it sees.
    struct ScriptedModel {
        scores: VecDeque<i8>,
        inputs: Arc<Mutex<Vec<Vec<i8>>>>,
    }

    impl WakewordModel for ScriptedModel {
        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }
        fn input_len(&self) -> usize {
            1200
        }
        fn output_len(&self) -> usize {
            3
        }
        fn input_quant(&self) -> QuantParams {
            QuantParams {
                scale: 1.0 / 256.0,
                zero_point: -128,
            }
        }
        fn run(&mut self, input: &[i8], output: &mut [i8]) -> Result<()> {
            self.inputs.lock().push(input.to_vec());
            output[0] = self.scores.pop_front().unwrap_or(0);
            Ok(())
        }
    }

    struct Harness {
        engine: WakewordEngine,
        source: Arc<Mutex<MockState>>,
        inputs: Arc<Mutex<Vec<Vec<i8>>>>,
    }

    fn harness_with(config: EngineConfig, scores: &[i8]) -> Harness {
        let source = Arc::new(Mutex::new(MockState::default()));
        let inputs = Arc::new(Mutex::new(Vec::new()));
        let model = ModelHandle::new(ScriptedModel {
            scores: scores.iter().copied().collect(),
            inputs: Arc::clone(&inputs),
        });
        let engine = WakewordEngine::new(
            config,
            model,
            Box::new(MockSource {
                shared: Arc::clone(&source),
                channels: 2,
            }),
        )
        .unwrap();
        Harness {
            engine,
            source,
            inputs,
        }
    }

    fn harness(scores: &[i8]) -> Harness {
        harness_with(EngineConfig::default(), scores)
    }

    #[test]
    fn start_from_idle_streams_and_arms_one_chunk() {
        let mut h = harness(&[]);
        assert_eq!(h.engine.start().unwrap(), TransferStatus::Ok);
        assert_eq!(
            h.engine.state(),
            (AcquisitionState::Streaming, TransferStatus::Ok)
        );
        assert_eq!(h.source.lock().requests, vec![1024]);
        assert!(h.engine.model_input().iter().all(|&q| q == 0));
    }

    #[test]
    fn start_or_capture_while_busy_is_rejected_without_side_effects() {
        let mut h = harness(&[]);
        h.engine.start().unwrap();
        assert!(matches!(
            h.engine.start(),
            Err(SwwError::Busy(AcquisitionState::Streaming))
        ));
        assert!(matches!(
            h.engine.capture(Some(100)),
            Err(SwwError::Busy(AcquisitionState::Streaming))
        ));
        assert_eq!(h.source.lock().requests.len(), 1);
        assert_eq!(h.engine.state().0, AcquisitionState::Streaming);
    }

    #[test]
    fn stop_while_idle_is_a_reported_noop() {
        let mut h = harness(&[]);
        assert!(matches!(h.engine.stop(), Err(SwwError::NotRunning)));
        assert_eq!(h.engine.state().0, AcquisitionState::Idle);
        assert_eq!(h.source.lock().aborts, 0);
    }

    #[test]
    fn stop_from_streaming_waits_for_acknowledgement() {
        let mut h = harness(&[]);
        let mut status_rx = h.engine.subscribe_status();
        h.engine.start().unwrap();

        let report = h.engine.stop().unwrap();
        assert_eq!(report.previous, AcquisitionState::Streaming);
        assert_eq!(report.state, AcquisitionState::Stopping);
        assert_eq!(h.source.lock().aborts, 1);
        assert!(matches!(h.engine.stop(), Err(SwwError::StopPending)));

        h.engine.on_transfer_event(TransferEvent::Aborted);
        assert_eq!(h.engine.state().0, AcquisitionState::Idle);

        let states: Vec<AcquisitionState> = std::iter::from_fn(|| status_rx.try_recv().ok())
            .map(|e| e.state)
            .collect();
        assert_eq!(
            states,
            vec![
                AcquisitionState::Streaming,
                AcquisitionState::Stopping,
                AcquisitionState::Idle
            ]
        );
    }

    #[test]
    fn completion_while_stopping_drops_the_chunk_and_goes_idle() {
        let mut h = harness(&[]);
        h.engine.start().unwrap();
        h.engine.stop().unwrap();
        h.engine.on_transfer_event(TransferEvent::Complete);
        assert_eq!(h.engine.state().0, AcquisitionState::Idle);
        assert!(h.inputs.lock().is_empty());
        assert_eq!(h.source.lock().requests.len(), 1);
    }

    #[test]
    fn each_completion_rearms_and_runs_one_cycle() {
        let mut h = harness(&[5, 6, 7]);
        h.engine.start().unwrap();
        for _ in 0..3 {
            h.engine.on_transfer_event(TransferEvent::Complete);
        }
        assert_eq!(h.source.lock().requests, vec![1024; 4]);
        assert_eq!(h.engine.activation_log(), &[5, 6, 7]);
        assert_eq!(h.engine.latest_score(), Some(7));

        let snap = h.engine.diagnostics_snapshot();
        assert_eq!(snap.chunks_received, 3);
        assert_eq!(snap.windows_processed, 3);
        assert_eq!(snap.inference_calls, 3);
        assert_eq!(snap.transfer_errors, 0);
    }

    #[test]
    fn each_cycle_windows_the_transfer_that_just_completed() {
        let mut h = harness(&[]);
        {
            let mut src = h.source.lock();
            src.fill = 10;
            src.step = 10;
        }
        h.engine.start().unwrap();

        let mut previous = 0;
        for expected in [10i16, 20, 30, 40] {
            h.engine.on_transfer_event(TransferEvent::Complete);
            let window = h.engine.ctx.window.samples();
            let (head, tail) = window.split_at(window.len() - 512);
            assert!(tail.iter().all(|&s| s == expected), "tail after {expected}");
            assert!(head.iter().all(|&s| s == previous), "head after {expected}");
            previous = expected;
        }
    }

    #[test]
    fn detection_fires_once_per_rising_edge() {
        let mut h = harness(&[0, 120, 125, 0, 115]);
        let mut rx = h.engine.subscribe_detections();
        h.engine.start().unwrap();
        for _ in 0..5 {
            h.engine.on_transfer_event(TransferEvent::Complete);
        }
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!((first.cycle, first.score), (1, 120));
        assert_eq!((second.cycle, second.score), (4, 115));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(h.engine.diagnostics_snapshot().detections, 2);
    }

    #[test]
    fn stop_returns_and_clears_the_activation_log() {
        let mut h = harness(&[1, 2]);
        h.engine.start().unwrap();
        h.engine.on_transfer_event(TransferEvent::Complete);
        h.engine.on_transfer_event(TransferEvent::Complete);
        let report = h.engine.stop().unwrap();
        assert_eq!(report.activations, vec![1, 2]);
        assert!(h.engine.activation_log().is_empty());
    }

    #[test]
    fn capture_longer_than_capacity_is_clamped() {
        let config = EngineConfig {
            general_buffer_bytes: 8_000,
            ..EngineConfig::default()
        };
        let mut h = harness_with(config, &[]);
        let request = h.engine.capture(Some(5_000)).unwrap();
        assert_eq!(request.samples, 4_000);
        assert!(request.clamped);
        assert_eq!(h.engine.state().0, AcquisitionState::FileCapture);
    }

    #[test]
    fn capture_stops_before_the_chunk_that_would_overflow() {
        let config = EngineConfig {
            general_buffer_bytes: 8_000,
            ..EngineConfig::default()
        };
        let mut h = harness_with(config, &[]);
        let mut rx = h.engine.subscribe_captures();
        h.source.lock().fill = 321;
        h.engine.capture(Some(4_000)).unwrap();

        for _ in 0..3 {
            h.engine.on_transfer_event(TransferEvent::Complete);
        }
        assert_eq!(h.engine.state().0, AcquisitionState::Idle);
        // Initial receive plus two re-arms; the third chunk would overflow.
        assert_eq!(h.source.lock().requests.len(), 3);
        assert_eq!(
            rx.try_recv().unwrap(),
            CaptureCompleteEvent {
                samples_read: 3_072,
                samples_requested: 4_000
            }
        );
        let recording = h.engine.recording().unwrap();
        assert_eq!(recording.len(), 3_072);
        assert!(recording.iter().all(|&s| s == 321));
        assert!(h.inputs.lock().is_empty(), "capture must not run inference");
    }

    #[test]
    fn capture_shorter_than_one_transfer_keeps_only_the_request() {
        let mut h = harness(&[]);
        let mut rx = h.engine.subscribe_captures();
        {
            let mut src = h.source.lock();
            src.fill = 9;
            src.step = 1;
        }
        let request = h.engine.capture(Some(100)).unwrap();
        assert_eq!(request.samples, 100);
        assert!(!request.clamped);

        h.engine.on_transfer_event(TransferEvent::Complete);
        assert_eq!(h.engine.state().0, AcquisitionState::Idle);
        assert_eq!(h.source.lock().requests.len(), 1, "no re-arm once the target is met");
        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            CaptureCompleteEvent {
                samples_read: 100,
                samples_requested: 100
            }
        );
        let recording = h.engine.recording().unwrap();
        assert_eq!(recording.len(), 100);
        assert!(recording.iter().all(|&s| s == 9));
    }

    #[test]
    fn capture_buffer_smaller_than_one_transfer_fills_exactly() {
        let config = EngineConfig {
            general_buffer_bytes: 1_000,
            ..EngineConfig::default()
        };
        let mut h = harness_with(config, &[]);
        let mut rx = h.engine.subscribe_captures();
        let request = h.engine.capture(None).unwrap();
        assert_eq!(request.samples, 500);

        h.engine.on_transfer_event(TransferEvent::Complete);
        let event = rx.try_recv().unwrap();
        assert_eq!((event.samples_read, event.samples_requested), (500, 500));
        assert_eq!(h.engine.recording().unwrap().len(), 500);
        assert_eq!(h.engine.state().0, AcquisitionState::Idle);
    }

    #[test]
    fn capture_with_no_whole_sample_is_unavailable() {
        let config = EngineConfig {
            general_buffer_bytes: 1,
            ..EngineConfig::default()
        };
        let mut h = harness_with(config, &[]);
        assert!(matches!(
            h.engine.capture(None),
            Err(SwwError::BufferUnavailable(_))
        ));
        assert!(matches!(
            h.engine.capture(Some(5)),
            Err(SwwError::BufferUnavailable(_))
        ));
        assert!(h.source.lock().requests.is_empty());
        assert_eq!(h.engine.state().0, AcquisitionState::Idle);
    }

    #[test]
    fn stop_during_capture_aborts_once_then_drains() {
        let mut h = harness(&[]);
        let mut captures = h.engine.subscribe_captures();
        h.engine.capture(Some(4_000)).unwrap();
        h.engine.on_transfer_event(TransferEvent::Complete);
        assert_eq!(h.engine.state().0, AcquisitionState::FileCapture);

        let report = h.engine.stop().unwrap();
        assert_eq!(report.previous, AcquisitionState::FileCapture);
        assert_eq!(report.state, AcquisitionState::Stopping);
        assert_eq!(report.samples_captured, 1_024);
        assert!(report.activations.is_empty());
        assert_eq!(h.engine.state().0, AcquisitionState::Stopping);
        assert_eq!(h.source.lock().aborts, 1);

        h.engine.on_transfer_event(TransferEvent::Aborted);
        assert_eq!(h.engine.state().0, AcquisitionState::Idle);
        assert_eq!(h.source.lock().aborts, 1);
        assert_eq!(h.source.lock().requests.len(), 2);
        assert!(matches!(captures.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn capture_without_general_buffer_is_unavailable() {
        let config = EngineConfig {
            general_buffer_bytes: 0,
            ..EngineConfig::default()
        };
        let mut h = harness_with(config, &[]);
        assert!(matches!(
            h.engine.capture(None),
            Err(SwwError::BufferUnavailable(_))
        ));
        assert_eq!(h.engine.state().0, AcquisitionState::Idle);
        // Streaming still works without it.
        h.engine.start().unwrap();
        h.engine.on_transfer_event(TransferEvent::Complete);
        assert!(h.engine.activation_log().is_empty());
    }

    #[test]
    fn rejected_first_receive_leaves_engine_idle() {
        let mut h = harness(&[]);
        h.source.lock().statuses.push_back(TransferStatus::Busy);
        assert!(matches!(
            h.engine.start(),
            Err(SwwError::Transport(TransferStatus::Busy))
        ));
        assert_eq!(
            h.engine.state(),
            (AcquisitionState::Idle, TransferStatus::Busy)
        );
        assert_eq!(h.engine.diagnostics_snapshot().transfer_errors, 1);
    }

    #[test]
    fn transfer_error_keeps_state_and_stop_recovers_immediately() {
        let mut h = harness(&[]);
        h.engine.start().unwrap();
        h.engine
            .on_transfer_event(TransferEvent::Error(TransferStatus::Timeout));
        assert_eq!(
            h.engine.state(),
            (AcquisitionState::Streaming, TransferStatus::Timeout)
        );

        let report = h.engine.stop().unwrap();
        assert_eq!(report.state, AcquisitionState::Idle);
        assert_eq!(h.source.lock().aborts, 0);
        h.engine.start().unwrap();
        assert_eq!(h.engine.state().0, AcquisitionState::Streaming);
    }

    #[test]
    fn failed_rearm_lets_stop_finish_without_waiting() {
        let mut h = harness(&[]);
        {
            let mut s = h.source.lock();
            s.statuses.push_back(TransferStatus::Ok);
            s.statuses.push_back(TransferStatus::Error);
        }
        h.engine.start().unwrap();
        h.engine.on_transfer_event(TransferEvent::Complete);
        assert_eq!(h.engine.state().1, TransferStatus::Error);
        assert_eq!(h.engine.stop().unwrap().state, AcquisitionState::Idle);
    }

    #[test]
    fn unknown_state_is_normalized_to_stopping_then_drains() {
        let mut h = harness(&[]);
        h.engine.start().unwrap();
        h.engine.state.store_raw(200);
        assert_eq!(h.engine.state().0, AcquisitionState::Stopping);
        h.engine.on_transfer_event(TransferEvent::Complete);
        assert_eq!(h.engine.state().0, AcquisitionState::Idle);
    }

    #[test]
    fn restart_begins_from_a_cold_model_input() {
        let mut h = harness(&[]);
        h.source.lock().fill = 12_000;
        h.engine.start().unwrap();
        for _ in 0..4 {
            h.engine.on_transfer_event(TransferEvent::Complete);
        }
        h.engine.stop().unwrap();
        h.engine.on_transfer_event(TransferEvent::Aborted);
        assert!(h.engine.model_input().iter().any(|&q| q != 0));

        h.engine.start().unwrap();
        assert!(h.engine.model_input().iter().all(|&q| q == 0));
        h.engine.on_transfer_event(TransferEvent::Complete);

        let inputs = h.inputs.lock();
        let first_after_restart = inputs.last().unwrap();
        assert!(first_after_restart[..1160].iter().all(|&q| q == 0));
    }

    #[test]
    fn mono_path_runs_only_while_idle() {
        let mut h = harness(&[42]);
        let cycle = h.engine.process_mono_chunk(&[0; 512]).unwrap();
        assert_eq!(cycle.features, vec![-128; 40]);
        assert_eq!(cycle.output[0], 42);
        assert!(h.engine.model_input()[..1160].iter().all(|&q| q == 0));

        assert!(matches!(
            h.engine.process_mono_chunk(&[0; 100]),
            Err(SwwError::FrameLength {
                expected: 512,
                given: 100
            })
        ));

        h.engine.start().unwrap();
        assert!(matches!(
            h.engine.process_mono_chunk(&[0; 512]),
            Err(SwwError::Busy(_))
        ));
    }

    #[test]
    fn run_model_uses_current_tensor_or_explicit_input() {
        let mut h = harness(&[9, 10]);
        let run = h.engine.run_model(None).unwrap();
        assert_eq!(run.output, vec![9, 0, 0]);
        let explicit = vec![1i8; 1200];
        h.engine.run_model(Some(&explicit)).unwrap();
        assert_eq!(h.inputs.lock()[1], explicit);
        assert!(h.engine.run_model(Some(&[0; 3])).is_err());
    }

    #[test]
    fn construction_rejects_mismatched_collaborators() {
        let config = EngineConfig {
            model_input_size: 800,
            ..EngineConfig::default()
        };
        let err = WakewordEngine::new(
            config,
            ModelHandle::new(StubModel::default()),
            Box::new(MockSource {
                shared: Arc::default(),
                channels: 2,
            }),
        )
        .unwrap_err();
        assert!(matches!(err, SwwError::InvalidConfig(_)));

        let err = WakewordEngine::new(
            EngineConfig::default(),
            ModelHandle::new(StubModel::default()),
            Box::new(MockSource {
                shared: Arc::default(),
                channels: 1,
            }),
        )
        .unwrap_err();
        assert!(matches!(err, SwwError::InvalidConfig(_)));
    }

    #[test]
    fn config_derived_sizes() {
        let c = EngineConfig::default();
        c.validate().unwrap();
        assert_eq!(c.chunk_len(), 1024);
        assert_eq!(c.chunk_period(), Duration::from_millis(32));
        assert_eq!(c.recording_capacity(), 32_000);
        assert_eq!(c.activation_capacity(), 64_000);
        assert_eq!(c.frames_per_input(), 30);

        let bad = EngineConfig {
            model_input_size: 1210,
            ..EngineConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
