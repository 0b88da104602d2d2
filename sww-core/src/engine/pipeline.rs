//! Per-chunk processing stages.
//!
//! ## Streaming cycle (one completed transfer)
//!
//! ```text
//! 1. Take the idle half of the double buffer as an interleaved AudioChunk
//! 2. Advance the sliding window by one stride (first channel only)
//! 3. Extract log-mel features, carrying the pre-emphasis state
//! 4. Quantize and append to the rolling model input
//! 5. Run the classifier
//! 6. Rising-edge detection on output[0] > threshold
//! 7. Append output[0] to the activation log (if allocated)
//! ```
//!
//! Everything in [`PipelineContext`] is allocated once at engine
//! construction; none of these stages allocate.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    buffering::{chunk::AudioChunk, try_alloc, window::SlidingWindow, DoubleBuffer},
    engine::EngineConfig,
    error::Result,
    features::{FeatureExtractor, PreemphasisState},
    inference::{ModelHandle, ModelInput, QuantParams},
    ipc::events::DetectionEvent,
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub chunks_received: AtomicUsize,
    pub windows_processed: AtomicUsize,
    pub inference_calls: AtomicUsize,
    pub inference_errors: AtomicUsize,
    pub detections: AtomicUsize,
    pub deadline_misses: AtomicUsize,
    pub transfer_errors: AtomicUsize,
    pub short_transfers: AtomicUsize,
    /// Slowest cycle since the last reset, in microseconds.
    pub max_cycle_us: AtomicU64,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.chunks_received.store(0, Ordering::Relaxed);
        self.windows_processed.store(0, Ordering::Relaxed);
        self.inference_calls.store(0, Ordering::Relaxed);
        self.inference_errors.store(0, Ordering::Relaxed);
        self.detections.store(0, Ordering::Relaxed);
        self.deadline_misses.store(0, Ordering::Relaxed);
        self.transfer_errors.store(0, Ordering::Relaxed);
        self.short_transfers.store(0, Ordering::Relaxed);
        self.max_cycle_us.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            windows_processed: self.windows_processed.load(Ordering::Relaxed),
            inference_calls: self.inference_calls.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            transfer_errors: self.transfer_errors.load(Ordering::Relaxed),
            short_transfers: self.short_transfers.load(Ordering::Relaxed),
            max_cycle_us: self.max_cycle_us.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub chunks_received: usize,
    pub windows_processed: usize,
    pub inference_calls: usize,
    pub inference_errors: usize,
    pub detections: usize,
    pub deadline_misses: usize,
    pub transfer_errors: usize,
    pub short_transfers: usize,
    pub max_cycle_us: u64,
}

/// Rising-edge detector over the per-cycle wakeword score.
#[derive(Debug, Clone)]
pub struct DetectionTracker {
    threshold: i8,
    above: bool,
    cycle: u32,
    latest: Option<i8>,
}

impl DetectionTracker {
    pub fn new(threshold: i8) -> Self {
        Self {
            threshold,
            above: false,
            cycle: 0,
            latest: None,
        }
    }

    pub fn reset(&mut self) {
        self.above = false;
        self.cycle = 0;
        self.latest = None;
    }

    /// Record one score. Returns an event only when the score crosses the
    /// threshold from below.
    pub fn observe(&mut self, score: i8) -> Option<DetectionEvent> {
        let cycle = self.cycle;
        self.cycle = self.cycle.wrapping_add(1);
        self.latest = Some(score);

        let hit = score > self.threshold;
        let rising = hit && !self.above;
        self.above = hit;
        rising.then_some(DetectionEvent { cycle, score })
    }

    pub fn latest(&self) -> Option<i8> {
        self.latest
    }

    /// `true` while the most recent score is above threshold.
    pub fn is_detecting(&self) -> bool {
        self.above
    }

    /// Scores observed since the last reset.
    pub fn cycles(&self) -> u32 {
        self.cycle
    }
}

/// Bounded record of per-cycle class-0 scores. Silently stops recording once
/// full.
#[derive(Debug)]
pub struct ActivationLog {
    entries: Vec<i8>,
}

impl ActivationLog {
    /// # Errors
    /// `SwwError::Allocation` if `capacity` bytes cannot be reserved.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| crate::error::SwwError::Allocation {
                what: "activation log",
                bytes: capacity,
            })?;
        Ok(Self { entries })
    }

    #[inline]
    pub fn push(&mut self, score: i8) {
        if self.entries.len() < self.entries.capacity() {
            self.entries.push(score);
        }
    }

    pub fn as_slice(&self) -> &[i8] {
        &self.entries
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Copy out and clear, keeping the reserved storage.
    pub fn take(&mut self) -> Vec<i8> {
        let out = self.entries.clone();
        self.entries.clear();
        out
    }
}

/// Linear recording target for file capture.
#[derive(Debug)]
pub struct Recording {
    samples: Box<[i16]>,
    /// Raw samples received since the capture started.
    read: usize,
    /// Clamped capture length.
    target: usize,
}

impl Recording {
    fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            samples: try_alloc(capacity, "recording buffer")?,
            read: 0,
            target: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn read(&self) -> usize {
        self.read
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Samples stored so far.
    pub fn captured(&self) -> &[i16] {
        &self.samples[..self.read.min(self.samples.len())]
    }

    pub(crate) fn begin(&mut self, target: usize) {
        self.read = 0;
        self.target = target;
        self.samples.fill(0);
    }

    /// Store as much of one completed chunk as the target and buffer allow.
    /// Returns `true` once the target is reached or another full chunk would
    /// exceed it.
    pub(crate) fn store_chunk(&mut self, chunk: &[i16]) -> bool {
        let offset = self.read;
        let room = self.samples.len().saturating_sub(offset);
        let wanted = self.target.saturating_sub(offset);
        let n = chunk.len().min(wanted).min(room);
        self.samples[offset..offset + n].copy_from_slice(&chunk[..n]);
        self.read += n;
        n == room || self.read >= self.target || self.read + chunk.len() > self.target
    }
}

/// Everything the per-chunk path touches, owned by the engine.
pub struct PipelineContext {
    pub buffers: DoubleBuffer,
    pub window: SlidingWindow,
    pub preemphasis: PreemphasisState,
    pub extractor: FeatureExtractor,
    /// Scratch for one feature vector.
    pub features: Vec<f32>,
    pub model_input: ModelInput,
    pub model: ModelHandle,
    pub quant: QuantParams,
    /// Scratch for one model output.
    pub output: Vec<i8>,
    pub detector: DetectionTracker,
    /// `None` when the general-purpose buffer could not be allocated.
    pub activations: Option<ActivationLog>,
    pub recording: Option<Recording>,
    pub channels: usize,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

impl PipelineContext {
    /// Allocate every working buffer for `config`.
    ///
    /// # Errors
    /// Core buffers (transfer halves, window, model input) are required and
    /// fail construction. The general-purpose buffer is optional: if it cannot
    /// be allocated, capture and activation logging are disabled with a single
    /// warning.
    pub fn new(
        config: &EngineConfig,
        model: ModelHandle,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Result<Self> {
        let feature_config = config.feature_config();
        let extractor = FeatureExtractor::new(feature_config)?;
        let buffers = DoubleBuffer::new(config.chunk_len())?;
        let window = SlidingWindow::from_storage(
            try_alloc(config.window_len, "sliding window")?,
            config.window_stride,
        );
        let model_input = ModelInput::new(config.model_input_size, config.num_mel_filters)?;

        let (quant, output_len) = {
            let m = model.0.lock();
            (m.input_quant(), m.output_len())
        };

        let (activations, recording) = match allocate_general(config) {
            Ok((log, rec)) => (Some(log), Some(rec)),
            Err(e) => {
                warn!("general-purpose buffer unavailable ({e}); capture and activation logging disabled");
                (None, None)
            }
        };

        Ok(Self {
            buffers,
            window,
            preemphasis: PreemphasisState::default(),
            extractor,
            features: vec![0.0; config.num_mel_filters],
            model_input,
            model,
            quant,
            output: vec![0; output_len],
            detector: DetectionTracker::new(config.detect_threshold),
            activations,
            recording,
            channels: config.channels,
            diagnostics,
        })
    }

    /// Zero the rolling state and sentinel-fill the transfer buffers.
    pub fn reset(&mut self) {
        self.buffers.rearm();
        self.window.reset();
        self.preemphasis = PreemphasisState::default();
        self.model_input.reset();
        self.output.fill(0);
        self.detector.reset();
        if let Some(log) = self.activations.as_mut() {
            log.take();
        }
    }
}

fn allocate_general(config: &EngineConfig) -> Result<(ActivationLog, Recording)> {
    if config.general_buffer_bytes == 0 {
        return Err(crate::error::SwwError::BufferUnavailable("general-purpose"));
    }
    let log = ActivationLog::with_capacity(config.activation_capacity())?;
    let recording = Recording::new(config.recording_capacity())?;
    Ok((log, recording))
}

/// Result of one streaming cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub score: i8,
    pub detection: Option<DetectionEvent>,
}

/// Extract, assemble and infer on the current window. Returns `output[0]`.
pub(crate) fn infer_current_window(ctx: &mut PipelineContext) -> Result<i8> {
    ctx.preemphasis =
        ctx.extractor
            .extract_into(ctx.window.samples(), ctx.preemphasis, &mut ctx.features)?;
    ctx.diagnostics
        .windows_processed
        .fetch_add(1, Ordering::Relaxed);

    ctx.model_input.append(&ctx.features, ctx.quant)?;

    ctx.diagnostics
        .inference_calls
        .fetch_add(1, Ordering::Relaxed);
    let run = ctx
        .model
        .0
        .lock()
        .run(ctx.model_input.as_slice(), &mut ctx.output);
    if let Err(e) = run {
        ctx.diagnostics
            .inference_errors
            .fetch_add(1, Ordering::Relaxed);
        return Err(e);
    }
    Ok(ctx.output.first().copied().unwrap_or(i8::MIN))
}

/// Process the idle half of the double buffer as one streaming cycle.
pub fn process_stream_chunk(ctx: &mut PipelineContext) -> Result<CycleOutcome> {
    let chunk = AudioChunk::new(ctx.buffers.idle(), ctx.channels);
    ctx.window.advance_from_chunk(&chunk)?;

    let score = infer_current_window(ctx)?;

    let detection = ctx.detector.observe(score);
    if let Some(event) = detection {
        ctx.diagnostics.detections.fetch_add(1, Ordering::Relaxed);
        debug!(cycle = event.cycle, score, "wakeword detected");
    }
    if let Some(log) = ctx.activations.as_mut() {
        log.push(score);
    }

    Ok(CycleOutcome { score, detection })
}

/// Copy the idle half into the recording. Returns `true` when the capture
/// is complete and no further receive should be issued.
pub fn process_capture_chunk(ctx: &mut PipelineContext) -> bool {
    let Some(recording) = ctx.recording.as_mut() else {
        return true;
    };
    recording.store_chunk(ctx.buffers.idle())
}
