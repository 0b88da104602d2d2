//! Offline runs over a whole waveform.
//!
//! Same extractor, assembler and classifier as the streaming path, but driven
//! straight from a slice at the configured stride instead of from transfers.
//! Each run builds its own extractor and model input, so it never disturbs a
//! live session's rolling state.

use tracing::info;

use crate::engine::EngineConfig;
use crate::error::{Result, SwwError};
use crate::features::{FeatureExtractor, PreemphasisState};
use crate::inference::{ModelHandle, ModelInput};

/// One stride of an offline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineStep {
    pub index: usize,
    /// Newest quantized feature block.
    pub features: Vec<i8>,
    /// `output[0]`.
    pub score: i8,
    /// `score > detect_threshold`.
    pub detected: bool,
    /// Not detected, but `score > near_miss_threshold`.
    pub near_miss: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineReport {
    pub offset: usize,
    pub steps: Vec<OfflineStep>,
}

impl OfflineReport {
    pub fn detections(&self) -> impl Iterator<Item = &OfflineStep> {
        self.steps.iter().filter(|s| s.detected)
    }

    pub fn near_misses(&self) -> impl Iterator<Item = &OfflineStep> {
        self.steps.iter().filter(|s| s.near_miss)
    }
}

/// Number of full windows in `len` samples at the configured stride.
pub fn step_count(config: &EngineConfig, len: usize) -> usize {
    let overlap = config.window_len - config.window_stride;
    len.saturating_sub(overlap) / config.window_stride
}

/// Run the full pipeline over `waveform[offset..]`, starting from a zeroed
/// model input and fresh pre-emphasis state.
///
/// # Errors
/// `SwwError::InvalidConfig` if `offset` is past the end of the waveform;
/// any extraction or inference error.
pub fn infer_waveform(
    config: &EngineConfig,
    model: &ModelHandle,
    waveform: &[i16],
    offset: usize,
) -> Result<OfflineReport> {
    let wave = waveform.get(offset..).ok_or_else(|| {
        SwwError::InvalidConfig(format!(
            "offset {offset} is past the end of a {}-sample waveform",
            waveform.len()
        ))
    })?;

    let mut extractor = FeatureExtractor::new(config.feature_config())?;
    let mut input = ModelInput::new(config.model_input_size, config.num_mel_filters)?;
    let mut features = vec![0f32; config.num_mel_filters];
    let mut state = PreemphasisState::default();

    let mut guard = model.0.lock();
    let quant = guard.input_quant();
    let mut output = vec![0i8; guard.output_len()];

    let num_steps = step_count(config, wave.len());
    info!(offset, num_steps, "offline inference");

    let mut steps = Vec::with_capacity(num_steps);
    for index in 0..num_steps {
        let start = index * config.window_stride;
        let window = &wave[start..start + config.window_len];
        state = extractor.extract_into(window, state, &mut features)?;
        input.append(&features, quant)?;
        guard.run(input.as_slice(), &mut output)?;

        let score = output.first().copied().unwrap_or(i8::MIN);
        let detected = score > config.detect_threshold;
        steps.push(OfflineStep {
            index,
            features: input.newest_block().to_vec(),
            score,
            detected,
            near_miss: !detected && score > config.near_miss_threshold,
        });
    }

    Ok(OfflineReport { offset, steps })
}

/// Features for the single window starting at `offset`, with fresh
/// pre-emphasis state.
///
/// # Errors
/// `SwwError::FrameLength` if fewer than `window_len` samples remain.
pub fn extract_window(config: &EngineConfig, waveform: &[i16], offset: usize) -> Result<Vec<f32>> {
    let window = offset
        .checked_add(config.window_len)
        .and_then(|end| waveform.get(offset..end))
        .ok_or(SwwError::FrameLength {
            expected: config.window_len,
            given: waveform.len().saturating_sub(offset),
        })?;
    let mut extractor = FeatureExtractor::new(config.feature_config())?;
    let (features, _) = extractor.extract(window, PreemphasisState::default())?;
    Ok(features)
}
