//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Reference waveforms are not always recorded at the engine rate. A
//! `RateConverter` brings them to the engine rate before they are replayed or
//! run through the offline path. This never runs in the per-chunk path, so
//! allocation is allowed here.
//!
//! When source rate == target rate, `RateConverter` is a passthrough and no
//! rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, SwwError};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// Input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `SwwError::Audio` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }
        if source_rate == 0 || target_rate == 0 || chunk_size == 0 {
            return Err(SwwError::Audio(format!(
                "cannot resample {source_rate} Hz -> {target_rate} Hz in chunks of {chunk_size}"
            )));
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| SwwError::Audio(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        tracing::info!(source_rate, target_rate, chunk_size, max_out, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated until a full `chunk_size` block is available
    /// for rubato. Any remainder is kept for the next call or for `finish`.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Flush the buffered remainder, zero-padded to one chunk.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.input_buf.is_empty() {
            return Vec::new();
        }
        let pad = self.chunk_size - self.input_buf.len();
        self.process(&vec![0.0; pad])
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a whole i16 clip between rates. Output is trimmed to the exact
/// expected length (`len * target / source`).
///
/// # Errors
/// `SwwError::Audio` if the converter cannot be built.
pub fn resample_i16(samples: &[i16], source_rate: u32, target_rate: u32) -> Result<Vec<i16>> {
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }
    let mut rc = RateConverter::new(source_rate, target_rate, 1024)?;
    let input: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
    let mut out = rc.process(&input);
    out.extend(rc.finish());

    let expected = (samples.len() as u64 * target_rate as u64 / source_rate as u64) as usize;
    out.resize(expected, 0.0);
    Ok(out
        .into_iter()
        .map(|s| (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert!(rc.finish().is_empty());
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(!out.is_empty(), "expected non-empty output");
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={} expected≈320",
            out.len()
        );
    }

    #[test]
    fn partial_chunk_waits_for_finish() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        assert!(!rc.finish().is_empty());
    }

    #[test]
    fn whole_clip_conversion_has_exact_length() {
        let clip: Vec<i16> = (0..8_000).map(|i| ((i % 200) as i16 - 100) * 50).collect();
        let out = resample_i16(&clip, 8_000, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
        assert_eq!(resample_i16(&clip, 16_000, 16_000).unwrap(), clip);
    }
}
