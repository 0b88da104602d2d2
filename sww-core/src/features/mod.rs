//! Log-mel filterbank energy (LFBE) front end.
//!
//! ## Stages (per window)
//!
//! ```text
//! i16 window ─► /32768 ─► pre-emphasis ─► Hamming ─► real FFT (packed)
//!     ─► unpack │X|² / N ─► sparse mel bank ─► max(·, 1e-30) ─► 10·log10
//!     ─► (x + 52) / 64 ─► clamp [0, 1]
//! ```
//!
//! The extractor owns every scratch buffer it needs, so `extract_into` does
//! not allocate. The only state carried between windows is the
//! [`PreemphasisState`], which the caller threads through explicitly.

pub mod mel;
pub mod spectrum;

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{Result, SwwError};
use mel::SparseMelFilterbank;
use spectrum::{hamming_window, pack_real_spectrum, unpack_power};

/// Filter outputs are floored here before the log so silence maps to a finite value.
pub const LOG_FLOOR: f32 = 1e-30;
/// dB offset applied before rescaling into [0, 1].
pub const POWER_OFFSET_DB: f32 = 52.0;
/// dB span mapped onto [0, 1].
pub const DB_RANGE: f32 = 64.0;

/// One window's worth of log-mel energies in [0, 1].
pub type FeatureVector = Vec<f32>;

/// Front-end parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureConfig {
    /// Hz. Default: 16000.
    pub sample_rate: u32,
    /// Samples per analysis window (`WINLEN`). Power of two. Default: 1024 (64 ms).
    pub window_len: usize,
    /// New samples per window (`WINSTRIDE`). Default: 512 (32 ms).
    pub window_stride: usize,
    /// Default: 40.
    pub num_mel_filters: usize,
    /// Default: 0.96875 (1 - 2^-5).
    pub preemphasis_coef: f32,
    /// Lower mel band edge (Hz). Default: 125.
    pub mel_lower_hz: f32,
    /// Upper mel band edge (Hz). Default: 3800.
    pub mel_upper_hz: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_len: 1024,
            window_stride: 512,
            num_mel_filters: 40,
            preemphasis_coef: 0.96875,
            mel_lower_hz: 125.0,
            mel_upper_hz: 3800.0,
        }
    }
}

impl FeatureConfig {
    /// # Errors
    /// `SwwError::InvalidConfig` when the window is not a power of two (>= 4)
    /// or the stride is outside `1..=window_len`.
    pub fn validate(&self) -> Result<()> {
        if self.window_len < 4 || !self.window_len.is_power_of_two() {
            return Err(SwwError::InvalidConfig(format!(
                "window_len {} must be a power of two >= 4",
                self.window_len
            )));
        }
        if self.window_stride == 0 || self.window_stride > self.window_len {
            return Err(SwwError::InvalidConfig(format!(
                "window_stride {} must be in 1..={}",
                self.window_stride, self.window_len
            )));
        }
        if self.num_mel_filters == 0 {
            return Err(SwwError::InvalidConfig("num_mel_filters must be > 0".into()));
        }
        Ok(())
    }

    /// Power-spectrum bins: `window_len / 2 + 1`.
    pub fn spectrum_len(&self) -> usize {
        self.window_len / 2 + 1
    }
}

/// Pre-emphasis history carried from one window to the next.
///
/// Holds the normalized sample at index `window_stride - 1` of the previous
/// window: once the window advances by one stride, that sample sits directly
/// before the new window's first sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PreemphasisState {
    pub prev: f32,
}

/// Windowed log-mel feature extractor.
pub struct FeatureExtractor {
    config: FeatureConfig,
    hamming: Box<[f32]>,
    filterbank: SparseMelFilterbank,
    fft: Arc<dyn Fft<f32>>,
    fft_buf: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    /// Normalized + pre-emphasized samples; reused as the packed spectrum.
    time: Vec<f32>,
    power: Vec<f32>,
    inv_len: f32,
}

impl FeatureExtractor {
    /// Plan the FFT and build the window and filterbank.
    ///
    /// # Errors
    /// `SwwError::InvalidConfig` if `config` does not validate.
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        let n = config.window_len;
        let filterbank = SparseMelFilterbank::new(
            config.spectrum_len(),
            config.sample_rate,
            config.num_mel_filters,
            config.mel_lower_hz,
            config.mel_upper_hz,
        )?;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
        let scratch_len = fft.get_inplace_scratch_len();

        Ok(Self {
            hamming: hamming_window(n),
            filterbank,
            fft,
            fft_buf: vec![Complex::new(0.0, 0.0); n],
            fft_scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            time: vec![0.0; n],
            power: vec![0.0; config.spectrum_len()],
            inv_len: 1.0 / n as f32,
            config,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn filterbank(&self) -> &SparseMelFilterbank {
        &self.filterbank
    }

    pub fn num_features(&self) -> usize {
        self.config.num_mel_filters
    }

    /// Allocating convenience wrapper around [`extract_into`](Self::extract_into).
    pub fn extract(
        &mut self,
        window: &[i16],
        state: PreemphasisState,
    ) -> Result<(FeatureVector, PreemphasisState)> {
        let mut out = vec![0.0; self.config.num_mel_filters];
        let next = self.extract_into(window, state, &mut out)?;
        Ok((out, next))
    }

    /// Compute one feature vector into `out` and return the state for the
    /// next window.
    ///
    /// # Errors
    /// `SwwError::FrameLength` if `window.len() != window_len` or
    /// `out.len() != num_mel_filters`.
    pub fn extract_into(
        &mut self,
        window: &[i16],
        state: PreemphasisState,
        out: &mut [f32],
    ) -> Result<PreemphasisState> {
        let n = self.config.window_len;
        if window.len() != n {
            return Err(SwwError::FrameLength {
                expected: n,
                given: window.len(),
            });
        }
        if out.len() != self.config.num_mel_filters {
            return Err(SwwError::FrameLength {
                expected: self.config.num_mel_filters,
                given: out.len(),
            });
        }

        // 1. [-32768, 32767] -> [-1.0, 1.0)
        for (dst, &s) in self.time.iter_mut().zip(window) {
            *dst = s as f32 / 32768.0;
        }
        let next = PreemphasisState {
            prev: self.time[self.config.window_stride - 1],
        };

        // 2. y[i] = x[i] - c * x[i-1], walking backwards so x[i-1] is still raw.
        let coef = self.config.preemphasis_coef;
        for i in (1..n).rev() {
            self.time[i] -= coef * self.time[i - 1];
        }
        self.time[0] -= coef * state.prev;

        // 3. Hamming window into the complex FFT buffer.
        for ((dst, &x), &w) in self.fft_buf.iter_mut().zip(&self.time).zip(self.hamming.iter()) {
            *dst = Complex::new(x * w, 0.0);
        }

        // 4. FFT, packed into `time` (no longer needed in the time domain).
        self.fft
            .process_with_scratch(&mut self.fft_buf, &mut self.fft_scratch);
        pack_real_spectrum(&self.fft_buf, &mut self.time);

        // 5. |X|^2 / N
        unpack_power(&mut self.time, &mut self.power, self.inv_len);

        // 6. Mel bank.
        self.filterbank.apply(&self.power, out);

        // 7-8. Floor, dB, rescale, clamp.
        for v in out.iter_mut() {
            let floored = if *v > LOG_FLOOR { *v } else { LOG_FLOOR };
            let db = 10.0 * floored.log10();
            *v = ((db + POWER_OFFSET_DB) / DB_RANGE).clamp(0.0, 1.0);
        }

        Ok(next)
    }
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
