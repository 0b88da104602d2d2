//! Sparse mel filterbank.
//!
//! The dense weight matrix is `(N/2 + 1) x num_filters`, but each triangular
//! filter only touches a contiguous run of spectrum bins. We keep just that
//! run: a start bin, a length, and the packed non-zero coefficients, so
//! applying the bank is one short dot product per filter.
//!
//! Weights follow the HTK mel scale (`1127 * ln(1 + f / 700)`), with band
//! edges evenly spaced in mel between `lower_hz` and `upper_hz` and the DC bin
//! always excluded.

use crate::error::{Result, SwwError};

#[inline]
fn hz_to_mel(hz: f64) -> f64 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

/// Packed triangular filters over a power spectrum.
#[derive(Debug, Clone)]
pub struct SparseMelFilterbank {
    /// First spectrum bin each filter touches.
    starts: Vec<usize>,
    /// Number of non-zero coefficients per filter.
    lens: Vec<usize>,
    /// All non-zero coefficients, filter after filter.
    coeffs: Vec<f32>,
    spectrum_len: usize,
}

impl SparseMelFilterbank {
    /// Build `num_filters` filters over a spectrum of `spectrum_len` bins
    /// (`fft_len / 2 + 1`) sampled at `sample_rate`.
    ///
    /// # Errors
    /// `SwwError::InvalidConfig` for an empty bank or edges outside
    /// `0 <= lower < upper <= sample_rate / 2`.
    pub fn new(
        spectrum_len: usize,
        sample_rate: u32,
        num_filters: usize,
        lower_hz: f32,
        upper_hz: f32,
    ) -> Result<Self> {
        let nyquist = sample_rate as f64 / 2.0;
        let (lower_hz, upper_hz) = (lower_hz as f64, upper_hz as f64);
        if num_filters == 0 || spectrum_len < 2 {
            return Err(SwwError::InvalidConfig(
                "mel filterbank needs at least one filter and two spectrum bins".into(),
            ));
        }
        if !(0.0..upper_hz).contains(&lower_hz) || upper_hz > nyquist {
            return Err(SwwError::InvalidConfig(format!(
                "mel edges must satisfy 0 <= {lower_hz} < {upper_hz} <= {nyquist}"
            )));
        }

        let lower_mel = hz_to_mel(lower_hz);
        let upper_mel = hz_to_mel(upper_hz);
        let edge_step = (upper_mel - lower_mel) / (num_filters + 1) as f64;
        let bin_hz = nyquist / (spectrum_len - 1) as f64;

        let mut starts = Vec::with_capacity(num_filters);
        let mut lens = Vec::with_capacity(num_filters);
        let mut coeffs = Vec::new();

        for m in 0..num_filters {
            let left = lower_mel + edge_step * m as f64;
            let centre = left + edge_step;
            let right = centre + edge_step;

            let mut start = None;
            let mut len = 0usize;
            // Bin 0 (DC) never contributes.
            for k in 1..spectrum_len {
                let mel = hz_to_mel(k as f64 * bin_hz);
                let rising = (mel - left) / (centre - left);
                let falling = (right - mel) / (right - centre);
                let w = rising.min(falling).max(0.0) as f32;
                if w > 0.0 {
                    if start.is_none() {
                        start = Some(k);
                    }
                    coeffs.push(w);
                    len += 1;
                } else if start.is_some() {
                    break;
                }
            }
            starts.push(start.unwrap_or(0));
            lens.push(len);
        }

        Ok(Self {
            starts,
            lens,
            coeffs,
            spectrum_len,
        })
    }

    pub fn num_filters(&self) -> usize {
        self.starts.len()
    }

    pub fn spectrum_len(&self) -> usize {
        self.spectrum_len
    }

    /// Spectrum bins covered by filter `index`.
    pub fn bin_range(&self, index: usize) -> std::ops::Range<usize> {
        self.starts[index]..self.starts[index] + self.lens[index]
    }

    /// Total stored coefficients (the sparse footprint).
    pub fn stored_coefficients(&self) -> usize {
        self.coeffs.len()
    }

    /// `out[i] = dot(power[start_i..start_i + len_i], coeffs_i)`.
    pub fn apply(&self, power: &[f32], out: &mut [f32]) {
        debug_assert_eq!(power.len(), self.spectrum_len);
        debug_assert_eq!(out.len(), self.num_filters());

        let mut offset = 0;
        for (i, dst) in out.iter_mut().enumerate() {
            let len = self.lens[i];
            let span = &power[self.starts[i]..self.starts[i] + len];
            let weights = &self.coeffs[offset..offset + len];
            *dst = span.iter().zip(weights).map(|(p, w)| p * w).sum();
            offset += len;
        }
    }
}
