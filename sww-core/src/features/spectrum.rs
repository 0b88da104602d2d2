//! Window function and packed real-spectrum helpers.
//!
//! ## Packed layout
//!
//! A real FFT of length `N` has `N/2 + 1` meaningful bins. Bin 0 and bin
//! `N/2` are purely real, so the whole spectrum fits in `N` floats:
//!
//! ```text
//! [ re(0), re(N/2), re(1), im(1), re(2), im(2), ..., re(N/2-1), im(N/2-1) ]
//! ```
//!
//! i.e. the Nyquist real part sits in the slot that would hold bin 0's
//! (always-zero) imaginary part. [`unpack_power`] undoes that before
//! magnitudes are taken.

use rustfft::num_complex::Complex;

/// Periodic Hamming window: `0.54 - 0.46 * cos(2πn / N)`.
pub fn hamming_window(len: usize) -> Box<[f32]> {
    (0..len)
        .map(|n| {
            let phase = 2.0 * std::f64::consts::PI * n as f64 / len as f64;
            (0.54 - 0.46 * phase.cos()) as f32
        })
        .collect()
}

/// Pack the first `N/2 + 1` bins of a full complex FFT output into `packed`
/// (length `N`).
pub fn pack_real_spectrum(bins: &[Complex<f32>], packed: &mut [f32]) {
    let n = packed.len();
    let half = n / 2;
    debug_assert!(bins.len() >= half + 1);

    packed[0] = bins[0].re;
    packed[1] = bins[half].re;
    for k in 1..half {
        packed[2 * k] = bins[k].re;
        packed[2 * k + 1] = bins[k].im;
    }
}

/// Unpack a packed spectrum into a power spectrum of `N/2 + 1` bins:
/// `|X[k]|^2 * scale`.
///
/// The magnitude is taken first and then squared, so the rounding matches a
/// magnitude-then-square pipeline. `packed[1]` is cleared in the process.
pub fn unpack_power(packed: &mut [f32], power: &mut [f32], scale: f32) {
    let half = packed.len() / 2;
    debug_assert_eq!(power.len(), half + 1);

    // Nyquist bin lives where bin 0's imaginary part would be.
    power[half] = packed[1];
    packed[1] = 0.0;

    for k in 0..half {
        let re = packed[2 * k];
        let im = packed[2 * k + 1];
        power[k] = (re * re + im * im).sqrt();
    }
    for p in power.iter_mut() {
        *p = (*p * *p) * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rustfft::FftPlanner;

    fn spectrum_of(signal: &[f32]) -> Vec<Complex<f32>> {
        let mut buf: Vec<Complex<f32>> = signal.iter().map(|&s| Complex::new(s, 0.0)).collect();
        FftPlanner::<f32>::new()
            .plan_fft_forward(signal.len())
            .process(&mut buf);
        buf
    }

    #[test]
    fn hamming_is_periodic_and_peaks_at_centre() {
        let w = hamming_window(8);
        assert_relative_eq!(w[0], 0.08, epsilon = 1e-6);
        assert_relative_eq!(w[4], 1.0, epsilon = 1e-6);
        assert_relative_eq!(w[1], w[7], epsilon = 1e-6);
    }

    #[test]
    fn dc_signal_lands_in_bin_zero() {
        let bins = spectrum_of(&[1.0; 8]);
        let mut packed = [0f32; 8];
        pack_real_spectrum(&bins, &mut packed);
        assert_relative_eq!(packed[0], 8.0, epsilon = 1e-5);
        assert_relative_eq!(packed[1], 0.0, epsilon = 1e-5);

        let mut power = [0f32; 5];
        unpack_power(&mut packed, &mut power, 1.0 / 8.0);
        assert_relative_eq!(power[0], 8.0, epsilon = 1e-4);
        assert!(power[1..].iter().all(|&p| p.abs() < 1e-6));
    }

    #[test]
    fn nyquist_value_is_stored_in_slot_one_and_unpacked() {
        let signal: Vec<f32> = (0..8).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let bins = spectrum_of(&signal);
        let mut packed = [0f32; 8];
        pack_real_spectrum(&bins, &mut packed);
        assert_relative_eq!(packed[0], 0.0, epsilon = 1e-5);
        assert_relative_eq!(packed[1], 8.0, epsilon = 1e-5);

        let mut power = [0f32; 5];
        unpack_power(&mut packed, &mut power, 1.0 / 8.0);
        assert_relative_eq!(power[4], 8.0, epsilon = 1e-4);
        assert!(power[0].abs() < 1e-6);
        assert_eq!(packed[1], 0.0);
    }

    #[test]
    fn interior_bins_keep_real_and_imaginary_parts() {
        // cos at bin 1 of an 8-point transform: X[1] = 4.
        let signal: Vec<f32> = (0..8)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 8.0).cos())
            .collect();
        let bins = spectrum_of(&signal);
        let mut packed = [0f32; 8];
        pack_real_spectrum(&bins, &mut packed);
        assert_relative_eq!(packed[2], 4.0, epsilon = 1e-5);
        assert_relative_eq!(packed[3], 0.0, epsilon = 1e-5);

        let mut power = [0f32; 5];
        unpack_power(&mut packed, &mut power, 1.0);
        assert_relative_eq!(power[1], 16.0, epsilon = 1e-3);
    }
}
