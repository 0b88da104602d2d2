//! Classifier abstraction.
//!
//! The `WakewordModel` trait decouples the pipeline from any specific backend
//! (the deterministic stub, a TFLite-Micro port, a vendor NPU runtime, etc.).
//! A model is an opaque int8 classifier: a fixed-size quantized tensor in, a
//! fixed-size int8 score vector out, with the input quantization parameters
//! published as metadata.
//!
//! `&mut self` on `run` expresses that runtimes own scratch arenas. All
//! mutation is therefore serialised through `ModelHandle`'s
//! `parking_lot::Mutex`.

pub mod input;
pub mod stub;

pub use input::ModelInput;
pub use stub::StubModel;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Affine int8 quantization of the model input: `q = f / scale + zero_point`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParams {
    /// Quantize one feature. Truncates toward zero and saturates at the i8
    /// range.
    #[inline]
    pub fn quantize(&self, value: f32) -> i8 {
        (value / self.scale + self.zero_point as f32) as i8
    }

    #[inline]
    pub fn dequantize(&self, q: i8) -> f32 {
        (q as i32 - self.zero_point) as f32 * self.scale
    }
}

/// Contract for wakeword classifier backends.
pub trait WakewordModel: Send + 'static {
    /// One-time bootstrap: map weights, size the arena, run a dummy
    /// inference. Called once before the first `start()`.
    ///
    /// # Errors
    /// Returns an error if the runtime cannot be initialised.
    fn warm_up(&mut self) -> Result<()>;

    /// Number of int8 values `run` expects.
    fn input_len(&self) -> usize;

    /// Number of int8 scores `run` produces. Index 0 is the wakeword class.
    fn output_len(&self) -> usize;

    /// Input quantization metadata.
    fn input_quant(&self) -> QuantParams;

    /// Synchronous inference. `input.len() == input_len()` and
    /// `output.len() == output_len()`.
    fn run(&mut self, input: &[i8], output: &mut [i8]) -> Result<()>;

    /// Model identifier for the `profile` reply.
    fn version(&self) -> &str {
        "unknown"
    }
}

/// Thread-safe reference-counted handle to any `WakewordModel` implementor.
///
/// Uses `parking_lot::Mutex` for non-poisoning on panic and a cheap
/// uncontended lock; the streaming path takes it once per chunk.
#[derive(Clone)]
pub struct ModelHandle(pub Arc<Mutex<dyn WakewordModel>>);

impl ModelHandle {
    /// Wrap any `WakewordModel` in a `ModelHandle`.
    pub fn new<M: WakewordModel>(model: M) -> Self {
        Self(Arc::new(Mutex::new(model)))
    }

    pub fn input_quant(&self) -> QuantParams {
        self.0.lock().input_quant()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q: QuantParams = QuantParams {
        scale: 1.0 / 256.0,
        zero_point: -128,
    };

    #[test]
    fn quantize_matches_offset_form() {
        for f in [0.0f32, 0.1, 0.37, 0.5, 0.99] {
            assert_eq!(Q.quantize(f), (f / Q.scale - 128.0) as i8);
        }
        assert_eq!(Q.quantize(0.0), -128);
        assert_eq!(Q.quantize(0.5), 0);
    }

    #[test]
    fn quantize_saturates_at_full_scale() {
        assert_eq!(Q.quantize(1.0), 127);
    }

    #[test]
    fn round_trip_is_within_one_step() {
        let scale = 0.0101_f32;
        let q = QuantParams {
            scale,
            zero_point: -128,
        };
        for i in 0..=100 {
            let f = i as f32 / 100.0 * (255.0 * scale);
            let back = (q.quantize(f) as i32 + 128) as f32 * scale;
            assert!((back - f).abs() <= scale, "f={f} back={back}");
        }
    }
}
