//! `StubModel`: deterministic placeholder classifier.
//!
//! Scores the wakeword class by the loudest filter of each of the newest
//! frames, averaged over those frames, so a loud tonal burst crosses the
//! detection threshold and silence does not. Lets the app, the offline
//! runner and the tests exercise the whole pipeline without a trained
//! network.

use tracing::debug;

use crate::error::{Result, SwwError};
use crate::inference::{QuantParams, WakewordModel};

/// Output classes: wakeword, silence, other.
pub const STUB_OUTPUT_LEN: usize = 3;

pub struct StubModel {
    input_len: usize,
    block: usize,
    /// Frames averaged for the wakeword score.
    recent_blocks: usize,
}

impl StubModel {
    /// `input_len` values arranged as rows of `block` features.
    pub fn new(input_len: usize, block: usize) -> Self {
        Self {
            input_len,
            block: block.max(1),
            recent_blocks: 4,
        }
    }
}

impl Default for StubModel {
    fn default() -> Self {
        Self::new(1200, 40)
    }
}

impl WakewordModel for StubModel {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubModel::warm_up (no-op)");
        Ok(())
    }

    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        STUB_OUTPUT_LEN
    }

    fn input_quant(&self) -> QuantParams {
        QuantParams {
            scale: 1.0 / 256.0,
            zero_point: -128,
        }
    }

    fn run(&mut self, input: &[i8], output: &mut [i8]) -> Result<()> {
        if input.len() != self.input_len || output.len() != STUB_OUTPUT_LEN {
            return Err(SwwError::Inference(format!(
                "stub expects {} in / {} out, got {} / {}",
                self.input_len,
                STUB_OUTPUT_LEN,
                input.len(),
                output.len()
            )));
        }

        let span = (self.block * self.recent_blocks).min(input.len());
        let recent = &input[input.len() - span..];
        let (sum, frames) = recent
            .chunks(self.block)
            .map(|frame| frame.iter().copied().max().unwrap_or(i8::MIN) as i32)
            .fold((0i32, 0i32), |(sum, n), peak| (sum + peak, n + 1));
        let mean = if frames == 0 { -128 } else { sum / frames };

        let wakeword = mean.clamp(-128, 127) as i8;
        output[0] = wakeword;
        output[1] = (-1 - wakeword as i32) as i8;
        output[2] = -128;
        Ok(())
    }

    fn version(&self) -> &str {
        "stub-energy-1"
    }
}
