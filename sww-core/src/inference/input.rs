//! Rolling quantized model input.
//!
//! The tensor holds the last `len / block` feature vectors in time order,
//! oldest first. Every append evicts the oldest block.

use crate::buffering::try_alloc;
use crate::error::{Result, SwwError};
use crate::inference::QuantParams;

#[derive(Debug, Clone)]
pub struct ModelInput {
    data: Box<[i8]>,
    block: usize,
}

impl ModelInput {
    /// Allocate a zeroed tensor of `len` values made of `block`-sized rows.
    ///
    /// # Errors
    /// `SwwError::InvalidConfig` if `len` is not a non-zero multiple of `block`;
    /// `SwwError::Allocation` if the tensor cannot be reserved.
    pub fn new(len: usize, block: usize) -> Result<Self> {
        if block == 0 || len == 0 || len % block != 0 {
            return Err(SwwError::InvalidConfig(format!(
                "model input size {len} must be a non-zero multiple of {block}"
            )));
        }
        Ok(Self {
            data: try_alloc(len, "model input")?,
            block,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Values per appended feature vector.
    pub fn block_len(&self) -> usize {
        self.block
    }

    pub fn as_slice(&self) -> &[i8] {
        &self.data
    }

    /// Most recently appended block.
    pub fn newest_block(&self) -> &[i8] {
        &self.data[self.data.len() - self.block..]
    }

    /// All-zero, not the quantized-silence value.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Shift left by one block and quantize `features` into the tail.
    ///
    /// # Errors
    /// `SwwError::FrameLength` unless `features.len() == block_len()`.
    pub fn append(&mut self, features: &[f32], quant: QuantParams) -> Result<()> {
        if features.len() != self.block {
            return Err(SwwError::FrameLength {
                expected: self.block,
                given: features.len(),
            });
        }
        self.data.copy_within(self.block.., 0);
        let tail = self.data.len() - self.block;
        for (dst, &f) in self.data[tail..].iter_mut().zip(features) {
            *dst = quant.quantize(f);
        }
        Ok(())
    }
}
