//! Block-quantized encoding tags.
//!
//! Modeled as an exhaustive enum rather than a runtime if-chain on an
//! integer tag, so adding a tenth encoding later is a compile error at
//! every `match` until every call site handles it.

use crate::error::Error;

/// One of the nine block-quantized (or raw) tensor encodings this core
/// understands. Numeric values match the GGUF `ggml_type` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Encoding {
    F32 = 0,
    F16 = 1,
    Q4_0 = 2,
    Q4_1 = 3,
    Q5_0 = 6,
    Q8_0 = 8,
    Q2_K = 10,
    Q4_K = 12,
    Q5_K = 13,
    Q6_K = 14,
}

impl Encoding {
    /// Elements per block (`QK`). `F32`/`F16` are unblocked; we report `1`
    /// so `inner_dim % qk() == 0` is trivially true for them.
    pub const fn qk(self) -> usize {
        match self {
            Encoding::F32 | Encoding::F16 => 1,
            Encoding::Q4_0 | Encoding::Q4_1 | Encoding::Q5_0 | Encoding::Q8_0 => 32,
            Encoding::Q2_K | Encoding::Q4_K | Encoding::Q5_K | Encoding::Q6_K => 256,
        }
    }

    /// Bytes occupied by one block (or, for unblocked encodings, one element).
    pub const fn block_bytes(self) -> usize {
        match self {
            Encoding::F32 => 4,
            Encoding::F16 => 2,
            Encoding::Q4_0 => 18,
            Encoding::Q4_1 => 20,
            Encoding::Q5_0 => 22,
            Encoding::Q8_0 => 34,
            Encoding::Q2_K => 84,
            Encoding::Q4_K => 144,
            Encoding::Q5_K => 176,
            Encoding::Q6_K => 210,
        }
    }

    /// Number of complete blocks needed to hold `n_elements`, or `None`
    /// when `n_elements` does not divide evenly — every tensor's inner
    /// dimension is expected to be a whole number of blocks.
    pub const fn block_count(self, n_elements: usize) -> Option<usize> {
        let qk = self.qk();
        if n_elements % qk == 0 {
            Some(n_elements / qk)
        } else {
            None
        }
    }

    /// Byte span covered by `n_elements` worth of this encoding.
    pub const fn byte_span(self, n_elements: usize) -> Option<usize> {
        match self.block_count(n_elements) {
            Some(blocks) => Some(blocks * self.block_bytes()),
            None => None,
        }
    }

    /// Whether `matmul_q8_0_fused` applies to weights of this encoding.
    pub const fn is_q8_0(self) -> bool {
        matches!(self, Encoding::Q8_0)
    }
}

impl TryFrom<u32> for Encoding {
    type Error = Error;
    fn try_from(tag: u32) -> Result<Self, Error> {
        match tag {
            0 => Ok(Encoding::F32),
            1 => Ok(Encoding::F16),
            2 => Ok(Encoding::Q4_0),
            3 => Ok(Encoding::Q4_1),
            6 => Ok(Encoding::Q5_0),
            8 => Ok(Encoding::Q8_0),
            10 => Ok(Encoding::Q2_K),
            12 => Ok(Encoding::Q4_K),
            13 => Ok(Encoding::Q5_K),
            14 => Ok(Encoding::Q6_K),
            other => Err(Error::UnsupportedEncoding(other)),
        }
    }
}
