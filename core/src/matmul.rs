//! Quantized matmul kernels.
//!
//! Three public operations: a generic streaming dequant-and-dot matmul
//! that works for any encoding, a fused Q8_0×Q8_1 integer fast path, and
//! the transposed variant used for tied-embedding output projection. None
//! of the three ever materializes a fully dequantized weight matrix —
//! only one row-chunk at a time, sized to the caller's pre-allocated
//! scratch.

use crate::dequant::dequantize;
use crate::encoding::Encoding;
use crate::kernel_simd;

/// A single Q8_1-quantized activation block: 32 values and a scale used
/// in the fused dot product against Q8_0 weights.
#[derive(Clone, Copy)]
pub struct Q8_1Block {
    pub scale: f32,
    pub qs: [i8; 32],
}

impl Q8_1Block {
    pub const ZERO: Q8_1Block = Q8_1Block { scale: 0.0, qs: [0; 32] };
}

impl Default for Q8_1Block {
    fn default() -> Self {
        Q8_1Block::ZERO
    }
}

/// Quantize `x` into 32-element Q8_1 blocks, written into `out`.
///
/// `out.len()` must equal `x.len() / 32` (caller-guaranteed: activation
/// dimensions are always multiples of 32).
pub fn quantize_q8_1(x: &[f32], out: &mut [Q8_1Block]) {
    debug_assert_eq!(x.len() % 32, 0);
    debug_assert_eq!(out.len(), x.len() / 32);
    for (chunk, block) in x.chunks_exact(32).zip(out.iter_mut()) {
        let max_abs = chunk.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        let scale = if max_abs > 0.0 { max_abs / 127.0 } else { 0.0 };
        let inv_scale = if scale > 0.0 { 1.0 / scale } else { 0.0 };
        for (i, &v) in chunk.iter().enumerate() {
            let q = if scale > 0.0 { (v * inv_scale).round() } else { 0.0 };
            block.qs[i] = q.clamp(-128.0, 127.0) as i8;
        }
        block.scale = scale;
    }
}

/// Row-major byte offset (in blocks) of element `(row, col)` for a weight
/// matrix of `cols` columns under `encoding`.
#[inline]
fn elem_block_index(row: usize, col: usize, cols: usize, qk: usize) -> usize {
    (row * cols + col) / qk
}

/// Pick a chunk width: a multiple of `qk`, at least 64 elements when the
/// row is that long, never larger than `scratch_len` or the remaining
/// span. The chosen width is always at least 64 elements when the row is
/// that long, so block-decode overhead amortizes across a reasonable
/// batch, but never exceeds the caller's scratch buffer.
fn chunk_width(qk: usize, scratch_len: usize, remaining: usize) -> usize {
    let cap = scratch_len.min(remaining);
    let width = (cap / qk).max(1) * qk;
    width.min(remaining)
}

/// Streaming dequant-and-dot matmul: `out[r] = Σ_c W[r,c] * x[c]`.
///
/// `w` is a row-major, `encoding`-quantized `[rows, cols]` matrix.
/// `row_scratch` is reused across rows and chunks; its length bounds the
/// chunk width.
pub fn matmul_streamed(
    out: &mut [f32],
    w: &[u8],
    encoding: Encoding,
    x: &[f32],
    rows: usize,
    cols: usize,
    row_scratch: &mut [f32],
) {
    debug_assert_eq!(out.len(), rows);
    debug_assert_eq!(x.len(), cols);
    let qk = encoding.qk();
    let block_bytes = encoding.block_bytes();

    for r in 0..rows {
        let mut acc = 0.0f32;
        let mut c = 0usize;
        while c < cols {
            let n = chunk_width(qk, row_scratch.len(), cols - c);
            let block_start = elem_block_index(r, c, cols, qk);
            let block_count = n / qk;
            let byte_start = block_start * block_bytes;
            let byte_len = block_count * block_bytes;
            let dst = &mut row_scratch[..n];
            dequantize(encoding, &w[byte_start..byte_start + byte_len], dst);
            acc += kernel_simd::dot(dst, &x[c..c + n]);
            c += n;
        }
        out[r] = acc;
    }
}

/// Fused Q8_0×Q8_1 integer fast path.
///
/// Quantizes `x` into `input_scratch` (caller-provided, `cols/32` blocks)
/// and performs the dot product directly on the int8 weight/activation
/// pairs, widening to i32 before scaling back to float.
pub fn matmul_q8_0_fused(
    out: &mut [f32],
    w_q8_0: &[u8],
    x: &[f32],
    rows: usize,
    cols: usize,
    input_scratch: &mut [Q8_1Block],
) {
    debug_assert_eq!(out.len(), rows);
    debug_assert_eq!(x.len(), cols);
    debug_assert_eq!(input_scratch.len(), cols / 32);
    quantize_q8_1(x, input_scratch);

    const BLOCK: usize = 34; // Q8_0: 2-byte fp16 scale + 32 int8 values
    let blocks_per_row = cols / 32;

    for r in 0..rows {
        let mut acc = 0.0f32;
        let row_byte_start = r * blocks_per_row * BLOCK;
        for (bi, input_block) in input_scratch.iter().enumerate() {
            let block = &w_q8_0[row_byte_start + bi * BLOCK..row_byte_start + (bi + 1) * BLOCK];
            let d_weight = crate::bits::read_f16_le(block, 0);
            let mut weight_qs = [0i8; 32];
            for (dst, &src) in weight_qs.iter_mut().zip(&block[2..34]) {
                *dst = src as i8;
            }

            let dot = kernel_simd::dot_i8_32(&weight_qs, &input_block.qs);
            acc += d_weight * input_block.scale * dot as f32;
        }
        out[r] = acc;
    }
}

/// Scalar streaming reference path for a Q8_0 weight. Used only as a
/// correctness oracle for [`matmul_q8_0_fused`] in tests; real dispatch
/// always takes the fused path for Q8_0 weights.
pub fn matmul_q8_0_streamed_oracle(out: &mut [f32], w: &[u8], x: &[f32], rows: usize, cols: usize, row_scratch: &mut [f32]) {
    matmul_streamed(out, w, Encoding::Q8_0, x, rows, cols, row_scratch);
}

/// Transposed matmul for tied, transposed embeddings:
/// `out[v] = Σ_d W[d, v] * x[d]`, where `W` is `[n_embd, vocab]` row-major
/// (vocab contiguous). Access is strided by construction, so each row `d`
/// is dequantized once in `vocab`-sized chunks and scatter-added into
/// `out` rather than dot-reduced per output element.
pub fn matmul_transposed(
    out: &mut [f32],
    w: &[u8],
    encoding: Encoding,
    x: &[f32],
    n_embd: usize,
    vocab: usize,
    row_scratch: &mut [f32],
) {
    debug_assert_eq!(out.len(), vocab);
    debug_assert_eq!(x.len(), n_embd);
    for v in out.iter_mut() {
        *v = 0.0;
    }

    let qk = encoding.qk();
    let block_bytes = encoding.block_bytes();

    for d in 0..n_embd {
        let xd = x[d];
        if xd == 0.0 {
            continue;
        }
        let mut c = 0usize;
        while c < vocab {
            let n = chunk_width(qk, row_scratch.len(), vocab - c);
            let block_start = elem_block_index(d, c, vocab, qk);
            let block_count = n / qk;
            let byte_start = block_start * block_bytes;
            let byte_len = block_count * block_bytes;
            let dst = &mut row_scratch[..n];
            dequantize(encoding, &w[byte_start..byte_start + byte_len], dst);
            for (i, &v) in dst.iter().enumerate() {
                out[c + i] += v * xd;
            }
            c += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f16_bits(v: f32) -> u16 {
        let bits = v.to_bits();
        let sign = (bits >> 16) & 0x8000;
        let exp = ((bits >> 23) & 0xFF) as i32 - 127 + 15;
        let mantissa = (bits >> 13) & 0x3FF;
        (sign | ((exp.max(0) as u32) << 10) | mantissa) as u16
    }

    fn q8_0_row(values: &[i8]) -> std::vec::Vec<u8> {
        // One block per 32 values, scale = 1.0.
        let mut bytes = std::vec::Vec::new();
        for chunk in values.chunks(32) {
            bytes.extend_from_slice(&f16_bits(1.0).to_le_bytes());
            for &v in chunk {
                bytes.push(v as u8);
            }
        }
        bytes
    }

    #[test]
    fn streamed_matmul_identity_row() {
        // 1 row, 64 cols, Q8_0 scale=1, qs = row index mod 7 - 3.
        let cols = 64usize;
        let qs: std::vec::Vec<i8> = (0..cols as i32).map(|i| (i % 7 - 3) as i8).collect();
        let w = q8_0_row(&qs);
        let x = std::vec![1.0f32; cols];
        let mut out = [0.0f32; 1];
        let mut scratch = std::vec![0.0f32; cols];
        matmul_streamed(&mut out, &w, Encoding::Q8_0, &x, 1, cols, &mut scratch);
        let expect: f32 = qs.iter().map(|&v| v as f32).sum();
        assert!((out[0] - expect).abs() < 1e-3);
    }

    #[test]
    fn fused_q8_0_matches_streamed_reference() {
        let cols = 64usize;
        let rows = 3usize;
        let mut w = std::vec::Vec::new();
        for r in 0..rows as i32 {
            let qs: std::vec::Vec<i8> = (0..cols as i32).map(|i| ((i + r) % 7 - 3) as i8).collect();
            w.extend_from_slice(&q8_0_row(&qs));
        }
        let x: std::vec::Vec<f32> = (0..cols).map(|i| 1.0 + (i as f32) * 0.01).collect();

        let mut out_fused = std::vec![0.0f32; rows];
        let mut input_scratch = std::vec![Q8_1Block::ZERO; cols / 32];
        matmul_q8_0_fused(&mut out_fused, &w, &x, rows, cols, &mut input_scratch);

        let mut out_streamed = std::vec![0.0f32; rows];
        let mut row_scratch = std::vec![0.0f32; cols];
        matmul_q8_0_streamed_oracle(&mut out_streamed, &w, &x, rows, cols, &mut row_scratch);

        let norm: f32 = kernel_simd::dot(&x, &x).sqrt();
        for r in 0..rows {
            assert!((out_fused[r] - out_streamed[r]).abs() / norm < 1e-3);
        }
    }

    #[test]
    fn transposed_matmul_matches_manual_accumulation() {
        // W is [n_embd=2, vocab=64] row-major (vocab contiguous), Q8_0.
        let n_embd = 2usize;
        let vocab = 64usize;
        let mut w = std::vec::Vec::new();
        for d in 0..n_embd as i32 {
            let qs: std::vec::Vec<i8> = (0..vocab as i32).map(|v| ((v + d) % 5 - 2) as i8).collect();
            w.extend_from_slice(&q8_0_row(&qs));
        }
        let x = [2.0f32, -1.0f32];
        let mut out = std::vec![0.0f32; vocab];
        let mut scratch = std::vec![0.0f32; vocab];
        matmul_transposed(&mut out, &w, Encoding::Q8_0, &x, n_embd, vocab, &mut scratch);

        for v in 0..vocab {
            let w0 = ((v as i32) % 5 - 2) as f32;
            let w1 = ((v as i32 + 1) % 5 - 2) as f32;
            let expect = w0 * 2.0 + w1 * -1.0;
            assert!((out[v] - expect).abs() < 1e-3);
        }
    }
}
