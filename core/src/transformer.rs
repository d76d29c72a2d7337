//! Streaming transformer executor.
//!
//! One decoder layer's shape: RMSNorm → QKV → attention → residual →
//! RMSNorm → FFN → residual, driven by a per-model `ArchitectureRecord`
//! with RoPE, grouped-query attention, SwiGLU, and quantized weights
//! dequantized on the fly through `matmul`. Every activation buffer is
//! pre-allocated once by the caller and reused across every `step` call.
//!
//! Depends on the `libm` crate for `#![no_std]`-compatible
//! `sqrtf`/`expf`/`sinf`/`cosf`/`powf` rather than hand-rolled
//! bit-trick approximations, since exact transcendentals matter for
//! attention/RoPE numerics.

use alloc::string::String;
use alloc::vec::Vec;

use crate::dequant::dequantize;
use crate::error::{Error, InvalidModelReason};
use crate::gguf::{ArchitectureRecord, Reader, TensorRef};
use crate::kernel_simd;
use crate::matmul::{self, Q8_1Block};

fn missing(name: &'static str) -> Error {
    Error::InvalidModel(InvalidModelReason::MissingTensor(name))
}

/// The eight per-layer weight tensors used by one decoder layer.
pub struct LayerWeights<'a> {
    pub attn_norm: TensorRef<'a>,
    pub attn_q: TensorRef<'a>,
    pub attn_k: TensorRef<'a>,
    pub attn_v: TensorRef<'a>,
    pub attn_output: TensorRef<'a>,
    pub ffn_norm: TensorRef<'a>,
    pub ffn_gate: TensorRef<'a>,
    pub ffn_up: TensorRef<'a>,
    pub ffn_down: TensorRef<'a>,
}

/// Every weight tensor needed to run the model, borrowed from the GGUF
/// blob, plus the embedding-layout decision made once at load time.
pub struct ModelWeights<'a> {
    pub token_embd: TensorRef<'a>,
    pub output_norm: TensorRef<'a>,
    pub output: Option<TensorRef<'a>>,
    pub layers: Vec<LayerWeights<'a>>,
    pub embedding_transposed: bool,
}

fn layer_tensor<'a>(reader: &Reader<'a>, layer: usize, suffix: &str, missing_name: &'static str) -> Result<TensorRef<'a>, Error> {
    let name: String = alloc::format!("blk.{layer}.{suffix}");
    reader.tensor(&name).ok_or_else(|| missing(missing_name))
}

impl<'a> ModelWeights<'a> {
    /// Load and validate every tensor the executor needs, deciding the
    /// embedding layout once.
    pub fn load(reader: &Reader<'a>, arch: &ArchitectureRecord) -> Result<Self, Error> {
        let token_embd = reader.tensor("token_embd.weight").ok_or_else(|| missing("token_embd.weight"))?;
        let output_norm = reader.tensor("output_norm.weight").ok_or_else(|| missing("output_norm.weight"))?;
        let output = reader.tensor("output.weight");

        let d0 = token_embd.dims[0] as usize;
        let d1 = token_embd.dims[1] as usize;
        let embedding_transposed = if d0 == arch.n_embd && d1 == arch.vocab_size {
            false
        } else if d0 == arch.vocab_size && d1 == arch.n_embd {
            true
        } else if d0 == arch.n_embd {
            false
        } else {
            true
        };

        let mut layers = Vec::with_capacity(arch.n_layers);
        for l in 0..arch.n_layers {
            layers.push(LayerWeights {
                attn_norm: layer_tensor(reader, l, "attn_norm.weight", "blk.*.attn_norm.weight")?,
                attn_q: layer_tensor(reader, l, "attn_q.weight", "blk.*.attn_q.weight")?,
                attn_k: layer_tensor(reader, l, "attn_k.weight", "blk.*.attn_k.weight")?,
                attn_v: layer_tensor(reader, l, "attn_v.weight", "blk.*.attn_v.weight")?,
                attn_output: layer_tensor(reader, l, "attn_output.weight", "blk.*.attn_output.weight")?,
                ffn_norm: layer_tensor(reader, l, "ffn_norm.weight", "blk.*.ffn_norm.weight")?,
                ffn_gate: layer_tensor(reader, l, "ffn_gate.weight", "blk.*.ffn_gate.weight")?,
                ffn_up: layer_tensor(reader, l, "ffn_up.weight", "blk.*.ffn_up.weight")?,
                ffn_down: layer_tensor(reader, l, "ffn_down.weight", "blk.*.ffn_down.weight")?,
            });
        }

        Ok(ModelWeights { token_embd, output_norm, output, layers, embedding_transposed })
    }
}

/// Pre-allocated activation scratch for one live generation. Every slice
/// is sized once in `Engine::init` and reused for every `step` call —
/// never reallocated.
pub struct Activations<'buf> {
    pub x: &'buf mut [f32],
    pub xb: &'buf mut [f32],
    pub xb2: &'buf mut [f32],
    pub q: &'buf mut [f32],
    pub k: &'buf mut [f32],
    pub v: &'buf mut [f32],
    pub att: &'buf mut [f32],
    pub hb: &'buf mut [f32],
    pub hb2: &'buf mut [f32],
    pub logits: &'buf mut [f32],
    pub row_scratch: &'buf mut [f32],
    pub q8_1_scratch: &'buf mut [Q8_1Block],
}

/// Per-layer, per-position key/value storage: written once at `step(_,
/// p)`, read only by later positions.
pub struct KvCache<'buf> {
    pub key: &'buf mut [f32],
    pub value: &'buf mut [f32],
}

impl<'buf> KvCache<'buf> {
    fn slot(&self, layer: usize, pos: usize, context_length: usize, kv_dim: usize) -> usize {
        (layer * context_length + pos) * kv_dim
    }
}

/// `out[r] = Σ_c W[r,c]·x[c]` through whichever kernel fits `weight`'s
/// encoding — the fused Q8_0×Q8_1 fast path when applicable, the generic
/// streaming path otherwise.
fn project(out: &mut [f32], weight: &TensorRef, x: &[f32], row_scratch: &mut [f32], q8_1_scratch: &mut [Q8_1Block]) {
    let rows = weight.dims[1] as usize;
    let cols = weight.dims[0] as usize;
    if weight.encoding.is_q8_0() {
        matmul::matmul_q8_0_fused(out, weight.data, x, rows, cols, &mut q8_1_scratch[..cols / 32]);
    } else {
        matmul::matmul_streamed(out, weight.data, weight.encoding, x, rows, cols, row_scratch);
    }
}

/// `o_i = w_i · x_i / sqrt(mean(x²) + ε)`.
fn rmsnorm(out: &mut [f32], x: &[f32], weight: &TensorRef, eps: f32, row_scratch: &mut [f32]) {
    let n = x.len();
    let w = &mut row_scratch[..n];
    dequantize(weight.encoding, weight.data, w);

    let mut ss = 0.0f32;
    for &v in x {
        ss += v * v;
    }
    let rms = libm::sqrtf(ss / n as f32 + eps);
    let inv_rms = 1.0 / rms;
    for i in 0..n {
        out[i] = x[i] * inv_rms * w[i];
    }
}

/// Numerically stable softmax in place: max-subtract, `expf`, normalize.
fn softmax(data: &mut [f32]) {
    if data.is_empty() {
        return;
    }
    let max = kernel_simd::horizontal_max(data);
    let mut sum = 0.0f32;
    for v in data.iter_mut() {
        *v = libm::expf(*v - max);
        sum += *v;
    }
    if sum > 0.0 {
        let inv = 1.0 / sum;
        for v in data.iter_mut() {
            *v *= inv;
        }
    }
}

fn silu(z: f32) -> f32 {
    z / (1.0 + libm::expf(-z))
}

/// Rotate adjacent dimension pairs `(i, i+1)` of one head's span by the
/// position-dependent RoPE angle.
fn apply_rope(vec: &mut [f32], head_dim: usize, pos: usize, rope_theta: f32) {
    let heads = vec.len() / head_dim;
    for h in 0..heads {
        let base = h * head_dim;
        let mut i = 0usize;
        while i < head_dim {
            let freq = libm::powf(rope_theta, -(i as f32) / (head_dim as f32));
            let angle = pos as f32 * freq;
            let (sin, cos) = (libm::sinf(angle), libm::cosf(angle));
            let a = vec[base + i];
            let b = vec[base + i + 1];
            vec[base + i] = a * cos - b * sin;
            vec[base + i + 1] = a * sin + b * cos;
            i += 2;
        }
    }
}

/// Dequantize the token embedding row for `token` into `x`, handling both
/// the standard row-major layout and the transposed strided-column
/// layout.
fn fetch_embedding(token_embd: &TensorRef, token: u32, transposed: bool, n_embd: usize, vocab: usize, x: &mut [f32], row_scratch: &mut [f32]) {
    let qk = token_embd.encoding.qk();
    let block_bytes = token_embd.encoding.block_bytes();

    if !transposed {
        let blocks_per_row = n_embd / qk;
        let byte_start = token as usize * blocks_per_row * block_bytes;
        let byte_len = blocks_per_row * block_bytes;
        dequantize(token_embd.encoding, &token_embd.data[byte_start..byte_start + byte_len], x);
    } else {
        for (d, slot) in x.iter_mut().enumerate() {
            let elem_index = d * vocab + token as usize;
            let block_index = elem_index / qk;
            let within = elem_index % qk;
            let byte_start = block_index * block_bytes;
            let block = &token_embd.data[byte_start..byte_start + block_bytes];
            dequantize(token_embd.encoding, block, &mut row_scratch[..qk]);
            *slot = row_scratch[within];
        }
    }
}

/// Run one token through every decoder layer, writing the resulting
/// logits into `act.logits`. Cannot fail once `init` has succeeded: every
/// buffer this touches was already sized and validated against the
/// loaded architecture.
pub fn step(weights: &ModelWeights, arch: &ArchitectureRecord, act: &mut Activations, kv: &mut KvCache, token: u32, pos: usize) {
    fetch_embedding(&weights.token_embd, token, weights.embedding_transposed, arch.n_embd, arch.vocab_size, act.x, act.row_scratch);

    for (l, layer) in weights.layers.iter().enumerate() {
        rmsnorm(act.xb, act.x, &layer.attn_norm, arch.rms_norm_eps, act.row_scratch);

        project(act.q, &layer.attn_q, act.xb, act.row_scratch, act.q8_1_scratch);
        project(act.k, &layer.attn_k, act.xb, act.row_scratch, act.q8_1_scratch);
        project(act.v, &layer.attn_v, act.xb, act.row_scratch, act.q8_1_scratch);

        apply_rope(act.q, arch.head_dim, pos, arch.rope_theta);
        apply_rope(act.k, arch.head_dim, pos, arch.rope_theta);

        let slot = kv.slot(l, pos, arch.context_length, arch.kv_dim);
        kv.key[slot..slot + arch.kv_dim].copy_from_slice(act.k);
        kv.value[slot..slot + arch.kv_dim].copy_from_slice(act.v);

        let inv_sqrt_head_dim = 1.0 / libm::sqrtf(arch.head_dim as f32);
        for h in 0..arch.n_heads {
            let kv_h = h / arch.kv_mul;
            let q_h = &act.q[h * arch.head_dim..(h + 1) * arch.head_dim];
            let scores = &mut act.att[h * arch.context_length..h * arch.context_length + pos + 1];
            for (t, score) in scores.iter_mut().enumerate() {
                let key_slot = kv.slot(l, t, arch.context_length, arch.kv_dim) + kv_h * arch.head_dim;
                let key_h = &kv.key[key_slot..key_slot + arch.head_dim];
                *score = kernel_simd::dot(q_h, key_h) * inv_sqrt_head_dim;
            }
            softmax(scores);

            let out_h = &mut act.xb[h * arch.head_dim..(h + 1) * arch.head_dim];
            for v in out_h.iter_mut() {
                *v = 0.0;
            }
            for (t, &weight) in scores.iter().enumerate() {
                let value_slot = kv.slot(l, t, arch.context_length, arch.kv_dim) + kv_h * arch.head_dim;
                let value_h = &kv.value[value_slot..value_slot + arch.head_dim];
                for (o, &vv) in out_h.iter_mut().zip(value_h.iter()) {
                    *o += weight * vv;
                }
            }
        }

        project(act.xb2, &layer.attn_output, act.xb, act.row_scratch, act.q8_1_scratch);
        kernel_simd::add_inplace(act.x, act.xb2);

        rmsnorm(act.xb, act.x, &layer.ffn_norm, arch.rms_norm_eps, act.row_scratch);
        project(act.hb, &layer.ffn_gate, act.xb, act.row_scratch, act.q8_1_scratch);
        project(act.hb2, &layer.ffn_up, act.xb, act.row_scratch, act.q8_1_scratch);
        for (g, u) in act.hb.iter_mut().zip(act.hb2.iter()) {
            *g = silu(*g) * u;
        }
        project(act.xb, &layer.ffn_down, act.hb, act.row_scratch, act.q8_1_scratch);
        kernel_simd::add_inplace(act.x, act.xb);
    }

    rmsnorm(act.xb, act.x, &weights.output_norm, arch.rms_norm_eps, act.row_scratch);

    match &weights.output {
        Some(output) => project(act.logits, output, act.xb, act.row_scratch, act.q8_1_scratch),
        None if weights.embedding_transposed => {
            matmul::matmul_transposed(
                act.logits,
                weights.token_embd.data,
                weights.token_embd.encoding,
                act.xb,
                arch.n_embd,
                arch.vocab_size,
                act.row_scratch,
            );
        }
        None => {
            matmul::matmul_streamed(
                act.logits,
                weights.token_embd.data,
                weights.token_embd.encoding,
                act.xb,
                arch.vocab_size,
                arch.n_embd,
                act.row_scratch,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rmsnorm_normalizes_unit_weight() {
        let x = [3.0f32, 4.0];
        let mut row_scratch = std::vec![0.0f32; 8];
        // weight = [1, 1] stored as F32 bytes
        let weight_bytes: std::vec::Vec<u8> = [1.0f32, 1.0f32].iter().flat_map(|v| v.to_le_bytes()).collect();
        let weight = TensorRef { encoding: crate::encoding::Encoding::F32, dims: [2, 1, 1, 1], n_dims: 1, data: &weight_bytes };
        let mut out = [0.0f32; 2];
        rmsnorm(&mut out, &x, &weight, 1e-5, &mut row_scratch);
        let rms = (25.0f32 / 2.0).sqrt();
        assert!((out[0] - 3.0 / rms).abs() < 1e-4);
        assert!((out[1] - 4.0 / rms).abs() < 1e-4);
    }

    #[test]
    fn softmax_sums_to_one_and_is_monotonic() {
        let mut scores = [1.0f32, 2.0, 3.0];
        softmax(&mut scores);
        let sum: f32 = scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(scores[2] > scores[1] && scores[1] > scores[0]);
    }

    #[test]
    fn rope_preserves_pair_norm() {
        let mut q = [1.0f32, 0.0, 0.5, 0.5];
        apply_rope(&mut q, 4, 3, 10000.0);
        let norm0 = (1.0f32 * 1.0 + 0.0 * 0.0).sqrt();
        let rotated_norm0 = (q[0] * q[0] + q[1] * q[1]).sqrt();
        assert!((norm0 - rotated_norm0).abs() < 1e-4);
    }

    #[test]
    fn silu_at_zero_is_zero() {
        assert_eq!(silu(0.0), 0.0);
    }

    #[test]
    fn tied_output_with_standard_layout_uses_streamed_matmul() {
        // n_embd=4, vocab=3, 0 layers: token_embd is [n_embd, vocab] standard
        // layout (each token's row contiguous), output.weight absent so the
        // embedding is tied, embedding_transposed=false. This must route
        // through matmul_streamed, not matmul_transposed.
        let n_embd = 4usize;
        let vocab = 3usize;

        let rows: [[f32; 4]; 3] = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.5, 0.5, 0.5, 0.5]];
        let mut embd_bytes: std::vec::Vec<u8> = std::vec::Vec::new();
        for row in &rows {
            for &v in row {
                embd_bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        let token_embd = TensorRef { encoding: crate::encoding::Encoding::F32, dims: [n_embd as u64, vocab as u64, 1, 1], n_dims: 2, data: &embd_bytes };

        let norm_bytes: std::vec::Vec<u8> = [1.0f32; 4].iter().flat_map(|v| v.to_le_bytes()).collect();
        let output_norm = TensorRef { encoding: crate::encoding::Encoding::F32, dims: [4, 1, 1, 1], n_dims: 1, data: &norm_bytes };

        let weights = ModelWeights { token_embd, output_norm, output: None, layers: Vec::new(), embedding_transposed: false };

        let arch = ArchitectureRecord {
            n_embd,
            n_ff: 4,
            n_layers: 0,
            n_heads: 1,
            n_kv_heads: 1,
            vocab_size: vocab,
            context_length: 8,
            rope_theta: 10000.0,
            rms_norm_eps: 0.0,
            bos_id: 0,
            eos_id: 0,
            head_dim: 4,
            kv_dim: 4,
            kv_mul: 1,
        };

        let mut x = std::vec![0.0f32; n_embd];
        let mut xb = std::vec![0.0f32; n_embd];
        let mut xb2 = std::vec![0.0f32; n_embd];
        let mut q = std::vec![0.0f32; n_embd];
        let mut k = std::vec![0.0f32; arch.kv_dim];
        let mut v = std::vec![0.0f32; arch.kv_dim];
        let mut att = std::vec![0.0f32; arch.n_heads * arch.context_length];
        let mut hb = std::vec![0.0f32; arch.n_ff];
        let mut hb2 = std::vec![0.0f32; arch.n_ff];
        let mut logits = std::vec![0.0f32; vocab];
        let mut row_scratch = std::vec![0.0f32; arch.n_ff.max(vocab).max(n_embd)];
        let mut q8_1_scratch = std::vec![Q8_1Block::ZERO; 1];
        let mut kv_key = std::vec![0.0f32; 1];
        let mut kv_value = std::vec![0.0f32; 1];

        let mut act = Activations {
            x: &mut x,
            xb: &mut xb,
            xb2: &mut xb2,
            q: &mut q,
            k: &mut k,
            v: &mut v,
            att: &mut att,
            hb: &mut hb,
            hb2: &mut hb2,
            logits: &mut logits,
            row_scratch: &mut row_scratch,
            q8_1_scratch: &mut q8_1_scratch,
        };
        let mut kv = KvCache { key: &mut kv_key, value: &mut kv_value };

        // Token 2's embedding [0.5,0.5,0.5,0.5] rmsnorms (unit weight, eps=0)
        // to exactly [1,1,1,1], so each logit is the corresponding
        // embedding row's plain element sum.
        step(&weights, &arch, &mut act, &mut kv, 2, 0);

        let expect = [1.0f32, 1.0, 2.0];
        for (got, want) in act.logits.iter().zip(expect.iter()) {
            assert!((got - want).abs() < 1e-4, "got={got} want={want}");
        }
    }
}
