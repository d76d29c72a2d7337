//! vellum-core — streaming GGUF transformer inference core
//!
//! Reads quantized LLaMA-family weights directly out of their on-disk GGUF
//! encoding and runs a token-by-token forward pass without ever holding a
//! fully dequantized copy of the model in memory. Built for targets with no
//! operating system: the four things a real machine provides — a heap, a
//! console, a monotonic timer, and interrupt masking — are consumed as
//! trait objects (see [`collab`]) rather than linked against directly, so
//! this crate has no knowledge of any particular board or kernel.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  gguf          Container reader: header, metadata, tensor table │
//! │  encoding      Block-quant tag enum (F32 .. Q6_K)                │
//! │  dequant       Per-encoding block → f32 row expansion            │
//! │  kernel_simd   dot/horizontal_sum primitives, scalar + SIMD      │
//! │  matmul        streamed / fused-Q8_0 / transposed matmul kernels │
//! │  tokenizer     BPE encode/decode over the model's own vocabulary │
//! │  transformer   one decoder layer's worth of RMSNorm/RoPE/GQA/FFN │
//! │  generate      prefill + greedy decode loop, latency accounting │
//! │  engine        owns all of the above behind one `Engine`         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![allow(clippy::too_many_arguments)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod bits;
pub mod collab;
pub mod dequant;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod generate;
pub mod gguf;
pub mod kernel_simd;
pub mod matmul;
pub mod tokenizer;
pub mod transformer;

pub use collab::{ArchCollaborator, Collaborators, ConsoleCollaborator, HeapCollaborator, LogLevel, TimerCollaborator};
pub use encoding::Encoding;
pub use engine::{Engine, EngineOptions, ModelInfo};
pub use error::{Error, InvalidModelReason};
pub use generate::Timing;

/// Initialize an [`Engine`] over an in-memory GGUF blob.
///
/// `model_bytes` is owned by the caller for the lifetime of the returned
/// engine; the core holds only references into it and never copies the
/// weights.
pub fn init<'a>(
    model_bytes: &'a [u8],
    collaborators: Collaborators<'a>,
    opts: EngineOptions,
) -> Result<Engine<'a>, Error> {
    Engine::init(model_bytes, collaborators, opts)
}

/// Tear down an engine instance. Frees any scratch allocated at `init` time
/// when deterministic mode requested preallocation through the heap
/// collaborator; otherwise a no-op since `alloc::vec::Vec` drops normally.
pub fn shutdown(engine: Engine<'_>) {
    drop(engine);
}
