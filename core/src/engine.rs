//! The owning aggregate tying every component together.
//!
//! A single `Engine<'a>` value holds the GGUF reader's derived
//! architecture, loaded weights, vocabulary, collaborators, and every
//! scratch buffer as plain fields, borrowed for exactly as long as the
//! caller keeps the model blob and collaborators alive. No global or
//! process-wide state is involved, so nothing prevents running more than
//! one engine instance side by side.

use core::alloc::Layout;
use core::ptr::NonNull;

use alloc::string::String;
use alloc::vec::Vec;

use crate::collab::Collaborators;
use crate::collab::HeapCollaborator;
use crate::error::Error;
use crate::generate::{self, Timing};
use crate::gguf::{ArchitectureRecord, Reader};
use crate::matmul::Q8_1Block;
use crate::tokenizer::Vocabulary;
use crate::transformer::{Activations, KvCache, ModelWeights};

/// Runtime configuration passed to [`Engine::init`].
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Allocate every scratch/KV buffer through the `HeapCollaborator` at
    /// `init` time instead of lazily. Forced on when `deterministic` is
    /// set, since deterministic timing requires `generate` to never touch
    /// the heap.
    pub preallocate: bool,
    /// Bracket every generation loop iteration with
    /// `arch.disable_interrupts()` / `enable_interrupts()` and guarantee no
    /// heap traffic inside `generate`.
    pub deterministic: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions { preallocate: false, deterministic: false }
    }
}

/// Read-only model summary returned by [`Engine::model_info`].
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub n_embd: usize,
    pub n_layers: usize,
    pub vocab: usize,
    pub context: usize,
}

/// One raw allocation owned for the engine's lifetime, freed through the
/// same collaborator that produced it. Only touches the heap at
/// `init`/`shutdown`, never mid-generation.
struct HeapBuffer<'a, T> {
    heap: &'a dyn HeapCollaborator,
    ptr: NonNull<T>,
    layout: Layout,
}

impl<'a, T> HeapBuffer<'a, T> {
    fn alloc(heap: &'a dyn HeapCollaborator, len: usize) -> Result<Self, Error> {
        let layout = Layout::array::<T>(len.max(1)).map_err(|_| Error::OutOfMemory)?;
        let raw = heap.alloc(layout.size(), layout.align()).ok_or(Error::OutOfMemory)?;
        let ptr = NonNull::new(raw).ok_or(Error::OutOfMemory)?.cast::<T>();
        Ok(HeapBuffer { heap, ptr, layout })
    }

    fn as_mut_slice(&mut self, len: usize) -> &mut [T] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), len) }
    }
}

impl<'a, T> Drop for HeapBuffer<'a, T> {
    fn drop(&mut self) {
        unsafe { self.heap.dealloc(self.ptr.as_ptr().cast::<u8>(), self.layout.size(), self.layout.align()) };
    }
}

/// One scratch buffer, backed either by a `HeapCollaborator` allocation
/// (preallocate/deterministic mode) or an ordinary `Vec`. Either way it's
/// allocated exactly once, at `init`, and never again inside `generate`.
enum Scratch<'a, T> {
    Heap(HeapBuffer<'a, T>, usize),
    Owned(Vec<T>),
}

impl<'a, T: Copy + Default> Scratch<'a, T> {
    fn new(heap: &'a dyn HeapCollaborator, preallocate: bool, len: usize) -> Result<Self, Error> {
        if preallocate {
            Ok(Scratch::Heap(HeapBuffer::alloc(heap, len)?, len))
        } else {
            Ok(Scratch::Owned(alloc::vec![T::default(); len]))
        }
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        match self {
            Scratch::Heap(buf, len) => buf.as_mut_slice(*len),
            Scratch::Owned(v) => v.as_mut_slice(),
        }
    }

    fn zero(&mut self) {
        for slot in self.as_mut_slice() {
            *slot = T::default();
        }
    }
}

/// The engine instance: owns the derived architecture, loaded weights,
/// vocabulary, collaborators, and every pre-sized scratch buffer needed
/// to run `generate` without ever allocating again.
pub struct Engine<'a> {
    arch: ArchitectureRecord,
    weights: ModelWeights<'a>,
    vocab: Vocabulary<'a>,
    collaborators: Collaborators<'a>,
    opts: EngineOptions,
    last_tokenize_us: u64,
    generation_count: u64,

    x: Scratch<'a, f32>,
    xb: Scratch<'a, f32>,
    xb2: Scratch<'a, f32>,
    q: Scratch<'a, f32>,
    k: Scratch<'a, f32>,
    v: Scratch<'a, f32>,
    att: Scratch<'a, f32>,
    hb: Scratch<'a, f32>,
    hb2: Scratch<'a, f32>,
    logits: Scratch<'a, f32>,
    row_scratch: Scratch<'a, f32>,
    q8_1_scratch: Scratch<'a, Q8_1Block>,
    kv_key: Scratch<'a, f32>,
    kv_value: Scratch<'a, f32>,
}

impl<'a> Engine<'a> {
    /// Parse, validate and load a GGUF model blob, size every scratch
    /// buffer from its `ArchitectureRecord`, and return one owning
    /// `Engine`. `model_bytes` is owned by the caller; the engine holds
    /// only references into it for its entire lifetime.
    pub fn init(model_bytes: &'a [u8], collaborators: Collaborators<'a>, opts: EngineOptions) -> Result<Self, Error> {
        // Every error path below emits exactly one diagnostic line before
        // propagating; `console` has nowhere else to be threaded through a
        // three-line parse failure, so we log it here instead of inside
        // `gguf`/`tokenizer`, which stay collaborator-free.
        let console = collaborators.console;
        macro_rules! traced {
            ($result:expr, $what:literal) => {
                match $result {
                    Ok(v) => v,
                    Err(e) => {
                        crate::engine_log!(console, crate::LogLevel::Error, "{}: {}", $what, e);
                        return Err(e);
                    }
                }
            };
        }

        let reader = traced!(Reader::open(model_bytes), "gguf parse failed");
        let arch = traced!(reader.arch(), "architecture metadata invalid");
        let weights = traced!(ModelWeights::load(&reader, &arch), "loading layer weights failed");
        let vocab = traced!(Vocabulary::from_reader(&reader), "loading vocabulary failed");

        let preallocate = opts.preallocate || opts.deterministic;
        let heap = collaborators.heap;

        let row_scratch_len = arch.n_ff.max(arch.vocab_size).max(arch.n_embd);
        let q8_1_len = arch.n_embd.max(arch.n_ff) / 32;
        let kv_len = arch.n_layers * arch.context_length * arch.kv_dim;

        // Allocated in order; a `?` failure partway through drops every
        // `Scratch` already bound to a local, freeing it through the same
        // collaborator it came from, so a failed init leaves nothing
        // leaked on the heap.
        let x = traced!(Scratch::new(heap, preallocate, arch.n_embd), "scratch allocation failed");
        let xb = traced!(Scratch::new(heap, preallocate, arch.n_embd), "scratch allocation failed");
        let xb2 = traced!(Scratch::new(heap, preallocate, arch.n_embd), "scratch allocation failed");
        let q = traced!(Scratch::new(heap, preallocate, arch.n_embd), "scratch allocation failed");
        let k = traced!(Scratch::new(heap, preallocate, arch.kv_dim), "scratch allocation failed");
        let v = traced!(Scratch::new(heap, preallocate, arch.kv_dim), "scratch allocation failed");
        let att = traced!(Scratch::new(heap, preallocate, arch.n_heads * arch.context_length), "scratch allocation failed");
        let hb = traced!(Scratch::new(heap, preallocate, arch.n_ff), "scratch allocation failed");
        let hb2 = traced!(Scratch::new(heap, preallocate, arch.n_ff), "scratch allocation failed");
        let logits = traced!(Scratch::new(heap, preallocate, arch.vocab_size), "scratch allocation failed");
        let row_scratch = traced!(Scratch::new(heap, preallocate, row_scratch_len), "scratch allocation failed");
        let q8_1_scratch = traced!(Scratch::new(heap, preallocate, q8_1_len), "scratch allocation failed");
        let kv_key = traced!(Scratch::new(heap, preallocate, kv_len), "scratch allocation failed");
        let kv_value = traced!(Scratch::new(heap, preallocate, kv_len), "scratch allocation failed");

        Ok(Engine {
            arch,
            weights,
            vocab,
            collaborators,
            opts,
            last_tokenize_us: 0,
            generation_count: 0,
            x,
            xb,
            xb2,
            q,
            k,
            v,
            att,
            hb,
            hb2,
            logits,
            row_scratch,
            q8_1_scratch,
            kv_key,
            kv_value,
        })
    }

    /// Tokenize `text` against the model's own vocabulary. Records the
    /// elapsed time so the next [`Engine::generate`] call can fold it into
    /// `timing.tokenize_us` / `timing.first_token_us`, so the reported
    /// `first_token_us` is the full tokenize+prefill+first-decode latency.
    pub fn encode(&mut self, text: &str, add_bos: bool, add_eos: bool) -> Vec<u32> {
        let start = self.collaborators.timer.now_us();
        let ids = self.vocab.encode(text, add_bos, add_eos, self.arch.context_length);
        self.last_tokenize_us = self.collaborators.timer.now_us().saturating_sub(start);
        ids
    }

    fn reset_kv_cache(&mut self) {
        self.kv_key.zero();
        self.kv_value.zero();
    }

    /// Run prefill + autoregressive decode over `prompt_tokens`, writing
    /// up to `max_new_tokens` generated ids into `out_tokens` and filling
    /// `timing`. The KV cache is zeroed at the start of every call, so
    /// calls are stateless across generations.
    pub fn generate(&mut self, prompt_tokens: &[u32], max_new_tokens: usize, out_tokens: &mut [u32], timing: &mut Timing) -> Result<usize, Error> {
        self.reset_kv_cache();
        *timing = Timing::default();

        let mut act = Activations {
            x: self.x.as_mut_slice(),
            xb: self.xb.as_mut_slice(),
            xb2: self.xb2.as_mut_slice(),
            q: self.q.as_mut_slice(),
            k: self.k.as_mut_slice(),
            v: self.v.as_mut_slice(),
            att: self.att.as_mut_slice(),
            hb: self.hb.as_mut_slice(),
            hb2: self.hb2.as_mut_slice(),
            logits: self.logits.as_mut_slice(),
            row_scratch: self.row_scratch.as_mut_slice(),
            q8_1_scratch: self.q8_1_scratch.as_mut_slice(),
        };
        let mut kv = KvCache { key: self.kv_key.as_mut_slice(), value: self.kv_value.as_mut_slice() };

        let written = match generate::generate(
            &self.weights,
            &self.arch,
            &mut act,
            &mut kv,
            self.collaborators.arch,
            self.collaborators.timer,
            self.opts.deterministic,
            prompt_tokens,
            max_new_tokens,
            self.arch.eos_id,
            out_tokens,
            timing,
        ) {
            Ok(n) => n,
            Err(e) => {
                crate::engine_log!(self.collaborators.console, crate::LogLevel::Error, "generate failed: {}", e);
                return Err(e);
            }
        };

        timing.tokenize_us = self.last_tokenize_us;
        timing.first_token_us = timing.first_token_us.saturating_add(self.last_tokenize_us);
        self.generation_count += 1;
        Ok(written)
    }

    /// The raw vocabulary piece for one token id.
    pub fn decode_token(&self, id: u32) -> &str {
        self.vocab.decode_token(id)
    }

    /// Detokenize a full id sequence to text.
    pub fn decode(&self, ids: &[u32]) -> String {
        self.vocab.decode(ids)
    }

    /// Architecture summary derived from the loaded model.
    pub fn model_info(&self) -> ModelInfo {
        ModelInfo { n_embd: self.arch.n_embd, n_layers: self.arch.n_layers, vocab: self.arch.vocab_size, context: self.arch.context_length }
    }

    /// Toggle deterministic-timing mode after `init`. This only changes
    /// whether `generate` brackets each iteration with interrupt masking —
    /// every scratch buffer was already sized and allocated once at
    /// `init`, so `generate` never touches the heap regardless of this
    /// flag's value at call time.
    pub fn set_deterministic(&mut self, deterministic: bool) {
        self.opts.deterministic = deterministic;
    }

    pub fn get_deterministic(&self) -> bool {
        self.opts.deterministic
    }

    /// Compact one-line status string: read-only introspection, no effect
    /// on generation.
    pub fn stats(&self) -> String {
        alloc::format!(
            "vellum: {}L x d{} x {}H ({} kv) x ff{}, vocab={}, context={}, generations={}",
            self.arch.n_layers,
            self.arch.n_embd,
            self.arch.n_heads,
            self.arch.n_kv_heads,
            self.arch.n_ff,
            self.arch.vocab_size,
            self.arch.context_length,
            self.generation_count,
        )
    }
}
