//! Generation driver.
//!
//! Top-level prefill/decode loop with deterministic-mode interrupt
//! discipline and per-token latency statistics. Sampling is argmax-only
//! (no temperature/top-k): this core targets reproducible, deterministic
//! latency measurement rather than varied output.

use alloc::vec::Vec;

use crate::collab::{ArchCollaborator, TimerCollaborator};
use crate::error::Error;
use crate::gguf::ArchitectureRecord;
use crate::transformer::{self, Activations, KvCache, ModelWeights};

/// Minimum number of leading decode tokens whose individual latency is
/// retained; enough to compute stable min/max/avg/jitter without keeping
/// a per-token sample for an unbounded generation run.
const MIN_TRACKED_DECODE_TOKENS: usize = 64;

/// Microsecond timing record for one `generate` call.
#[derive(Debug, Clone, Default)]
pub struct Timing {
    pub tokenize_us: u64,
    pub prefill_us: u64,
    /// Elapsed time from entering this loop to the first decode token,
    /// i.e. `prefill_us` plus the first decode step's own latency.
    /// `Engine::generate` adds `tokenize_us` on top before returning, so
    /// the field callers see is the full time-to-first-token.
    pub first_token_us: u64,
    /// Per-token latency for at least the first `MIN_TRACKED_DECODE_TOKENS`
    /// decode tokens; surplus beyond that is not retained individually
    /// (only folded into `min`/`max`/`avg`/`jitter`).
    pub decode_us: Vec<u64>,
    pub min_decode_us: u64,
    pub max_decode_us: u64,
    pub avg_decode_us: u64,
    pub jitter_us: u64,
    decode_count: u64,
    decode_sum_us: u64,
}

impl Timing {
    fn record_decode(&mut self, latency_us: u64) {
        if self.decode_us.len() < MIN_TRACKED_DECODE_TOKENS {
            self.decode_us.push(latency_us);
        }
        self.min_decode_us = if self.decode_count == 0 { latency_us } else { self.min_decode_us.min(latency_us) };
        self.max_decode_us = self.max_decode_us.max(latency_us);
        self.decode_count += 1;
        self.decode_sum_us += latency_us;
        self.avg_decode_us = self.decode_sum_us / self.decode_count;
        self.jitter_us = self.max_decode_us.saturating_sub(self.min_decode_us);
    }
}

fn argmax(logits: &[f32]) -> u32 {
    let mut best_i = 0usize;
    let mut best_v = f32::NEG_INFINITY;
    for (i, &v) in logits.iter().enumerate() {
        if v > best_v {
            best_v = v;
            best_i = i;
        }
    }
    best_i as u32
}

/// Run `step` across a prompt (prefill) and then autoregressively
/// (decode), writing generated token ids into `out_tokens` and filling
/// `timing`. Returns the number of newly generated tokens. `out_tokens`
/// must have room for at least `max_new_tokens`.
#[allow(clippy::too_many_arguments)]
pub fn generate(
    weights: &ModelWeights,
    arch: &ArchitectureRecord,
    act: &mut Activations,
    kv: &mut KvCache,
    arch_collab: &dyn ArchCollaborator,
    timer: &dyn TimerCollaborator,
    deterministic: bool,
    prompt_tokens: &[u32],
    max_new_tokens: usize,
    eos_id: u32,
    out_tokens: &mut [u32],
    timing: &mut Timing,
) -> Result<usize, Error> {
    if prompt_tokens.is_empty() {
        return Err(Error::BadArgument("prompt_tokens must not be empty"));
    }
    if max_new_tokens == 0 {
        return Err(Error::BadArgument("max_new_tokens must be > 0"));
    }
    if prompt_tokens.len() > arch.context_length {
        return Err(Error::BadArgument("prompt longer than context_length"));
    }
    if out_tokens.len() < max_new_tokens {
        return Err(Error::BufferTooSmall);
    }

    let generation_start = timer.now_us();
    let mut pos = 0usize;
    let mut token = prompt_tokens[0];
    let mut written = 0usize;
    let mut decode_start: Option<u64> = None;
    let mut first_token_recorded = false;

    while pos < arch.context_length && written < max_new_tokens {
        if deterministic {
            arch_collab.disable_interrupts();
        }

        let iter_start = timer.now_us();
        transformer::step(weights, arch, act, kv, token, pos);

        let next_token = if pos < prompt_tokens.len() - 1 {
            prompt_tokens[pos + 1]
        } else {
            if decode_start.is_none() {
                decode_start = Some(iter_start);
                timing.prefill_us = iter_start.saturating_sub(generation_start);
            }
            let next = argmax(act.logits);
            let latency = timer.now_us().saturating_sub(iter_start);
            timing.record_decode(latency);
            if !first_token_recorded {
                timing.first_token_us = timer.now_us().saturating_sub(generation_start);
                first_token_recorded = true;
            }
            out_tokens[written] = next;
            written += 1;
            next
        };

        if deterministic {
            arch_collab.enable_interrupts();
        }

        if pos >= prompt_tokens.len() - 1 && next_token == eos_id {
            break;
        }

        token = next_token;
        pos += 1;
    }

    Ok(written)
}
