//! BPE tokenizer driven by a GGUF-embedded vocabulary and merge table.
//!
//! Encoding starts from a byte-fallback symbol stream and repeatedly
//! applies the lowest-priority applicable merge until none remain;
//! decoding walks the resulting pieces back to bytes, translating the
//! leading-space marker and any byte-fallback tokens along the way.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, InvalidModelReason};
use crate::gguf::{MetadataValue, Reader};

const SPACE_MARKER: char = '\u{2581}'; // "▁", SentencePiece's leading-space marker

/// Vocabulary and merge table for one loaded model, borrowed from the
/// GGUF blob.
pub struct Vocabulary<'a> {
    pieces: Vec<&'a str>,
    piece_to_id: BTreeMap<&'a str, u32>,
    merge_rank: BTreeMap<(u32, u32), (u32, u32)>,
    has_space_marker: bool,
    pub bos_id: u32,
    pub eos_id: u32,
    pub unk_id: u32,
    pub pad_id: u32,
}

impl<'a> Vocabulary<'a> {
    /// Build a vocabulary from explicit pieces and merge strings (each
    /// `"left right"`, ordered by priority — lowest index merges first).
    pub fn new(pieces: Vec<&'a str>, merge_strs: &[&'a str], bos_id: u32, eos_id: u32, unk_id: u32, pad_id: u32) -> Self {
        let mut piece_to_id = BTreeMap::new();
        for (id, &piece) in pieces.iter().enumerate() {
            piece_to_id.insert(piece, id as u32);
        }

        let mut merged_owned: Vec<String> = Vec::new();
        let mut merge_rank = BTreeMap::new();
        for (priority, merge) in merge_strs.iter().enumerate() {
            let mut parts = merge.splitn(2, ' ');
            let (left, right) = match (parts.next(), parts.next()) {
                (Some(l), Some(r)) => (l, r),
                _ => continue,
            };
            let (Some(&left_id), Some(&right_id)) = (piece_to_id.get(left), piece_to_id.get(right)) else {
                continue;
            };
            merged_owned.push(alloc::format!("{left}{right}"));
            let merged_str = merged_owned.last().unwrap();
            if let Some(&merged_id) = piece_to_id.get(merged_str.as_str()) {
                merge_rank.insert((left_id, right_id), (merged_id, priority as u32));
            }
        }

        let has_space_marker = piece_to_id.contains_key("\u{2581}");

        Vocabulary { pieces, piece_to_id, merge_rank, has_space_marker, bos_id, eos_id, unk_id, pad_id }
    }

    /// Build a vocabulary directly from a parsed GGUF container's
    /// `tokenizer.ggml.*` metadata keys.
    pub fn from_reader(reader: &Reader<'a>) -> Result<Self, Error> {
        let vocab_size = reader.vocab_size();
        if vocab_size == 0 {
            return Err(Error::InvalidModel(InvalidModelReason::MissingTensor("tokenizer.ggml.tokens")));
        }
        let mut pieces = Vec::with_capacity(vocab_size);
        for id in 0..vocab_size as u32 {
            pieces.push(reader.token(id).unwrap_or(""));
        }
        let merge_strs: Vec<&str> = reader.merges().iter().filter_map(MetadataValue::as_str).collect();
        let arch = reader.arch()?;
        let unk_id = reader.metadata_u64("tokenizer.ggml.unknown_token_id").unwrap_or(0) as u32;
        let pad_id = reader.metadata_u64("tokenizer.ggml.padding_token_id").unwrap_or(arch.eos_id) as u32;
        Ok(Self::new(pieces, &merge_strs, arch.bos_id, arch.eos_id, unk_id, pad_id))
    }

    fn byte_fallback_piece(byte: u8) -> String {
        alloc::format!("<0x{byte:02X}>")
    }

    fn byte_fallback_id(&self, byte: u8) -> Option<u32> {
        self.piece_to_id.get(Self::byte_fallback_piece(byte).as_str()).copied()
    }

    fn parse_byte_fallback(piece: &str) -> Option<u8> {
        let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
        u8::from_str_radix(hex, 16).ok()
    }

    /// Encode UTF-8 text to token ids: lowest-merge-priority pairwise
    /// merging until no applicable merge remains.
    pub fn encode(&self, text: &str, add_bos: bool, add_eos: bool, max_tokens: usize) -> Vec<u32> {
        let mut prepared = String::with_capacity(text.len() + 1);
        if self.has_space_marker {
            prepared.push(SPACE_MARKER);
            for ch in text.chars() {
                prepared.push(if ch == ' ' { SPACE_MARKER } else { ch });
            }
        } else {
            prepared.push_str(text);
        }

        let mut symbols: Vec<u32> = Vec::with_capacity(prepared.len());
        let mut char_buf = [0u8; 4];
        for ch in prepared.chars() {
            let s = ch.encode_utf8(&mut char_buf);
            if let Some(&id) = self.piece_to_id.get(s) {
                symbols.push(id);
            } else {
                for b in s.bytes() {
                    symbols.push(self.byte_fallback_id(b).unwrap_or(self.unk_id));
                }
            }
        }

        loop {
            let mut best: Option<(usize, u32, u32)> = None;
            for i in 0..symbols.len().saturating_sub(1) {
                if let Some(&(merged_id, priority)) = self.merge_rank.get(&(symbols[i], symbols[i + 1])) {
                    let better = match best {
                        Some((_, _, best_priority)) => priority < best_priority,
                        None => true,
                    };
                    if better {
                        best = Some((i, merged_id, priority));
                    }
                }
            }
            let Some((i, merged_id, _)) = best else { break };
            symbols[i] = merged_id;
            symbols.remove(i + 1);
        }

        let mut out = Vec::with_capacity(symbols.len() + 2);
        if add_bos {
            out.push(self.bos_id);
        }
        out.extend_from_slice(&symbols);
        if add_eos {
            out.push(self.eos_id);
        }
        out.truncate(max_tokens);
        out
    }

    /// The raw vocabulary piece for one token id.
    pub fn decode_token(&self, id: u32) -> &'a str {
        self.pieces.get(id as usize).copied().unwrap_or("")
    }

    /// Decode a token sequence to text, skipping special tokens and
    /// translating the leading-space marker back to `' '`. Lossy on
    /// malformed byte-fallback sequences.
    pub fn decode(&self, ids: &[u32]) -> String {
        let mut bytes: Vec<u8> = Vec::with_capacity(ids.len() * 2);
        let mut char_buf = [0u8; 4];
        for &id in ids {
            if id == self.bos_id || id == self.eos_id || id == self.pad_id || id == self.unk_id {
                continue;
            }
            let piece = self.decode_token(id);
            if let Some(b) = Self::parse_byte_fallback(piece) {
                bytes.push(b);
                continue;
            }
            for ch in piece.chars() {
                if ch == SPACE_MARKER {
                    bytes.push(b' ');
                } else {
                    bytes.extend_from_slice(ch.encode_utf8(&mut char_buf).as_bytes());
                }
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
