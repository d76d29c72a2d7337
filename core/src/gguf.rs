//! GGUF container reader.
//!
//! Parses the binary header, the typed key/value metadata section, and the
//! tensor directory, then exposes by-name tensor lookup and the derived
//! `ArchitectureRecord` without ever copying a tensor's bytes — every
//! `TensorRef` borrows straight out of the caller's `model_bytes` slice.
//! Ownership stays with the caller throughout, since the blob may be
//! firmware-resident flash rather than heap memory this crate could own.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::encoding::Encoding;
use crate::error::{Error, InvalidModelReason};

const MAGIC: &[u8; 4] = b"GGUF";
const DEFAULT_ALIGNMENT: u64 = 32;
const DEFAULT_ROPE_THETA: f32 = 10000.0;
const DEFAULT_RMS_EPS: f32 = 1e-5;
const MAX_CONTEXT_LENGTH: u64 = 2048;

fn invalid(reason: InvalidModelReason) -> Error {
    Error::InvalidModel(reason)
}

/// A cursor over the model blob with checked, bounds-validated reads.
///
/// Every read goes through `checked_add` before slicing so a corrupt or
/// adversarial header surfaces as `InvalidModelReason::Truncated` /
/// `Overflow` instead of panicking.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(n).ok_or_else(|| invalid(InvalidModelReason::Overflow))?;
        if end > self.data.len() {
            return Err(invalid(InvalidModelReason::Truncated));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }
    fn i8(&mut self) -> Result<i8, Error> {
        Ok(self.take(1)?[0] as i8)
    }
    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
    fn i16(&mut self) -> Result<i16, Error> {
        Ok(self.u16()? as i16)
    }
    fn u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
    fn i32(&mut self) -> Result<i32, Error> {
        Ok(self.u32()? as i32)
    }
    fn u64(&mut self) -> Result<u64, Error> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }
    fn i64(&mut self) -> Result<i64, Error> {
        Ok(self.u64()? as i64)
    }
    fn f32(&mut self) -> Result<f32, Error> {
        Ok(f32::from_bits(self.u32()?))
    }
    fn f64(&mut self) -> Result<f64, Error> {
        Ok(f64::from_bits(self.u64()?))
    }
    fn bool(&mut self) -> Result<bool, Error> {
        Ok(self.u8()? != 0)
    }

    fn string(&mut self) -> Result<&'a str, Error> {
        let len = self.u64()? as usize;
        let bytes = self.take(len)?;
        core::str::from_utf8(bytes).map_err(|_| invalid(InvalidModelReason::MetadataTypeMismatch))
    }
}

/// One parsed metadata value. Arrays are homogeneous, per the GGUF spec.
#[derive(Debug, Clone)]
pub enum MetadataValue<'a> {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(&'a str),
    Array(Vec<MetadataValue<'a>>),
}

impl<'a> MetadataValue<'a> {
    /// Normalize any scalar integer/float/bool variant to `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            MetadataValue::U8(v) => Some(v as u64),
            MetadataValue::I8(v) => Some(v as u64),
            MetadataValue::U16(v) => Some(v as u64),
            MetadataValue::I16(v) => Some(v as u64),
            MetadataValue::U32(v) => Some(v as u64),
            MetadataValue::I32(v) => Some(v as u64),
            MetadataValue::U64(v) => Some(v),
            MetadataValue::I64(v) => Some(v as u64),
            MetadataValue::Bool(v) => Some(v as u64),
            _ => None,
        }
    }

    /// Normalize any scalar numeric variant to `f32`.
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            MetadataValue::F32(v) => Some(v),
            MetadataValue::F64(v) => Some(v as f32),
            _ => self.as_u64().map(|v| v as f32),
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[MetadataValue<'a>]> {
        match self {
            MetadataValue::Array(v) => Some(v),
            _ => None,
        }
    }
}

fn parse_scalar<'a>(type_tag: u32, cur: &mut Cursor<'a>) -> Result<MetadataValue<'a>, Error> {
    match type_tag {
        0 => Ok(MetadataValue::U8(cur.u8()?)),
        1 => Ok(MetadataValue::I8(cur.i8()?)),
        2 => Ok(MetadataValue::U16(cur.u16()?)),
        3 => Ok(MetadataValue::I16(cur.i16()?)),
        4 => Ok(MetadataValue::U32(cur.u32()?)),
        5 => Ok(MetadataValue::I32(cur.i32()?)),
        6 => Ok(MetadataValue::F32(cur.f32()?)),
        7 => Ok(MetadataValue::Bool(cur.bool()?)),
        8 => Ok(MetadataValue::Str(cur.string()?)),
        10 => Ok(MetadataValue::U64(cur.u64()?)),
        11 => Ok(MetadataValue::I64(cur.i64()?)),
        12 => Ok(MetadataValue::F64(cur.f64()?)),
        _ => Err(invalid(InvalidModelReason::MetadataTypeMismatch)),
    }
}

fn parse_value<'a>(cur: &mut Cursor<'a>) -> Result<MetadataValue<'a>, Error> {
    let type_tag = cur.u32()?;
    if type_tag == 9 {
        let elem_tag = cur.u32()?;
        let len = cur.u64()? as usize;
        let mut items = Vec::with_capacity(len.min(1 << 20));
        for _ in 0..len {
            items.push(parse_scalar(elem_tag, cur)?);
        }
        Ok(MetadataValue::Array(items))
    } else {
        parse_scalar(type_tag, cur)
    }
}

/// One directory entry: tensor name plus everything needed to slice it
/// out of the data section once `data_section_start` is known.
///
/// `encoding` is `Err(raw_tag)` for a `ggml_type` outside the nine this
/// core understands. An unsupported tag rejects only that tensor, not the
/// whole file: the entry is kept in the directory so name lookups don't
/// silently disappear, but `Reader::tensor` returns `None` for it and
/// byte-range validation is skipped since its block layout is unknown.
struct TensorDirEntry<'a> {
    name: &'a str,
    encoding: Result<Encoding, u32>,
    dims: [u64; 4],
    n_dims: usize,
    rel_offset: u64,
}

/// A borrowed, quantized tensor view: `data` points straight into the
/// reader's source slice, never a copy.
#[derive(Clone, Copy)]
pub struct TensorRef<'a> {
    pub encoding: Encoding,
    pub dims: [u64; 4],
    pub n_dims: usize,
    pub data: &'a [u8],
}

impl<'a> TensorRef<'a> {
    pub fn numel(&self) -> u64 {
        self.dims[..self.n_dims].iter().product()
    }
}

/// The derived LLaMA-family model-architecture record.
#[derive(Debug, Clone, Copy)]
pub struct ArchitectureRecord {
    pub n_embd: usize,
    pub n_ff: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub n_kv_heads: usize,
    pub vocab_size: usize,
    pub context_length: usize,
    pub rope_theta: f32,
    pub rms_norm_eps: f32,
    pub bos_id: u32,
    pub eos_id: u32,
    pub head_dim: usize,
    pub kv_dim: usize,
    pub kv_mul: usize,
}

/// Parsed GGUF container over a caller-owned byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    metadata: BTreeMap<&'a str, MetadataValue<'a>>,
    tensors: Vec<TensorDirEntry<'a>>,
    data_section_start: usize,
    arch_name: String,
}

impl<'a> Reader<'a> {
    /// Parse `bytes` as a GGUF v2/v3 container.
    pub fn open(bytes: &'a [u8]) -> Result<Self, Error> {
        let mut cur = Cursor::new(bytes);

        let magic = cur.take(4)?;
        if magic != MAGIC {
            return Err(invalid(InvalidModelReason::BadMagic));
        }
        let version = cur.u32()?;
        if version != 2 && version != 3 {
            return Err(invalid(InvalidModelReason::UnsupportedVersion(version)));
        }
        let tensor_count = cur.u64()? as usize;
        let kv_count = cur.u64()? as usize;

        let mut metadata = BTreeMap::new();
        for _ in 0..kv_count {
            let key = cur.string()?;
            let value = parse_value(&mut cur)?;
            metadata.insert(key, value);
        }

        let mut tensors = Vec::with_capacity(tensor_count);
        for _ in 0..tensor_count {
            let name = cur.string()?;
            let n_dims = cur.u32()? as usize;
            if n_dims == 0 || n_dims > 4 {
                return Err(invalid(InvalidModelReason::DimensionMismatch));
            }
            let mut dims = [1u64; 4];
            for d in dims.iter_mut().take(n_dims) {
                *d = cur.u64()?;
            }
            let type_tag = cur.u32()?;
            let encoding = Encoding::try_from(type_tag).map_err(|_| type_tag);
            let rel_offset = cur.u64()?;
            tensors.push(TensorDirEntry { name, encoding, dims, n_dims, rel_offset });
        }

        tensors.sort_by(|a, b| a.name.cmp(b.name));

        let alignment = metadata
            .get("general.alignment")
            .and_then(MetadataValue::as_u64)
            .unwrap_or(DEFAULT_ALIGNMENT)
            .max(1);
        let data_section_start = align_up(cur.pos as u64, alignment)
            .ok_or_else(|| invalid(InvalidModelReason::Overflow))? as usize;
        if data_section_start > bytes.len() {
            return Err(invalid(InvalidModelReason::Truncated));
        }

        let arch_name = metadata
            .get("general.architecture")
            .and_then(MetadataValue::as_str)
            .unwrap_or("llama")
            .into();

        let reader = Reader { data: bytes, metadata, tensors, data_section_start, arch_name };
        reader.validate_tensor_bounds()?;
        Ok(reader)
    }

    fn validate_tensor_bounds(&self) -> Result<(), Error> {
        for entry in &self.tensors {
            // An unsupported encoding only rejects this tensor; its bytes
            // can't be bounds-checked without knowing its block layout, so
            // it is skipped here and made unreachable through `tensor()`
            // instead.
            let Ok(encoding) = entry.encoding else { continue };
            let numel: u64 = entry.dims[..entry.n_dims].iter().product();
            let n_elements = usize::try_from(numel).map_err(|_| invalid(InvalidModelReason::Overflow))?;
            let span = encoding.byte_span(n_elements).ok_or_else(|| invalid(InvalidModelReason::DimensionMismatch))?;
            let start = self
                .data_section_start
                .checked_add(entry.rel_offset as usize)
                .ok_or_else(|| invalid(InvalidModelReason::Overflow))?;
            let end = start.checked_add(span).ok_or_else(|| invalid(InvalidModelReason::Overflow))?;
            if end > self.data.len() {
                return Err(invalid(InvalidModelReason::Truncated));
            }
        }
        Ok(())
    }

    fn metadata_key(&self, suffix: &str) -> String {
        alloc::format!("{}.{}", self.arch_name, suffix)
    }

    fn u64_meta(&self, suffix: &str) -> Option<u64> {
        self.metadata.get(self.metadata_key(suffix).as_str()).and_then(MetadataValue::as_u64)
    }

    fn f32_meta(&self, suffix: &str) -> Option<f32> {
        self.metadata.get(self.metadata_key(suffix).as_str()).and_then(MetadataValue::as_f32)
    }

    /// Look up a tensor by its hierarchical name (`token_embd.weight`,
    /// `blk.{L}.{subname}.weight`, ...) with `O(log n)` binary search over
    /// the name-sorted directory.
    pub fn tensor(&self, name: &str) -> Option<TensorRef<'a>> {
        let idx = self.tensors.binary_search_by(|e| e.name.cmp(name)).ok()?;
        let entry = &self.tensors[idx];
        let encoding = entry.encoding.ok()?;
        let numel: u64 = entry.dims[..entry.n_dims].iter().product();
        let span = encoding.byte_span(numel as usize)?;
        let start = self.data_section_start + entry.rel_offset as usize;
        Some(TensorRef { encoding, dims: entry.dims, n_dims: entry.n_dims, data: &self.data[start..start + span] })
    }

    /// The raw `ggml_type` tag of a tensor by name, present even when the
    /// encoding is unsupported: such tensors stay name-addressable for
    /// diagnostics even though `tensor()` can't produce a `TensorRef` for
    /// them.
    pub fn tensor_type_tag(&self, name: &str) -> Option<u32> {
        let idx = self.tensors.binary_search_by(|e| e.name.cmp(name)).ok()?;
        Some(match self.tensors[idx].encoding {
            Ok(enc) => enc as u32,
            Err(tag) => tag,
        })
    }

    /// Vocabulary piece for a token id, read from `tokenizer.ggml.tokens`.
    pub fn token(&self, id: u32) -> Option<&'a str> {
        let tokens = self.metadata.get("tokenizer.ggml.tokens")?.as_array()?;
        tokens.get(id as usize)?.as_str()
    }

    /// Ordered BPE merge strings (`"left right"`), index is merge priority.
    pub fn merges(&self) -> &[MetadataValue<'a>] {
        self.metadata.get("tokenizer.ggml.merges").and_then(MetadataValue::as_array).unwrap_or(&[])
    }

    /// Raw lookup of any un-prefixed metadata key, normalized to `u64`
    /// (used by the tokenizer for `tokenizer.ggml.unknown_token_id` /
    /// `tokenizer.ggml.padding_token_id`, neither of which is part of the
    /// architecture record).
    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(MetadataValue::as_u64)
    }

    pub fn vocab_size(&self) -> usize {
        self.metadata.get("tokenizer.ggml.tokens").and_then(MetadataValue::as_array).map_or(0, <[_]>::len)
    }

    /// Derive the LLaMA-family architecture record from metadata, falling
    /// back to sensible defaults for optional keys.
    pub fn arch(&self) -> Result<ArchitectureRecord, Error> {
        let missing = |name: &'static str| invalid(InvalidModelReason::MissingTensor(name));

        let n_embd = self.u64_meta("embedding_length").ok_or_else(|| missing("embedding_length"))? as usize;
        let n_ff = self.u64_meta("feed_forward_length").ok_or_else(|| missing("feed_forward_length"))? as usize;
        let n_layers = self.u64_meta("block_count").ok_or_else(|| missing("block_count"))? as usize;
        let n_heads = self.u64_meta("attention.head_count").ok_or_else(|| missing("attention.head_count"))? as usize;
        let n_kv_heads = self.u64_meta("attention.head_count_kv").unwrap_or(n_heads as u64) as usize;
        let vocab_size = self.vocab_size();
        let context_length = self
            .u64_meta("context_length")
            .map(|v| v.min(MAX_CONTEXT_LENGTH))
            .unwrap_or(MAX_CONTEXT_LENGTH) as usize;
        let rope_theta = self.f32_meta("rope.freq_base").unwrap_or(DEFAULT_ROPE_THETA);
        let rms_norm_eps = self.f32_meta("attention.layer_norm_rms_epsilon").unwrap_or(DEFAULT_RMS_EPS);
        let bos_id = self.metadata.get("tokenizer.ggml.bos_token_id").and_then(MetadataValue::as_u64).unwrap_or(1) as u32;
        let eos_id = self.metadata.get("tokenizer.ggml.eos_token_id").and_then(MetadataValue::as_u64).unwrap_or(2) as u32;

        if n_embd == 0 || n_heads == 0 || n_kv_heads == 0 {
            return Err(invalid(InvalidModelReason::DimensionMismatch));
        }
        if n_embd % n_heads != 0 || n_heads % n_kv_heads != 0 {
            return Err(invalid(InvalidModelReason::DimensionMismatch));
        }

        let head_dim = n_embd / n_heads;
        let kv_dim = head_dim * n_kv_heads;
        let kv_mul = n_heads / n_kv_heads;

        Ok(ArchitectureRecord {
            n_embd,
            n_ff,
            n_layers,
            n_heads,
            n_kv_heads,
            vocab_size,
            context_length,
            rope_theta,
            rms_norm_eps,
            bos_id,
            eos_id,
            head_dim,
            kv_dim,
            kv_mul,
        })
    }
}

fn align_up(value: u64, alignment: u64) -> Option<u64> {
    let mask = alignment.checked_sub(1)?;
    value.checked_add(mask).map(|v| v & !mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec as StdVec;

    fn push_string(buf: &mut StdVec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn push_kv_u32(buf: &mut StdVec<u8>, key: &str, value: u32) {
        push_string(buf, key);
        buf.extend_from_slice(&4u32.to_le_bytes()); // type tag UINT32
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn push_kv_f32(buf: &mut StdVec<u8>, key: &str, value: f32) {
        push_string(buf, key);
        buf.extend_from_slice(&6u32.to_le_bytes()); // type tag FLOAT32
        buf.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    fn push_kv_string(buf: &mut StdVec<u8>, key: &str, value: &str) {
        push_string(buf, key);
        buf.extend_from_slice(&8u32.to_le_bytes()); // type tag STRING
        push_string(buf, value);
    }

    fn push_kv_string_array(buf: &mut StdVec<u8>, key: &str, values: &[&str]) {
        push_string(buf, key);
        buf.extend_from_slice(&9u32.to_le_bytes()); // type tag ARRAY
        buf.extend_from_slice(&8u32.to_le_bytes()); // element type STRING
        buf.extend_from_slice(&(values.len() as u64).to_le_bytes());
        for v in values {
            push_string(buf, v);
        }
    }

    /// Build a minimal, valid GGUF blob with one F32 tensor named "x" of
    /// shape `[cols]` and the LLaMA-family metadata needed for `arch()`.
    fn tiny_model() -> StdVec<u8> {
        let mut kv = StdVec::new();
        push_kv_string(&mut kv, "general.architecture", "llama");
        push_kv_u32(&mut kv, "general.alignment", 32);
        push_kv_u32(&mut kv, "llama.embedding_length", 8);
        push_kv_u32(&mut kv, "llama.feed_forward_length", 16);
        push_kv_u32(&mut kv, "llama.block_count", 1);
        push_kv_u32(&mut kv, "llama.attention.head_count", 2);
        push_kv_u32(&mut kv, "llama.attention.head_count_kv", 1);
        push_kv_u32(&mut kv, "llama.context_length", 64);
        push_kv_f32(&mut kv, "llama.rope.freq_base", 10000.0);
        push_kv_f32(&mut kv, "llama.attention.layer_norm_rms_epsilon", 1e-5);
        push_kv_string_array(&mut kv, "tokenizer.ggml.tokens", &["<unk>", "<s>", "</s>", "a", "b"]);
        push_kv_u32(&mut kv, "tokenizer.ggml.bos_token_id", 1);
        push_kv_u32(&mut kv, "tokenizer.ggml.eos_token_id", 2);
        let kv_count = 13u64;

        let mut tensor_dir = StdVec::new();
        push_string(&mut tensor_dir, "x");
        tensor_dir.extend_from_slice(&1u32.to_le_bytes()); // n_dims
        tensor_dir.extend_from_slice(&8u64.to_le_bytes()); // dims[0]
        tensor_dir.extend_from_slice(&0u32.to_le_bytes()); // type tag F32
        tensor_dir.extend_from_slice(&0u64.to_le_bytes()); // rel_offset

        let mut header = StdVec::new();
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&2u32.to_le_bytes());
        header.extend_from_slice(&1u64.to_le_bytes()); // tensor_count
        header.extend_from_slice(&kv_count.to_le_bytes());

        let mut out = header;
        out.extend_from_slice(&kv);
        out.extend_from_slice(&tensor_dir);
        while out.len() % 32 != 0 {
            out.push(0);
        }
        out.extend_from_slice(&[0u8; 32]); // 8 f32 = 32 bytes of tensor data
        out
    }

    #[test]
    fn open_rejects_bad_magic() {
        let bytes = std::vec![0u8; 32];
        assert_eq!(Reader::open(&bytes).unwrap_err(), Error::InvalidModel(InvalidModelReason::BadMagic));
    }

    #[test]
    fn open_rejects_truncated_file() {
        let bytes = tiny_model();
        let chopped = &bytes[..bytes.len() - 16];
        assert_eq!(Reader::open(chopped).unwrap_err(), Error::InvalidModel(InvalidModelReason::Truncated));
    }

    #[test]
    fn arch_reads_expected_fields() {
        let bytes = tiny_model();
        let reader = Reader::open(&bytes).unwrap();
        let arch = reader.arch().unwrap();
        assert_eq!(arch.n_embd, 8);
        assert_eq!(arch.n_heads, 2);
        assert_eq!(arch.n_kv_heads, 1);
        assert_eq!(arch.kv_mul, 2);
        assert_eq!(arch.head_dim, 4);
        assert_eq!(arch.kv_dim, 4);
        assert_eq!(arch.vocab_size, 5);
        assert_eq!(arch.bos_id, 1);
        assert_eq!(arch.eos_id, 2);
    }

    #[test]
    fn tensor_lookup_by_name_round_trips() {
        let bytes = tiny_model();
        let reader = Reader::open(&bytes).unwrap();
        let t = reader.tensor("x").unwrap();
        assert_eq!(t.dims[0], 8);
        assert_eq!(t.data.len(), 32);
        assert!(reader.tensor("missing").is_none());
    }

    #[test]
    fn token_lookup_matches_vocabulary_order() {
        let bytes = tiny_model();
        let reader = Reader::open(&bytes).unwrap();
        assert_eq!(reader.token(3), Some("a"));
        assert_eq!(reader.token(4), Some("b"));
        assert_eq!(reader.token(99), None);
    }

    #[test]
    fn context_length_is_capped_at_2048() {
        let mut kv = StdVec::new();
        push_kv_string(&mut kv, "general.architecture", "llama");
        push_kv_u32(&mut kv, "llama.embedding_length", 8);
        push_kv_u32(&mut kv, "llama.feed_forward_length", 16);
        push_kv_u32(&mut kv, "llama.block_count", 1);
        push_kv_u32(&mut kv, "llama.attention.head_count", 2);
        push_kv_u32(&mut kv, "llama.context_length", 1_000_000);
        push_kv_string_array(&mut kv, "tokenizer.ggml.tokens", &["<unk>"]);
        let kv_count = 7u64;

        let mut header = StdVec::new();
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&2u32.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes()); // tensor_count
        header.extend_from_slice(&kv_count.to_le_bytes());

        let mut out = header;
        out.extend_from_slice(&kv);
        while out.len() % 32 != 0 {
            out.push(0);
        }

        let reader = Reader::open(&out).unwrap();
        let arch = reader.arch().unwrap();
        assert_eq!(arch.context_length, 2048);
    }

    #[test]
    fn unsupported_tensor_encoding_rejects_only_that_tensor() {
        // A tensor directory with a second, irrelevant tensor carrying a
        // `ggml_type` this core doesn't support must not fail `open()` —
        // only `tensor("bogus")` should come back `None`.
        let mut kv = StdVec::new();
        push_kv_string(&mut kv, "general.architecture", "llama");
        push_kv_u32(&mut kv, "general.alignment", 32);
        push_kv_u32(&mut kv, "llama.embedding_length", 8);
        push_kv_u32(&mut kv, "llama.feed_forward_length", 16);
        push_kv_u32(&mut kv, "llama.block_count", 1);
        push_kv_u32(&mut kv, "llama.attention.head_count", 2);
        push_kv_string_array(&mut kv, "tokenizer.ggml.tokens", &["<unk>"]);
        let kv_count = 6u64;

        let mut tensor_dir = StdVec::new();
        push_string(&mut tensor_dir, "bogus");
        tensor_dir.extend_from_slice(&1u32.to_le_bytes());
        tensor_dir.extend_from_slice(&8u64.to_le_bytes());
        tensor_dir.extend_from_slice(&999u32.to_le_bytes()); // unsupported type tag
        tensor_dir.extend_from_slice(&0u64.to_le_bytes());

        push_string(&mut tensor_dir, "x");
        tensor_dir.extend_from_slice(&1u32.to_le_bytes());
        tensor_dir.extend_from_slice(&8u64.to_le_bytes());
        tensor_dir.extend_from_slice(&0u32.to_le_bytes()); // F32
        tensor_dir.extend_from_slice(&0u64.to_le_bytes());

        let mut header = StdVec::new();
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&2u32.to_le_bytes());
        header.extend_from_slice(&2u64.to_le_bytes()); // tensor_count
        header.extend_from_slice(&kv_count.to_le_bytes());

        let mut out = header;
        out.extend_from_slice(&kv);
        out.extend_from_slice(&tensor_dir);
        while out.len() % 32 != 0 {
            out.push(0);
        }
        out.extend_from_slice(&[0u8; 32]);

        let reader = Reader::open(&out).unwrap();
        assert!(reader.tensor("bogus").is_none());
        assert_eq!(reader.tensor_type_tag("bogus"), Some(999));
        assert!(reader.tensor("x").is_some());
    }
}
