//! Error kinds returned from the core's public API.
//!
//! No `std::error::Error` and no `thiserror`/`anyhow` here: both need more
//! than `core`/`alloc` gives a `#![no_std]` crate without assuming a
//! particular allocator story, so errors are a hand-rolled enum with a
//! hand-written `Display` impl instead.

use core::fmt;

/// Why a model blob was rejected at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidModelReason {
    BadMagic,
    UnsupportedVersion(u32),
    Truncated,
    MetadataTypeMismatch,
    MissingTensor(&'static str),
    DimensionMismatch,
    Overflow,
}

impl fmt::Display for InvalidModelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidModelReason::BadMagic => write!(f, "magic bytes are not \"GGUF\""),
            InvalidModelReason::UnsupportedVersion(v) => write!(f, "unsupported GGUF version {v}"),
            InvalidModelReason::Truncated => write!(f, "file is shorter than its header claims"),
            InvalidModelReason::MetadataTypeMismatch => write!(f, "metadata value type tag mismatch"),
            InvalidModelReason::MissingTensor(name) => write!(f, "required tensor \"{name}\" is missing"),
            InvalidModelReason::DimensionMismatch => write!(f, "tensor dimensions violate a model invariant"),
            InvalidModelReason::Overflow => write!(f, "integer overflow while computing an offset or size"),
        }
    }
}

/// Top-level error kind returned from the core's public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Fatal for this engine instance; surfaced only from `init`.
    InvalidModel(InvalidModelReason),
    /// A tensor's `ggml_type` tag is outside the nine supported encodings.
    UnsupportedEncoding(u32),
    /// `heap.alloc` returned `None` during init; partial allocations rolled back.
    OutOfMemory,
    /// Caller passed a null/empty/oversized argument; engine remains usable.
    BadArgument(&'static str),
    /// Internal invariant about a pre-allocated scratch buffer was violated.
    BufferTooSmall,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidModel(reason) => write!(f, "invalid model: {reason}"),
            Error::UnsupportedEncoding(tag) => write!(f, "unsupported tensor encoding tag {tag}"),
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::BadArgument(what) => write!(f, "bad argument: {what}"),
            Error::BufferTooSmall => write!(f, "internal scratch buffer too small"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_reason_text() {
        let e = Error::InvalidModel(InvalidModelReason::Truncated);
        assert!(std::format!("{e}").contains("shorter than its header"));
    }
}
