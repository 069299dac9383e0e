//! Failure modes for every stage of the decode pipeline.
//!
//! Every error is fatal to the current decode; there is no local recovery anywhere in this
//! crate. Errors carry the diagnostic payload that made them detectable (the mismatched CRC
//! pair, the unsupported field value, ...) so a caller's log line is useful without re-deriving
//! it from the file.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PngError {
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("file does not start with the PNG signature")]
    BadSignature,

    #[error("chunk ordering violation: {0}")]
    BadChunkOrder(String),

    #[error("CRC mismatch on {chunk_type} chunk: stored {stored:#010x}, computed {computed:#010x}")]
    BadCrc {
        chunk_type: String,
        stored: u32,
        computed: u32,
    },

    #[error("invalid IHDR field: {0}")]
    BadHeaderField(String),

    #[error("invalid zlib header: {0}")]
    BadZlibHeader(String),

    #[error("malformed DEFLATE stream: {0}")]
    BadDeflate(String),

    #[error("filter type {0} is out of range (expected 0..=4)")]
    BadFilter(u8),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

pub type Result<T> = std::result::Result<T, PngError>;
