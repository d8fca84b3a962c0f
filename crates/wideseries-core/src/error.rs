//! Codec Error Types
//!
//! Errors raised while encoding or decoding row keys and stored values.
//!
//! ## Error Categories
//!
//! ### Encode-time
//! - `EncodingOverflow`: a numeric field does not fit its fixed-width, zero-padded slot.
//!   The sample is dropped and counted; it never crashes a writer.
//!
//! ### Decode-time (corruption)
//! - `MalformedKey`: the row key is not `<hash>_<digits>`
//! - `TruncatedValue`: the stored bytes are shorter than the fixed record layout
//!
//! Decode-time errors are local to one row: scans skip the row and continue.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Encoding overflow: '{value}' does not fit in {width} characters")]
    EncodingOverflow { value: String, width: usize },

    #[error("Malformed row key: {0}")]
    MalformedKey(String),

    #[error("Truncated value: expected {expected} bytes, got {actual}")]
    TruncatedValue { expected: usize, actual: usize },
}
