//! Wideseries Core - Sample Types and Row Codec
//!
//! This crate holds the pieces of wideseries that define the persisted format:
//! the [`Sample`] type produced by feeds and load generators, and the codec that
//! maps a `(key, epoch_seconds)` pair to a sortable row key and a value to the
//! bytes stored under it.
//!
//! Everything here is pure and synchronous. The client crate builds the
//! batching, write and query pipelines on top of it.

pub mod codec;
pub mod error;
pub mod sample;

pub use codec::{
    content_qualifier, decode_epoch_from_row_key, decode_sample_array, decode_value,
    encode_row_key, encode_sample_array, encode_value, key_prefix, pad_leading_zeros,
    HourSample, RowKey, RowLayout, HOUR_SAMPLE_SIZE, SECONDS_PER_HOUR, VALUE_SIZE,
};
pub use error::{CodecError, Result};
pub use sample::{unix_now, Sample, TimeValue};
