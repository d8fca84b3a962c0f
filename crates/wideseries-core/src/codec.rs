//! Row Key and Value Codec
//!
//! This module defines the persisted format: how a logical series key plus a
//! timestamp becomes a sortable row key, and how values become stored bytes.
//! Encodings here must stay bit-exact so new writers and readers interoperate
//! with rows that are already in the store.
//!
//! ## Row Keys
//!
//! ```text
//! rowkey = md5_hex(key) "_" zero_pad(time_bucket, width)
//!
//!  e.g.  9d4e1e23bd5b727046a9e3b4b7db57bd_1467000000   (per-second)
//!        9d4e1e23bd5b727046a9e3b4b7db57bd_0407500      (hourly)
//! ```
//!
//! - The hash prefix spreads naturally sequential keys (`key_1`, `key_2`, ...)
//!   uniformly over the store's key space, avoiding hot rows.
//! - The time bucket suffix keeps one key's history contiguous, so a time
//!   range is a single row range scan.
//! - The bucket is zero-padded to a fixed width. Without padding, decimal
//!   strings do not sort numerically ("9" > "10").
//!
//! ## Layouts
//!
//! | Layout      | Bucket                | Width | Value                              |
//! |-------------|-----------------------|-------|------------------------------------|
//! | `PerSecond` | epoch seconds         | 10    | one 8-byte big-endian f64          |
//! | `Hourly`    | epoch seconds / 3600  | 7     | packed `{u16 sec_of_hour, f64}`    |
//!
//! Both widths hold every `u32` input, so `EncodingOverflow` is only reachable
//! through [`pad_leading_zeros`] with foreign input.
//!
//! ## Hourly Values
//!
//! Each record is 10 bytes, big-endian, packed back to back with no header.
//! The record count is implied by the blob length. Blobs are written under a
//! column qualifier equal to the raw MD5 of the blob, so two writes to the same
//! hour row land in different cells instead of overwriting each other.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CodecError, Result};

/// Separator between the hash prefix and the time bucket.
pub const ROW_KEY_SEPARATOR: char = '_';

/// Digits reserved for an epoch-seconds bucket (`u32::MAX` has 10 digits).
pub const EPOCH_BUCKET_WIDTH: usize = 10;

/// Digits reserved for an hour-index bucket (`u32::MAX / 3600` has 7 digits).
pub const HOUR_BUCKET_WIDTH: usize = 7;

pub const SECONDS_PER_HOUR: u32 = 3600;

/// Size of an encoded single value.
pub const VALUE_SIZE: usize = 8;

/// Size of one `{u16, f64}` record in an hourly blob.
pub const HOUR_SAMPLE_SIZE: usize = 2 + VALUE_SIZE;

/// How samples are arranged into rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RowLayout {
    /// One row per (key, second), value is a single f64.
    #[default]
    PerSecond,
    /// One row per (key, hour), value is a packed sample array.
    Hourly,
}

impl RowLayout {
    /// Bucket a timestamp falls into.
    pub fn time_bucket(self, epoch_seconds: u32) -> u32 {
        match self {
            RowLayout::PerSecond => epoch_seconds,
            RowLayout::Hourly => epoch_seconds / SECONDS_PER_HOUR,
        }
    }

    /// First second covered by a bucket.
    pub fn bucket_start(self, bucket: u32) -> u32 {
        match self {
            RowLayout::PerSecond => bucket,
            RowLayout::Hourly => bucket.saturating_mul(SECONDS_PER_HOUR),
        }
    }

    pub fn bucket_width(self) -> usize {
        match self {
            RowLayout::PerSecond => EPOCH_BUCKET_WIDTH,
            RowLayout::Hourly => HOUR_BUCKET_WIDTH,
        }
    }
}

impl fmt::Display for RowLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowLayout::PerSecond => write!(f, "per_second"),
            RowLayout::Hourly => write!(f, "hourly"),
        }
    }
}

impl std::str::FromStr for RowLayout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "per_second" | "second" => Ok(RowLayout::PerSecond),
            "hourly" | "hour" => Ok(RowLayout::Hourly),
            other => Err(format!("unknown row layout '{}'", other)),
        }
    }
}

/// A sortable row identifier: `md5_hex(key) "_" padded_bucket`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(String);

impl RowKey {
    /// Encode the row key for `key` at `epoch_seconds`.
    pub fn encode(key: &str, epoch_seconds: u32, layout: RowLayout) -> Result<Self> {
        Self::from_bucket(key, layout.time_bucket(epoch_seconds), layout)
    }

    /// Encode the row key for an already-computed bucket.
    pub fn from_bucket(key: &str, bucket: u32, layout: RowLayout) -> Result<Self> {
        let padded = pad_leading_zeros(&bucket.to_string(), layout.bucket_width())?;
        let mut s = key_prefix(key);
        s.push(ROW_KEY_SEPARATOR);
        s.push_str(&padded);
        Ok(RowKey(s))
    }

    /// Parse the time bucket back out of the key.
    ///
    /// The key must split into exactly two `_`-separated tokens and the second
    /// must be a non-empty run of ASCII digits that fits a `u32`.
    pub fn bucket(&self) -> Result<u32> {
        let mut tokens = self.0.split(ROW_KEY_SEPARATOR);
        let (Some(_hash), Some(digits), None) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(CodecError::MalformedKey(format!(
                "'{}' should have 2 tokens after splitting by '{}'",
                self.0, ROW_KEY_SEPARATOR
            )));
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CodecError::MalformedKey(format!(
                "'{}' has non-numeric time bucket '{}'",
                self.0, digits
            )));
        }

        digits.parse::<u32>().map_err(|e| {
            CodecError::MalformedKey(format!("'{}' time bucket out of range: {}", self.0, e))
        })
    }

    /// Epoch seconds encoded in a per-second key.
    pub fn epoch_seconds(&self) -> Result<u32> {
        self.bucket()
    }

    /// First second covered by this key's row under `layout`.
    pub fn bucket_start(&self, layout: RowLayout) -> Result<u32> {
        Ok(layout.bucket_start(self.bucket()?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RowKey {
    fn from(s: String) -> Self {
        RowKey(s)
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        RowKey(s.to_string())
    }
}

impl AsRef<str> for RowKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercase hex MD5 of the logical key (32 characters).
pub fn key_prefix(key: &str) -> String {
    hex::encode(Md5::digest(key.as_bytes()))
}

/// Left-pad a string with `'0'` to exactly `width` characters.
///
/// Fails with `EncodingOverflow` instead of truncating when the input is
/// already wider than `width`.
pub fn pad_leading_zeros(s: &str, width: usize) -> Result<String> {
    let len = s.chars().count();
    if len > width {
        return Err(CodecError::EncodingOverflow {
            value: s.to_string(),
            width,
        });
    }

    let mut padded = String::with_capacity(width);
    padded.extend(std::iter::repeat('0').take(width - len));
    padded.push_str(s);
    Ok(padded)
}

pub fn encode_row_key(key: &str, epoch_seconds: u32, layout: RowLayout) -> Result<RowKey> {
    RowKey::encode(key, epoch_seconds, layout)
}

/// Inverse of [`encode_row_key`] for the per-second layout.
pub fn decode_epoch_from_row_key(row_key: &str) -> Result<u32> {
    RowKey::from(row_key).epoch_seconds()
}

/// Encode a value as 8 big-endian IEEE-754 bytes. Bit patterns (NaN payloads,
/// signed zero) are preserved.
pub fn encode_value(value: f64) -> [u8; VALUE_SIZE] {
    value.to_be_bytes()
}

/// Decode the first 8 bytes as a big-endian f64.
pub fn decode_value(bytes: &[u8]) -> Result<f64> {
    if bytes.len() < VALUE_SIZE {
        return Err(CodecError::TruncatedValue {
            expected: VALUE_SIZE,
            actual: bytes.len(),
        });
    }

    let mut raw = [0u8; VALUE_SIZE];
    raw.copy_from_slice(&bytes[..VALUE_SIZE]);
    Ok(f64::from_be_bytes(raw))
}

/// One record of an hourly row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourSample {
    pub second_of_hour: u16,
    pub value: f64,
}

impl HourSample {
    pub fn new(second_of_hour: u16, value: f64) -> Self {
        Self {
            second_of_hour,
            value,
        }
    }

    /// Build from an absolute timestamp.
    pub fn at(epoch_seconds: u32, value: f64) -> Self {
        // < 3600, always fits
        Self::new((epoch_seconds % SECONDS_PER_HOUR) as u16, value)
    }
}

/// Pack records back to back as `{u16 BE, f64 BE}`.
pub fn encode_sample_array(samples: &[HourSample]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * HOUR_SAMPLE_SIZE);
    for s in samples {
        buf.put_u16(s.second_of_hour);
        buf.put_f64(s.value);
    }
    buf.freeze()
}

/// Unpack a blob written by [`encode_sample_array`].
pub fn decode_sample_array(bytes: &[u8]) -> Result<Vec<HourSample>> {
    let remainder = bytes.len() % HOUR_SAMPLE_SIZE;
    if remainder != 0 {
        return Err(CodecError::TruncatedValue {
            expected: bytes.len() - remainder + HOUR_SAMPLE_SIZE,
            actual: bytes.len(),
        });
    }

    let mut cursor = bytes;
    let mut samples = Vec::with_capacity(bytes.len() / HOUR_SAMPLE_SIZE);
    while cursor.has_remaining() {
        let second_of_hour = cursor.get_u16();
        let value = cursor.get_f64();
        samples.push(HourSample::new(second_of_hour, value));
    }
    Ok(samples)
}

/// Column qualifier for an hourly blob: the raw 16-byte MD5 of its contents.
pub fn content_qualifier(blob: &[u8]) -> Bytes {
    Bytes::copy_from_slice(Md5::digest(blob).as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_leading_zeros() {
        assert_eq!(pad_leading_zeros("100", 7).unwrap(), "0000100");
        assert_eq!(pad_leading_zeros("4094961", 7).unwrap(), "4094961");
        assert_eq!(pad_leading_zeros("60", 4).unwrap(), "0060");
        assert_eq!(pad_leading_zeros("", 3).unwrap(), "000");
    }

    #[test]
    fn test_pad_leading_zeros_too_wide() {
        let err = pad_leading_zeros("zycadazycada", 7).unwrap_err();
        assert_eq!(
            err,
            CodecError::EncodingOverflow {
                value: "zycadazycada".to_string(),
                width: 7
            }
        );
    }

    #[test]
    fn test_key_prefix_is_md5_hex() {
        assert_eq!(key_prefix(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(key_prefix("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_row_key_format_per_second() {
        let key = RowKey::encode("abc", 1_467_000_000, RowLayout::PerSecond).unwrap();
        assert_eq!(key.as_str(), "900150983cd24fb0d6963f7d28e17f72_1467000000");
    }

    #[test]
    fn test_row_key_format_hourly() {
        let key = RowKey::encode("abc", 1_467_000_000, RowLayout::Hourly).unwrap();
        // 1467000000 / 3600 = 407500
        assert_eq!(key.as_str(), "900150983cd24fb0d6963f7d28e17f72_0407500");
    }

    #[test]
    fn test_row_key_epoch_round_trip() {
        for epoch in [0u32, 1, 9, 10, 99, 100, 1_467_000_000, u32::MAX] {
            let key = encode_row_key("key_3", epoch, RowLayout::PerSecond).unwrap();
            assert_eq!(decode_epoch_from_row_key(key.as_str()).unwrap(), epoch);
        }
    }

    #[test]
    fn test_hourly_bucket_start() {
        let key = RowKey::encode("key_3", 7_205, RowLayout::Hourly).unwrap();
        assert_eq!(key.bucket().unwrap(), 2);
        assert_eq!(key.bucket_start(RowLayout::Hourly).unwrap(), 7_200);
    }

    #[test]
    fn test_row_keys_sort_by_time() {
        for layout in [RowLayout::PerSecond, RowLayout::Hourly] {
            let pairs = [(9u32, 10u32), (99, 100), (3_599, 3_600), (100, 101)];
            for (a, b) in pairs {
                let ka = RowKey::encode("key_0", a * 3_600, layout).unwrap();
                let kb = RowKey::encode("key_0", b * 3_600, layout).unwrap();
                assert!(ka < kb, "{} should sort before {}", ka, kb);
            }
        }
    }

    #[test]
    fn test_different_keys_have_different_prefixes() {
        let a = RowKey::encode("key_1", 100, RowLayout::PerSecond).unwrap();
        let b = RowKey::encode("key_2", 100, RowLayout::PerSecond).unwrap();
        assert_ne!(&a.as_str()[..32], &b.as_str()[..32]);
    }

    #[test]
    fn test_malformed_keys() {
        for bad in [
            "nounderscore",
            "a_b_c",
            "abc_",
            "abc_12x",
            "abc_+5",
            "abc_-5",
            "abc_99999999999",
        ] {
            let err = decode_epoch_from_row_key(bad).unwrap_err();
            assert!(
                matches!(err, CodecError::MalformedKey(_)),
                "expected MalformedKey for {}",
                bad
            );
        }
    }

    #[test]
    fn test_value_bit_patterns_preserved() {
        let values = [
            0.0f64,
            -0.0,
            f64::MIN_POSITIVE / 2.0, // subnormal
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::from_bits(0x7ff8_0000_0000_0001), // NaN with payload
            f64::from_bits(0xfff4_0000_0000_0000), // signalling NaN
            1.5e300,
        ];
        for v in values {
            let decoded = decode_value(&encode_value(v)).unwrap();
            assert_eq!(decoded.to_bits(), v.to_bits());
        }
    }

    #[test]
    fn test_value_is_big_endian() {
        assert_eq!(encode_value(1.0), [0x3f, 0xf0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_value_truncated() {
        let err = decode_value(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            CodecError::TruncatedValue {
                expected: 8,
                actual: 3
            }
        );
    }

    #[test]
    fn test_sample_array_layout() {
        let blob = encode_sample_array(&[HourSample::new(60, 1.0)]);
        assert_eq!(blob.len(), HOUR_SAMPLE_SIZE);
        assert_eq!(&blob[..2], &[0x00, 0x3c]);
        assert_eq!(&blob[2..], &encode_value(1.0));
    }

    #[test]
    fn test_sample_array_round_trip() {
        let samples = vec![
            HourSample::at(7_200, 1.5),
            HourSample::at(7_201, -2.0),
            HourSample::at(10_799, f64::NAN),
        ];
        let decoded = decode_sample_array(&encode_sample_array(&samples)).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0], HourSample::new(0, 1.5));
        assert_eq!(decoded[1], HourSample::new(1, -2.0));
        assert_eq!(decoded[2].second_of_hour, 3_599);
        assert!(decoded[2].value.is_nan());
    }

    #[test]
    fn test_sample_array_empty() {
        assert!(decode_sample_array(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_sample_array_remainder_rejected() {
        let mut blob = encode_sample_array(&[HourSample::new(1, 1.0)]).to_vec();
        blob.push(0xff);
        let err = decode_sample_array(&blob).unwrap_err();
        assert_eq!(
            err,
            CodecError::TruncatedValue {
                expected: 20,
                actual: 11
            }
        );
    }

    #[test]
    fn test_content_qualifier_differs_by_content() {
        let a = encode_sample_array(&[HourSample::new(1, 1.0)]);
        let b = encode_sample_array(&[HourSample::new(2, 1.0)]);
        assert_eq!(content_qualifier(&a).len(), 16);
        assert_ne!(content_qualifier(&a), content_qualifier(&b));
        assert_eq!(content_qualifier(&a), content_qualifier(&a));
    }

    #[test]
    fn test_layout_parse() {
        assert_eq!("hourly".parse::<RowLayout>().unwrap(), RowLayout::Hourly);
        assert_eq!(
            "per_second".parse::<RowLayout>().unwrap(),
            RowLayout::PerSecond
        );
        assert!("daily".parse::<RowLayout>().is_err());
    }
}
