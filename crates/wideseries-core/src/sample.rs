//! Sample Data Structure
//!
//! A [`Sample`] is one `(key, timestamp, value)` observation, the unit that
//! producers emit and the write pipeline persists.
//!
//! ## Structure
//! - **key**: logical series name (e.g. `key_42`, `host01.cpu.user`)
//! - **epoch_seconds**: observation time, seconds since the Unix epoch
//! - **value**: the observed value as an IEEE-754 double
//!
//! Samples are immutable once built and live only inside the batch that
//! carries them to a writer.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{RowKey, RowLayout};
use crate::error::Result;

/// A single timestamped observation for one series key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Logical series key
    pub key: String,

    /// Seconds since the Unix epoch
    pub epoch_seconds: u32,

    /// Observed value
    pub value: f64,
}

impl Sample {
    pub fn new(key: impl Into<String>, epoch_seconds: u32, value: f64) -> Self {
        Self {
            key: key.into(),
            epoch_seconds,
            value,
        }
    }

    /// Row key this sample is stored under for the given layout.
    pub fn row_key(&self, layout: RowLayout) -> Result<RowKey> {
        RowKey::encode(&self.key, self.epoch_seconds, layout)
    }
}

/// A decoded point returned by range scans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeValue {
    pub epoch_seconds: u32,
    pub value: f64,
}

impl TimeValue {
    pub fn new(epoch_seconds: u32, value: f64) -> Self {
        Self {
            epoch_seconds,
            value,
        }
    }
}

/// Current wall-clock time in whole seconds since the Unix epoch.
///
/// Clocks before 1970 read as 0, clocks past 2106 saturate at `u32::MAX`.
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_row_key_matches_codec() {
        let sample = Sample::new("key_7", 1_467_000_000, 3.5);
        let key = sample.row_key(RowLayout::PerSecond).unwrap();
        assert_eq!(
            key,
            RowKey::encode("key_7", 1_467_000_000, RowLayout::PerSecond).unwrap()
        );
    }

    #[test]
    fn test_unix_now_is_recent() {
        // 2020-09-13
        assert!(unix_now() > 1_600_000_000);
    }

    #[test]
    fn test_sample_serde() {
        let sample = Sample::new("key_1", 100, -1.25);
        let json = serde_json::to_string(&sample).unwrap();
        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample);
    }
}
