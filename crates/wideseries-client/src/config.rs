//! Pipeline Configuration
//!
//! `PipelineConfig` controls every tunable of the write and query pipelines.
//!
//! - **table**: table to write to and scan from (default: "sec")
//! - **layout**: `per_second` or `hourly` row layout (default: per_second)
//! - **target_dps**: datapoints per second produced by the load generator (default: 10000)
//! - **generation_interval_ms**: generator tick; each tick emits `target_dps * interval` samples (default: 5s)
//! - **sample_queue_capacity**: fail-fast queue between generator and assembler (default: 1M)
//! - **batch_queue_capacity**: blocking queue between assembler and writers (default: 1000)
//! - **batch_size** / **batch_timeout_ms**: batch size (at most 100000) and time bound (default: 1000 / 500ms)
//! - **num_writers**: concurrent bulk writers (default: 100)
//! - **target_qps** / **num_query_workers** / **query_window_secs**: read load; 0 qps disables it
//! - **report_interval_ms**: progress log interval (default: 5s)
//! - **rate_window_ms** / **rate_reset_interval_ms**: rate counter window and reset check
//! - **max_ticks**: stop generating after N ticks (default: run until shutdown)
//!
//! ## Environment
//!
//! [`PipelineConfig::from_env`] reads `WIDESERIES_<FIELD>` in upper case, e.g.
//! `WIDESERIES_TARGET_DPS=50000`, `WIDESERIES_LAYOUT=hourly`. Unset variables
//! keep their defaults; unparsable ones are a `ConfigError`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use wideseries_core::RowLayout;

use crate::error::{ClientError, Result};

/// Upper bound accepted for `batch_size`.
pub const MAX_BATCH_SIZE: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default)]
    pub layout: RowLayout,

    #[serde(default = "default_target_dps")]
    pub target_dps: u64,

    #[serde(default = "default_generation_interval_ms")]
    pub generation_interval_ms: u64,

    #[serde(default = "default_sample_queue_capacity")]
    pub sample_queue_capacity: usize,

    #[serde(default = "default_batch_queue_capacity")]
    pub batch_queue_capacity: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    #[serde(default = "default_num_writers")]
    pub num_writers: usize,

    /// Queries issued per second across `key_0..key_{qps-1}`; 0 disables the read load
    #[serde(default)]
    pub target_qps: usize,

    #[serde(default = "default_num_query_workers")]
    pub num_query_workers: usize,

    #[serde(default = "default_query_window_secs")]
    pub query_window_secs: u32,

    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,

    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,

    #[serde(default = "default_rate_reset_interval_ms")]
    pub rate_reset_interval_ms: u64,

    /// Stop generating after this many ticks; `None` runs until shutdown
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            layout: RowLayout::default(),
            target_dps: default_target_dps(),
            generation_interval_ms: default_generation_interval_ms(),
            sample_queue_capacity: default_sample_queue_capacity(),
            batch_queue_capacity: default_batch_queue_capacity(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            num_writers: default_num_writers(),
            target_qps: 0,
            num_query_workers: default_num_query_workers(),
            query_window_secs: default_query_window_secs(),
            report_interval_ms: default_report_interval_ms(),
            rate_window_ms: default_rate_window_ms(),
            rate_reset_interval_ms: default_rate_reset_interval_ms(),
            max_ticks: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `WIDESERIES_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(table) = lookup("WIDESERIES_TABLE") {
            config.table = table;
        }
        if let Some(layout) = lookup("WIDESERIES_LAYOUT") {
            config.layout = layout
                .parse()
                .map_err(ClientError::ConfigError)?;
        }
        set_parsed(&lookup, "WIDESERIES_TARGET_DPS", &mut config.target_dps)?;
        set_parsed(
            &lookup,
            "WIDESERIES_GENERATION_INTERVAL_MS",
            &mut config.generation_interval_ms,
        )?;
        set_parsed(
            &lookup,
            "WIDESERIES_SAMPLE_QUEUE_CAPACITY",
            &mut config.sample_queue_capacity,
        )?;
        set_parsed(
            &lookup,
            "WIDESERIES_BATCH_QUEUE_CAPACITY",
            &mut config.batch_queue_capacity,
        )?;
        set_parsed(&lookup, "WIDESERIES_BATCH_SIZE", &mut config.batch_size)?;
        set_parsed(
            &lookup,
            "WIDESERIES_BATCH_TIMEOUT_MS",
            &mut config.batch_timeout_ms,
        )?;
        set_parsed(&lookup, "WIDESERIES_NUM_WRITERS", &mut config.num_writers)?;
        set_parsed(&lookup, "WIDESERIES_TARGET_QPS", &mut config.target_qps)?;
        set_parsed(
            &lookup,
            "WIDESERIES_NUM_QUERY_WORKERS",
            &mut config.num_query_workers,
        )?;
        set_parsed(
            &lookup,
            "WIDESERIES_QUERY_WINDOW_SECS",
            &mut config.query_window_secs,
        )?;
        set_parsed(
            &lookup,
            "WIDESERIES_REPORT_INTERVAL_MS",
            &mut config.report_interval_ms,
        )?;
        set_parsed(&lookup, "WIDESERIES_RATE_WINDOW_MS", &mut config.rate_window_ms)?;
        set_parsed(
            &lookup,
            "WIDESERIES_RATE_RESET_INTERVAL_MS",
            &mut config.rate_reset_interval_ms,
        )?;

        if let Some(raw) = lookup("WIDESERIES_MAX_TICKS") {
            config.max_ticks = Some(parse_var("WIDESERIES_MAX_TICKS", &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("target_dps", self.target_dps),
            ("generation_interval_ms", self.generation_interval_ms),
            ("sample_queue_capacity", self.sample_queue_capacity as u64),
            ("batch_queue_capacity", self.batch_queue_capacity as u64),
            ("batch_size", self.batch_size as u64),
            ("num_writers", self.num_writers as u64),
            ("report_interval_ms", self.report_interval_ms),
            ("rate_window_ms", self.rate_window_ms),
            ("rate_reset_interval_ms", self.rate_reset_interval_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ClientError::ConfigError(format!(
                    "{} must be positive",
                    name
                )));
            }
        }

        if self.batch_size > MAX_BATCH_SIZE {
            return Err(ClientError::ConfigError(format!(
                "batch_size must be at most {}",
                MAX_BATCH_SIZE
            )));
        }
        if self.table.is_empty() {
            return Err(ClientError::ConfigError(
                "table must not be empty".to_string(),
            ));
        }
        if self.target_qps > 0 && self.num_query_workers == 0 {
            return Err(ClientError::ConfigError(
                "num_query_workers must be positive when target_qps is set".to_string(),
            ));
        }
        Ok(())
    }

    /// Samples emitted per generator tick, at least one.
    pub fn samples_per_tick(&self) -> usize {
        let per_tick = self.target_dps.saturating_mul(self.generation_interval_ms) / 1000;
        per_tick.max(1) as usize
    }

    /// Query queue holds five seconds of requests.
    pub fn query_queue_capacity(&self) -> usize {
        self.target_qps.saturating_mul(5).max(1)
    }

    pub fn generation_interval(&self) -> Duration {
        Duration::from_millis(self.generation_interval_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn rate_reset_interval(&self) -> Duration {
        Duration::from_millis(self.rate_reset_interval_ms)
    }
}

fn set_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = parse_var(name, &raw)?;
    }
    Ok(())
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ClientError::ConfigError(format!("cannot parse {}='{}': {}", name, raw, e)))
}

fn default_table() -> String {
    "sec".to_string()
}

fn default_target_dps() -> u64 {
    10_000
}

fn default_generation_interval_ms() -> u64 {
    5_000
}

fn default_sample_queue_capacity() -> usize {
    1_000_000
}

fn default_batch_queue_capacity() -> usize {
    1_000
}

fn default_batch_size() -> usize {
    1_000
}

fn default_batch_timeout_ms() -> u64 {
    500
}

fn default_num_writers() -> usize {
    100
}

fn default_num_query_workers() -> usize {
    100
}

fn default_query_window_secs() -> u32 {
    5 * 60
}

fn default_report_interval_ms() -> u64 {
    5_000
}

fn default_rate_window_ms() -> u64 {
    30_000
}

fn default_rate_reset_interval_ms() -> u64 {
    100
}
