//! Query Pipeline
//!
//! A range query covers one series key over a half-open window
//! `[from, until)`. The engine encodes the two bounds with the row codec,
//! issues one ordered scan and decodes every returned row back into
//! `(epoch_seconds, value)` points.
//!
//! Hourly rows may hold several blobs covering the same second after a
//! resend; the engine returns one point per second.
//!
//! Decoding is best effort. A row with a malformed key or a truncated value is
//! skipped and counted; the query still succeeds with the remaining points.
//! Only a top-level scan error fails the query.
//!
//! Each query records its latency and, when it returned data, its staleness:
//! the age of the newest point relative to the wall clock.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use wideseries_core::{
    decode_sample_array, decode_value, unix_now, CodecError, RowKey, RowLayout, TimeValue,
    SECONDS_PER_HOUR, VALUE_SIZE,
};
use wideseries_observability::PipelineMetrics;

use crate::error::Result;
use crate::store::{Row, Table, COLUMN_FAMILY, COLUMN_QUALIFIER};

/// One range lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub key: String,
    /// Inclusive lower bound, epoch seconds
    pub from: u32,
    /// Exclusive upper bound, epoch seconds
    pub until: u32,
}

impl QueryRequest {
    pub fn new(key: impl Into<String>, from: u32, until: u32) -> Self {
        Self {
            key: key.into(),
            from,
            until,
        }
    }

    /// The `window` seconds ending at `now`.
    pub fn trailing(key: impl Into<String>, now: u32, window: u32) -> Self {
        Self::new(key, now.saturating_sub(window), now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub key: String,
    /// Points in ascending time order
    pub points: Vec<TimeValue>,
    /// Rows dropped because they failed to decode
    pub skipped_rows: u64,
    pub elapsed: Duration,
    /// Seconds between the newest point and now, `None` for an empty result
    pub staleness: Option<i64>,
}

pub struct QueryEngine {
    table: Table,
    layout: RowLayout,
    metrics: Arc<PipelineMetrics>,
}

impl QueryEngine {
    pub fn new(table: Table, layout: RowLayout, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            table,
            layout,
            metrics,
        }
    }

    /// Row key range `[begin, end)` covering `[from, until)` for `key`.
    ///
    /// Hourly rows are addressed by the hour they start in, so the end bound
    /// rounds `until` up to the next hour.
    pub fn scan_bounds(&self, key: &str, from: u32, until: u32) -> Result<(RowKey, RowKey)> {
        let bounds = match self.layout {
            RowLayout::PerSecond => (
                RowKey::encode(key, from, self.layout)?,
                RowKey::encode(key, until, self.layout)?,
            ),
            RowLayout::Hourly => {
                let last_hour = (until as u64).div_ceil(SECONDS_PER_HOUR as u64) as u32;
                (
                    RowKey::from_bucket(key, from / SECONDS_PER_HOUR, self.layout)?,
                    RowKey::from_bucket(key, last_hour, self.layout)?,
                )
            }
        };
        Ok(bounds)
    }

    /// Run one range query.
    ///
    /// # Errors
    ///
    /// `Codec` if a bound cannot be encoded, or the store's error if the
    /// scan itself fails. Undecodable rows are not errors.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResult> {
        let start = Instant::now();
        let mut result = QueryResult {
            key: request.key.clone(),
            points: Vec::new(),
            skipped_rows: 0,
            elapsed: Duration::ZERO,
            staleness: None,
        };

        if request.from >= request.until {
            trace!(key = %request.key, "Empty query window");
            return Ok(result);
        }

        let (begin, end) = self.scan_bounds(&request.key, request.from, request.until)?;
        let layout = self.layout;
        let mut points = Vec::new();
        let mut skipped = 0u64;

        let scanned = self
            .table
            .read_rows(&begin, &end, |row| {
                match decode_row(&row, layout) {
                    Ok(decoded) => points.extend(decoded),
                    Err(e) => {
                        debug!(row_key = %row.key, error = %e, "Skipping undecodable row");
                        skipped += 1;
                    }
                }
                true
            })
            .await;

        if let Err(e) = scanned {
            self.metrics.queries_failed.inc();
            return Err(e);
        }

        if layout == RowLayout::Hourly {
            points.retain(|p: &TimeValue| {
                p.epoch_seconds >= request.from && p.epoch_seconds < request.until
            });
            // A resent sample can land in a second blob of the same row
            points.sort_by_key(|p| p.epoch_seconds);
            points.dedup_by_key(|p| p.epoch_seconds);
        }

        result.elapsed = start.elapsed();
        result.staleness = points
            .last()
            .map(|p| unix_now() as i64 - p.epoch_seconds as i64);
        result.skipped_rows = skipped;
        result.points = points;

        self.metrics.rows_skipped.inc_by(skipped);
        self.metrics
            .record_query(result.points.len() as u64, result.elapsed, result.staleness);

        Ok(result)
    }
}

fn decode_row(row: &Row, layout: RowLayout) -> Result<Vec<TimeValue>> {
    match layout {
        RowLayout::PerSecond => {
            let epoch = row.key.epoch_seconds()?;
            let raw = row
                .value(COLUMN_FAMILY, COLUMN_QUALIFIER)
                .ok_or(CodecError::TruncatedValue {
                    expected: VALUE_SIZE,
                    actual: 0,
                })?;
            Ok(vec![TimeValue::new(epoch, decode_value(raw)?)])
        }
        RowLayout::Hourly => {
            let hour_start = row.key.bucket_start(layout)?;
            let mut points = Vec::new();
            for cell in row.family(COLUMN_FAMILY) {
                for sample in decode_sample_array(&cell.value)? {
                    points.push(TimeValue::new(
                        hour_start.saturating_add(sample.second_of_hour as u32),
                        sample.value,
                    ));
                }
            }
            Ok(points)
        }
    }
}

/// Totals for one query worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub queries: u64,
    pub failed: u64,
    pub empty: u64,
    pub datapoints: u64,
}

impl QueryStats {
    pub fn merge(&mut self, other: QueryStats) {
        self.queries += other.queries;
        self.failed += other.failed;
        self.empty += other.empty;
        self.datapoints += other.datapoints;
    }
}

/// Spawn `count` query workers draining `queue` until it closes.
pub fn spawn_query_workers(
    count: usize,
    queue: Arc<Mutex<mpsc::Receiver<QueryRequest>>>,
    engine: Arc<QueryEngine>,
) -> Vec<JoinHandle<QueryStats>> {
    (0..count)
        .map(|id| {
            let queue = Arc::clone(&queue);
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let mut stats = QueryStats::default();
                loop {
                    let next = { queue.lock().await.recv().await };
                    let Some(request) = next else { break };

                    stats.queries += 1;
                    match engine.query(&request).await {
                        Ok(result) if result.points.is_empty() => {
                            stats.empty += 1;
                            debug!(
                                key = %request.key,
                                from = request.from,
                                until = request.until,
                                "Empty result"
                            );
                        }
                        Ok(result) => stats.datapoints += result.points.len() as u64,
                        Err(e) => {
                            stats.failed += 1;
                            warn!(key = %request.key, error = %e, "Query failed");
                        }
                    }
                }
                debug!(worker = id, queries = stats.queries, "Query worker stopped");
                stats
            })
        })
        .collect()
}
