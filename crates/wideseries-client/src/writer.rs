//! Write Pipeline
//!
//! A fixed pool of writers pulls whole batches from a shared queue. For each
//! batch a writer:
//!
//! 1. Converts samples to one mutation per row ([`prepare`])
//! 2. Submits every row as a single bulk call
//! 3. Reconciles the result: a top-level error drops the batch, per-row
//!    errors are logged and the remaining rows count as committed
//!
//! Nothing is retried. Rewriting a row overwrites it, so duplicates are safe
//! but a dropped batch stays dropped.
//!
//! ## Row Layouts
//!
//! - **PerSecond**: one row per sample, value under qualifier `"0"`
//! - **Hourly**: samples grouped by `(key, hour)`, each group packed into one
//!   blob stored under the MD5 of its own bytes, so later writes to the same
//!   hour add a cell instead of replacing earlier ones
//!
//! ## Thread Safety
//!
//! Writers share only the batch receiver (behind an async `Mutex`), the
//! `RateCounter` and the metrics. The store handle is used without locking.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use wideseries_core::{
    content_qualifier, encode_sample_array, encode_value, HourSample, RowKey, RowLayout, Sample,
};
use wideseries_observability::PipelineMetrics;

use crate::batch::Batch;
use crate::error::{ClientError, Result};
use crate::rate::RateCounter;
use crate::store::{Mutation, Table, CELL_TIMESTAMP, COLUMN_FAMILY, COLUMN_QUALIFIER};

/// Mutations for one batch, in submission order.
#[derive(Debug, Default)]
pub struct PreparedBatch {
    pub entries: Vec<(RowKey, Mutation)>,
    /// Samples carried by each entry, same indexing as `entries`
    pub samples_per_row: Vec<u64>,
    /// Samples dropped because their row key could not be encoded
    pub overflowed: u64,
}

impl PreparedBatch {
    pub fn total_samples(&self) -> u64 {
        self.samples_per_row.iter().sum()
    }
}

/// Convert samples into row mutations for `layout`.
pub fn prepare(samples: &[Sample], layout: RowLayout) -> PreparedBatch {
    match layout {
        RowLayout::PerSecond => prepare_per_second(samples),
        RowLayout::Hourly => prepare_hourly(samples),
    }
}

fn prepare_per_second(samples: &[Sample]) -> PreparedBatch {
    let mut prepared = PreparedBatch {
        entries: Vec::with_capacity(samples.len()),
        samples_per_row: Vec::with_capacity(samples.len()),
        overflowed: 0,
    };

    for sample in samples {
        let row_key = match sample.row_key(RowLayout::PerSecond) {
            Ok(k) => k,
            Err(e) => {
                debug!(key = %sample.key, error = %e, "Dropping sample");
                prepared.overflowed += 1;
                continue;
            }
        };

        let mut mutation = Mutation::new();
        mutation.set(
            COLUMN_FAMILY,
            COLUMN_QUALIFIER,
            CELL_TIMESTAMP,
            Bytes::copy_from_slice(&encode_value(sample.value)),
        );
        prepared.entries.push((row_key, mutation));
        prepared.samples_per_row.push(1);
    }

    prepared
}

fn prepare_hourly(samples: &[Sample]) -> PreparedBatch {
    let mut overflowed = 0;
    let mut index: HashMap<RowKey, usize> = HashMap::new();
    let mut groups: Vec<(RowKey, Vec<HourSample>)> = Vec::new();

    for sample in samples {
        let row_key = match sample.row_key(RowLayout::Hourly) {
            Ok(k) => k,
            Err(e) => {
                debug!(key = %sample.key, error = %e, "Dropping sample");
                overflowed += 1;
                continue;
            }
        };

        let point = HourSample::at(sample.epoch_seconds, sample.value);
        match index.get(&row_key) {
            Some(&i) => groups[i].1.push(point),
            None => {
                index.insert(row_key.clone(), groups.len());
                groups.push((row_key, vec![point]));
            }
        }
    }

    let mut prepared = PreparedBatch {
        entries: Vec::with_capacity(groups.len()),
        samples_per_row: Vec::with_capacity(groups.len()),
        overflowed,
    };
    for (row_key, points) in groups {
        let blob = encode_sample_array(&points);
        let mut mutation = Mutation::new();
        mutation.set(
            COLUMN_FAMILY,
            content_qualifier(&blob),
            CELL_TIMESTAMP,
            blob,
        );
        prepared.entries.push((row_key, mutation));
        prepared.samples_per_row.push(points.len() as u64);
    }

    prepared
}

/// Result of a bulk write that returned without a top-level error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    pub rows: usize,
    pub failed_rows: usize,
    pub committed_samples: u64,
    pub failed_samples: u64,
    pub overflowed_samples: u64,
    pub elapsed: Duration,
}

impl WriteOutcome {
    /// `PartialRowFailure` if any row failed.
    pub fn partial_failure(&self) -> Option<ClientError> {
        (self.failed_rows > 0).then(|| ClientError::PartialRowFailure {
            failed: self.failed_rows,
            total: self.rows,
        })
    }
}

/// Writes batches to one table and records the results.
pub struct BatchWriter {
    table: Table,
    layout: RowLayout,
    metrics: Arc<PipelineMetrics>,
    rate: Arc<RateCounter>,
}

impl BatchWriter {
    pub fn new(
        table: Table,
        layout: RowLayout,
        metrics: Arc<PipelineMetrics>,
        rate: Arc<RateCounter>,
    ) -> Self {
        Self {
            table,
            layout,
            metrics,
            rate,
        }
    }

    /// Write one batch as a single bulk call.
    ///
    /// # Errors
    ///
    /// `BulkWriteFailure` when the store rejects the whole call. The batch is
    /// counted as failed and not retried.
    pub async fn write_batch(&self, batch: Batch) -> Result<WriteOutcome> {
        let prepared = prepare(&batch.samples, self.layout);

        if prepared.overflowed > 0 {
            self.metrics.samples_overflowed.inc_by(prepared.overflowed);
            warn!(
                seq = batch.seq,
                dropped = prepared.overflowed,
                "Samples dropped, row key does not fit"
            );
        }

        let mut outcome = WriteOutcome {
            rows: prepared.entries.len(),
            overflowed_samples: prepared.overflowed,
            ..Default::default()
        };
        if prepared.entries.is_empty() {
            return Ok(outcome);
        }

        let total_samples = prepared.total_samples();
        let samples_per_row = prepared.samples_per_row;

        let start = Instant::now();
        let row_errors = match self.table.apply_bulk(prepared.entries).await {
            Ok(errors) => errors,
            Err(e) => {
                error!(
                    seq = batch.seq,
                    table = self.table.name(),
                    rows = outcome.rows,
                    error = %e,
                    "Entire bulk mutation failed"
                );
                self.metrics.record_failed_batch(total_samples);
                return Err(ClientError::BulkWriteFailure(e.to_string()));
            }
        };
        outcome.elapsed = start.elapsed();

        let mut failed_indexes: Vec<usize> = Vec::with_capacity(row_errors.len());
        for row_error in &row_errors {
            warn!(
                seq = batch.seq,
                row_key = %row_error.row_key,
                error = %row_error.message,
                "Bulk apply failed for row"
            );
            failed_indexes.push(row_error.index);
        }
        failed_indexes.sort_unstable();
        failed_indexes.dedup();

        outcome.failed_rows = failed_indexes.len();
        outcome.failed_samples = failed_indexes
            .iter()
            .filter_map(|&i| samples_per_row.get(i))
            .sum();
        outcome.committed_samples = total_samples.saturating_sub(outcome.failed_samples);

        self.metrics.rows_failed.inc_by(outcome.failed_rows as u64);
        self.metrics.record_write(
            outcome.committed_samples,
            outcome.failed_samples,
            outcome.elapsed,
        );
        self.rate.mark(outcome.committed_samples);

        debug!(
            seq = batch.seq,
            rows = outcome.rows,
            committed = outcome.committed_samples,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Bulk write complete"
        );

        Ok(outcome)
    }
}

/// Totals for one writer task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub batches: u64,
    pub failed_batches: u64,
    pub committed_samples: u64,
    pub failed_samples: u64,
}

impl WriterStats {
    pub fn merge(&mut self, other: WriterStats) {
        self.batches += other.batches;
        self.failed_batches += other.failed_batches;
        self.committed_samples += other.committed_samples;
        self.failed_samples += other.failed_samples;
    }
}

/// Spawn `count` writers draining `queue` until it closes.
pub fn spawn_writers(
    count: usize,
    queue: Arc<Mutex<mpsc::Receiver<Batch>>>,
    writer: Arc<BatchWriter>,
) -> Vec<JoinHandle<WriterStats>> {
    (0..count)
        .map(|id| {
            let queue = Arc::clone(&queue);
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                let mut stats = WriterStats::default();
                loop {
                    // Lock is released before the write so other writers can receive
                    let next = { queue.lock().await.recv().await };
                    let Some(batch) = next else { break };
                    let samples = batch.len() as u64;

                    stats.batches += 1;
                    match writer.write_batch(batch).await {
                        Ok(outcome) => {
                            stats.committed_samples += outcome.committed_samples;
                            stats.failed_samples += outcome.failed_samples;
                        }
                        Err(_) => {
                            stats.failed_batches += 1;
                            stats.failed_samples += samples;
                        }
                    }
                }
                debug!(writer = id, batches = stats.batches, "Writer stopped");
                stats
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::store::{AdminStore, WideColumnStore};
    use wideseries_core::{decode_sample_array, decode_value};

    fn samples(n: u32, epoch: u32) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::new(format!("key_{}", i), epoch, epoch as f64))
            .collect()
    }

    async fn writer_with_store(layout: RowLayout) -> (Arc<MemoryStore>, BatchWriter) {
        let store = Arc::new(MemoryStore::new());
        store.create_table("t").await.unwrap();
        store.create_column_family("t", COLUMN_FAMILY).await.unwrap();

        let table = Table::open(store.clone() as Arc<dyn WideColumnStore>, "t");
        let writer = BatchWriter::new(
            table,
            layout,
            Arc::new(PipelineMetrics::new().unwrap()),
            Arc::new(RateCounter::new(Duration::from_secs(30))),
        );
        (store, writer)
    }

    #[test]
    fn test_prepare_per_second() {
        let prepared = prepare(&samples(3, 1_467_000_000), RowLayout::PerSecond);

        assert_eq!(prepared.entries.len(), 3);
        assert_eq!(prepared.total_samples(), 3);
        let (key, mutation) = &prepared.entries[0];
        assert_eq!(
            *key,
            RowKey::encode("key_0", 1_467_000_000, RowLayout::PerSecond).unwrap()
        );
        let cell = &mutation.cells()[0];
        assert_eq!(cell.family, "0");
        assert_eq!(cell.qualifier.as_ref(), b"0");
        assert_eq!(decode_value(&cell.value).unwrap(), 1_467_000_000.0);
    }

    #[test]
    fn test_prepare_hourly_groups_by_key_and_hour() {
        let hour = 1_467_000_000 / 3600 * 3600;
        let input = vec![
            Sample::new("a", hour + 1, 1.0),
            Sample::new("b", hour + 2, 2.0),
            Sample::new("a", hour + 3, 3.0),
            // next hour gets its own row
            Sample::new("a", hour + 3600, 4.0),
        ];

        let prepared = prepare(&input, RowLayout::Hourly);
        assert_eq!(prepared.entries.len(), 3);
        assert_eq!(prepared.samples_per_row, vec![2, 1, 1]);

        let (key, mutation) = &prepared.entries[0];
        assert_eq!(*key, RowKey::encode("a", hour, RowLayout::Hourly).unwrap());
        let cell = &mutation.cells()[0];
        assert_eq!(cell.qualifier, content_qualifier(&cell.value));
        assert_eq!(
            decode_sample_array(&cell.value).unwrap(),
            vec![HourSample::new(1, 1.0), HourSample::new(3, 3.0)]
        );
    }

    #[tokio::test]
    async fn test_write_batch_commits_everything() {
        let (store, writer) = writer_with_store(RowLayout::PerSecond).await;
        let batch = Batch {
            seq: 1,
            samples: samples(5, 1_467_000_000),
        };

        let outcome = writer.write_batch(batch).await.unwrap();
        assert_eq!(outcome.rows, 5);
        assert_eq!(outcome.committed_samples, 5);
        assert!(outcome.partial_failure().is_none());
        assert_eq!(store.row_count("t").await, 5);
        assert_eq!(writer.rate.snapshot().count, 5);
        assert_eq!(writer.metrics.snapshot().samples_written, 5);
    }

    #[tokio::test]
    async fn test_write_batch_missing_table_is_bulk_failure() {
        let store: Arc<dyn WideColumnStore> = Arc::new(MemoryStore::new());
        let writer = BatchWriter::new(
            Table::open(store, "missing"),
            RowLayout::PerSecond,
            Arc::new(PipelineMetrics::new().unwrap()),
            Arc::new(RateCounter::new(Duration::from_secs(30))),
        );

        let err = writer
            .write_batch(Batch {
                seq: 1,
                samples: samples(2, 100),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BulkWriteFailure(_)));
        assert_eq!(writer.metrics.snapshot().batches_failed, 1);
        assert_eq!(writer.rate.snapshot().count, 0);
    }

    #[tokio::test]
    async fn test_writers_drain_queue_then_stop() {
        let (store, writer) = writer_with_store(RowLayout::PerSecond).await;
        let (tx, rx) = mpsc::channel(10);
        let handles = spawn_writers(3, Arc::new(Mutex::new(rx)), Arc::new(writer));

        for seq in 0..4u32 {
            tx.send(Batch {
                seq: seq as u64,
                samples: samples(10, 1_000_000_000 + seq),
            })
            .await
            .unwrap();
        }
        drop(tx);

        let mut total = WriterStats::default();
        for handle in handles {
            total.merge(handle.await.unwrap());
        }
        assert_eq!(total.batches, 4);
        assert_eq!(total.committed_samples, 40);
        assert_eq!(store.row_count("t").await, 40);
    }
}
