//! Batch Assembly
//!
//! The assembler sits between the two pipeline queues. It drains individual
//! samples from the fail-fast sample queue into bounded batches and hands each
//! batch to the writer pool.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  LoadGenerator   │  try_send, full queue is fatal
//! └────────┬─────────┘
//!          │ mpsc<Sample>
//!          ▼
//! ┌──────────────────┐
//! │  run_assembler   │  drain(max_size, max_wait)
//! └────────┬─────────┘
//!          │ mpsc<Batch>, send().await blocks when full
//!          ▼
//! ┌──────────────────┐
//! │  BatchWriter × N │
//! └──────────────────┘
//! ```
//!
//! ## Stopping Rule
//!
//! [`drain`] returns as soon as ANY of these holds:
//! - **Size**: `max_size` samples collected
//! - **Time**: `max_wait` elapsed since the call began
//! - **Closed**: every sender is gone and the queue is empty
//!
//! A drain that times out with nothing collected yields an empty batch, which
//! the assembler discards rather than sending.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};
use wideseries_core::Sample;
use wideseries_observability::PipelineMetrics;

use crate::error::{ClientError, Result};

/// Largest up-front allocation a drain makes, whatever `max_size` is.
const MAX_PREALLOC: usize = 4_096;

/// Items collected by one [`drain`] call.
#[derive(Debug)]
pub struct Drained<T> {
    pub items: Vec<T>,
    /// The source is closed and empty; no later call will yield anything.
    pub source_closed: bool,
}

/// Receive up to `max_size` items, waiting at most `max_wait` in total.
///
/// Items beyond `max_size` stay in the channel for the next call. The
/// receive is cancel safe, so an expired deadline never loses an item.
pub async fn drain<T>(
    source: &mut mpsc::Receiver<T>,
    max_size: usize,
    max_wait: Duration,
) -> Drained<T> {
    let deadline = Instant::now() + max_wait;
    let mut items = Vec::with_capacity(max_size.min(MAX_PREALLOC));

    while items.len() < max_size {
        match timeout_at(deadline, source.recv()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {
                return Drained {
                    items,
                    source_closed: true,
                }
            }
            Err(_) => break,
        }
    }

    Drained {
        items,
        source_closed: false,
    }
}

/// A non-empty group of samples written by one bulk call.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Assembly order, starting at 1
    pub seq: u64,
    pub samples: Vec<Sample>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssemblerConfig {
    pub max_size: usize,
    pub max_wait: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub batches: u64,
    pub samples: u64,
}

/// Drain `source` into batches until it closes, sending each to `sink`.
///
/// Sending blocks while the batch queue is full. Returns `ChannelClosed` if
/// the writers have gone away.
pub async fn run_assembler(
    mut source: mpsc::Receiver<Sample>,
    sink: mpsc::Sender<Batch>,
    config: AssemblerConfig,
    metrics: Arc<PipelineMetrics>,
) -> Result<AssemblerStats> {
    let mut stats = AssemblerStats::default();

    loop {
        let Drained {
            items,
            source_closed,
        } = drain(&mut source, config.max_size, config.max_wait).await;

        if items.is_empty() {
            trace!("Drain timed out with no samples");
        } else {
            stats.batches += 1;
            stats.samples += items.len() as u64;
            metrics.batch_size.observe(items.len() as f64);

            let batch = Batch {
                seq: stats.batches,
                samples: items,
            };
            trace!(seq = batch.seq, samples = batch.len(), "Assembled batch");

            sink.send(batch)
                .await
                .map_err(|_| ClientError::ChannelClosed("batch queue"))?;
        }

        if source_closed {
            break;
        }
    }

    debug!(
        batches = stats.batches,
        samples = stats.samples,
        "Assembler finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_drain_stops_at_max_size() {
        let (tx, mut rx) = mpsc::channel(10);
        for i in 0..5 {
            tx.send(i).await.unwrap();
        }

        let first = drain(&mut rx, 3, Duration::from_millis(50)).await;
        assert_eq!(first.items, vec![0, 1, 2]);
        assert!(!first.source_closed);

        let second = drain(&mut rx, 3, Duration::from_millis(50)).await;
        assert_eq!(second.items, vec![3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_returns_after_max_wait() {
        let (tx, mut rx) = mpsc::channel(10);
        tx.send(42).await.unwrap();

        let start = Instant::now();
        let drained = drain(&mut rx, 100, Duration::from_millis(50)).await;

        assert_eq!(drained.items, vec![42]);
        assert!(!drained.source_closed);
        assert!(start.elapsed() <= Duration::from_millis(50));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_huge_max_size_does_not_preallocate() {
        let (tx, mut rx) = mpsc::channel(10);
        tx.send(1u64).await.unwrap();
        drop(tx);

        let drained = drain(&mut rx, usize::MAX, Duration::from_millis(20)).await;
        assert_eq!(drained.items, vec![1]);
        assert!(drained.source_closed);
        assert!(drained.items.capacity() <= MAX_PREALLOC);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_empty_on_silence() {
        let (_tx, mut rx) = mpsc::channel::<u32>(10);
        let drained = drain(&mut rx, 100, Duration::from_millis(20)).await;
        assert!(drained.items.is_empty());
        assert!(!drained.source_closed);
    }

    #[tokio::test]
    async fn test_drain_reports_closed_source() {
        let (tx, mut rx) = mpsc::channel(10);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        let drained = drain(&mut rx, 100, Duration::from_secs(60)).await;
        assert_eq!(drained.items, vec![1, 2]);
        assert!(drained.source_closed);
    }

    #[tokio::test]
    async fn test_assembler_splits_and_finishes() {
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let (sample_tx, sample_rx) = mpsc::channel(100);
        let (batch_tx, mut batch_rx) = mpsc::channel(100);

        for i in 0..7u32 {
            sample_tx
                .send(Sample::new(format!("key_{}", i), 1_000 + i, i as f64))
                .await
                .unwrap();
        }
        drop(sample_tx);

        let config = AssemblerConfig {
            max_size: 3,
            max_wait: Duration::from_millis(50),
        };
        let stats = run_assembler(sample_rx, batch_tx, config, Arc::clone(&metrics))
            .await
            .unwrap();

        assert_eq!(stats, AssemblerStats { batches: 3, samples: 7 });

        let mut sizes = Vec::new();
        while let Some(batch) = batch_rx.recv().await {
            sizes.push((batch.seq, batch.len()));
        }
        assert_eq!(sizes, vec![(1, 3), (2, 3), (3, 1)]);
        assert_eq!(metrics.batch_size.get_sample_count(), 3);
    }

    #[tokio::test]
    async fn test_assembler_fails_when_writers_gone() {
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let (sample_tx, sample_rx) = mpsc::channel(10);
        let (batch_tx, batch_rx) = mpsc::channel(1);
        drop(batch_rx);

        sample_tx.send(Sample::new("key_0", 1, 1.0)).await.unwrap();
        drop(sample_tx);

        let config = AssemblerConfig {
            max_size: 10,
            max_wait: Duration::from_millis(10),
        };
        let err = run_assembler(sample_rx, batch_tx, config, metrics)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ChannelClosed(_)));
    }
}
