//! Synthetic load.
//!
//! [`LoadGenerator`] emits `samples_per_tick` samples on every tick, one per
//! key of `key_0..key_{n-1}`, all stamped with the current second and carrying
//! that second as their value. [`QueryGenerator`] issues one trailing-window
//! query per key once a second.
//!
//! Both enqueue with `try_send`. A full queue means the configured rate is
//! more than the pipeline can absorb; the generator stops and returns
//! `QueueOverflow` to whoever awaits it instead of blocking and hiding the
//! overload.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error};
use wideseries_core::{unix_now, Sample};
use wideseries_observability::PipelineMetrics;

use crate::error::{ClientError, Result};
use crate::query::QueryRequest;
use crate::shutdown::ShutdownHandle;

/// Name of the `i`th synthetic series.
pub fn key_name(i: usize) -> String {
    format!("key_{}", i)
}

/// Items currently buffered in the channel behind `tx`.
pub fn queue_len<T>(tx: &mpsc::Sender<T>) -> usize {
    tx.max_capacity() - tx.capacity()
}

/// Share of the channel's capacity in use, 0 to 100.
pub fn pct_full<T>(tx: &mpsc::Sender<T>) -> f64 {
    queue_len(tx) as f64 * 100.0 / tx.max_capacity() as f64
}

/// Enqueue without waiting.
///
/// # Errors
///
/// - `QueueOverflow` if the channel is full
/// - `ChannelClosed(queue)` if the receiver is gone
pub fn try_enqueue<T>(tx: &mpsc::Sender<T>, item: T, queue: &'static str) -> Result<()> {
    match tx.try_send(item) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => Err(ClientError::QueueOverflow {
            capacity: tx.max_capacity(),
            pct_full: pct_full(tx),
        }),
        Err(TrySendError::Closed(_)) => Err(ClientError::ChannelClosed(queue)),
    }
}

pub struct LoadGenerator {
    samples_per_tick: usize,
    tick: Duration,
    max_ticks: Option<u64>,
    metrics: Arc<PipelineMetrics>,
}

impl LoadGenerator {
    pub fn new(
        samples_per_tick: usize,
        tick: Duration,
        max_ticks: Option<u64>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            samples_per_tick,
            tick,
            max_ticks,
            metrics,
        }
    }

    /// Generate until shutdown, `max_ticks` or overflow. Returns samples enqueued.
    ///
    /// The sender is dropped on return, which closes the sample queue.
    pub async fn run(self, tx: mpsc::Sender<Sample>, mut shutdown: ShutdownHandle) -> Result<u64> {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;
        let mut generated = 0u64;

        loop {
            if self.max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let now = unix_now();
            for i in 0..self.samples_per_tick {
                let sample = Sample::new(key_name(i), now, now as f64);
                if let Err(e) = try_enqueue(&tx, sample, "sample queue") {
                    self.metrics.samples_generated.inc_by(i as u64);
                    error!(error = %e, generated = generated + i as u64, "Cannot enqueue sample");
                    return Err(e);
                }
            }

            ticks += 1;
            generated += self.samples_per_tick as u64;
            self.metrics
                .samples_generated
                .inc_by(self.samples_per_tick as u64);
            self.metrics.sample_queue_len.set(queue_len(&tx) as i64);
        }

        debug!(ticks, generated, "Load generator stopped");
        Ok(generated)
    }
}

pub struct QueryGenerator {
    qps: usize,
    window_secs: u32,
}

impl QueryGenerator {
    pub fn new(qps: usize, window_secs: u32) -> Self {
        Self { qps, window_secs }
    }

    /// Issue `qps` queries every second until shutdown or overflow. Returns
    /// queries enqueued.
    pub async fn run(
        self,
        tx: mpsc::Sender<QueryRequest>,
        mut shutdown: ShutdownHandle,
    ) -> Result<u64> {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut issued = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let now = unix_now();
            for i in 0..self.qps {
                let request = QueryRequest::trailing(key_name(i), now, self.window_secs);
                if let Err(e) = try_enqueue(&tx, request, "query queue") {
                    error!(error = %e, issued, "Cannot enqueue query");
                    return Err(e);
                }
                issued += 1;
            }
        }

        debug!(issued, "Query generator stopped");
        Ok(issued)
    }
}
