//! Pipeline Metrics
//!
//! `PipelineMetrics` owns its own Prometheus `Registry`. One instance is created
//! per pipeline and handed to every worker as `Arc<PipelineMetrics>`, so tests
//! can build a fresh instance and assert on exact counts without process-wide
//! state leaking between them.
//!
//! ## Metric Families
//!
//! - Write path: samples generated/written/failed, batches written/failed,
//!   rows failed, encoding overflows, bulk write latency, batch size
//! - Read path: queries, rows skipped on decode, query latency, staleness
//! - Queues: sample queue length

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::time::Duration;

/// Counters and histograms shared by the write and query pipelines.
pub struct PipelineMetrics {
    registry: Registry,

    pub samples_generated: IntCounter,
    pub samples_written: IntCounter,
    pub samples_failed: IntCounter,
    pub samples_overflowed: IntCounter,
    pub batches_written: IntCounter,
    pub batches_failed: IntCounter,
    pub rows_failed: IntCounter,
    pub write_latency: Histogram,
    pub batch_size: Histogram,

    pub queries_total: IntCounter,
    pub queries_failed: IntCounter,
    pub query_datapoints: IntCounter,
    pub rows_skipped: IntCounter,
    pub query_latency: Histogram,
    pub staleness_seconds: IntGauge,

    pub sample_queue_len: IntGauge,
}

/// Plain copy of the counters at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub samples_generated: u64,
    pub samples_written: u64,
    pub samples_failed: u64,
    pub samples_overflowed: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
    pub rows_failed: u64,
    pub queries_total: u64,
    pub queries_failed: u64,
    pub query_datapoints: u64,
    pub rows_skipped: u64,
    pub avg_write_latency: Duration,
    pub avg_query_latency: Duration,
    pub staleness_seconds: i64,
}

impl PipelineMetrics {
    /// Create and register every metric in a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let histogram =
            |name: &str, help: &str, buckets: Vec<f64>| -> prometheus::Result<Histogram> {
                let h = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))?;
                registry.register(Box::new(h.clone()))?;
                Ok(h)
            };
        let gauge = |name: &str, help: &str| -> prometheus::Result<IntGauge> {
            let g = IntGauge::new(name, help)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        let latency_buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

        Ok(Self {
            samples_generated: counter(
                "wideseries_samples_generated_total",
                "Samples enqueued by the load generator",
            )?,
            samples_written: counter(
                "wideseries_samples_written_total",
                "Samples committed to the store",
            )?,
            samples_failed: counter(
                "wideseries_samples_failed_total",
                "Samples in failed bulk writes or failed rows",
            )?,
            samples_overflowed: counter(
                "wideseries_samples_overflowed_total",
                "Samples dropped because their row key could not be encoded",
            )?,
            batches_written: counter(
                "wideseries_batches_written_total",
                "Bulk writes that returned without a top-level error",
            )?,
            batches_failed: counter(
                "wideseries_batches_failed_total",
                "Bulk writes dropped after a top-level error",
            )?,
            rows_failed: counter(
                "wideseries_rows_failed_total",
                "Rows reported as failed inside successful bulk writes",
            )?,
            write_latency: histogram(
                "wideseries_write_latency_seconds",
                "Bulk write latency in seconds",
                latency_buckets.clone(),
            )?,
            batch_size: histogram(
                "wideseries_batch_size",
                "Samples per assembled batch",
                vec![1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0],
            )?,
            queries_total: counter("wideseries_queries_total", "Range queries completed")?,
            queries_failed: counter(
                "wideseries_queries_failed_total",
                "Range queries whose scan returned a top-level error",
            )?,
            query_datapoints: counter(
                "wideseries_query_datapoints_total",
                "Datapoints decoded by range queries",
            )?,
            rows_skipped: counter(
                "wideseries_rows_skipped_total",
                "Scanned rows skipped because they failed to decode",
            )?,
            query_latency: histogram(
                "wideseries_query_latency_seconds",
                "Range query latency in seconds",
                latency_buckets,
            )?,
            staleness_seconds: gauge(
                "wideseries_staleness_seconds",
                "Age of the newest datapoint returned by the last non-empty query",
            )?,
            sample_queue_len: gauge(
                "wideseries_sample_queue_len",
                "Samples waiting between the generator and the assembler",
            )?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a committed bulk write.
    pub fn record_write(&self, committed_samples: u64, failed_samples: u64, elapsed: Duration) {
        self.batches_written.inc();
        self.samples_written.inc_by(committed_samples);
        self.samples_failed.inc_by(failed_samples);
        self.write_latency.observe(elapsed.as_secs_f64());
    }

    /// Record a bulk write that failed as a whole.
    pub fn record_failed_batch(&self, samples: u64) {
        self.batches_failed.inc();
        self.samples_failed.inc_by(samples);
    }

    /// Record a completed range query.
    pub fn record_query(&self, datapoints: u64, elapsed: Duration, staleness: Option<i64>) {
        self.queries_total.inc();
        self.query_datapoints.inc_by(datapoints);
        self.query_latency.observe(elapsed.as_secs_f64());
        if let Some(age) = staleness {
            self.staleness_seconds.set(age);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_generated: self.samples_generated.get(),
            samples_written: self.samples_written.get(),
            samples_failed: self.samples_failed.get(),
            samples_overflowed: self.samples_overflowed.get(),
            batches_written: self.batches_written.get(),
            batches_failed: self.batches_failed.get(),
            rows_failed: self.rows_failed.get(),
            queries_total: self.queries_total.get(),
            queries_failed: self.queries_failed.get(),
            query_datapoints: self.query_datapoints.get(),
            rows_skipped: self.rows_skipped.get(),
            avg_write_latency: average(&self.write_latency),
            avg_query_latency: average(&self.query_latency),
            staleness_seconds: self.staleness_seconds.get(),
        }
    }
}

fn average(h: &Histogram) -> Duration {
    let count = h.get_sample_count();
    if count == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(h.get_sample_sum() / count as f64)
}
