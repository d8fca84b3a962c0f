//! Pipeline Coordinator
//!
//! `Pipeline` wires the components together and owns their tasks:
//!
//! ```text
//! LoadGenerator ──try_send──▶ [sample queue] ──▶ run_assembler
//!                                                     │ send().await
//!                                                     ▼
//!                                               [batch queue] ──▶ BatchWriter × N ──▶ store
//!
//! QueryGenerator ──try_send──▶ [query queue] ──▶ QueryEngine × M ──▶ store
//! ```
//!
//! ## Shutdown
//!
//! Only the generators watch the [`ShutdownHandle`]. When they stop they
//! drop their senders, and every downstream task exits once its input queue
//! is closed and empty. Shutdown therefore writes every batch already
//! accepted instead of dropping it.
//!
//! ## Overflow
//!
//! A `QueueOverflow` from either generator stops the pipeline as soon as
//! [`Pipeline::run`] sees the generator exit. The coordinator still drains
//! what was enqueued, then returns the overflow as its error.
//!
//! Draining waits on the store. Neither the assembler's blocking send nor a
//! writer's bulk call watches the shutdown handle, so a store that never
//! answers keeps [`Pipeline::shutdown`] pending.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use wideseries_observability::{MetricsSnapshot, PipelineMetrics};

use crate::batch::{run_assembler, AssemblerConfig, AssemblerStats};
use crate::config::PipelineConfig;
use crate::error::{ClientError, Result};
use crate::loadgen::{LoadGenerator, QueryGenerator};
use crate::query::{spawn_query_workers, QueryEngine, QueryStats};
use crate::rate::RateCounter;
use crate::shutdown::ShutdownHandle;
use crate::store::{Table, WideColumnStore};
use crate::writer::{spawn_writers, BatchWriter, WriterStats};

/// Totals after the pipeline has drained.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub generated: u64,
    pub assembled: AssemblerStats,
    pub writes: WriterStats,
    pub queries: QueryStats,
    pub metrics: MetricsSnapshot,
    /// Rate counter reading at shutdown
    pub rate_per_second: f64,
    pub elapsed: Duration,
}

type Joined = std::result::Result<Result<u64>, JoinError>;

/// What ended the running phase. A handle that already resolved is carried
/// here so it is not polled again.
enum Stopped {
    Requested,
    Generator(Joined),
    QueryGenerator(Joined),
}

struct QueryTasks {
    generator: JoinHandle<Result<u64>>,
    workers: Vec<JoinHandle<QueryStats>>,
}

pub struct Pipeline {
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    rate: Arc<RateCounter>,
    shutdown: ShutdownHandle,
    generator: JoinHandle<Result<u64>>,
    assembler: JoinHandle<Result<AssemblerStats>>,
    writers: Vec<JoinHandle<WriterStats>>,
    queries: Option<QueryTasks>,
    reporter: JoinHandle<()>,
    started: Instant,
}

impl Pipeline {
    /// Spawn every pipeline task. Must be called from within a Tokio runtime.
    pub fn start(
        config: PipelineConfig,
        store: Arc<dyn WideColumnStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        config.validate()?;

        let table = Table::open(store, config.table.clone());
        let shutdown = ShutdownHandle::new();
        let rate = Arc::new(RateCounter::new(config.rate_window()));
        rate.start_resetter(config.rate_reset_interval());

        let (sample_tx, sample_rx) = mpsc::channel(config.sample_queue_capacity);
        let (batch_tx, batch_rx) = mpsc::channel(config.batch_queue_capacity);

        let writer = Arc::new(BatchWriter::new(
            table.clone(),
            config.layout,
            Arc::clone(&metrics),
            Arc::clone(&rate),
        ));
        let writers = spawn_writers(
            config.num_writers,
            Arc::new(Mutex::new(batch_rx)),
            writer,
        );

        let assembler = tokio::spawn(run_assembler(
            sample_rx,
            batch_tx,
            AssemblerConfig {
                max_size: config.batch_size,
                max_wait: config.batch_timeout(),
            },
            Arc::clone(&metrics),
        ));

        let generator = tokio::spawn(
            LoadGenerator::new(
                config.samples_per_tick(),
                config.generation_interval(),
                config.max_ticks,
                Arc::clone(&metrics),
            )
            .run(sample_tx, shutdown.clone()),
        );

        let queries = (config.target_qps > 0).then(|| {
            let (query_tx, query_rx) = mpsc::channel(config.query_queue_capacity());
            let engine = Arc::new(QueryEngine::new(
                table,
                config.layout,
                Arc::clone(&metrics),
            ));
            QueryTasks {
                workers: spawn_query_workers(
                    config.num_query_workers,
                    Arc::new(Mutex::new(query_rx)),
                    engine,
                ),
                generator: tokio::spawn(
                    QueryGenerator::new(config.target_qps, config.query_window_secs)
                        .run(query_tx, shutdown.clone()),
                ),
            }
        });

        let reporter = spawn_reporter(
            config.report_interval(),
            config.target_dps,
            config.target_qps > 0,
            Arc::clone(&metrics),
            Arc::clone(&rate),
        );

        info!(
            table = %config.table,
            layout = %config.layout,
            target_dps = config.target_dps,
            samples_per_tick = config.samples_per_tick(),
            writers = config.num_writers,
            batch_size = config.batch_size,
            target_qps = config.target_qps,
            "Pipeline started"
        );

        Ok(Self {
            config,
            metrics,
            rate,
            shutdown,
            generator,
            assembler,
            writers,
            queries,
            reporter,
            started: Instant::now(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn rate(&self) -> Arc<RateCounter> {
        Arc::clone(&self.rate)
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run until shutdown is requested or a generator stops on its own
    /// (`max_ticks` reached or overflow), then drain.
    pub async fn run(mut self) -> Result<PipelineReport> {
        let mut shutdown = self.shutdown.clone();
        let query_generator = self.queries.as_mut().map(|tasks| &mut tasks.generator);
        let stopped = tokio::select! {
            signal = shutdown.wait() => {
                info!(%signal, "Shutdown requested");
                Stopped::Requested
            }
            joined = &mut self.generator => Stopped::Generator(joined),
            joined = async {
                match query_generator {
                    Some(handle) => handle.await,
                    None => std::future::pending().await,
                }
            } => Stopped::QueryGenerator(joined),
        };
        self.finish(stopped).await
    }

    /// Stop the generators and wait for everything already enqueued to be written.
    pub async fn shutdown(self) -> Result<PipelineReport> {
        self.shutdown.shutdown();
        self.finish(Stopped::Requested).await
    }

    async fn finish(self, stopped: Stopped) -> Result<PipelineReport> {
        // Stops whichever generator is still running
        self.shutdown.shutdown();

        let (generator_result, query_generator_result) = match stopped {
            Stopped::Requested => (None, None),
            Stopped::Generator(joined) => (Some(joined), None),
            Stopped::QueryGenerator(joined) => (None, Some(joined)),
        };
        let generator_result = match generator_result {
            Some(joined) => joined,
            None => self.generator.await,
        };
        let mut fatal: Option<ClientError> = None;
        let generated = match generator_result? {
            Ok(n) => n,
            Err(e) => {
                fatal = Some(e);
                self.metrics.samples_generated.get()
            }
        };

        let mut queries = QueryStats::default();
        if let Some(tasks) = self.queries {
            let joined = match query_generator_result {
                Some(joined) => joined,
                None => tasks.generator.await,
            };
            if let Err(e) = joined? {
                fatal.get_or_insert(e);
            }
            for worker in tasks.workers {
                queries.merge(worker.await?);
            }
        }

        let assembled = match self.assembler.await? {
            Ok(stats) => stats,
            Err(e) => {
                fatal.get_or_insert(e);
                AssemblerStats::default()
            }
        };

        let mut writes = WriterStats::default();
        for writer in self.writers {
            writes.merge(writer.await?);
        }

        self.reporter.abort();
        let rate_per_second = self.rate.rate_per_second();
        self.rate.stop();

        let report = PipelineReport {
            generated,
            assembled,
            writes,
            queries,
            metrics: self.metrics.snapshot(),
            rate_per_second,
            elapsed: self.started.elapsed(),
        };

        info!(
            generated = report.generated,
            batches = report.assembled.batches,
            committed = report.writes.committed_samples,
            failed = report.writes.failed_samples,
            queries = report.queries.queries,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Pipeline drained"
        );

        match fatal {
            Some(e) => {
                error!(error = %e, "Pipeline stopped on fatal error");
                Err(e)
            }
            None => Ok(report),
        }
    }
}

fn spawn_reporter(
    every: Duration,
    target_dps: u64,
    report_queries: bool,
    metrics: Arc<PipelineMetrics>,
    rate: Arc<RateCounter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let snap = metrics.snapshot();

            if snap.batches_written == 0 {
                info!("No writes yet");
            } else {
                info!(
                    target_dps,
                    dps_out = %format!("{:.2}", rate.rate_per_second()),
                    avg_write_ms = snap.avg_write_latency.as_millis() as u64,
                    queue_len = metrics.sample_queue_len.get(),
                    failed = snap.samples_failed,
                    "Write progress"
                );
            }

            if report_queries {
                info!(
                    queries = snap.queries_total,
                    avg_query_ms = snap.avg_query_latency.as_millis() as u64,
                    staleness_secs = snap.staleness_seconds,
                    "Query progress"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::store::{AdminStore, COLUMN_FAMILY};

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            table: "t".to_string(),
            target_dps: 1_000,
            generation_interval_ms: 10,
            batch_size: 4,
            batch_timeout_ms: 5,
            num_writers: 2,
            max_ticks: Some(3),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_until_max_ticks_writes_everything() {
        let store = Arc::new(MemoryStore::new());
        store.create_table("t").await.unwrap();
        store.create_column_family("t", COLUMN_FAMILY).await.unwrap();
        let metrics = Arc::new(PipelineMetrics::new().unwrap());

        let pipeline = Pipeline::start(small_config(), store.clone(), metrics).unwrap();
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.generated, 30);
        assert_eq!(report.assembled.samples, 30);
        assert_eq!(report.writes.committed_samples, 30);
        assert_eq!(report.metrics.samples_written, 30);
        // Same ten keys every tick; ticks may share a second
        assert!(store.row_count("t").await >= 10);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let config = PipelineConfig {
            num_writers: 0,
            ..Default::default()
        };
        assert!(matches!(
            Pipeline::start(config, store, metrics),
            Err(ClientError::ConfigError(_))
        ));
    }
}
