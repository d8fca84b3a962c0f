//! Wideseries Client - Ingestion and Query Pipelines
//!
//! This crate drives high-volume time-series traffic against a range-scannable
//! wide-column store. Samples flow from a producer through a fail-fast queue
//! into the batch assembler, then through a blocking queue into a pool of bulk
//! writers. A symmetric query path range-scans a key's recent rows and decodes
//! them back into points.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use wideseries_client::{ensure_table, MemoryStore, Pipeline, PipelineConfig, COLUMN_FAMILY};
//! use wideseries_observability::PipelineMetrics;
//!
//! let store = Arc::new(MemoryStore::new());
//! ensure_table(store.as_ref(), "sec", COLUMN_FAMILY).await?;
//!
//! let config = PipelineConfig::from_env()?;
//! let metrics = Arc::new(PipelineMetrics::new()?);
//! let pipeline = Pipeline::start(config, store, metrics)?;
//!
//! let report = pipeline.run().await?;
//! println!("wrote {} samples", report.writes.committed_samples);
//! ```
//!
//! ## Modules
//!
//! - [`store`]: store traits, mutations and the table handle
//! - [`memory_store`]: in-process store
//! - [`batch`]: size-or-time batch assembly
//! - [`writer`]: bulk writer pool and per-row failure reconciliation
//! - [`query`]: range queries and query workers
//! - [`rate`]: self-resetting throughput counter
//! - [`loadgen`]: synthetic sample and query producers
//! - [`pipeline`]: task wiring, shutdown and final report

pub mod admin;
pub mod batch;
pub mod config;
pub mod error;
pub mod loadgen;
pub mod memory_store;
pub mod pipeline;
pub mod query;
pub mod rate;
pub mod shutdown;
pub mod store;
pub mod writer;

pub use admin::ensure_table;
pub use batch::{drain, run_assembler, AssemblerConfig, AssemblerStats, Batch, Drained};
pub use config::{PipelineConfig, MAX_BATCH_SIZE};
pub use error::{ClientError, Result};
pub use loadgen::{key_name, try_enqueue, LoadGenerator, QueryGenerator};
pub use memory_store::MemoryStore;
pub use pipeline::{Pipeline, PipelineReport};
pub use query::{spawn_query_workers, QueryEngine, QueryRequest, QueryResult, QueryStats};
pub use rate::{RateCounter, RateSnapshot};
pub use shutdown::{shutdown_signal, ShutdownHandle, ShutdownSignal};
pub use store::{
    AdminStore, Cell, Mutation, Row, RowError, SetCell, Table, WideColumnStore, CELL_TIMESTAMP,
    COLUMN_FAMILY, COLUMN_QUALIFIER,
};
pub use writer::{prepare, spawn_writers, BatchWriter, PreparedBatch, WriteOutcome, WriterStats};
