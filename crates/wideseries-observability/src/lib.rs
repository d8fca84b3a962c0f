//! Wideseries Observability
//!
//! Metrics for the ingestion and query pipelines.
//!
//! # Features
//!
//! - Per-pipeline Prometheus registry ([`PipelineMetrics`])
//! - `/metrics` text exposition endpoint ([`exporter::create_metrics_router`])
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use wideseries_observability::{exporter, PipelineMetrics};
//!
//! let metrics = Arc::new(PipelineMetrics::new().unwrap());
//! metrics.samples_written.inc_by(100);
//!
//! let router = exporter::create_metrics_router(metrics.registry().clone());
//! ```

pub mod exporter;
pub mod metrics;

pub use metrics::{MetricsSnapshot, PipelineMetrics};
