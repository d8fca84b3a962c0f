//! Wideseries Stress Binary
//!
//! Drives the write pipeline (and optionally the query load) at a target rate
//! to find out whether the pipeline keeps up.
//!
//! # Environment Variables
//!
//! Every `PipelineConfig` field is read from `WIDESERIES_<FIELD>`, e.g.
//!
//! - `WIDESERIES_TABLE`: table name (default: sec)
//! - `WIDESERIES_LAYOUT`: `per_second` or `hourly` (default: per_second)
//! - `WIDESERIES_TARGET_DPS`: datapoints per second (default: 10000)
//! - `WIDESERIES_NUM_WRITERS`: concurrent bulk writers (default: 100)
//! - `WIDESERIES_TARGET_QPS`: range queries per second, 0 disables (default: 0)
//! - `WIDESERIES_MAX_TICKS`: stop after N generator ticks (default: run until Ctrl+C)
//!
//! Plus:
//!
//! - `WIDESERIES_METRICS_PORT`: serve Prometheus `/metrics` on this port (optional)
//! - `RUST_LOG`: log filter (default: info)
//!
//! # Example
//!
//! ```bash
//! WIDESERIES_TARGET_DPS=50000 WIDESERIES_TARGET_QPS=100 cargo run --release --bin wideseries-stress
//! ```
//!
//! Exits non-zero if the pipeline overflows.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wideseries_client::{
    ensure_table, shutdown_signal, MemoryStore, Pipeline, PipelineConfig, COLUMN_FAMILY,
};
use wideseries_observability::{exporter::create_metrics_router, PipelineMetrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    info!(?config, "Configuration loaded");

    let store = Arc::new(MemoryStore::new());
    ensure_table(store.as_ref(), &config.table, COLUMN_FAMILY).await?;

    let metrics = Arc::new(PipelineMetrics::new().context("failed to register metrics")?);

    if let Ok(port) = std::env::var("WIDESERIES_METRICS_PORT") {
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid WIDESERIES_METRICS_PORT '{}'", port))?;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot bind metrics listener on {}", addr))?;
        let router = create_metrics_router(metrics.registry().clone());

        info!(%addr, "Serving metrics");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    let pipeline = Pipeline::start(config, store, metrics)?;

    let shutdown = pipeline.shutdown_handle();
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        shutdown.trigger(signal);
    });

    match pipeline.run().await {
        Ok(report) => {
            info!(
                generated = report.generated,
                committed = report.writes.committed_samples,
                failed = report.writes.failed_samples,
                failed_batches = report.writes.failed_batches,
                queries = report.queries.queries,
                dps_out = %format!("{:.2}", report.rate_per_second),
                "Stress run finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Stress run aborted");
            Err(e.into())
        }
    }
}
