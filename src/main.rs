//! Timeseries Cardinality Limiter
//!
//! Reads metric records as NDJSON and drops those that would push an
//! organization past its distinct-timeseries quota:
//! - Per use-case quota rules with a sliding window
//! - Deterministic per-organization rollout
//! - Fail-open when the quota backend is unavailable

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use cardinality::{LimiterConfig, TimeseriesCardinalityLimiter};
use limiter_core::Error;
use sliding_window::{MemorySlidingWindow, SlidingWindowConfig};
use telemetry::{health, init_tracing_from_env, metrics};
use worker::{
    BatchAccumulator, BatchConfig, BatchSink, CardinalityStage, ConsumerWorker, InboundMessage,
    MessageBatch,
};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Config {
    #[serde(default)]
    limiter: LimiterConfig,

    #[serde(default)]
    batch: BatchConfig,

    #[serde(default)]
    sliding_window: SlidingWindowConfig,

    /// NDJSON input file; stdin when unset
    #[serde(default)]
    input_path: Option<String>,
}

/// Writes admitted records to stdout, one JSON object per line.
struct StdoutSink;

#[async_trait]
impl BatchSink for StdoutSink {
    async fn forward(&self, batch: &MessageBatch) -> limiter_core::Result<()> {
        let mut out = Vec::new();
        for (key, record) in &batch.messages {
            let message = InboundMessage::new(*key, record.clone())
                .with_metric_path_key(batch.metric_path_key);
            serde_json::to_writer(&mut out, &message)?;
            out.push(b'\n');
        }

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(&out)
            .await
            .map_err(|e| Error::sink(format!("stdout: {e}")))?;
        stdout
            .flush()
            .await
            .map_err(|e| Error::sink(format!("stdout: {e}")))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing_from_env();

    info!(
        "Starting Cardinality Limiter v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = load_config()?;
    config
        .limiter
        .check()
        .context("Invalid limiter configuration")?;

    // Initialize the quota backend and its cleanup task
    let backend = Arc::new(MemorySlidingWindow::new());
    let _cleanup_handle = config
        .sliding_window
        .cleanup_interval()
        .map(|period| backend.clone().start_cleanup_task(period));

    let limiter = Arc::new(TimeseriesCardinalityLimiter::from_config(
        &config.limiter,
        backend,
    ));
    let stage = CardinalityStage::new(limiter, Arc::new(StdoutSink));
    let worker = ConsumerWorker::new(stage, BatchAccumulator::new(config.batch.clone()));

    let (tx, rx) = mpsc::channel(config.batch.max_size.max(1) * 2);
    let worker_handle = tokio::spawn(async move { worker.run(rx).await });

    // Read input until EOF or Ctrl+C
    let read_result = match config.input_path.as_deref() {
        Some(path) => {
            info!(path, "Reading records from file");
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {path}"))?;
            read_until_shutdown(file, tx).await
        }
        None => {
            info!("Reading records from stdin");
            read_until_shutdown(tokio::io::stdin(), tx).await
        }
    };

    // The sender is gone: the worker flushes pending batches and stops
    let stats = worker_handle.await.context("Consumer worker panicked")?;
    read_result?;

    let report = health().report();
    for component in report.components.iter().filter(|c| !c.healthy) {
        warn!(
            component = %component.name,
            message = component.message.as_deref().unwrap_or_default(),
            "Component unhealthy at shutdown"
        );
    }

    let snapshot = metrics().snapshot();
    info!(
        status = ?report.status,
        batches = stats.batches,
        received = stats.received,
        forwarded = stats.forwarded,
        dropped = stats.dropped,
        failed_batches = stats.failed_batches,
        unit_hashes_rejected = snapshot.unit_hashes_rejected,
        backend_check_failures = snapshot.backend_check_failures,
        backend_check_timeouts = snapshot.backend_check_timeouts,
        backend_commit_failures = snapshot.backend_commit_failures,
        check_latency_mean_ms = snapshot.backend_check_latency_mean_ms,
        "Shutdown complete"
    );
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("LIMITER")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Forwards parsed lines to the worker until EOF or Ctrl+C.
async fn read_until_shutdown<R>(input: R, tx: mpsc::Sender<InboundMessage>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        result = read_lines(input, tx) => result,
        _ = shutdown_signal() => {
            info!("Shutdown signal received, flushing pending batches");
            Ok(())
        }
    }
}

async fn read_lines<R>(input: R, tx: mpsc::Sender<InboundMessage>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut line_number = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let message = match InboundMessage::from_json_line(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping malformed record");
                continue;
            }
        };

        if tx.send(message).await.is_err() {
            warn!("Consumer worker stopped, no longer reading input");
            break;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}
