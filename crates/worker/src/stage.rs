//! The limiter stage: check → drop → forward → commit.

use async_trait::async_trait;
use cardinality::TimeseriesCardinalityLimiter;
use limiter_core::{Result, UseCaseKey};
use serde::Serialize;
use std::sync::Arc;
use telemetry::metrics;
use tracing::{debug, error};

use crate::batch::MessageBatch;

/// Downstream consumer of admitted records.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Delivers the admitted records of `batch`.
    async fn forward(&self, batch: &MessageBatch) -> Result<()>;
}

/// Outcome of pushing one batch through the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessedBatch {
    pub metric_path_key: UseCaseKey,
    pub received: usize,
    pub dropped: usize,
    pub forwarded: usize,
}

/// Applies cardinality limits to batches before they are forwarded.
pub struct CardinalityStage {
    limiter: Arc<TimeseriesCardinalityLimiter>,
    sink: Arc<dyn BatchSink>,
}

impl CardinalityStage {
    pub fn new(limiter: Arc<TimeseriesCardinalityLimiter>, sink: Arc<dyn BatchSink>) -> Self {
        Self { limiter, sink }
    }

    pub fn limiter(&self) -> &TimeseriesCardinalityLimiter {
        &self.limiter
    }

    /// Processes a single batch.
    ///
    /// Usage is committed only once the sink accepted the survivors; if
    /// forwarding fails nothing is committed and the sink error is returned.
    pub async fn process(&self, mut batch: MessageBatch) -> Result<ProcessedBatch> {
        let received = batch.len();

        // 1. Check
        let state = self
            .limiter
            .check_cardinality_limits(batch.metric_path_key, batch.messages.iter())
            .await;

        // 2. Drop
        for key in &state.keys_to_remove {
            batch.messages.remove(key);
        }
        let forwarded = batch.len();

        // 3. Forward
        if !batch.is_empty() {
            if let Err(e) = self.sink.forward(&batch).await {
                metrics().sink_errors.inc();
                error!(
                    metric_path_key = %batch.metric_path_key,
                    count = forwarded,
                    error = %e,
                    "Failed to forward batch, usage not committed"
                );
                return Err(e);
            }
            metrics().batches_forwarded.inc();
            metrics().records_forwarded.inc_by(forwarded as u64);
        }

        // 4. Commit
        self.limiter.accept_keys(state).await;

        let processed = ProcessedBatch {
            metric_path_key: batch.metric_path_key,
            received,
            dropped: received - forwarded,
            forwarded,
        };
        debug!(
            metric_path_key = %processed.metric_path_key,
            received,
            dropped = processed.dropped,
            forwarded,
            "Processed batch"
        );
        Ok(processed)
    }
}
