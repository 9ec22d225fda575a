//! Consumer loop feeding the cardinality stage.
//!
//! 1. Receive keyed records from the channel
//! 2. Accumulate them into batches per metric path key
//! 3. Push full or aged batches through the stage
//! 4. Flush whatever is pending once the channel closes

use limiter_core::{MetricRecord, PartitionIdxOffset, UseCaseKey};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::batch::{BatchAccumulator, MessageBatch};
use crate::stage::CardinalityStage;

fn default_metric_path_key() -> UseCaseKey {
    UseCaseKey::Performance
}

/// One record as read from the input stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(flatten)]
    pub key: PartitionIdxOffset,
    pub record: MetricRecord,
    #[serde(rename = "namespace", default = "default_metric_path_key")]
    pub metric_path_key: UseCaseKey,
}

impl InboundMessage {
    pub fn new(key: PartitionIdxOffset, record: MetricRecord) -> Self {
        Self {
            key,
            record,
            metric_path_key: default_metric_path_key(),
        }
    }

    pub fn with_metric_path_key(mut self, metric_path_key: UseCaseKey) -> Self {
        self.metric_path_key = metric_path_key;
        self
    }

    /// Parses one NDJSON line.
    pub fn from_json_line(line: &str) -> limiter_core::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Totals over the lifetime of a consumer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub batches: usize,
    pub received: usize,
    pub forwarded: usize,
    pub dropped: usize,
    pub failed_batches: usize,
}

/// Worker that drains a channel of records through the stage.
pub struct ConsumerWorker {
    stage: CardinalityStage,
    accumulator: BatchAccumulator,
}

impl ConsumerWorker {
    pub fn new(stage: CardinalityStage, accumulator: BatchAccumulator) -> Self {
        Self { stage, accumulator }
    }

    /// Main run loop - receive, batch, process.
    ///
    /// Returns once the sending side of `rx` is dropped and the pending
    /// batches are flushed. A batch the sink rejects is logged and skipped.
    pub async fn run(&self, mut rx: mpsc::Receiver<InboundMessage>) -> ConsumerStats {
        let max_age = self.accumulator.config().max_age();
        info!(
            namespace = %self.stage.limiter().namespace(),
            max_size = self.accumulator.config().max_size,
            max_age_ms = max_age.as_millis() as u64,
            "Consumer worker starting"
        );

        let mut stats = ConsumerStats::default();
        let mut ticker = interval(max_age.max(std::time::Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    if let Some(batch) = self.accumulator.add(
                        message.metric_path_key,
                        message.key,
                        message.record,
                    ) {
                        self.process(batch, &mut stats).await;
                    }
                }
                _ = ticker.tick() => {
                    for batch in self.accumulator.flush_aged() {
                        self.process(batch, &mut stats).await;
                    }
                }
            }
        }

        for batch in self.accumulator.flush_all() {
            self.process(batch, &mut stats).await;
        }

        info!(
            batches = stats.batches,
            received = stats.received,
            forwarded = stats.forwarded,
            dropped = stats.dropped,
            failed_batches = stats.failed_batches,
            "Consumer worker stopped"
        );
        stats
    }

    async fn process(&self, batch: MessageBatch, stats: &mut ConsumerStats) {
        let count = batch.len();
        stats.batches += 1;
        stats.received += count;

        match self.stage.process(batch).await {
            Ok(processed) => {
                stats.forwarded += processed.forwarded;
                stats.dropped += processed.dropped;
            }
            Err(e) => {
                stats.failed_batches += 1;
                error!(count, error = %e, "Batch processing error");
            }
        }
        debug!(batches = stats.batches, "Batch done");
    }
}
