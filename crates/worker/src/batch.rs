//! Keyed record batch accumulator.

use limiter_core::limits::{MAX_BATCH_AGE_MS, MAX_BATCH_RECORDS};
use limiter_core::{MetricRecord, PartitionIdxOffset, UseCaseKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// A batch of records consumed under one metric path key.
#[derive(Debug)]
pub struct MessageBatch {
    pub metric_path_key: UseCaseKey,
    pub messages: BTreeMap<PartitionIdxOffset, MetricRecord>,
    pub created_at: Instant,
}

impl MessageBatch {
    pub fn new(metric_path_key: UseCaseKey) -> Self {
        Self {
            metric_path_key,
            messages: BTreeMap::new(),
            created_at: Instant::now(),
        }
    }

    /// Adds a record; a record already stored under `key` is replaced.
    pub fn push(&mut self, key: PartitionIdxOffset, record: MetricRecord) {
        self.messages.insert(key, record);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Take the records into a new batch and reset this one.
    pub fn take(&mut self) -> MessageBatch {
        self.created_at = Instant::now();
        MessageBatch {
            metric_path_key: self.metric_path_key,
            messages: std::mem::take(&mut self.messages),
            created_at: Instant::now(),
        }
    }
}

/// Batch accumulator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum batch size before flush
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Maximum batch age in milliseconds before flush
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
}

fn default_max_size() -> usize {
    MAX_BATCH_RECORDS
}

fn default_max_age_ms() -> u64 {
    MAX_BATCH_AGE_MS
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            max_age_ms: default_max_age_ms(),
        }
    }
}

impl BatchConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

/// Accumulates records into batches per metric path key.
pub struct BatchAccumulator {
    config: BatchConfig,
    batches: Mutex<HashMap<UseCaseKey, MessageBatch>>,
}

impl BatchAccumulator {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Add a record to the batch of its metric path key.
    /// Returns the batch if it should be flushed.
    pub fn add(
        &self,
        metric_path_key: UseCaseKey,
        key: PartitionIdxOffset,
        record: MetricRecord,
    ) -> Option<MessageBatch> {
        let mut batches = self.batches.lock();

        let batch = batches
            .entry(metric_path_key)
            .or_insert_with(|| MessageBatch::new(metric_path_key));

        if batch.is_empty() {
            batch.created_at = Instant::now();
        }
        batch.push(key, record);

        if batch.len() >= self.config.max_size.max(1) {
            return Some(batch.take());
        }

        None
    }

    /// Flush all batches that have exceeded max age.
    pub fn flush_aged(&self) -> Vec<MessageBatch> {
        let max_age = self.config.max_age();
        self.batches
            .lock()
            .values_mut()
            .filter(|batch| !batch.is_empty() && batch.age() >= max_age)
            .map(MessageBatch::take)
            .collect()
    }

    /// Flush all batches regardless of size or age.
    pub fn flush_all(&self) -> Vec<MessageBatch> {
        self.batches
            .lock()
            .values_mut()
            .filter(|batch| !batch.is_empty())
            .map(MessageBatch::take)
            .collect()
    }
}
