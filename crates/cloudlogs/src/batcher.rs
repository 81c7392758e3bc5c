// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size and latency bounded batching of log records.
//!
//! A single loop owns the current batch and reacts to whichever comes first:
//! a record arriving on the handoff channel or the flush deadline elapsing.
//!
//! ```text
//!   record ──> would overflow? ──yes──> flush
//!                   │                     │
//!                   v                     v
//!                 append <────────────────┘
//!                   │
//!                   v
//!               now full? ──yes──> flush
//!
//!   deadline ──> flush (dispatch only if non-empty) ──> restart deadline
//! ```
//!
//! Dispatch is awaited inline, so nothing is drained from the channel while an
//! append is in flight and the source feels the backpressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::constants::{DEFAULT_BATCH_DURATION, DEFAULT_BATCH_SIZE};
use crate::dispatcher::Dispatch;
use crate::errors::DispatchError;
use crate::record::LogRecord;

/// Records awaiting a single append, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    records: Vec<LogRecord>,
    cumulative_size: usize,
}

impl Batch {
    pub fn push(&mut self, record: LogRecord) {
        self.cumulative_size += record.size();
        self.records.push(record);
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<LogRecord> {
        self.records
    }

    /// Sum of the message sizes of all records, in bytes.
    pub fn cumulative_size(&self) -> usize {
        self.cumulative_size
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Maximum cumulative message size of a batch, in bytes.
    pub capacity_bytes: usize,
    /// Maximum time a record may wait before a flush is forced.
    pub max_latency: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        BatcherConfig {
            capacity_bytes: DEFAULT_BATCH_SIZE,
            max_latency: DEFAULT_BATCH_DURATION,
        }
    }
}

/// Number of records currently buffered, readable while the loop runs.
#[derive(Debug, Clone, Default)]
pub struct BufferedLength(Arc<AtomicUsize>);

impl BufferedLength {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, len: usize) {
        self.0.store(len, Ordering::Release);
    }
}

pub struct Batcher<D> {
    dispatcher: Arc<D>,
    config: BatcherConfig,
    batch: Batch,
    deadline: Instant,
    buffered: BufferedLength,
}

impl<D: Dispatch> Batcher<D> {
    pub fn new(config: BatcherConfig, dispatcher: Arc<D>) -> Self {
        Batcher {
            dispatcher,
            config,
            batch: Batch::default(),
            deadline: Instant::now() + config.max_latency,
            buffered: BufferedLength::default(),
        }
    }

    /// Number of records currently buffered.
    pub fn length(&self) -> usize {
        self.batch.len()
    }

    pub fn buffered_length(&self) -> BufferedLength {
        self.buffered.clone()
    }

    /// Adds a record, flushing before it if it would overflow the batch and
    /// after it if the batch is then full.
    ///
    /// A record at least as large as the capacity therefore flushes whatever
    /// was buffered and is then dispatched alone.
    pub async fn accept(&mut self, record: LogRecord) -> Result<(), DispatchError> {
        if self.will_overflow(record.size()) {
            debug!(
                "Batch flushed to prevent size overflow - size: {}, capacity: {}",
                self.batch.cumulative_size(),
                self.config.capacity_bytes
            );
            self.flush().await?;
        }

        self.batch.push(record);
        self.buffered.set(self.batch.len());

        if self.is_full() {
            debug!(
                "Batch flushed due to batch size - size: {}, capacity: {}",
                self.batch.cumulative_size(),
                self.config.capacity_bytes
            );
            self.flush().await?;
        }

        Ok(())
    }

    /// Hands the current batch to the dispatcher and restarts the deadline.
    ///
    /// An empty batch is not dispatched, but the deadline is still restarted.
    pub async fn flush(&mut self) -> Result<(), DispatchError> {
        self.reset_deadline();
        if self.batch.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.batch);
        self.buffered.set(0);

        let outcome = self.dispatcher.dispatch(batch).await?;
        debug!("Batch dispatched: {:?}", outcome);
        Ok(())
    }

    /// Consumes records until the channel closes or a dispatch fails.
    ///
    /// Records still buffered when the channel closes are not flushed.
    pub async fn run(mut self, mut rx: Receiver<LogRecord>) -> Result<(), DispatchError> {
        debug!("Batcher ready");
        self.reset_deadline();

        loop {
            tokio::select! {
                biased;

                () = sleep_until(self.deadline) => {
                    debug!("Batch flushed due to timer - length: {}", self.batch.len());
                    self.flush().await?;
                }
                record = rx.recv() => match record {
                    Some(record) => self.accept(record).await?,
                    None => break,
                },
            }
        }

        if !self.batch.is_empty() {
            warn!(
                "Record source closed with {} records ({} bytes) not dispatched",
                self.batch.len(),
                self.batch.cumulative_size()
            );
        }
        debug!("Batcher stopped");
        Ok(())
    }

    fn will_overflow(&self, size: usize) -> bool {
        self.batch.cumulative_size() + size > self.config.capacity_bytes
    }

    fn is_full(&self) -> bool {
        self.batch.cumulative_size() >= self.config.capacity_bytes
    }

    fn reset_deadline(&mut self) {
        self.deadline = Instant::now() + self.config.max_latency;
    }
}
