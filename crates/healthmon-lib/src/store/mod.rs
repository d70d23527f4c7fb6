//! Durable metric store
//!
//! This module provides:
//! - An append-only metric log (CSV by default)
//! - A bounded retry buffer absorbing transient write failures
//! - Ordered flush of buffered samples ahead of each new sample
//!
//! Persistence failures never propagate: `append` always returns a report
//! and the pipeline proceeds.

mod buffer;
mod csv_log;


pub use buffer::{BufferConfig, BufferStats, RetryBuffer};
pub use csv_log::{read_samples, CsvMetricLog};

use crate::error::{DataLossWarning, PersistenceError};
use crate::models::Sample;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Destination for persisted samples
pub trait MetricLog: Send {
    /// Append one sample as one row
    fn append(&mut self, sample: &Sample) -> Result<(), PersistenceError>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// What happened to the sample passed to [`MetricStore::append`]
#[derive(Debug)]
pub enum WriteStatus {
    /// The sample reached the log
    Written,
    /// The sample was queued for retry
    Buffered {
        pending: usize,
        cause: PersistenceError,
    },
}

/// Result of one append call
#[derive(Debug)]
pub struct AppendReport {
    /// Buffered samples written ahead of this one
    pub flushed: usize,
    pub status: WriteStatus,
    /// Set when buffered samples were evicted during this call
    pub data_loss: Option<DataLossWarning>,
}

impl AppendReport {
    pub fn is_written(&self) -> bool {
        matches!(self.status, WriteStatus::Written)
    }

    pub fn pending(&self) -> usize {
        match &self.status {
            WriteStatus::Written => 0,
            WriteStatus::Buffered { pending, .. } => *pending,
        }
    }
}

/// Metric log plus its retry buffer
pub struct MetricStore {
    log: Box<dyn MetricLog>,
    buffer: RetryBuffer,
}

impl MetricStore {
    pub fn new(log: Box<dyn MetricLog>, config: BufferConfig) -> Self {
        let buffer = if config.spill_path.is_some() {
            RetryBuffer::with_spill(config)
        } else {
            RetryBuffer::new(config)
        };
        Self { log, buffer }
    }

    /// Flush the retry buffer, then persist `sample`
    pub fn append(&mut self, sample: Sample) -> AppendReport {
        self.append_at(sample, Utc::now())
    }

    /// [`append`](Self::append) with an explicit clock, for buffer ageing
    pub fn append_at(&mut self, sample: Sample, now: DateTime<Utc>) -> AppendReport {
        let mut data_loss = merge_loss(self.buffer.take_pending_loss(), self.buffer.expire(now));
        let (flushed, flush_error) = self.flush();

        let status = match flush_error {
            // Older rows are still pending, so this one queues behind them
            Some(cause) => {
                data_loss = merge_loss(data_loss, self.buffer.push(sample, now));
                WriteStatus::Buffered {
                    pending: self.buffer.len(),
                    cause,
                }
            }
            None => match self.log.append(&sample) {
                Ok(()) => WriteStatus::Written,
                Err(cause) => {
                    data_loss = merge_loss(data_loss, self.buffer.push(sample, now));
                    WriteStatus::Buffered {
                        pending: self.buffer.len(),
                        cause,
                    }
                }
            },
        };

        if let Err(e) = self.buffer.persist() {
            warn!(error = %e, "Failed to spill retry buffer");
        }

        if flushed > 0 {
            info!(
                flushed = flushed,
                remaining = self.buffer.len(),
                log = %self.log.describe(),
                "Flushed buffered samples"
            );
        }
        if let WriteStatus::Buffered { pending, cause } = &status {
            debug!(
                pending = *pending,
                error = %cause,
                log = %self.log.describe(),
                "Metric write failed, sample buffered for retry"
            );
        }
        if let Some(loss) = &data_loss {
            debug!(
                dropped = loss.dropped,
                oldest = %loss.oldest_dropped,
                newest = %loss.newest_dropped,
                "Retry buffer overflow, samples lost"
            );
        }

        AppendReport {
            flushed,
            status,
            data_loss,
        }
    }

    /// Write buffered samples oldest first, stopping at the first failure
    fn flush(&mut self) -> (usize, Option<PersistenceError>) {
        let mut flushed = 0;

        while let Some(entry) = self.buffer.front() {
            match self.log.append(&entry.sample) {
                Ok(()) => {
                    self.buffer.pop_front();
                    flushed += 1;
                }
                Err(e) => {
                    self.buffer.record_failed_attempt();
                    return (flushed, Some(e));
                }
            }
        }

        (flushed, None)
    }

    /// Number of samples waiting for retry
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    /// Samples waiting for retry, oldest first
    pub fn buffered_samples(&self) -> impl Iterator<Item = &Sample> {
        self.buffer.samples()
    }
}

fn merge_loss(
    a: Option<DataLossWarning>,
    b: Option<DataLossWarning>,
) -> Option<DataLossWarning> {
    match (a, b) {
        (Some(a), Some(b)) => Some(DataLossWarning {
            dropped: a.dropped + b.dropped,
            oldest_dropped: a.oldest_dropped.min(b.oldest_dropped),
            newest_dropped: a.newest_dropped.max(b.newest_dropped),
        }),
        (a, b) => a.or(b),
    }
}
