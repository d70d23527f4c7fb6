//! Error taxonomy for the monitoring pipeline
//!
//! Every runtime error is recovered at the component boundary that produced
//! it. Only [`ConfigurationError`] is allowed to stop the agent, and only at
//! startup.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

use crate::models::MetricKind;

/// A single sample field could not be read from the host.
#[derive(Debug, Clone, Error)]
#[error("{field} unavailable: {reason}")]
pub struct CollectionError {
    pub field: &'static str,
    pub reason: String,
}

impl CollectionError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Writing to the metric log (or the buffer spill file) failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("malformed data in {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// A notification sink failed to deliver an alert.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("sink {sink} I/O error: {source}")]
    Io {
        sink: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Invalid or incomplete configuration detected at startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{kind} threshold {value} is outside (0, 100]")]
    ThresholdOutOfRange { kind: MetricKind, value: f64 },

    #[error("sampling interval must be at least one second")]
    ZeroInterval,

    #[error("buffer capacity must be at least one entry")]
    ZeroBufferCapacity,

    #[error("{feature} requires {setting}")]
    MissingSetting {
        feature: &'static str,
        setting: String,
    },

    #[error("{feature}: {reason}")]
    Invalid {
        feature: &'static str,
        reason: String,
    },
}

/// Buffered rows were evicted before they could be persisted.
///
/// This is a warning, not an error: sampling continues.
#[derive(Debug, Clone, PartialEq)]
pub struct DataLossWarning {
    /// Number of rows dropped in this eviction
    pub dropped: usize,
    /// Timestamp of the oldest dropped sample
    pub oldest_dropped: DateTime<Utc>,
    /// Timestamp of the newest dropped sample
    pub newest_dropped: DateTime<Utc>,
}

impl std::fmt::Display for DataLossWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dropped {} buffered sample(s) taken between {} and {}",
            self.dropped,
            self.oldest_dropped.to_rfc3339(),
            self.newest_dropped.to_rfc3339()
        )
    }
}
