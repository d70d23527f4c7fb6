//! Host metrics collection
//!
//! This module wraps OS counters into typed [`Sample`]s. Collection never
//! fails as a whole: a field that cannot be read is reported as unavailable
//! and the matching [`CollectionError`] is returned alongside the sample.

mod host;
mod network;
mod replay;

#[cfg(test)]
mod tests;

pub use host::{host_name, HostCollector, HostCollectorConfig};
pub use network::NetworkBaseline;
pub use replay::ReplayCollector;

use crate::error::CollectionError;
use crate::models::Sample;

pub use async_trait::async_trait;

/// Result of one collection pass
#[derive(Debug, Clone)]
pub struct Collected {
    pub sample: Sample,
    /// Fields that were unavailable, one entry per field
    pub errors: Vec<CollectionError>,
}

impl Collected {
    pub fn complete(sample: Sample) -> Self {
        Self {
            sample,
            errors: Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Trait for metrics collection implementations
#[async_trait]
pub trait MetricsCollector: Send {
    /// Take one sample of the host
    async fn collect(&mut self) -> Collected;
}
