//! Collector that replays prepared samples
//!
//! Used by pipeline tests and dry runs where the host must not be sampled.

use super::{async_trait, Collected, MetricsCollector};
use crate::models::Sample;
use chrono::Utc;
use std::collections::VecDeque;

/// Yields queued samples in order, then empty (all-unavailable) samples
#[derive(Debug, Default)]
pub struct ReplayCollector {
    queue: VecDeque<Sample>,
    calls: usize,
}

impl ReplayCollector {
    pub fn new(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            queue: samples.into_iter().collect(),
            calls: 0,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        self.queue.push_back(sample);
    }

    /// Number of samples still queued
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Number of times `collect` has been called
    pub fn calls(&self) -> usize {
        self.calls
    }
}

#[async_trait]
impl MetricsCollector for ReplayCollector {
    async fn collect(&mut self) -> Collected {
        self.calls += 1;
        let sample = self
            .queue
            .pop_front()
            .unwrap_or_else(|| Sample::empty(Utc::now()));
        Collected::complete(sample)
    }
}
