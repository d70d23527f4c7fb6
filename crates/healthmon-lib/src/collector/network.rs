//! Network throughput from cumulative interface counters

use std::time::Instant;

/// Previous cumulative counters, used to turn totals into per-second rates.
///
/// This is the only state the collector carries between samples.
#[derive(Debug, Default)]
pub struct NetworkBaseline {
    previous: Option<Reading>,
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    at: Instant,
    sent: u64,
    recv: u64,
}

impl NetworkBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current totals and return `(sent_per_sec, recv_per_sec)`.
    ///
    /// Returns `None` on the first reading, when no time has elapsed, or when
    /// a counter went backwards (interface reset). In each case the current
    /// reading becomes the new baseline.
    pub fn advance(&mut self, at: Instant, sent: u64, recv: u64) -> Option<(f64, f64)> {
        let current = Reading { at, sent, recv };
        let previous = self.previous.replace(current)?;

        if sent < previous.sent || recv < previous.recv {
            return None;
        }

        let elapsed = at.checked_duration_since(previous.at)?.as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }

        Some((
            (sent - previous.sent) as f64 / elapsed,
            (recv - previous.recv) as f64 / elapsed,
        ))
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Forget the baseline so the next reading starts fresh
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
