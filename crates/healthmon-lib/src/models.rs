//! Core data models for the monitoring pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric kinds subject to threshold policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [MetricKind::Cpu, MetricKind::Memory, MetricKind::Disk];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Disk => "disk",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One running process, as ranked by the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// One observation of host resources at a point in time.
///
/// `None` marks a field the collector could not read this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub memory_used_bytes: Option<u64>,
    pub memory_total_bytes: Option<u64>,
    pub disk_percent: Option<f64>,
    pub disk_used_bytes: Option<u64>,
    pub disk_total_bytes: Option<u64>,
    pub network_bytes_sent_per_sec: Option<f64>,
    pub network_bytes_recv_per_sec: Option<f64>,
    pub uptime_seconds: Option<u64>,
    pub top_processes: Option<Vec<ProcessSample>>,
}

impl Sample {
    /// A sample with every field unavailable
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu_percent: None,
            memory_percent: None,
            memory_used_bytes: None,
            memory_total_bytes: None,
            disk_percent: None,
            disk_used_bytes: None,
            disk_total_bytes: None,
            network_bytes_sent_per_sec: None,
            network_bytes_recv_per_sec: None,
            uptime_seconds: None,
            top_processes: None,
        }
    }

    /// Utilization percentage for a thresholded metric
    pub fn metric(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Cpu => self.cpu_percent,
            MetricKind::Memory => self.memory_percent,
            MetricKind::Disk => self.disk_percent,
        }
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A threshold breach observed in one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub metric_kind: MetricKind,
    pub observed_value: f64,
    pub threshold_value: f64,
    pub severity: Severity,
    pub triggered_at: DateTime<Utc>,
}

impl AlertCondition {
    /// One-line human description, shared by the console and alert-log sinks
    pub fn summary(&self) -> String {
        format!(
            "{} at {:.1}% exceeds {:.1}% [{}]",
            self.metric_kind, self.observed_value, self.threshold_value, self.severity
        )
    }
}

/// Per-metric excursion tracking used for suppression
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub is_active: bool,
    pub last_notified_at: Option<DateTime<Utc>>,
}
