//! Observability infrastructure for the agent
//!
//! Provides:
//! - Prometheus metrics (cycle latency, buffered rows, alert counts)
//!   exported to a text file in exposition format
//! - Event-tagged structured logging with tracing

use crate::error::{DataLossWarning, PersistenceError};
use crate::models::{AlertCondition, MetricKind};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{error, info, warn};

/// Histogram buckets for cycle latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Agent metrics for Prometheus exposition
///
/// Each handle owns its registry; clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    registry: Registry,
    cycles: IntCounter,
    cycles_failed: IntCounter,
    cycle_latency_seconds: Histogram,
    partial_collections: IntCounter,
    buffered_rows: IntGauge,
    data_loss_rows: IntCounter,
    alerts_notified: IntCounterVec,
    alerts_suppressed: IntCounterVec,
    sink_failures: IntCounterVec,
}

impl AgentMetrics {
    /// Create and register every metric in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("healthmon".to_string()), None)?;

        let cycles = IntCounter::new("cycles_total", "Monitoring cycles run")?;
        let cycles_failed = IntCounter::new(
            "cycles_failed_total",
            "Monitoring cycles aborted by an unexpected fault",
        )?;
        let cycle_latency_seconds = Histogram::with_opts(
            HistogramOpts::new("cycle_latency_seconds", "Time spent in one cycle")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let partial_collections = IntCounter::new(
            "partial_collections_total",
            "Samples with at least one unavailable field",
        )?;
        let buffered_rows = IntGauge::new(
            "buffered_rows",
            "Samples waiting in the retry buffer",
        )?;
        let data_loss_rows = IntCounter::new(
            "data_loss_rows_total",
            "Buffered samples dropped by capacity or age",
        )?;
        let alerts_notified = IntCounterVec::new(
            Opts::new("alerts_notified_total", "Alerts sent to the sinks"),
            &["metric"],
        )?;
        let alerts_suppressed = IntCounterVec::new(
            Opts::new(
                "alerts_suppressed_total",
                "Breaches withheld during an active excursion",
            ),
            &["metric"],
        )?;
        let sink_failures = IntCounterVec::new(
            Opts::new("sink_failures_total", "Failed alert deliveries"),
            &["sink"],
        )?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(cycles_failed.clone()))?;
        registry.register(Box::new(cycle_latency_seconds.clone()))?;
        registry.register(Box::new(partial_collections.clone()))?;
        registry.register(Box::new(buffered_rows.clone()))?;
        registry.register(Box::new(data_loss_rows.clone()))?;
        registry.register(Box::new(alerts_notified.clone()))?;
        registry.register(Box::new(alerts_suppressed.clone()))?;
        registry.register(Box::new(sink_failures.clone()))?;

        Ok(Self {
            registry,
            cycles,
            cycles_failed,
            cycle_latency_seconds,
            partial_collections,
            buffered_rows,
            data_loss_rows,
            alerts_notified,
            alerts_suppressed,
            sink_failures,
        })
    }

    /// Record a completed cycle and its latency
    pub fn observe_cycle(&self, duration_secs: f64) {
        self.cycles.inc();
        self.cycle_latency_seconds.observe(duration_secs);
    }

    pub fn inc_cycles_failed(&self) {
        self.cycles_failed.inc();
    }

    pub fn inc_partial_collections(&self) {
        self.partial_collections.inc();
    }

    pub fn set_buffered_rows(&self, rows: usize) {
        self.buffered_rows.set(rows as i64);
    }

    pub fn add_data_loss(&self, dropped: usize) {
        self.data_loss_rows.inc_by(dropped as u64);
    }

    pub fn inc_alerts_notified(&self, kind: MetricKind) {
        self.alerts_notified.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn inc_alerts_suppressed(&self, kind: MetricKind) {
        self.alerts_suppressed.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn inc_sink_failures(&self, sink: &str) {
        self.sink_failures.with_label_values(&[sink]).inc();
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.get()
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.get()
    }

    pub fn data_loss_rows(&self) -> u64 {
        self.data_loss_rows.get()
    }

    pub fn buffered_rows(&self) -> i64 {
        self.buffered_rows.get()
    }

    pub fn alerts_notified(&self, kind: MetricKind) -> u64 {
        self.alerts_notified.with_label_values(&[kind.as_str()]).get()
    }

    pub fn alerts_suppressed(&self, kind: MetricKind) -> u64 {
        self.alerts_suppressed.with_label_values(&[kind.as_str()]).get()
    }

    /// Render every metric in text exposition format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Write the exposition text to `path` atomically
    pub fn write_textfile(&self, path: &Path) -> Result<(), PersistenceError> {
        let text = self.encode_text().map_err(|e| PersistenceError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let temp_path = path.with_extension("prom.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| PersistenceError::io(&temp_path, e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| PersistenceError::io(path, e))
    }
}

/// Structured logger for agent events
///
/// Every record carries an `event` tag and the host name so log pipelines
/// can filter on them.
#[derive(Clone)]
pub struct StructuredLogger {
    host_name: String,
}

impl StructuredLogger {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, mode: &str) {
        info!(
            event = "agent_started",
            host = %self.host_name,
            agent_version = %version,
            mode = %mode,
            "Health monitor started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            host = %self.host_name,
            reason = %reason,
            "Health monitor shutting down"
        );
    }

    pub fn log_alert_notified(&self, condition: &AlertCondition) {
        warn!(
            event = "alert_notified",
            host = %self.host_name,
            metric = %condition.metric_kind,
            observed = condition.observed_value,
            threshold = condition.threshold_value,
            severity = %condition.severity,
            "Threshold breached"
        );
    }

    pub fn log_alert_suppressed(&self, kind: MetricKind) {
        info!(
            event = "alert_suppressed",
            host = %self.host_name,
            metric = %kind,
            "Breach continues, notification suppressed"
        );
    }

    pub fn log_alert_recovered(&self, kind: MetricKind) {
        info!(
            event = "alert_recovered",
            host = %self.host_name,
            metric = %kind,
            "Metric back within threshold"
        );
    }

    pub fn log_metric_buffered(&self, pending: usize, cause: &str) {
        warn!(
            event = "metric_buffered",
            host = %self.host_name,
            pending = pending,
            cause = %cause,
            "Metric log unavailable, sample buffered"
        );
    }

    pub fn log_data_loss(&self, warning: &DataLossWarning) {
        error!(
            event = "data_loss",
            host = %self.host_name,
            dropped = warning.dropped,
            oldest_dropped = %warning.oldest_dropped.to_rfc3339(),
            newest_dropped = %warning.newest_dropped.to_rfc3339(),
            "Buffered samples dropped"
        );
    }

    pub fn log_cycle_failed(&self, reason: &str) {
        error!(
            event = "cycle_failed",
            host = %self.host_name,
            reason = %reason,
            "Monitoring cycle failed, continuing with next cycle"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_agent_metrics_counts() {
        let metrics = AgentMetrics::new().unwrap();

        metrics.observe_cycle(0.2);
        metrics.observe_cycle(0.4);
        metrics.inc_cycles_failed();
        metrics.set_buffered_rows(3);
        metrics.add_data_loss(2);
        metrics.inc_alerts_notified(MetricKind::Cpu);
        metrics.inc_alerts_suppressed(MetricKind::Cpu);
        metrics.inc_alerts_suppressed(MetricKind::Cpu);

        assert_eq!(metrics.cycles(), 2);
        assert_eq!(metrics.cycles_failed(), 1);
        assert_eq!(metrics.buffered_rows(), 3);
        assert_eq!(metrics.data_loss_rows(), 2);
        assert_eq!(metrics.alerts_notified(MetricKind::Cpu), 1);
        assert_eq!(metrics.alerts_suppressed(MetricKind::Cpu), 2);
        assert_eq!(metrics.alerts_notified(MetricKind::Disk), 0);
    }

    #[test]
    fn test_handles_are_independent() {
        let a = AgentMetrics::new().unwrap();
        let b = AgentMetrics::new().unwrap();
        a.observe_cycle(0.1);

        assert_eq!(a.cycles(), 1);
        assert_eq!(b.cycles(), 0);
    }

    #[test]
    fn test_write_textfile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("healthmon.prom");
        let metrics = AgentMetrics::new().unwrap();
        metrics.observe_cycle(0.3);
        metrics.inc_sink_failures("email");

        metrics.write_textfile(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("healthmon_cycles_total 1"));
        assert!(text.contains("healthmon_sink_failures_total{sink=\"email\"} 1"));
        assert!(!dir.path().join("healthmon.prom.tmp").exists());
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("web-01");
        assert_eq!(logger.host_name(), "web-01");
    }
}
