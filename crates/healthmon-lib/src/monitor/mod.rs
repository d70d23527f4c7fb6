//! Monitoring cycle orchestration
//!
//! One cycle runs collect, evaluate, store and dispatch, then render.
//! Cycles run once on demand or on a fixed interval until shutdown; a
//! cycle that panics is logged and the next one proceeds.


use crate::alert::{AlertDispatcher, DispatchReport};
use crate::collector::MetricsCollector;
use crate::error::CollectionError;
use crate::health::{components, HealthRegistry};
use crate::models::{MetricKind, Sample};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::policy::{Evaluation, ThresholdPolicy};
use crate::render::SnapshotRenderer;
use crate::store::{AppendReport, MetricStore, WriteStatus};
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Everything one cycle produced
#[derive(Debug)]
pub struct CycleReport {
    pub sample: Sample,
    pub collection_errors: Vec<CollectionError>,
    pub evaluation: Evaluation,
    pub append: AppendReport,
    pub dispatch: DispatchReport,
    /// Set when the snapshot could not be written
    pub render_error: Option<String>,
    pub elapsed: Duration,
}

/// Owns every pipeline component and drives the cycle
pub struct Monitor {
    collector: Box<dyn MetricsCollector>,
    policy: ThresholdPolicy,
    store: MetricStore,
    dispatcher: AlertDispatcher,
    renderer: SnapshotRenderer,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    metrics_textfile: Option<PathBuf>,
}

impl Monitor {
    pub fn builder() -> MonitorBuilder {
        MonitorBuilder::new()
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    /// Run one cycle, catching a panic from any stage
    pub async fn run_cycle(&mut self) -> Option<CycleReport> {
        match AssertUnwindSafe(self.run_once()).catch_unwind().await {
            Ok(report) => Some(report),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                self.metrics.inc_cycles_failed();
                self.logger.log_cycle_failed(&reason);
                None
            }
        }
    }

    /// Run one cycle: collect, evaluate, store and dispatch, render
    pub async fn run_once(&mut self) -> CycleReport {
        let start = Instant::now();

        let collected = self.collector.collect().await;
        self.record_collection(&collected.sample, &collected.errors).await;

        let evaluation = self.policy.evaluate(&collected.sample);

        // Store and dispatcher never fail the cycle, so neither blocks the other
        let append = self.store.append(collected.sample.clone());
        self.record_append(&append).await;

        let dispatch = self.dispatcher.dispatch(&evaluation).await;
        self.record_dispatch(&dispatch).await;

        let render_error = self.render(&collected.sample).await;

        let elapsed = start.elapsed();
        self.metrics.observe_cycle(elapsed.as_secs_f64());
        self.write_metrics_textfile();

        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            breaches = evaluation.conditions.len(),
            notified = dispatch.notified.len(),
            pending = append.pending(),
            "Cycle complete"
        );

        CycleReport {
            sample: collected.sample,
            collection_errors: collected.errors,
            evaluation,
            append,
            dispatch,
            render_error,
            elapsed,
        }
    }

    /// Run cycles every `period` until `shutdown` fires.
    ///
    /// The first cycle starts immediately. A cycle that overruns the period
    /// delays the next tick instead of stacking cycles. Returns the number of
    /// cycles that completed.
    pub async fn run(&mut self, period: Duration, mut shutdown: broadcast::Receiver<()>) -> u64 {
        info!(interval_secs = period.as_secs(), "Starting monitoring loop");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut completed = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.run_cycle().await.is_some() {
                        completed += 1;
                    }
                }
                _ = shutdown.recv() => {
                    info!(cycles = completed, "Shutting down monitoring loop");
                    break;
                }
            }
        }

        completed
    }

    async fn record_collection(&self, sample: &Sample, errors: &[CollectionError]) {
        if errors.is_empty() {
            self.health.set_healthy(components::COLLECTOR).await;
            return;
        }

        self.metrics.inc_partial_collections();
        let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
        for error in errors {
            debug!(field = error.field, reason = %error.reason, "Field unavailable");
        }

        if MetricKind::ALL.iter().all(|k| sample.metric(*k).is_none()) {
            warn!(fields = ?fields, "No thresholded metric could be collected");
            self.health
                .set_unhealthy(components::COLLECTOR, "no metrics available")
                .await;
        } else {
            self.health
                .set_degraded(
                    components::COLLECTOR,
                    format!("unavailable: {}", fields.join(", ")),
                )
                .await;
        }
    }

    async fn record_append(&self, append: &AppendReport) {
        self.metrics.set_buffered_rows(append.pending());

        if let Some(loss) = &append.data_loss {
            self.metrics.add_data_loss(loss.dropped);
            self.logger.log_data_loss(loss);
        }

        match &append.status {
            WriteStatus::Written if append.data_loss.is_none() => {
                self.health.set_healthy(components::STORE).await;
            }
            WriteStatus::Written => {
                self.health
                    .set_degraded(components::STORE, "buffered samples dropped")
                    .await;
            }
            WriteStatus::Buffered { pending, cause } => {
                self.logger.log_metric_buffered(*pending, &cause.to_string());
                self.health
                    .set_degraded(
                        components::STORE,
                        format!("{} sample(s) buffered: {}", pending, cause),
                    )
                    .await;
            }
        }
    }

    async fn record_dispatch(&self, dispatch: &DispatchReport) {
        for condition in &dispatch.notified {
            self.metrics.inc_alerts_notified(condition.metric_kind);
            self.logger.log_alert_notified(condition);
        }
        for kind in &dispatch.suppressed {
            self.metrics.inc_alerts_suppressed(*kind);
            self.logger.log_alert_suppressed(*kind);
        }
        for kind in &dispatch.recovered {
            self.logger.log_alert_recovered(*kind);
        }
        for failure in &dispatch.sink_failures {
            self.metrics.inc_sink_failures(&failure.sink);
        }

        if dispatch.sink_failures.is_empty() {
            self.health.set_healthy(components::DISPATCHER).await;
        } else {
            let mut sinks: Vec<&str> = dispatch
                .sink_failures
                .iter()
                .map(|f| f.sink.as_str())
                .collect();
            sinks.dedup();
            self.health
                .set_degraded(
                    components::DISPATCHER,
                    format!("sink failed: {}", sinks.join(", ")),
                )
                .await;
        }
    }

    async fn render(&self, sample: &Sample) -> Option<String> {
        let health = self.health.health().await;
        let recent = self.dispatcher.recent_alerts();

        match self.renderer.render(sample, &recent, Some(&health)) {
            Ok(path) => {
                debug!(path = %path.display(), "Snapshot written");
                self.health.set_healthy(components::RENDERER).await;
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to write snapshot");
                self.health
                    .set_unhealthy(components::RENDERER, e.to_string())
                    .await;
                Some(e.to_string())
            }
        }
    }

    fn write_metrics_textfile(&self) {
        if let Some(path) = &self.metrics_textfile {
            if let Err(e) = self.metrics.write_textfile(path) {
                warn!(path = %path.display(), error = %e, "Failed to write metrics textfile");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for a [`Monitor`]
pub struct MonitorBuilder {
    collector: Option<Box<dyn MetricsCollector>>,
    policy: ThresholdPolicy,
    store: Option<MetricStore>,
    dispatcher: Option<AlertDispatcher>,
    renderer: Option<SnapshotRenderer>,
    health: Option<HealthRegistry>,
    metrics: Option<AgentMetrics>,
    host_name: String,
    metrics_textfile: Option<PathBuf>,
}

impl MonitorBuilder {
    /// Create a new builder with default thresholds
    pub fn new() -> Self {
        Self {
            collector: None,
            policy: ThresholdPolicy::default(),
            store: None,
            dispatcher: None,
            renderer: None,
            health: None,
            metrics: None,
            host_name: "localhost".to_string(),
            metrics_textfile: None,
        }
    }

    pub fn collector(mut self, collector: Box<dyn MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn policy(mut self, policy: ThresholdPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(mut self, store: MetricStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn dispatcher(mut self, dispatcher: AlertDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn renderer(mut self, renderer: SnapshotRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Share an existing health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Share an existing metrics handle
    pub fn metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    /// Write metrics in text exposition format here after every cycle
    pub fn metrics_textfile(mut self, path: Option<PathBuf>) -> Self {
        self.metrics_textfile = path;
        self
    }

    /// Build the monitor
    pub async fn build(self) -> Result<Monitor> {
        let collector = self
            .collector
            .ok_or_else(|| anyhow::anyhow!("Collector is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Metric store is required"))?;
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| anyhow::anyhow!("Alert dispatcher is required"))?;
        let renderer = self
            .renderer
            .ok_or_else(|| anyhow::anyhow!("Snapshot renderer is required"))?;

        let health = match self.health {
            Some(health) => health,
            None => HealthRegistry::with_pipeline_components().await,
        };
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => AgentMetrics::new()?,
        };

        Ok(Monitor {
            collector,
            policy: self.policy,
            store,
            dispatcher,
            renderer,
            health,
            metrics,
            logger: StructuredLogger::new(self.host_name),
            metrics_textfile: self.metrics_textfile,
        })
    }
}

impl Default for MonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
