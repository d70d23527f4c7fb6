//! Excursion-based alert dispatcher
//!
//! A metric notifies once when it first breaches its threshold, stays
//! suppressed while the breach continues, and recovers silently once a
//! sample is back at or below the threshold.

use super::{AlertSink, AlertStateStore, DispatcherState};
use crate::models::{AlertCondition, AlertState, MetricKind};
use crate::policy::Evaluation;
use tracing::{debug, warn};

/// Default number of notified alerts kept for the snapshot
pub const DEFAULT_HISTORY_LEN: usize = 20;

/// A sink that failed to deliver one alert
#[derive(Debug, Clone)]
pub struct SinkFailure {
    pub sink: String,
    pub metric_kind: MetricKind,
    pub error: String,
}

/// Outcome of one dispatch call
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Conditions that started a new excursion and were sent to the sinks
    pub notified: Vec<AlertCondition>,
    /// Breaches withheld because their excursion was already notified
    pub suppressed: Vec<MetricKind>,
    /// Metrics whose excursion ended this cycle
    pub recovered: Vec<MetricKind>,
    pub sink_failures: Vec<SinkFailure>,
}

/// Routes alert conditions to sinks with per-metric suppression
pub struct AlertDispatcher {
    sinks: Vec<Box<dyn AlertSink>>,
    state: DispatcherState,
    history_len: usize,
    state_store: Option<AlertStateStore>,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Box<dyn AlertSink>>) -> Self {
        Self {
            sinks,
            state: DispatcherState::default(),
            history_len: DEFAULT_HISTORY_LEN,
            state_store: None,
        }
    }

    /// Load state from `store` and save it back after each change
    pub fn with_state_store(mut self, store: AlertStateStore) -> Self {
        self.state = store.load();
        self.state_store = Some(store);
        self.trim_history();
        self
    }

    /// Set how many notified alerts are remembered
    pub fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = len;
        self.trim_history();
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Current state for `kind` (inactive if never seen)
    pub fn state(&self, kind: MetricKind) -> AlertState {
        self.state.states.get(&kind).cloned().unwrap_or_default()
    }

    /// Recently notified alerts, newest first
    pub fn recent_alerts(&self) -> Vec<AlertCondition> {
        self.state.history.iter().rev().cloned().collect()
    }

    /// Apply one cycle's evaluation.
    ///
    /// Breaches of inactive metrics notify every sink; breaches of active
    /// metrics are suppressed; metrics observed within threshold recover.
    /// Metrics the sample could not report keep their state.
    pub async fn dispatch(&mut self, evaluation: &Evaluation) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut changed = false;

        for condition in &evaluation.conditions {
            let state = self.state.states.entry(condition.metric_kind).or_default();

            if state.is_active {
                debug!(metric = %condition.metric_kind, observed = condition.observed_value, "Alert suppressed, excursion already notified");
                report.suppressed.push(condition.metric_kind);
                continue;
            }

            state.is_active = true;
            state.last_notified_at = Some(condition.triggered_at);
            changed = true;

            self.state.history.push_back(condition.clone());
            self.notify_all(condition, &mut report).await;
            report.notified.push(condition.clone());
        }

        for kind in &evaluation.within {
            if let Some(state) = self.state.states.get_mut(kind) {
                if state.is_active {
                    state.is_active = false;
                    changed = true;
                    report.recovered.push(*kind);
                }
            }
        }

        self.trim_history();

        if changed {
            self.save_state();
        }

        report
    }

    /// Deliver to each sink in order; a failing sink does not stop the rest
    async fn notify_all(&self, condition: &AlertCondition, report: &mut DispatchReport) {
        for sink in &self.sinks {
            if let Err(e) = sink.notify(condition).await {
                warn!(
                    sink = sink.name(),
                    metric = %condition.metric_kind,
                    error = %e,
                    "Alert sink failed"
                );
                report.sink_failures.push(SinkFailure {
                    sink: sink.name().to_string(),
                    metric_kind: condition.metric_kind,
                    error: e.to_string(),
                });
            }
        }
    }

    fn trim_history(&mut self) {
        while self.state.history.len() > self.history_len {
            self.state.history.pop_front();
        }
    }

    fn save_state(&self) {
        if let Some(store) = &self.state_store {
            if let Err(e) = store.save(&self.state) {
                warn!(path = %store.path().display(), error = %e, "Failed to save alert state");
            }
        }
    }
}
