//! Threshold policy
//!
//! Maps a [`Sample`] to the set of [`AlertCondition`]s it triggers. The
//! comparison is strict: a value equal to its threshold is not a breach.

use crate::error::ConfigurationError;
use crate::models::{AlertCondition, MetricKind, Sample, Severity};
use serde::{Deserialize, Serialize};

/// Default CPU threshold (percent)
pub const DEFAULT_CPU_THRESHOLD: f64 = 90.0;

/// Default memory threshold (percent)
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 85.0;

/// Default disk threshold (percent)
pub const DEFAULT_DISK_THRESHOLD: f64 = 90.0;

/// Per-metric utilization ceilings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: DEFAULT_CPU_THRESHOLD,
            memory: DEFAULT_MEMORY_THRESHOLD,
            disk: DEFAULT_DISK_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Disk => self.disk,
        }
    }

    /// Every threshold must lie in (0, 100]
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for kind in MetricKind::ALL {
            let value = self.get(kind);
            if !(value > 0.0 && value <= 100.0) {
                return Err(ConfigurationError::ThresholdOutOfRange { kind, value });
            }
        }
        Ok(())
    }
}

/// Outcome of evaluating one sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// One condition per breached metric, in [`MetricKind::ALL`] order
    pub conditions: Vec<AlertCondition>,
    /// Metrics observed at or below their threshold
    pub within: Vec<MetricKind>,
    /// Metrics the sample could not report
    pub unavailable: Vec<MetricKind>,
}

impl Evaluation {
    pub fn has_breaches(&self) -> bool {
        !self.conditions.is_empty()
    }
}

/// Pure threshold evaluator
#[derive(Debug, Clone, Default)]
pub struct ThresholdPolicy {
    thresholds: Thresholds,
}

impl ThresholdPolicy {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Evaluate every thresholded metric of `sample`
    pub fn evaluate(&self, sample: &Sample) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for kind in MetricKind::ALL {
            let threshold = self.thresholds.get(kind);
            match sample.metric(kind) {
                Some(observed) if observed > threshold => {
                    evaluation.conditions.push(AlertCondition {
                        metric_kind: kind,
                        observed_value: observed,
                        threshold_value: threshold,
                        severity: severity_for(observed, threshold),
                        triggered_at: sample.timestamp,
                    });
                }
                Some(_) => evaluation.within.push(kind),
                None => evaluation.unavailable.push(kind),
            }
        }

        evaluation
    }
}

/// Critical once the overshoot covers half the headroom above the threshold
pub fn severity_for(observed: f64, threshold: f64) -> Severity {
    let headroom = (100.0 - threshold).max(0.0);
    if observed - threshold >= headroom / 2.0 {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample(cpu: f64, memory: f64, disk: f64) -> Sample {
        let mut s = Sample::empty(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        s.cpu_percent = Some(cpu);
        s.memory_percent = Some(memory);
        s.disk_percent = Some(disk);
        s
    }

    #[test]
    fn test_defaults() {
        let t = Thresholds::default();
        assert_eq!(t.cpu, 90.0);
        assert_eq!(t.memory, 85.0);
        assert_eq!(t.disk, 90.0);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_single_breach() {
        let policy = ThresholdPolicy::default();
        let s = sample(95.0, 50.0, 50.0);
        let eval = policy.evaluate(&s);

        assert_eq!(eval.conditions.len(), 1);
        let c = &eval.conditions[0];
        assert_eq!(c.metric_kind, MetricKind::Cpu);
        assert_eq!(c.observed_value, 95.0);
        assert_eq!(c.threshold_value, 90.0);
        assert_eq!(c.triggered_at, s.timestamp);
        assert_eq!(eval.within, vec![MetricKind::Memory, MetricKind::Disk]);
    }

    #[test]
    fn test_equal_to_threshold_is_not_a_breach() {
        let policy = ThresholdPolicy::default();
        let eval = policy.evaluate(&sample(90.0, 85.0, 90.0));

        assert!(!eval.has_breaches());
        assert_eq!(eval.within.len(), 3);
    }

    #[test]
    fn test_just_above_threshold_breaches() {
        let policy = ThresholdPolicy::default();
        let eval = policy.evaluate(&sample(90.0001, 10.0, 10.0));
        assert_eq!(eval.conditions.len(), 1);
    }

    #[test]
    fn test_multiple_breaches_are_independent() {
        let policy = ThresholdPolicy::default();
        let eval = policy.evaluate(&sample(95.0, 86.0, 91.0));

        let kinds: Vec<MetricKind> = eval.conditions.iter().map(|c| c.metric_kind).collect();
        assert_eq!(
            kinds,
            vec![MetricKind::Cpu, MetricKind::Memory, MetricKind::Disk]
        );
    }

    #[test]
    fn test_unavailable_metric_is_not_judged() {
        let policy = ThresholdPolicy::default();
        let mut s = sample(99.0, 10.0, 10.0);
        s.cpu_percent = None;

        let eval = policy.evaluate(&s);
        assert!(!eval.has_breaches());
        assert_eq!(eval.unavailable, vec![MetricKind::Cpu]);
    }

    #[test]
    fn test_custom_thresholds() {
        let policy = ThresholdPolicy::new(Thresholds {
            cpu: 50.0,
            memory: 50.0,
            disk: 99.0,
        });
        let eval = policy.evaluate(&sample(60.0, 40.0, 95.0));
        assert_eq!(eval.conditions.len(), 1);
        assert_eq!(eval.conditions[0].metric_kind, MetricKind::Cpu);
    }

    #[test]
    fn test_severity() {
        // threshold 90: headroom 10, critical from 95
        assert_eq!(severity_for(94.9, 90.0), Severity::Warning);
        assert_eq!(severity_for(95.0, 90.0), Severity::Critical);
        // threshold 100 can never be exceeded by a percentage, but stays defined
        assert_eq!(severity_for(100.5, 100.0), Severity::Critical);
    }

    #[test]
    fn test_threshold_validation() {
        let bad = Thresholds {
            cpu: 0.0,
            ..Default::default()
        };
        assert_eq!(
            bad.validate(),
            Err(ConfigurationError::ThresholdOutOfRange {
                kind: MetricKind::Cpu,
                value: 0.0
            })
        );

        let nan = Thresholds {
            disk: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }
}
