//! HTML snapshot of the latest sample
//!
//! The snapshot is a single self-contained page overwritten every cycle.
//! Unavailable fields render as `n/a`.

use crate::error::PersistenceError;
use crate::health::HealthResponse;
use crate::models::{AlertCondition, Sample};
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const TEMPLATE_NAME: &str = "snapshot";

/// Placeholder for unavailable values
pub const UNAVAILABLE: &str = "n/a";

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>System Health Report - {{host}}</title>
<style>
 body { font-family: Arial, sans-serif; margin: 2rem; background: #f4f6f8; }
 .card { background: #fff; padding: 1.5rem; border-radius: 8px; box-shadow: 0 2px 6px rgba(0,0,0,0.08); margin-bottom: 1.5rem; }
 table { width: 100%; border-collapse: collapse; }
 th, td { text-align: left; padding: 0.5rem; border-bottom: 1px solid #e1e5eb; }
 th { background: #f0f3f7; }
 .metrics { display: flex; gap: 1rem; flex-wrap: wrap; }
 .metric { flex: 1 1 200px; background: #eef2f7; padding: 1rem; border-radius: 6px; }
 .critical { color: #b00020; }
 .healthy { color: #1b7f3b; }
 .degraded { color: #a86b00; }
 .unhealthy { color: #b00020; }
</style>
</head>
<body>
<div class="card">
  <h1>System Health Report</h1>
  <p>Host {{host}}, sample taken {{sample_time}}, generated {{generated_at}}</p>
  <div class="metrics">
{{#each metrics}}
    <div class="metric"><strong>{{label}}</strong><br>{{value}}{{#if detail}}<br><small>{{detail}}</small>{{/if}}</div>
{{/each}}
  </div>
</div>
<div class="card">
  <h2>Recent Alerts</h2>
  <ul>
{{#each alerts}}
    <li class="{{severity}}">{{time}} - {{summary}}</li>
{{else}}
    <li>No recent alerts</li>
{{/each}}
  </ul>
</div>
<div class="card">
  <h2>Top Processes</h2>
  <table>
    <thead><tr><th>PID</th><th>Name</th><th>CPU%</th><th>Mem%</th></tr></thead>
    <tbody>
{{#each processes}}
      <tr><td>{{pid}}</td><td>{{name}}</td><td>{{cpu}}</td><td>{{memory}}</td></tr>
{{else}}
      <tr><td colspan="4">No process data</td></tr>
{{/each}}
    </tbody>
  </table>
</div>
{{#if health}}
<div class="card">
  <h2>Agent Health: <span class="{{health.status}}">{{health.status}}</span></h2>
  <table>
    <thead><tr><th>Component</th><th>Status</th><th>Detail</th></tr></thead>
    <tbody>
{{#each health.components}}
      <tr><td>{{name}}</td><td class="{{status}}">{{status}}</td><td>{{message}}</td></tr>
{{/each}}
    </tbody>
  </table>
</div>
{{/if}}
</body>
</html>
"#;

#[derive(Serialize)]
struct SnapshotView {
    host: String,
    sample_time: String,
    generated_at: String,
    metrics: Vec<MetricCard>,
    alerts: Vec<AlertRow>,
    processes: Vec<ProcessRow>,
    health: Option<HealthView>,
}

#[derive(Serialize)]
struct MetricCard {
    label: &'static str,
    value: String,
    detail: Option<String>,
}

#[derive(Serialize)]
struct AlertRow {
    time: String,
    summary: String,
    severity: String,
}

#[derive(Serialize)]
struct ProcessRow {
    pid: u32,
    name: String,
    cpu: String,
    memory: String,
}

#[derive(Serialize)]
struct HealthView {
    status: String,
    components: Vec<ComponentRow>,
}

#[derive(Serialize)]
struct ComponentRow {
    name: String,
    status: String,
    message: String,
}

/// Renders the snapshot page and overwrites it at a fixed path
pub struct SnapshotRenderer {
    path: PathBuf,
    host_name: String,
    registry: Handlebars<'static>,
}

impl SnapshotRenderer {
    pub fn new(
        path: impl Into<PathBuf>,
        host_name: impl Into<String>,
    ) -> Result<Self, PersistenceError> {
        let path = path.into();
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry
            .register_template_string(TEMPLATE_NAME, TEMPLATE)
            .map_err(|e| PersistenceError::Malformed {
                path: path.clone(),
                reason: format!("snapshot template: {}", e),
            })?;

        Ok(Self {
            path,
            host_name: host_name.into(),
            registry,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Produce the page without touching the filesystem
    pub fn render_html(
        &self,
        sample: &Sample,
        recent_alerts: &[AlertCondition],
        health: Option<&HealthResponse>,
        generated_at: DateTime<Utc>,
    ) -> Result<String, PersistenceError> {
        let view = SnapshotView {
            host: self.host_name.clone(),
            sample_time: sample.timestamp.to_rfc3339(),
            generated_at: generated_at.to_rfc3339(),
            metrics: metric_cards(sample),
            alerts: recent_alerts
                .iter()
                .map(|a| AlertRow {
                    time: a.triggered_at.to_rfc3339(),
                    summary: a.summary(),
                    severity: a.severity.to_string(),
                })
                .collect(),
            processes: sample
                .top_processes
                .iter()
                .flatten()
                .map(|p| ProcessRow {
                    pid: p.pid,
                    name: p.name.clone(),
                    cpu: format!("{:.1}", p.cpu_percent),
                    memory: format!("{:.1}", p.memory_percent),
                })
                .collect(),
            health: health.map(|h| HealthView {
                status: h.status.to_string(),
                components: h
                    .components
                    .iter()
                    .map(|(name, c)| ComponentRow {
                        name: name.clone(),
                        status: c.status.to_string(),
                        message: c.message.clone().unwrap_or_default(),
                    })
                    .collect(),
            }),
        };

        self.registry
            .render(TEMPLATE_NAME, &view)
            .map_err(|e| PersistenceError::Malformed {
                path: self.path.clone(),
                reason: format!("snapshot render: {}", e),
            })
    }

    /// Render and replace the snapshot file atomically
    pub fn render(
        &self,
        sample: &Sample,
        recent_alerts: &[AlertCondition],
        health: Option<&HealthResponse>,
    ) -> Result<&Path, PersistenceError> {
        let html = self.render_html(sample, recent_alerts, health, Utc::now())?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let temp_path = self.path.with_extension("html.tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        file.write_all(html.as_bytes())
            .map_err(|e| PersistenceError::io(&temp_path, e))?;

        fs::rename(&temp_path, &self.path).map_err(|e| PersistenceError::io(&self.path, e))?;
        Ok(&self.path)
    }
}

fn metric_cards(sample: &Sample) -> Vec<MetricCard> {
    vec![
        MetricCard {
            label: "CPU",
            value: percent(sample.cpu_percent),
            detail: None,
        },
        MetricCard {
            label: "Memory",
            value: percent(sample.memory_percent),
            detail: used_of(sample.memory_used_bytes, sample.memory_total_bytes),
        },
        MetricCard {
            label: "Disk",
            value: percent(sample.disk_percent),
            detail: used_of(sample.disk_used_bytes, sample.disk_total_bytes),
        },
        MetricCard {
            label: "Network sent",
            value: rate(sample.network_bytes_sent_per_sec),
            detail: None,
        },
        MetricCard {
            label: "Network received",
            value: rate(sample.network_bytes_recv_per_sec),
            detail: None,
        },
        MetricCard {
            label: "Uptime",
            value: sample
                .uptime_seconds
                .map(format_uptime)
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
            detail: None,
        },
    ]
}

fn percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v))
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

fn rate(value: Option<f64>) -> String {
    value
        .map(|v| format!("{}/s", format_bytes(v)))
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

fn used_of(used: Option<u64>, total: Option<u64>) -> Option<String> {
    match (used, total) {
        (Some(used), Some(total)) => Some(format!(
            "{} of {}",
            format_bytes(used as f64),
            format_bytes(total as f64)
        )),
        _ => None,
    }
}

/// Binary-prefixed byte count, one decimal
pub(crate) fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub(crate) fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthRegistry;
    use crate::models::{MetricKind, ProcessSample, Severity};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn full_sample() -> Sample {
        let mut sample = Sample::empty(ts());
        sample.cpu_percent = Some(42.5);
        sample.memory_percent = Some(61.0);
        sample.memory_used_bytes = Some(4 * 1024 * 1024 * 1024);
        sample.memory_total_bytes = Some(8 * 1024 * 1024 * 1024);
        sample.disk_percent = Some(70.0);
        sample.network_bytes_sent_per_sec = Some(2048.0);
        sample.network_bytes_recv_per_sec = Some(512.0);
        sample.uptime_seconds = Some(90_061);
        sample.top_processes = Some(vec![ProcessSample {
            pid: 4242,
            name: "postgres".to_string(),
            cpu_percent: 12.34,
            memory_percent: 5.0,
        }]);
        sample
    }

    #[test]
    fn test_renders_metrics_and_processes() {
        let renderer = SnapshotRenderer::new("report.html", "web-01").unwrap();
        let html = renderer
            .render_html(&full_sample(), &[], None, ts())
            .unwrap();

        assert!(html.contains("42.5%"));
        assert!(html.contains("4.0 GiB of 8.0 GiB"));
        assert!(html.contains("2.0 KiB/s"));
        assert!(html.contains("512 B/s"));
        assert!(html.contains("1d 1h 1m"));
        assert!(html.contains("<td>4242</td><td>postgres</td><td>12.3</td>"));
        assert!(html.contains("No recent alerts"));
        assert!(!html.contains("Agent Health"));
    }

    #[test]
    fn test_unavailable_fields_render_placeholder() {
        let renderer = SnapshotRenderer::new("report.html", "web-01").unwrap();
        let html = renderer
            .render_html(&Sample::empty(ts()), &[], None, ts())
            .unwrap();

        assert_eq!(html.matches(UNAVAILABLE).count(), 6);
        assert!(html.contains("No process data"));
    }

    #[test]
    fn test_alerts_and_health_listed() {
        let renderer = SnapshotRenderer::new("report.html", "web-01").unwrap();
        let alert = AlertCondition {
            metric_kind: MetricKind::Cpu,
            observed_value: 97.0,
            threshold_value: 90.0,
            severity: Severity::Critical,
            triggered_at: ts(),
        };
        let registry = tokio_test::block_on(HealthRegistry::with_pipeline_components());
        tokio_test::block_on(registry.set_degraded("store", "2 rows buffered"));
        let health = tokio_test::block_on(registry.health());

        let html = renderer
            .render_html(&full_sample(), &[alert], Some(&health), ts())
            .unwrap();

        assert!(html.contains("cpu at 97.0% exceeds 90.0% [critical]"));
        assert!(html.contains("<li class=\"critical\">"));
        assert!(html.contains("Agent Health: <span class=\"degraded\">degraded</span>"));
        assert!(html.contains("2 rows buffered"));
    }

    #[test]
    fn test_process_names_are_escaped() {
        let renderer = SnapshotRenderer::new("report.html", "web-01").unwrap();
        let mut sample = full_sample();
        sample.top_processes = Some(vec![ProcessSample {
            pid: 1,
            name: "<script>".to_string(),
            cpu_percent: 0.0,
            memory_percent: 0.0,
        }]);

        let html = renderer.render_html(&sample, &[], None, ts()).unwrap();
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<td><script>"));
    }

    #[test]
    fn test_render_overwrites_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("report.html");
        let renderer = SnapshotRenderer::new(&path, "web-01").unwrap();

        renderer.render(&full_sample(), &[], None).unwrap();
        renderer.render(&Sample::empty(ts()), &[], None).unwrap();

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains(UNAVAILABLE));
        assert!(!html.contains("42.5%"));
        assert!(!path.with_extension("html.tmp").exists());
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes(0.0), "0 B");
        assert_eq!(format_bytes(1536.0), "1.5 KiB");
        assert_eq!(format_uptime(59), "0m 59s");
        assert_eq!(format_uptime(3_660), "1h 1m");
    }
}
