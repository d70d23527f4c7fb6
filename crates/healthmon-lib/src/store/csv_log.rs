//! Append-only CSV metric log

use super::MetricLog;
use crate::error::PersistenceError;
use crate::models::{ProcessSample, Sample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One CSV row. Unavailable fields are empty cells; top processes are a
/// JSON-encoded column.
#[derive(Debug, Serialize, Deserialize)]
struct MetricRow {
    timestamp: DateTime<Utc>,
    cpu_percent: Option<f64>,
    memory_percent: Option<f64>,
    memory_used_bytes: Option<u64>,
    memory_total_bytes: Option<u64>,
    disk_percent: Option<f64>,
    disk_used_bytes: Option<u64>,
    disk_total_bytes: Option<u64>,
    network_bytes_sent_per_sec: Option<f64>,
    network_bytes_recv_per_sec: Option<f64>,
    uptime_seconds: Option<u64>,
    top_processes: Option<String>,
}

impl MetricRow {
    fn from_sample(sample: &Sample) -> Result<Self, PersistenceError> {
        let top_processes = sample
            .top_processes
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(Self {
            timestamp: sample.timestamp,
            cpu_percent: sample.cpu_percent,
            memory_percent: sample.memory_percent,
            memory_used_bytes: sample.memory_used_bytes,
            memory_total_bytes: sample.memory_total_bytes,
            disk_percent: sample.disk_percent,
            disk_used_bytes: sample.disk_used_bytes,
            disk_total_bytes: sample.disk_total_bytes,
            network_bytes_sent_per_sec: sample.network_bytes_sent_per_sec,
            network_bytes_recv_per_sec: sample.network_bytes_recv_per_sec,
            uptime_seconds: sample.uptime_seconds,
            top_processes,
        })
    }

    fn into_sample(self, path: &Path) -> Result<Sample, PersistenceError> {
        let top_processes = match self.top_processes.as_deref() {
            None | Some("") => None,
            Some(json) => Some(serde_json::from_str::<Vec<ProcessSample>>(json).map_err(
                |e| PersistenceError::Malformed {
                    path: path.to_path_buf(),
                    reason: format!("top_processes: {}", e),
                },
            )?),
        };

        Ok(Sample {
            timestamp: self.timestamp,
            cpu_percent: self.cpu_percent,
            memory_percent: self.memory_percent,
            memory_used_bytes: self.memory_used_bytes,
            memory_total_bytes: self.memory_total_bytes,
            disk_percent: self.disk_percent,
            disk_used_bytes: self.disk_used_bytes,
            disk_total_bytes: self.disk_total_bytes,
            network_bytes_sent_per_sec: self.network_bytes_sent_per_sec,
            network_bytes_recv_per_sec: self.network_bytes_recv_per_sec,
            uptime_seconds: self.uptime_seconds,
            top_processes,
        })
    }
}

/// Metric log backed by a CSV file.
///
/// The file is reopened on every append so a path that was temporarily
/// unavailable recovers without restarting the agent.
#[derive(Debug, Clone)]
pub struct CsvMetricLog {
    path: PathBuf,
}

impl CsvMetricLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricLog for CsvMetricLog {
    fn append(&mut self, sample: &Sample) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PersistenceError::io(&self.path, e))?;

        let row = MetricRow::from_sample(sample)?;
        append_row(&file, &file, &row, &self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Write one row through `out`, truncating `file` back to its previous
/// length if the write fails partway
fn append_row<W: Write>(
    file: &File,
    out: W,
    row: &MetricRow,
    path: &Path,
) -> Result<(), PersistenceError> {
    let start = file
        .metadata()
        .map_err(|e| PersistenceError::io(path, e))?
        .len();

    let mut writer = csv::WriterBuilder::new()
        .has_headers(start == 0)
        .from_writer(out);
    let written = writer
        .serialize(row)
        .map_err(|e| PersistenceError::csv(path, e))
        .and_then(|()| writer.flush().map_err(|e| PersistenceError::io(path, e)));
    // Dropping retries the flush, so it must happen before truncation
    drop(writer);

    if let Err(e) = written {
        if let Err(truncate) = file.set_len(start) {
            warn!(path = %path.display(), error = %truncate, "Failed to truncate partial row");
        }
        return Err(e);
    }
    Ok(())
}

/// Read every row of a metric log back as samples
pub fn read_samples(path: impl AsRef<Path>) -> Result<Vec<Sample>, PersistenceError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| PersistenceError::csv(path, e))?;

    reader
        .deserialize::<MetricRow>()
        .map(|row| {
            row.map_err(|e| PersistenceError::csv(path, e))
                .and_then(|row| row.into_sample(path))
        })
        .collect()
}
