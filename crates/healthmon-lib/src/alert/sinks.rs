//! Console and alert-log sinks

use super::{async_trait, AlertSink};
use crate::error::NotificationError;
use crate::models::AlertCondition;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Writes one line per alert to a terminal stream (stdout by default)
pub struct ConsoleSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl AlertSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn notify(&self, condition: &AlertCondition) -> Result<(), NotificationError> {
        let line = format!(
            "ALERT {} {}",
            condition.triggered_at.to_rfc3339(),
            condition.summary()
        );

        let mut out = self
            .out
            .lock()
            .map_err(|_| NotificationError::Transport("console writer poisoned".to_string()))?;
        writeln!(out, "{}", line)
            .and_then(|_| out.flush())
            .map_err(|source| NotificationError::Io {
                sink: self.name().to_string(),
                source,
            })
    }
}

/// Appends one line per notified alert to a text file
#[derive(Debug, Clone)]
pub struct AlertLogSink {
    path: PathBuf,
}

impl AlertLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Line format: `<triggered_at> - <kind> at <observed>% exceeds <threshold>% [<severity>]`
    pub fn format_line(condition: &AlertCondition) -> String {
        format!(
            "{} - {}",
            condition.triggered_at.to_rfc3339(),
            condition.summary()
        )
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

#[async_trait]
impl AlertSink for AlertLogSink {
    fn name(&self) -> &str {
        "alert_log"
    }

    async fn notify(&self, condition: &AlertCondition) -> Result<(), NotificationError> {
        self.append_line(&Self::format_line(condition))
            .map_err(|source| NotificationError::Io {
                sink: self.name().to_string(),
                source,
            })
    }
}
