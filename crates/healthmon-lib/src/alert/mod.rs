//! Alert dispatch
//!
//! This module provides:
//! - Per-metric excursion tracking: one notification per excursion above
//!   threshold, silent recovery
//! - Notification sinks (console, append-only alert log, email)
//! - Persisted alert state so suppression holds across restarts

mod dispatcher;
mod email;
mod sinks;
mod state;


pub use dispatcher::{AlertDispatcher, DispatchReport, SinkFailure, DEFAULT_HISTORY_LEN};
pub use email::{EmailConfig, EmailSink, MailTransport, SmtpTransport};
pub use sinks::{AlertLogSink, ConsoleSink};
pub use state::{AlertStateStore, DispatcherState};

use crate::error::NotificationError;
use crate::models::AlertCondition;

pub use async_trait::async_trait;

/// Capability to deliver one alert
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Short name used in logs and failure reports
    fn name(&self) -> &str;

    /// Deliver a notification for `condition`
    async fn notify(&self, condition: &AlertCondition) -> Result<(), NotificationError>;
}
