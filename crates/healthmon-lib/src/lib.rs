//! Host health monitoring library
//!
//! This crate provides the core functionality for:
//! - Host metrics collection (CPU, memory, disk, network, processes)
//! - Threshold evaluation with severity grading
//! - Durable metric logging with a bounded retry buffer
//! - Alert dispatch with per-excursion suppression
//! - HTML snapshot rendering
//! - Health tracking and observability

pub mod alert;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod policy;
pub mod render;
pub mod store;

pub use error::{
    CollectionError, ConfigurationError, DataLossWarning, NotificationError, PersistenceError,
};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse};
pub use models::*;
pub use monitor::{CycleReport, Monitor, MonitorBuilder};
pub use observability::{AgentMetrics, StructuredLogger};
pub use policy::{Evaluation, ThresholdPolicy, Thresholds};
pub use render::SnapshotRenderer;
