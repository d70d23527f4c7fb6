//! Agent configuration
//!
//! Layered from built-in defaults, an optional TOML file, then environment
//! variables such as `HEALTHMON_THRESHOLDS__CPU=80`.

use anyhow::{Context, Result};
use healthmon_lib::alert::{EmailConfig, DEFAULT_HISTORY_LEN};
use healthmon_lib::collector::{host_name, HostCollectorConfig};
use healthmon_lib::store::BufferConfig;
use healthmon_lib::{ConfigurationError, Thresholds};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "HEALTHMON";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Seconds between cycles in loop mode
    pub interval_secs: u64,

    /// Host name quoted in alerts and the snapshot
    pub host_name: String,

    pub thresholds: Thresholds,
    pub paths: PathsConfig,
    pub buffer: BufferSettings,
    pub collector: CollectorSettings,
    pub sinks: SinkSettings,
    pub email: EmailSettings,

    /// Notified alerts remembered for the snapshot
    pub alert_history: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            host_name: host_name(),
            thresholds: Thresholds::default(),
            paths: PathsConfig::default(),
            buffer: BufferSettings::default(),
            collector: CollectorSettings::default(),
            sinks: SinkSettings::default(),
            email: EmailSettings::default(),
            alert_history: DEFAULT_HISTORY_LEN,
        }
    }
}

/// File locations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub metric_log: PathBuf,
    pub buffer_spill: PathBuf,
    pub alert_log: PathBuf,
    pub alert_state: PathBuf,
    pub snapshot: PathBuf,
    pub metrics_textfile: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            metric_log: PathBuf::from("system_report.csv"),
            buffer_spill: PathBuf::from("system_report.buffer"),
            alert_log: PathBuf::from("alerts.log"),
            alert_state: PathBuf::from("alert_state.json"),
            snapshot: PathBuf::from("report.html"),
            metrics_textfile: None,
        }
    }
}

impl PathsConfig {
    /// Lock file guarding the alert state, next to it
    pub fn run_lock(&self) -> PathBuf {
        self.alert_state.with_extension("lock")
    }
}

/// Retry buffer limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    pub max_entries: usize,
    pub max_age_secs: u64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            max_age_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub top_processes: usize,
    pub disk_mount: PathBuf,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            top_processes: 5,
            disk_mount: PathBuf::from("/"),
        }
    }
}

/// Which alert sinks are enabled
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub console: bool,
    pub alert_log: bool,
    pub email: bool,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            console: true,
            alert_log: true,
            email: false,
        }
    }
}

/// Email sink settings; the credential comes from `password_env`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    /// Name of the environment variable holding the SMTP password
    pub password_env: String,
    pub timeout_secs: u64,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            sender: None,
            recipient: None,
            password_env: "HEALTHMON_SMTP_PASSWORD".to_string(),
            timeout_secs: 10,
        }
    }
}

impl AgentConfig {
    /// Load configuration from the optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map instead of the process environment
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| match path {
                Some(path) => format!("Failed to read configuration from {}", path.display()),
                None => "Failed to read configuration".to_string(),
            })?;

        let config: AgentConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.interval_secs == 0 {
            return Err(ConfigurationError::ZeroInterval);
        }
        if self.buffer.max_entries == 0 {
            return Err(ConfigurationError::ZeroBufferCapacity);
        }
        self.thresholds.validate()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            max_entries: self.buffer.max_entries,
            max_age: Duration::from_secs(self.buffer.max_age_secs),
            spill_path: Some(self.paths.buffer_spill.clone()),
        }
    }

    pub fn collector_config(&self) -> HostCollectorConfig {
        HostCollectorConfig {
            top_processes: self.collector.top_processes,
            disk_mount: self.collector.disk_mount.clone(),
            ..Default::default()
        }
    }

    /// Email settings with the credential read from the environment
    pub fn email_config(&self) -> Result<EmailConfig, ConfigurationError> {
        let password = std::env::var(&self.email.password_env).ok();
        self.email_config_with_password(password)
    }

    /// Email settings with an explicit credential
    pub fn email_config_with_password(
        &self,
        password: Option<String>,
    ) -> Result<EmailConfig, ConfigurationError> {
        let sender = required("email.sender", self.email.sender.as_deref())?;
        let recipient = required("email.recipient", self.email.recipient.as_deref())?;
        let password = required(&self.email.password_env, password.as_deref())?;
        if self.email.timeout_secs == 0 {
            return Err(ConfigurationError::Invalid {
                feature: "email",
                reason: "email.timeout_secs must be at least 1".to_string(),
            });
        }

        Ok(EmailConfig {
            smtp_host: self.email.smtp_host.clone(),
            smtp_port: self.email.smtp_port,
            sender,
            recipient,
            password,
            timeout: Duration::from_secs(self.email.timeout_secs),
            host_name: self.host_name.clone(),
        })
    }
}

fn required(setting: &str, value: Option<&str>) -> Result<String, ConfigurationError> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ConfigurationError::MissingSetting {
            feature: "email",
            setting: setting.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn toml_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::load_with_env(None, env(&[])).unwrap();

        assert_eq!(config.interval_secs, 60);
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.paths.metric_log, PathBuf::from("system_report.csv"));
        assert_eq!(config.paths.run_lock(), PathBuf::from("alert_state.lock"));
        assert_eq!(config.buffer.max_entries, 1_000);
        assert!(config.sinks.console);
        assert!(!config.sinks.email);
        assert!(!config.host_name.is_empty());
    }

    #[test]
    fn test_file_then_env_override() {
        let file = toml_file(
            r#"
interval_secs = 30
host_name = "db-01"

[thresholds]
cpu = 75.0
memory = 70

[paths]
metric_log = "/var/lib/healthmon/metrics.csv"
"#,
        );

        let config = AgentConfig::load_with_env(
            Some(file.path()),
            env(&[
                ("HEALTHMON_THRESHOLDS__CPU", "80"),
                ("HEALTHMON_SINKS__EMAIL", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.host_name, "db-01");
        assert_eq!(config.thresholds.cpu, 80.0);
        assert_eq!(config.thresholds.memory, 70.0);
        assert_eq!(config.thresholds.disk, 90.0);
        assert!(config.sinks.email);
        assert_eq!(
            config.paths.metric_log,
            PathBuf::from("/var/lib/healthmon/metrics.csv")
        );
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let err = AgentConfig::load_with_env(None, env(&[("HEALTHMON_THRESHOLDS__DISK", "150")]))
            .unwrap_err();
        let config_err = err.downcast_ref::<ConfigurationError>().unwrap();
        assert!(matches!(
            config_err,
            ConfigurationError::ThresholdOutOfRange { value, .. } if *value == 150.0
        ));

        assert!(
            AgentConfig::load_with_env(None, env(&[("HEALTHMON_THRESHOLDS__CPU", "0")])).is_err()
        );
    }

    #[test]
    fn test_zero_interval_and_capacity_rejected() {
        let err = AgentConfig::load_with_env(None, env(&[("HEALTHMON_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigurationError>(),
            Some(&ConfigurationError::ZeroInterval)
        );

        let err =
            AgentConfig::load_with_env(None, env(&[("HEALTHMON_BUFFER__MAX_ENTRIES", "0")]))
                .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigurationError>(),
            Some(&ConfigurationError::ZeroBufferCapacity)
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = AgentConfig::load_with_env(
            Some(Path::new("/nonexistent/healthmon.toml")),
            env(&[]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_email_config_requires_all_settings() {
        let mut config = AgentConfig::default();
        config.email.sender = Some("monitor@example.com".to_string());

        let err = config
            .email_config_with_password(Some("secret".to_string()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingSetting {
                feature: "email",
                setting: "email.recipient".to_string(),
            }
        );

        config.email.recipient = Some("ops@example.com".to_string());
        let err = config.email_config_with_password(None).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingSetting { ref setting, .. } if setting == "HEALTHMON_SMTP_PASSWORD"
        ));

        let email = config
            .email_config_with_password(Some("secret".to_string()))
            .unwrap();
        assert_eq!(email.recipient, "ops@example.com");
        assert_eq!(email.host_name, config.host_name);
        assert_eq!(email.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_email_zero_timeout_rejected() {
        let mut config = AgentConfig::default();
        config.email.sender = Some("monitor@example.com".to_string());
        config.email.recipient = Some("ops@example.com".to_string());
        config.email.timeout_secs = 0;

        let err = config
            .email_config_with_password(Some("secret".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { feature: "email", .. }));
    }

    #[test]
    fn test_buffer_config_uses_spill_path() {
        let config = AgentConfig::default();
        let buffer = config.buffer_config();
        assert_eq!(
            buffer.spill_path,
            Some(PathBuf::from("system_report.buffer"))
        );
        assert_eq!(buffer.max_age, Duration::from_secs(86_400));
    }
}
