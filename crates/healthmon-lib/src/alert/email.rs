//! Email notification sink
//!
//! The SMTP credential is passed in at construction and never serialized;
//! callers read it from the process environment.

use super::{async_trait, AlertSink};
use crate::error::{ConfigurationError, NotificationError};
use crate::models::AlertCondition;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

/// Default SMTP timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Email sink settings
#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub sender: String,
    pub recipient: String,
    pub password: String,
    /// Bound on one delivery attempt
    pub timeout: Duration,
    /// Host name quoted in the subject line
    pub host_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            sender: String::new(),
            recipient: String::new(),
            password: String::new(),
            timeout: DEFAULT_TIMEOUT,
            host_name: "localhost".to_string(),
        }
    }
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("host_name", &self.host_name)
            .finish()
    }
}

/// Outbound mail delivery
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), NotificationError>;
}

/// STARTTLS SMTP relay with password authentication
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(config: &EmailConfig) -> Result<Self, ConfigurationError> {
        let inner = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| ConfigurationError::Invalid {
                feature: "email",
                reason: format!("SMTP relay {}: {}", config.smtp_host, e),
            })?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender.clone(),
                config.password.clone(),
            ))
            .timeout(Some(config.timeout))
            .build();

        Ok(Self { inner })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, message: Message) -> Result<(), NotificationError> {
        self.inner
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| NotificationError::Transport(e.to_string()))
    }
}

/// Sends one email per notified alert
pub struct EmailSink {
    from: Mailbox,
    to: Mailbox,
    host_name: String,
    timeout: Duration,
    transport: Box<dyn MailTransport>,
}

impl EmailSink {
    /// Build a sink over an arbitrary transport
    pub fn new(
        config: &EmailConfig,
        transport: Box<dyn MailTransport>,
    ) -> Result<Self, ConfigurationError> {
        let from = parse_mailbox("email.sender", &config.sender)?;
        let to = parse_mailbox("email.recipient", &config.recipient)?;
        if config.timeout.is_zero() {
            return Err(ConfigurationError::Invalid {
                feature: "email",
                reason: "send timeout must be non-zero".to_string(),
            });
        }

        Ok(Self {
            from,
            to,
            host_name: config.host_name.clone(),
            timeout: config.timeout,
            transport,
        })
    }

    /// Build a sink that delivers through an SMTP relay
    pub fn smtp(config: &EmailConfig) -> Result<Self, ConfigurationError> {
        if config.password.is_empty() {
            return Err(ConfigurationError::MissingSetting {
                feature: "email",
                setting: "SMTP credential".to_string(),
            });
        }
        let transport = SmtpTransport::new(config)?;
        Self::new(config, Box::new(transport))
    }

    /// Compose the message for `condition`
    pub fn compose(&self, condition: &AlertCondition) -> Result<Message, NotificationError> {
        let subject = format!(
            "[healthmon] {} alert on {}",
            condition.metric_kind, self.host_name
        );
        let body = format!(
            "A resource threshold was exceeded on {host}.\n\n\
             Metric:    {kind}\n\
             Observed:  {observed:.1}%\n\
             Threshold: {threshold:.1}%\n\
             Severity:  {severity}\n\
             Time:      {time}\n",
            host = self.host_name,
            kind = condition.metric_kind,
            observed = condition.observed_value,
            threshold = condition.threshold_value,
            severity = condition.severity,
            time = condition.triggered_at.to_rfc3339(),
        );

        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| NotificationError::Message(e.to_string()))
    }
}

#[async_trait]
impl AlertSink for EmailSink {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, condition: &AlertCondition) -> Result<(), NotificationError> {
        let message = self.compose(condition)?;

        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout(self.timeout)),
        }
    }
}

fn parse_mailbox(setting: &str, value: &str) -> Result<Mailbox, ConfigurationError> {
    if value.trim().is_empty() {
        return Err(ConfigurationError::MissingSetting {
            feature: "email",
            setting: setting.to_string(),
        });
    }
    value.parse::<Mailbox>().map_err(|e| ConfigurationError::Invalid {
        feature: "email",
        reason: format!("{} {:?}: {}", setting, value, e),
    })
}
