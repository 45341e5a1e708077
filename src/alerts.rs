//! Transition notifications
//!
//! Channels are configured through the settings map and read again on every dispatch,
//! so settings saved through the API apply to the next alert without a restart. A
//! channel whose keys are missing is skipped silently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, trace, warn};

use crate::monitors::TransitionOutcome;
use crate::storage::{MonitorStore, StorageError};
use crate::{CheckKind, EntityRef, EntityStatus};

pub const SMTP_HOST: &str = "smtp_host";
pub const SMTP_PORT: &str = "smtp_port";
pub const SMTP_USER: &str = "smtp_user";
pub const SMTP_PASS: &str = "smtp_pass";
pub const ALERT_EMAIL: &str = "alert_email";
pub const ALERT_WEBHOOK_URL: &str = "alert_webhook_url";

/// Default SMTP port (STARTTLS)
const DEFAULT_SMTP_PORT: u16 = 587;

/// Port that selects implicit TLS instead of STARTTLS
const SMTPS_PORT: u16 = 465;

/// Upper bound of one webhook request, connect to last byte
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

const SUBJECT_PREFIX: &str = "[NodePulse] ";
const SENDER_NAME: &str = "NodePulse";

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// SMTP transport-level failure (authentication, connection, etc.)
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("email build error: {0}")]
    Build(String),

    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("webhook answered with status {0}")]
    WebhookStatus(reqwest::StatusCode),

    #[error("failed to read alert settings: {0}")]
    Settings(#[from] StorageError),
}

/// A human-readable notification about one transition
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    pub entity: EntityRef,
    pub status: EntityStatus,
}

impl Alert {
    /// Build the notification for a status change, `None` if nothing changed
    pub fn for_transition(outcome: &TransitionOutcome) -> Option<Self> {
        if !outcome.changed {
            return None;
        }

        let device = &outcome.device;
        let status = outcome.status;
        let (subject, body) = match outcome.target.kind {
            CheckKind::Icmp => (
                format!(
                    "Device {} is {}",
                    device.name,
                    status.as_str().to_uppercase()
                ),
                format!(
                    "Device {} ({}) is now {}.",
                    device.name, device.address, status
                ),
            ),
            CheckKind::Service(id) => {
                let service = device.service(id)?;
                let (short, long) = match status {
                    EntityStatus::Offline => ("DOWN", "is now OFFLINE."),
                    _ => ("UP", "is back ONLINE."),
                };
                (
                    format!("Service {} on {} is {}", service.name, device.name, short),
                    format!(
                        "Service {} ({}:{}) on {} {}",
                        service.name, device.address, service.port, device.name, long
                    ),
                )
            }
        };

        Some(Self {
            subject,
            body,
            entity: outcome.target.entity(),
            status,
        })
    }
}

/// Result of offering an alert to one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The channel's settings are absent
    NotConfigured,
}

/// One notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(
        &self,
        alert: &Alert,
        settings: &HashMap<String, String>,
    ) -> Result<Delivery, AlertError>;
}

/// Non-empty setting value
fn setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// SMTP settings resolved from the settings map
#[derive(Debug, Clone, PartialEq)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub alert_email: String,
}

impl EmailConfig {
    /// `None` unless host, user, password and recipient are all set
    pub fn from_settings(settings: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            smtp_host: setting(settings, SMTP_HOST)?.to_string(),
            smtp_port: setting(settings, SMTP_PORT)
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            smtp_user: setting(settings, SMTP_USER)?.to_string(),
            smtp_pass: setting(settings, SMTP_PASS)?.to_string(),
            alert_email: setting(settings, ALERT_EMAIL)?.to_string(),
        })
    }

    pub fn implicit_tls(&self) -> bool {
        self.smtp_port == SMTPS_PORT
    }
}

/// Plain-text email over SMTP
#[derive(Debug, Default, Clone)]
pub struct EmailNotifier;

impl EmailNotifier {
    fn build_message(config: &EmailConfig, alert: &Alert) -> Result<Message, AlertError> {
        let from = Mailbox::new(Some(SENDER_NAME.to_string()), config.smtp_user.parse()?);

        Message::builder()
            .from(from)
            .to(config.alert_email.parse()?)
            .subject(format!("{SUBJECT_PREFIX}{}", alert.subject))
            .header(ContentType::TEXT_PLAIN)
            .body(alert.body.clone())
            .map_err(|e| AlertError::Build(e.to_string()))
    }

    fn build_transport(config: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, AlertError> {
        let relay = if config.implicit_tls() {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        };
        Ok(relay
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_pass.clone(),
            ))
            .build())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn notify(
        &self,
        alert: &Alert,
        settings: &HashMap<String, String>,
    ) -> Result<Delivery, AlertError> {
        let Some(config) = EmailConfig::from_settings(settings) else {
            return Ok(Delivery::NotConfigured);
        };

        let email = Self::build_message(&config, alert)?;
        Self::build_transport(&config)?.send(email).await?;

        info!(to = %config.alert_email, subject = %alert.subject, "email alert sent");
        Ok(Delivery::Sent)
    }
}

/// JSON POST to a configured URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client whose requests give up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client))
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        match Self::with_timeout(WEBHOOK_TIMEOUT) {
            Ok(notifier) => notifier,
            Err(e) => {
                warn!("webhook client without timeout: {e}");
                Self::new(Client::default())
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(
        &self,
        alert: &Alert,
        settings: &HashMap<String, String>,
    ) -> Result<Delivery, AlertError> {
        let Some(url) = setting(settings, ALERT_WEBHOOK_URL) else {
            return Ok(Delivery::NotConfigured);
        };

        let payload = json!({
            "message": alert.body,
            "subject": alert.subject,
            "entity": alert.entity,
            "status": alert.status,
            "timestamp": Utc::now().to_rfc3339()
        });

        let response = self.client.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(AlertError::WebhookStatus(response.status()));
        }

        info!("successfully sent webhook alert");
        Ok(Delivery::Sent)
    }
}

/// Best-effort delivery of transition alerts to every configured channel
#[derive(Clone)]
pub struct AlertDispatcher {
    store: Arc<dyn MonitorStore>,
    notifiers: Arc<Vec<Arc<dyn Notifier>>>,
}

impl AlertDispatcher {
    /// Email and webhook channels
    pub fn new(store: Arc<dyn MonitorStore>) -> Self {
        Self::with_notifiers(
            store,
            vec![
                Arc::new(EmailNotifier),
                Arc::new(WebhookNotifier::default()),
            ],
        )
    }

    pub fn with_notifiers(store: Arc<dyn MonitorStore>, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            store,
            notifiers: Arc::new(notifiers),
        }
    }

    /// Deliver in the background; the caller never waits on a channel
    pub fn dispatch(&self, alert: Alert) -> JoinHandle<usize> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.deliver(&alert).await })
    }

    /// Deliver to every channel, returning how many accepted the alert
    ///
    /// Errors are logged per channel and never returned.
    #[instrument(skip(self, alert), fields(entity = %alert.entity, status = %alert.status))]
    pub async fn deliver(&self, alert: &Alert) -> usize {
        let settings = match self.store.load_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{}", AlertError::from(e));
                return 0;
            }
        };

        let mut sent = 0;
        for notifier in self.notifiers.iter() {
            match notifier.notify(alert, &settings).await {
                Ok(Delivery::Sent) => sent += 1,
                Ok(Delivery::NotConfigured) => {
                    trace!(channel = notifier.name(), "channel not configured")
                }
                Err(e) => error!(channel = notifier.name(), "failed to send alert: {e}"),
            }
        }
        sent
    }
}
