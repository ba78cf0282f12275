//! Alert dispatcher.
//!
//! Maps findings to a delivery tier and fans each alert out to that tier's
//! channels. Delivery runs on spawned tasks with its own retry loop, so a
//! slow or failing channel never holds up ingestion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use findings_core::{Error, Finding, PipelineConfig, Result, Severity};
use findings_store::bounded;

/// Delivery tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTier {
    /// Standard channels only
    Standard,
    /// Standard plus critical-escalation channels
    Escalation,
}

impl AlertTier {
    /// Tier for a finding, if it alerts at all.
    pub fn for_severity(severity: Severity) -> Option<Self> {
        match severity {
            Severity::Critical => Some(Self::Escalation),
            Severity::High => Some(Self::Standard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Finding,
    /// Pipeline health, e.g. the store being unavailable
    Operational,
}

/// A notification to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub channel_id: String,
    pub kind: AlertKind,
    pub tier: AlertTier,
    pub subject: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Alert for a stored finding; `None` below HIGH.
    pub fn for_finding(finding: &Finding, channel_id: &str) -> Option<Self> {
        let tier = AlertTier::for_severity(finding.severity)?;
        Some(Self {
            alert_id: Uuid::new_v4(),
            channel_id: channel_id.to_string(),
            kind: AlertKind::Finding,
            tier,
            subject: format!("Security Finding - {}", finding.severity),
            message: finding
                .title
                .clone()
                .unwrap_or_else(|| finding.description.clone()),
            severity: Some(finding.severity),
            finding_id: Some(finding.id.clone()),
            resource: Some(finding.resource.clone()),
            timestamp: Utc::now(),
        })
    }

    pub fn operational(message: impl Into<String>, channel_id: &str) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            channel_id: channel_id.to_string(),
            kind: AlertKind::Operational,
            tier: AlertTier::Escalation,
            subject: "Findings pipeline - operational alert".to_string(),
            message: message.into(),
            severity: None,
            finding_id: None,
            resource: None,
            timestamp: Utc::now(),
        }
    }
}

/// A notification destination.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the structured log.
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        info!(
            alert_id = %alert.alert_id,
            channel_id = %alert.channel_id,
            tier = ?alert.tier,
            finding_id = alert.finding_id.as_deref().unwrap_or("-"),
            subject = %alert.subject,
            "Alert"
        );
        Ok(())
    }
}

/// Posts alerts as JSON to a webhook.
pub struct WebhookChannel {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build webhook client: {}", e)))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| Error::notification(format!("{}: {}", self.name, e)))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::notification(format!(
                "{}: webhook returned {}",
                self.name,
                resp.status()
            )))
        }
    }
}

/// Routes alerts to channels by tier.
pub struct AlertDispatcher {
    channel_id: String,
    standard: Vec<Arc<dyn AlertChannel>>,
    escalation: Vec<Arc<dyn AlertChannel>>,
    max_attempts: u32,
    backoff: Duration,
    call_timeout: Duration,
    dispatched: AtomicU64,
    in_flight: Arc<AtomicU64>,
}

impl AlertDispatcher {
    /// A dispatcher with no channels.
    pub fn new(
        channel_id: impl Into<String>,
        max_attempts: u32,
        backoff: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            standard: Vec::new(),
            escalation: Vec::new(),
            max_attempts: max_attempts.max(1),
            backoff,
            call_timeout,
            dispatched: AtomicU64::new(0),
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Log channel on the standard tier plus the configured webhooks.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let alerts = &config.alerts;
        let mut dispatcher = Self::new(
            config.notification_channel_id.clone(),
            alerts.max_attempts,
            Duration::from_millis(alerts.backoff_ms),
            config.call_timeout(),
        )
        .with_standard_channel(Arc::new(LogChannel));

        if let Some(url) = &alerts.webhook_url {
            dispatcher = dispatcher.with_standard_channel(Arc::new(WebhookChannel::new(
                "webhook",
                url,
                config.call_timeout(),
            )?));
        }
        if let Some(url) = &alerts.escalation_webhook_url {
            dispatcher = dispatcher.with_escalation_channel(Arc::new(WebhookChannel::new(
                "escalation-webhook",
                url,
                config.call_timeout(),
            )?));
        }
        Ok(dispatcher)
    }

    pub fn with_standard_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.standard.push(channel);
        self
    }

    pub fn with_escalation_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.escalation.push(channel);
        self
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Channels an alert of `tier` fans out to.
    pub fn channels_for(&self, tier: AlertTier) -> Vec<Arc<dyn AlertChannel>> {
        match tier {
            AlertTier::Standard => self.standard.clone(),
            AlertTier::Escalation => self
                .standard
                .iter()
                .chain(self.escalation.iter())
                .cloned()
                .collect(),
        }
    }

    /// Number of dispatch attempts made.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Hand an alert to its channels. Returns immediately; the handle
    /// resolves once every channel delivered or gave up.
    pub fn dispatch(&self, alert: Alert) -> JoinHandle<()> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        metrics().alerts_dispatched.inc();
        if alert.kind == AlertKind::Operational {
            metrics().operational_alerts.inc();
        }

        let channels = self.channels_for(alert.tier);
        let max_attempts = self.max_attempts;
        let backoff = self.backoff;
        let call_timeout = self.call_timeout;
        let in_flight = self.in_flight.clone();

        metrics()
            .alerts_in_flight
            .set(in_flight.fetch_add(1, Ordering::SeqCst) + 1);

        debug!(
            alert_id = %alert.alert_id,
            tier = ?alert.tier,
            channels = channels.len(),
            "Dispatching alert"
        );

        tokio::spawn(async move {
            let alert = Arc::new(alert);
            let deliveries: Vec<_> = channels
                .into_iter()
                .map(|channel| {
                    let alert = alert.clone();
                    tokio::spawn(async move {
                        deliver_with_retry(channel, &alert, max_attempts, backoff, call_timeout)
                            .await
                    })
                })
                .collect();

            for delivery in deliveries {
                if let Err(e) = delivery.await {
                    error!(error = %e, "Alert delivery task failed");
                }
            }

            let remaining = in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            metrics().alerts_in_flight.set(remaining);
        })
    }

    /// Dispatch the alert for a stored finding. Returns whether one was sent.
    pub fn dispatch_finding(&self, finding: &Finding) -> bool {
        match Alert::for_finding(finding, &self.channel_id) {
            Some(alert) => {
                self.dispatch(alert);
                true
            }
            None => false,
        }
    }

    pub fn dispatch_operational(&self, message: impl Into<String>) -> JoinHandle<()> {
        self.dispatch(Alert::operational(message, &self.channel_id))
    }
}

async fn deliver_with_retry(
    channel: Arc<dyn AlertChannel>,
    alert: &Alert,
    max_attempts: u32,
    backoff: Duration,
    call_timeout: Duration,
) {
    for attempt in 1..=max_attempts {
        match bounded("alert.deliver", call_timeout, channel.deliver(alert)).await {
            Ok(()) => {
                metrics().alerts_delivered.inc();
                return;
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    channel = channel.name(),
                    alert_id = %alert.alert_id,
                    attempt,
                    error = %e,
                    "Alert delivery failed, retrying"
                );
                tokio::time::sleep(backoff * attempt).await;
            }
            Err(e) => {
                metrics().alert_delivery_failures.inc();
                error!(
                    channel = channel.name(),
                    alert_id = %alert.alert_id,
                    attempts = max_attempts,
                    error = %e,
                    "Alert delivery gave up"
                );
            }
        }
    }
}
