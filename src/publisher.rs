//! Event publication.
//!
//! [`EventPublisher::publish`] only enqueues. A background worker drains the
//! queue and hands each record to every configured [`EventSink`] under a
//! timeout. Delivery failures are logged and dropped, never retried.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, SecondsFormat, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::Amount;
use crate::baseline::partition_path;
use crate::model::{Destination, EventType, UserId};
use crate::origin::ResolvedOrigin;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook responded with status {0}")]
    Status(u16),

    #[error("event log write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{sink} sink timed out after {elapsed:?}")]
    Timeout { sink: &'static str, elapsed: Duration },
}

/// Value of the `result` field of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventResult {
    Success,
    Failure,
    Blocked,
    /// Login of an account in `MEDIUM` status.
    MidVerification,
    /// Transfer allowed through the verified path.
    Verified,
}

/// Published event. Transfer fields are absent on login and logout events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub timestamp: String,
    pub event_type: EventType,
    pub event_id: Uuid,
    pub user_id: UserId,
    pub result: EventResult,
    pub src_ip: String,
    pub country: String,
    pub hour_of_day: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_bank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_amount: Option<f64>,
}

impl EventRecord {
    /// Login or logout event.
    pub fn auth(
        event_type: EventType,
        user: &UserId,
        result: EventResult,
        origin: &ResolvedOrigin,
        at: DateTime<Local>,
    ) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, false),
            event_type,
            event_id: Uuid::new_v4(),
            user_id: user.clone(),
            result,
            src_ip: origin.source_ip.clone(),
            country: origin.country.clone(),
            hour_of_day: at.hour(),
            amount: None,
            to_bank: None,
            to_account_id: None,
            avg_amount: None,
        }
    }

    pub fn transfer(
        user: &UserId,
        result: EventResult,
        origin: &ResolvedOrigin,
        amount: Amount,
        destination: &Destination,
        avg_amount: f64,
        at: DateTime<Local>,
    ) -> Self {
        Self {
            amount: Some(amount),
            to_bank: Some(destination.label.clone()),
            to_account_id: Some(destination.account_ref.clone()),
            avg_amount: Some(avg_amount),
            ..Self::auth(EventType::Transfer, user, result, origin, at)
        }
    }
}

/// Destination of published events.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &EventRecord) -> Result<(), PublishError>;
}

/// Posts each event as JSON to an automation webhook.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, event: &EventRecord) -> Result<(), PublishError> {
        let response = self.client.post(&self.url).json(event).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Appends events to the daily log partition read by the baseline.
#[derive(Debug, Clone)]
pub struct EventLogSink {
    log_dir: PathBuf,
}

impl EventLogSink {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }
}

#[async_trait]
impl EventSink for EventLogSink {
    fn name(&self) -> &'static str {
        "event_log"
    }

    async fn deliver(&self, event: &EventRecord) -> Result<(), PublishError> {
        let date = DateTime::parse_from_rfc3339(&event.timestamp)
            .map(|t| t.date_naive())
            .unwrap_or_else(|_| Local::now().date_naive());

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        tokio::fs::create_dir_all(&self.log_dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(partition_path(&self.log_dir, date))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Emits events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, event: &EventRecord) -> Result<(), PublishError> {
        info!(
            event_id = %event.event_id,
            event_type = ?event.event_type,
            user = %event.user_id,
            result = ?event.result,
            src_ip = %event.src_ip,
            country = %event.country,
            amount = ?event.amount.map(Amount::get),
            avg_amount = ?event.avg_amount,
            "event published"
        );
        Ok(())
    }
}

/// Cheap, cloneable handle onto the outbound event queue.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::UnboundedSender<EventRecord>,
}

impl EventPublisher {
    /// A publisher and the raw receiving end of its queue.
    pub fn unbounded() -> (Self, mpsc::UnboundedReceiver<EventRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// A publisher whose queue is drained by a background worker delivering
    /// to `sinks`. The worker stops once every handle has been dropped.
    pub fn spawn(sinks: Vec<Arc<dyn EventSink>>, timeout: Duration) -> (Self, JoinHandle<()>) {
        let (publisher, receiver) = Self::unbounded();
        let worker = tokio::spawn(publish_worker(receiver, sinks, timeout));
        (publisher, worker)
    }

    /// Enqueue an event. Never blocks and never fails the caller.
    pub fn publish(&self, event: EventRecord) {
        let event_id = event.event_id;
        if self.sender.send(event).is_err() {
            warn!(%event_id, "event queue closed, event dropped");
        }
    }
}

async fn publish_worker(
    mut receiver: mpsc::UnboundedReceiver<EventRecord>,
    sinks: Vec<Arc<dyn EventSink>>,
    timeout: Duration,
) {
    debug!(sinks = sinks.len(), "event publisher started");

    while let Some(event) = receiver.recv().await {
        for sink in &sinks {
            let result = match tokio::time::timeout(timeout, sink.deliver(&event)).await {
                Ok(result) => result,
                Err(_) => Err(PublishError::Timeout {
                    sink: sink.name(),
                    elapsed: timeout,
                }),
            };

            match result {
                Ok(()) => debug!(sink = sink.name(), event_id = %event.event_id, "event delivered"),
                Err(e) => error!(
                    sink = sink.name(),
                    event_id = %event.event_id,
                    error = %e,
                    "event delivery failed"
                ),
            }
        }
    }

    debug!("event publisher shutting down");
}
