//! Purchaser notifications (order confirmations, refund receipts).
//!
//! Producers hand a message to a bounded queue and move on. A worker drains
//! it and delivers each message on its own task through a `NotificationSink`,
//! retrying transient failures. A message stuck in backoff holds only its own
//! slot, so it cannot delay the messages queued behind it. Nothing here can
//! fail or slow down a webhook or refund response.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::models::OrderStatus;

/// Retry delays in seconds (exponential backoff: 1s, 4s, 16s)
pub const RETRY_DELAYS: &[u64] = &[1, 4, 16];

/// Deliveries in flight at once, retries included.
pub const MAX_CONCURRENT_DELIVERIES: usize = 16;

pub fn default_retry_delays() -> Vec<Duration> {
    RETRY_DELAYS.iter().map(|s| Duration::from_secs(*s)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketSummary {
    pub ticket_id: String,
    pub ticket_type_id: String,
    pub confirmation_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    OrderConfirmed {
        order_id: String,
        /// Receipt form of the order id
        short_id: String,
        event_id: String,
        event_name: String,
        purchaser_email: String,
        purchaser_name: Option<String>,
        total_cents: i64,
        currency: String,
        tickets: Vec<TicketSummary>,
    },
    /// A refund this service requested from the processor.
    RefundIssued {
        order_id: String,
        purchaser_email: String,
        refund_id: String,
        amount_cents: i64,
        fee_cents: i64,
        total_refunded_cents: i64,
        order_status: OrderStatus,
    },
    /// A refund observed from the processor side (dashboard, dispute, etc.)
    RefundReconciled {
        order_id: String,
        purchaser_email: String,
        total_refunded_cents: i64,
        order_status: OrderStatus,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderConfirmed { .. } => "order_confirmed",
            Self::RefundIssued { .. } => "refund_issued",
            Self::RefundReconciled { .. } => "refund_reconciled",
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            Self::OrderConfirmed { order_id, .. }
            | Self::RefundIssued { order_id, .. }
            | Self::RefundReconciled { order_id, .. } => order_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Worth retrying (network error, 5xx, 429)
    Transient(String),
    /// Receiver rejected the message; retrying won't help
    Permanent(String),
}

pub trait NotificationSink: Send + Sync + 'static {
    fn deliver<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            let payload = serde_json::to_string(notification)
                .map_err(|e| DeliveryError::Permanent(e.to_string()))?;
            tracing::info!(
                kind = notification.kind(),
                order_id = %notification.order_id(),
                payload = %payload,
                "Notification"
            );
            Ok(())
        })
    }
}

/// POSTs each notification as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl NotificationSink for WebhookSink {
    fn deliver<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .header("X-Boxoffice-Event", notification.kind())
                .json(notification)
                .timeout(Duration::from_secs(10))
                .send()
                .await
                .map_err(|e| DeliveryError::Transient(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            let body = response.text().await.unwrap_or_default();
            let detail = format!("{}: {}", status, body);
            if status.as_u16() == 429 || status.is_server_error() {
                Err(DeliveryError::Transient(detail))
            } else {
                Err(DeliveryError::Permanent(detail))
            }
        })
    }
}

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Start the delivery worker on the current tokio runtime.
    pub fn spawn(
        sink: Arc<dyn NotificationSink>,
        capacity: usize,
        retry_delays: Vec<Duration>,
    ) -> Self {
        let (notifier, rx) = Self::channel(capacity);
        tokio::spawn(run_worker(rx, sink, retry_delays));
        notifier
    }

    /// A notifier whose messages land on the returned receiver, undelivered.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a message without waiting. Drops it (with a warning) when the
    /// queue is full or the worker is gone.
    pub fn enqueue(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                tracing::warn!(
                    kind = n.kind(),
                    order_id = %n.order_id(),
                    "Notification queue full, dropping message"
                );
            }
            Err(TrySendError::Closed(n)) => {
                tracing::warn!(
                    kind = n.kind(),
                    order_id = %n.order_id(),
                    "Notification worker stopped, dropping message"
                );
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Notification>,
    sink: Arc<dyn NotificationSink>,
    retry_delays: Vec<Duration>,
) {
    let slots = Arc::new(Semaphore::new(MAX_CONCURRENT_DELIVERIES));
    let retry_delays: Arc<[Duration]> = retry_delays.into();

    while let Some(notification) = rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let sink = sink.clone();
        let retry_delays = retry_delays.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let kind = notification.kind();
            let order_id = notification.order_id().to_string();

            let result = AssertUnwindSafe(deliver_with_retry(
                sink.as_ref(),
                &notification,
                &retry_delays,
            ))
            .catch_unwind()
            .await;

            if let Err(panic) = result {
                let panic_msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    kind,
                    order_id = %order_id,
                    "Notification delivery panicked: {}",
                    panic_msg
                );
            }
        });
    }

    tracing::debug!("Notification worker stopped");
}

/// Deliver one message, retrying transient failures. Returns whether it landed.
async fn deliver_with_retry(
    sink: &dyn NotificationSink,
    notification: &Notification,
    retry_delays: &[Duration],
) -> bool {
    let delays = std::iter::once(Duration::ZERO).chain(retry_delays.iter().copied());
    for (attempt, delay) in delays.enumerate() {
        if attempt > 0 {
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                order_id = %notification.order_id(),
                "Retrying notification after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        match sink.deliver(notification).await {
            Ok(()) => {
                tracing::debug!(
                    kind = notification.kind(),
                    order_id = %notification.order_id(),
                    attempt,
                    "Notification delivered"
                );
                return true;
            }
            Err(DeliveryError::Permanent(e)) => {
                tracing::error!(
                    kind = notification.kind(),
                    order_id = %notification.order_id(),
                    error = %e,
                    "Notification rejected, not retrying"
                );
                return false;
            }
            Err(DeliveryError::Transient(e)) => {
                tracing::debug!(error = %e, "Notification delivery failed");
            }
        }
    }

    tracing::error!(
        kind = notification.kind(),
        order_id = %notification.order_id(),
        attempts = retry_delays.len() + 1,
        "Notification failed after all retries"
    );
    false
}
