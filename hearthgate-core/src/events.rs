//! Fire-and-forget event notifications.
//!
//! Notable edge events (a fresh enumeration, an offline fallback, an executed
//! command) are posted to an optional webhook. Delivery never blocks a
//! request: envelopes go onto a bounded queue drained by one background
//! worker, and a full queue drops the event with a warning.
//!
//! No retries. A failed delivery is logged and forgotten.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// Events published by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeEvent {
    /// An enumeration was answered by upstream and cached.
    Enumerate,
    /// A ReadState was answered from cache during an outage.
    OfflineFallback,
    /// An execute call succeeded upstream.
    Execute,
}

impl EdgeEvent {
    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeEvent::Enumerate => "enumerate",
            EdgeEvent::OfflineFallback => "offline_fallback",
            EdgeEvent::Execute => "execute",
        }
    }
}

/// Body posted to the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Event name.
    pub event: EdgeEvent,
    /// When the event was queued.
    pub timestamp: DateTime<Utc>,
    /// Event-specific payload.
    pub data: Value,
}

/// Notifier settings.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Webhook target. `None` disables notifications.
    pub webhook_url: Option<String>,
    /// Bounded queue capacity.
    pub queue_capacity: usize,
    /// Per-delivery timeout.
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            queue_capacity: 256,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Handle used by request tasks to queue events.
#[derive(Debug, Clone, Default)]
pub struct EventNotifier {
    tx: Option<mpsc::Sender<EventEnvelope>>,
}

impl EventNotifier {
    /// A notifier that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Start the delivery worker. Must be called inside a tokio runtime.
    ///
    /// Returns a disabled notifier when no URL is configured. The worker
    /// stops when `shutdown` is cancelled or every handle is dropped.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidWebhookUrl`] or [`ConfigError::HttpClient`].
    pub fn spawn(config: NotifierConfig, shutdown: CancellationToken) -> Result<Self, ConfigError> {
        let Some(url) = config.webhook_url else {
            debug!("No webhook configured, event notifications disabled");
            return Ok(Self::disabled());
        };

        let url = reqwest::Url::parse(&url).map_err(|e| ConfigError::InvalidWebhookUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        info!(
            url = %url,
            queue_capacity = config.queue_capacity,
            "Event notifications enabled"
        );

        tokio::spawn(delivery_worker(client, url, rx, shutdown));

        Ok(Self { tx: Some(tx) })
    }

    /// Whether events are delivered anywhere.
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an event. Never blocks and never fails.
    pub fn notify(&self, event: EdgeEvent, data: Value) {
        let Some(ref tx) = self.tx else {
            return;
        };

        let envelope = EventEnvelope {
            event,
            timestamp: Utc::now(),
            data,
        };

        match tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(
                    event = dropped.event.as_str(),
                    "Event queue full, dropping notification"
                );
            }
            Err(TrySendError::Closed(dropped)) => {
                debug!(
                    event = dropped.event.as_str(),
                    "Event worker stopped, dropping notification"
                );
            }
        }
    }
}

async fn delivery_worker(
    client: reqwest::Client,
    url: reqwest::Url,
    mut rx: mpsc::Receiver<EventEnvelope>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Event delivery worker shutting down");
                break;
            }
            next = rx.recv() => {
                let Some(envelope) = next else {
                    debug!("Event queue closed, stopping delivery worker");
                    break;
                };
                deliver(&client, &url, &envelope).await;
            }
        }
    }
}

async fn deliver(client: &reqwest::Client, url: &reqwest::Url, envelope: &EventEnvelope) {
    let event = envelope.event.as_str();
    match client.post(url.clone()).json(envelope).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(event, status = %response.status(), "Event delivered");
        }
        Ok(response) => {
            warn!(event, status = %response.status(), "Event delivery rejected");
        }
        Err(e) => {
            warn!(event, error = %e, "Event delivery failed");
        }
    }
}
