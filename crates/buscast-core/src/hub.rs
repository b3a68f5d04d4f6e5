//! ---
//! bc_section: "02-position-engine"
//! bc_subsection: "module"
//! bc_type: "source"
//! bc_scope: "code"
//! bc_description: "Fan-out of position batches to live subscribers."
//! bc_version: "v0.1.0"
//! bc_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buscast_metrics::EngineMetrics;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SendError;
use crate::model::BroadcastPayload;

/// Inbound keepalive text.
pub const PING: &str = "ping";
/// Reply to [`PING`].
pub const PONG: &str = "pong";

/// Reply owed to an inbound subscriber message, if any.
pub fn keepalive_reply(message: &str) -> Option<&'static str> {
    (message == PING).then_some(PONG)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sink for serialized broadcast messages.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    async fn send(&self, message: Arc<str>) -> Result<(), SendError>;
}

/// Bounded queue in front of a connection writer.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Arc<str>>,
    timeout: Duration,
}

impl ChannelSubscriber {
    /// Subscriber half plus the receiver the connection task drains.
    pub fn channel(capacity: usize, timeout: Duration) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, timeout }, rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn send(&self, message: Arc<str>) -> Result<(), SendError> {
        self.tx
            .send_timeout(message, self.timeout)
            .await
            .map_err(|err| match err {
                mpsc::error::SendTimeoutError::Timeout(_) => SendError::Timeout,
                mpsc::error::SendTimeoutError::Closed(_) => SendError::Closed,
            })
    }
}

/// Outcome of one publish pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Registry of live subscribers.
#[derive(Default)]
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
    metrics: Option<EngineMetrics>,
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId::new();
        let count = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(id, subscriber);
            subscribers.len()
        };
        self.update_gauge(count);
        debug!(subscriber = %id, subscribers = count, "subscriber registered");
        id
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.lock();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };
        if removed {
            self.update_gauge(count);
            debug!(subscriber = %id, subscribers = count, "subscriber removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    /// Serialize `payload` once and deliver it to every subscriber.
    pub async fn publish(
        &self,
        payload: &BroadcastPayload,
    ) -> Result<PublishReport, serde_json::Error> {
        let message: Arc<str> = serde_json::to_string(payload)?.into();
        Ok(self.publish_text(message).await)
    }

    /// Deliver `message` to a snapshot of the registry. Subscribers whose send fails
    /// are removed once the pass completes; the rest are unaffected.
    pub async fn publish_text(&self, message: Arc<str>) -> PublishReport {
        let snapshot: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, subscriber)| (*id, subscriber.clone()))
            .collect();
        if snapshot.is_empty() {
            return PublishReport::default();
        }

        let sends = snapshot.iter().map(|(id, subscriber)| {
            let message = message.clone();
            async move { (*id, subscriber.send(message).await) }
        });
        let results = join_all(sends).await;

        let mut report = PublishReport::default();
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(subscriber = %id, error = %err, "dropping subscriber after failed send");
                    failed.push(id);
                }
            }
        }
        report.failed = failed.len();

        if !failed.is_empty() {
            let count = {
                let mut subscribers = self.subscribers.lock();
                for id in &failed {
                    subscribers.remove(id);
                }
                subscribers.len()
            };
            self.update_gauge(count);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_publish(report.delivered, report.failed);
        }
        report
    }

    fn update_gauge(&self, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_subscribers(count);
        }
    }
}
